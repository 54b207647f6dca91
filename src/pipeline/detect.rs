//! Tool-call marker detection over accumulated model text.
//!
//! Models stream the marker token by token and sometimes drop or garble the
//! angle brackets, so every one of the four brackets is optional. The first
//! span wins; later spans in the same text are left for the next cycle.

use crate::error::{ConfigError, MalformedToolCall};
use crate::types::{Signature, ToolCall};
use regex::Regex;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

pub const DEFAULT_MARKER: &str = "tool_code";

/// One marker span found in the text.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub signature: Signature,
    /// Matched text, as used for the signature.
    pub span: String,
    pub call: Result<ToolCall, MalformedToolCall>,
}

impl Detection {
    pub fn is_malformed(&self) -> bool {
        self.call.is_err()
    }
}

#[derive(Debug, Clone)]
pub struct TagDetector {
    marker: String,
    pattern: Regex,
}

impl TagDetector {
    pub fn new(marker: &str) -> Result<Self, ConfigError> {
        let marker = marker.trim();
        if marker.is_empty() {
            return Err(ConfigError::Invalid("marker name must not be empty".into()));
        }
        if marker.contains(['<', '>', '/']) || marker.chars().any(char::is_whitespace) {
            return Err(ConfigError::Invalid(format!(
                "marker name `{marker}` must not contain brackets, slashes, or spaces"
            )));
        }
        let name = regex::escape(marker);
        let pattern = Regex::new(&format!(r"<?\s*{name}\s*>?([\s\S]*?)<?\s*/\s*{name}\s*>?"))
            .map_err(|err| ConfigError::Invalid(format!("marker pattern: {err}")))?;
        Ok(Self {
            marker: marker.to_string(),
            pattern,
        })
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }

    /// First marker span in `text`, or `None` when no span is complete yet.
    pub fn detect(&self, text: &str) -> Option<Detection> {
        let caps = self.pattern.captures(text)?;
        let whole = caps.get(0)?;
        let interior = caps.get(1)?;

        let mut start = whole.start();
        let mut call = parse_tool_call(interior.as_str());

        // Prose that mentions the marker name before the real tag makes the
        // match start too early; retry from the last opening inside it.
        // A complete prose example (opening and closing tag) ahead of the
        // real call is still the first span and is reported as malformed.
        if call.is_err() {
            if let Some((offset, inner)) = self.reanchor(interior.as_str()) {
                start = interior.start() + offset;
                call = parse_tool_call(inner);
            }
        }

        let span = &text[start..whole.end()];
        Some(Detection {
            signature: signature_of(span),
            span: span.to_string(),
            call,
        })
    }

    /// Offset of the last opening marker inside `interior` and the text
    /// following it.
    fn reanchor<'a>(&self, interior: &'a str) -> Option<(usize, &'a str)> {
        let at = interior.rfind(&self.marker)?;
        let mut open = at;
        let before = interior[..at].trim_end();
        if before.ends_with('<') {
            open = before.len() - 1;
        }
        let rest = interior[at + self.marker.len()..].trim_start();
        let rest = rest.strip_prefix('>').unwrap_or(rest);
        Some((open, rest))
    }
}

/// Dedup signature of a marker span.
///
/// Trailing `>` and whitespace are excluded so the span hashes the same
/// before and after its closing bracket arrives.
pub fn signature_of(span: &str) -> Signature {
    let stable = span.trim_end_matches(|c: char| c == '>' || c.is_whitespace());
    let digest = Sha256::digest(stable.as_bytes());
    Signature(
        digest
            .iter()
            .map(|byte| format!("{byte:02x}"))
            .collect::<String>(),
    )
}

/// Parse a marker interior into a tool call.
pub fn parse_tool_call(interior: &str) -> Result<ToolCall, MalformedToolCall> {
    let payload = strip_code_fence(interior.trim());
    let value: Value = serde_json::from_str(payload)
        .map_err(|err| MalformedToolCall::InvalidJson(err.to_string()))?;
    let Value::Object(mut object) = value else {
        return Err(MalformedToolCall::InvalidShape(
            "payload must be a JSON object".into(),
        ));
    };

    let name = ["tool_name", "name"]
        .iter()
        .find_map(|key| object.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .ok_or(MalformedToolCall::MissingName)?
        .to_string();

    let arguments = match object.remove("arguments") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(map)) => map,
        Some(_) => {
            return Err(MalformedToolCall::InvalidShape(
                "`arguments` must be a JSON object".into(),
            ))
        }
    };

    let target_service = ["server_name", "service_name"]
        .iter()
        .find_map(|key| object.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string);

    Ok(ToolCall {
        name,
        arguments,
        target_service,
    })
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop the info string (e.g. `json`) on the opening fence line.
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    body.trim_end().trim_end_matches("```").trim()
}
