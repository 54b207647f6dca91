//! Model-text reconstruction from raw response bodies.
//!
//! Hosts deliver responses as one JSON document, as a growing SSE buffer, or
//! as plain text. Progress notifications may repeat or arrive out of order,
//! so SSE text is always recomputed from the complete buffer instead of being
//! diffed against earlier fragments.

use crate::site::profile::scalar_text;
use crate::site::{ContentFilter, FieldPath, ResponseRules, Transport};
use serde_json::Value;

/// Per-response memo so an identical buffer is not re-parsed.
#[derive(Debug, Clone, Default)]
pub struct ExtractState {
    last_raw: Option<String>,
    text: String,
}

impl ExtractState {
    /// Text produced by the most recent extraction.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Buffer the most recent extraction ran on.
    pub fn raw(&self) -> Option<&str> {
        self.last_raw.as_deref()
    }

    /// Clear the memo, returning the last buffer seen.
    pub fn take_raw(&mut self) -> Option<String> {
        self.text.clear();
        self.last_raw.take()
    }
}

/// Extract the model text accumulated so far in `raw`.
pub fn extract(raw: &str, rules: &ResponseRules, state: &mut ExtractState) -> String {
    if state.last_raw.as_deref() == Some(raw) {
        return state.text.clone();
    }
    let text = extract_text(raw, rules);
    state.last_raw = Some(raw.to_string());
    state.text = text.clone();
    text
}

/// Stateless extraction of the full text in `raw`.
pub fn extract_text(raw: &str, rules: &ResponseRules) -> String {
    match rules.transport {
        Transport::Text => raw.to_string(),
        Transport::Json => extract_json(raw, rules),
        Transport::Sse => extract_sse(raw, rules),
    }
}

fn extract_json(raw: &str, rules: &ResponseRules) -> String {
    match serde_json::from_str::<Value>(raw) {
        Ok(body) => extract_by_paths(&body, &rules.content_paths, rules.filter.as_ref())
            .unwrap_or_default(),
        Err(err) => {
            tracing::debug!("json response did not parse, using raw text: {err}");
            raw.to_string()
        }
    }
}

fn extract_sse(raw: &str, rules: &ResponseRules) -> String {
    let mut text = String::new();
    for event in event_values(raw) {
        if let Some(fragment) =
            extract_by_paths(&event, &rules.content_paths, rules.filter.as_ref())
        {
            text.push_str(&fragment);
        }
    }
    text
}

/// Decode every complete JSON event in an SSE buffer, in arrival order.
fn event_values(raw: &str) -> Vec<Value> {
    let mut values = Vec::new();
    for payload in sse_data_payloads(raw) {
        if let Ok(value) = serde_json::from_str::<Value>(&payload) {
            values.push(value);
            continue;
        }
        // Some hosts omit the blank separator line; try each data line alone.
        if payload.contains('\n') {
            values.extend(
                payload
                    .lines()
                    .filter_map(|line| serde_json::from_str::<Value>(line).ok()),
            );
        }
    }
    values
}

/// Collect `data:` payloads grouped by blank-line event boundaries.
///
/// Comment lines and non-data fields are dropped, as are empty payloads and
/// the `[DONE]` sentinel. A trailing unterminated event is still returned so
/// partially received buffers yield their complete lines.
pub(crate) fn sse_data_payloads(raw: &str) -> Vec<String> {
    let mut payloads = Vec::new();
    let mut data_lines: Vec<&str> = Vec::new();

    for line in raw.lines() {
        if line.is_empty() {
            flush_event(&mut data_lines, &mut payloads);
            continue;
        }
        if let Some(value) = line.strip_prefix("data:") {
            data_lines.push(value.strip_prefix(' ').unwrap_or(value));
        }
    }
    flush_event(&mut data_lines, &mut payloads);
    payloads
}

fn flush_event(data_lines: &mut Vec<&str>, payloads: &mut Vec<String>) {
    if data_lines.is_empty() {
        return;
    }
    let payload = data_lines.join("\n");
    data_lines.clear();
    let trimmed = payload.trim();
    if trimmed.is_empty() || trimmed == "[DONE]" {
        return;
    }
    payloads.push(trimmed.to_string());
}

/// First non-empty scalar found along `paths`, honoring the channel filter.
pub fn extract_by_paths(
    event: &Value,
    paths: &[FieldPath],
    filter: Option<&ContentFilter>,
) -> Option<String> {
    let discriminator = filter.and_then(|filter| discriminator_value(event, filter));
    for path in paths {
        let Ok(value) = path.get(event) else {
            continue;
        };
        let Some(text) = scalar_text(&value) else {
            continue;
        };
        if text.is_empty() {
            continue;
        }
        if let (Some(filter), Some(channel)) = (filter, discriminator.as_deref()) {
            if !channel_allowed(filter, channel) {
                continue;
            }
        }
        return Some(text);
    }
    None
}

fn discriminator_value(event: &Value, filter: &ContentFilter) -> Option<String> {
    if filter.discriminator_field.is_empty() {
        return None;
    }
    let value = event.get(&filter.discriminator_field)?;
    let text = match value {
        Value::Null => return None,
        Value::String(text) => text.clone(),
        other => other.to_string(),
    };
    (!text.is_empty()).then_some(text)
}

fn channel_allowed(filter: &ContentFilter, channel: &str) -> bool {
    if filter
        .exclude_patterns
        .iter()
        .any(|pattern| channel.contains(pattern.as_str()))
    {
        return false;
    }
    filter.include_patterns.is_empty()
        || filter
            .include_patterns
            .iter()
            .any(|pattern| channel.contains(pattern.as_str()))
}
