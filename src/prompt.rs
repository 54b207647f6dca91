//! Model-facing text: the capability announcement, the reminder, and every
//! feedback message sent back after a tool call.
//!
//! All texts live in template files and are rendered from one code path with
//! `{{KEY}}` placeholders. The marker name is a placeholder too, so a
//! configured marker is taught consistently.

use crate::error::MalformedToolCall;
use crate::types::{CacheRef, ServiceInfo, ToolCall, ToolFailure, ToolInfo, ToolOutcome, ToolSuccess};
use serde_json::Value;
use std::collections::BTreeMap;

const INITIAL_PROMPT_TEMPLATE: &str = include_str!("templates/initial_prompt.template");
const REMINDER_PROMPT_TEMPLATE: &str = include_str!("templates/reminder_prompt.template");
const TOOL_RESULT_TEMPLATE: &str = include_str!("templates/tool_result.template");
const TOOL_ERROR_TEMPLATE: &str = include_str!("templates/tool_error.template");
const CACHED_RESULT_TEMPLATE: &str = include_str!("templates/cached_result.template");
const TOOL_LISTING_TEMPLATE: &str = include_str!("templates/tool_listing.template");
const MALFORMED_CALL_TEMPLATE: &str = include_str!("templates/malformed_call.template");

/// Separator between an injected prompt and the user's own text.
pub const INJECTION_SEPARATOR: &str = "\n\n---\n\n";

/// Tool name used for two-level discovery.
pub const LIST_TOOLS: &str = "list_tools_in_service";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptBuilder {
    marker: String,
}

impl PromptBuilder {
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
        }
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }

    /// Full capability announcement for a new conversation.
    ///
    /// Core services are listed with their description, others by name.
    pub fn initial(&self, services: &[ServiceInfo]) -> String {
        let (core, other): (Vec<&ServiceInfo>, Vec<&ServiceInfo>) =
            services.iter().partition(|service| service.is_core);
        let mut vars = self.vars();
        vars.insert("CORE_SERVICES", render_core_services(&core));
        vars.insert("OTHER_SERVICES", render_other_services(&other));
        normalize_blank_lines(&render_template(INITIAL_PROMPT_TEMPLATE, &vars))
    }

    /// Short reminder for continuing conversations.
    pub fn reminder(&self) -> String {
        normalize_blank_lines(&render_template(REMINDER_PROMPT_TEMPLATE, &self.vars()))
    }

    pub fn tool_result(&self, tool_name: &str, result: &Value) -> String {
        let mut vars = self.vars();
        vars.insert("TOOL_NAME", tool_name.to_string());
        vars.insert("RESULT", render_result_value(result));
        render_template(TOOL_RESULT_TEMPLATE, &vars).trim().to_string()
    }

    pub fn tool_error(&self, tool_name: &str, failure: &ToolFailure) -> String {
        let mut vars = self.vars();
        vars.insert("TOOL_NAME", tool_name.to_string());
        vars.insert("ERROR", render_failure(failure));
        render_template(TOOL_ERROR_TEMPLATE, &vars).trim().to_string()
    }

    pub fn cached_result(&self, tool_name: &str, cache: &CacheRef) -> String {
        let mut vars = self.vars();
        vars.insert("TOOL_NAME", tool_name.to_string());
        vars.insert("SIZE_KB", format!("{:.2}", cache.size_bytes as f64 / 1024.0));
        vars.insert("SIZE_BYTES", cache.size_bytes.to_string());
        vars.insert("CACHE_ID", cache.cache_id.clone());
        vars.insert(
            "CHUNK",
            recommended_chunk_size(cache.size_bytes).to_string(),
        );
        render_template(CACHED_RESULT_TEMPLATE, &vars).trim().to_string()
    }

    pub fn tool_listing(&self, service: &str, tools: &[ToolInfo]) -> String {
        let mut vars = self.vars();
        vars.insert("SERVICE", service.to_string());
        vars.insert("TOOL_LIST", render_tool_list(tools));
        render_template(TOOL_LISTING_TEMPLATE, &vars).trim().to_string()
    }

    pub fn malformed_call(&self, error: &MalformedToolCall) -> String {
        let mut vars = self.vars();
        vars.insert("ERROR", error.to_string());
        render_template(MALFORMED_CALL_TEMPLATE, &vars).trim().to_string()
    }

    /// Feedback text for a finished dispatch.
    pub fn format_outcome(&self, call: &ToolCall, outcome: &ToolOutcome) -> String {
        match outcome {
            ToolOutcome::Success(ToolSuccess::Value(value)) => self.tool_result(&call.name, value),
            ToolOutcome::Success(ToolSuccess::Cached(cache)) => {
                self.cached_result(&call.name, cache)
            }
            ToolOutcome::Success(ToolSuccess::Listing { service, tools }) => {
                self.tool_listing(service, tools)
            }
            ToolOutcome::Failure(failure) => self.tool_error(&call.name, failure),
        }
    }

    fn vars(&self) -> BTreeMap<&'static str, String> {
        let mut vars = BTreeMap::new();
        vars.insert("MARKER", self.marker.clone());
        vars
    }
}

/// Wrap feedback before it is typed into the page.
pub fn wrap_feedback(text: &str) -> String {
    format!("<tool_result>\n{text}\n</tool_result>")
}

/// Prepend an injected prompt to the user's prompt text.
pub fn inject(prefix: &str, original: &str) -> String {
    format!("{prefix}{INJECTION_SEPARATOR}{original}")
}

/// Chunk size suggested for paging through a cached result.
pub fn recommended_chunk_size(total_size: u64) -> u64 {
    if total_size < 20_000 {
        5_000
    } else if total_size < 100_000 {
        8_000
    } else {
        10_000
    }
}

fn render_template(template: &str, vars: &BTreeMap<&str, String>) -> String {
    let mut rendered = template.to_string();
    for (key, value) in vars {
        let placeholder = format!("{{{{{key}}}}}");
        rendered = rendered.replace(&placeholder, value);
    }
    rendered
}

fn render_core_services(services: &[&ServiceInfo]) -> String {
    if services.is_empty() {
        return "- none".to_string();
    }
    services
        .iter()
        .map(|service| {
            let description = service.description.trim();
            if description.is_empty() {
                format!("- **{}**", service.name)
            } else {
                format!("- **{}**: {description}", service.name)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_other_services(services: &[&ServiceInfo]) -> String {
    if services.is_empty() {
        return "- none".to_string();
    }
    services
        .iter()
        .map(|service| format!("- {}", service.name))
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_tool_list(tools: &[ToolInfo]) -> String {
    if tools.is_empty() {
        return "This service exposes no tools.".to_string();
    }
    let mut lines = Vec::with_capacity(tools.len());
    for tool in tools {
        let description = tool.description.trim();
        let mut line = if description.is_empty() {
            format!("- `{}`", tool.name)
        } else {
            format!("- `{}`: {description}", tool.name)
        };
        if let Some(schema) = &tool.input_schema {
            line.push_str(&format!("\n  parameters: {schema}"));
        }
        lines.push(line);
    }
    lines.join("\n")
}

fn render_result_value(result: &Value) -> String {
    match result {
        Value::String(text) => text.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

fn render_failure(failure: &ToolFailure) -> String {
    let mut text = match &failure.error_type {
        Some(kind) => format!("[{kind}] {}", failure.message),
        None => failure.message.clone(),
    };
    if let Some(stack) = failure.stack_excerpt.as_deref().filter(|s| !s.trim().is_empty()) {
        text.push_str("\n\nStack trace:\n");
        text.push_str(stack);
    }
    text
}

fn normalize_blank_lines(text: &str) -> String {
    let mut out = String::new();
    let mut previous_blank = false;

    for line in text.lines() {
        let is_blank = line.trim().is_empty();
        if is_blank && previous_blank {
            continue;
        }
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(line.trim_end());
        previous_blank = is_blank;
    }

    out.trim().to_string()
}
