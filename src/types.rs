//! Shared domain types: tab identity, tool calls, and tool outcomes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Browser tab identity. All per-conversation state is keyed by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabId(pub i64);

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tab#{}", self.0)
    }
}

/// Stable identifier of a detected marker span, used for deduplication.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Signature(pub String);

impl Signature {
    /// Short prefix for log lines.
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A tool invocation parsed from a marker payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
    /// Downstream service that owns the tool, when the model named one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_service: Option<String>,
}

impl ToolCall {
    /// String argument lookup.
    pub fn str_arg(&self, key: &str) -> Option<&str> {
        self.arguments.get(key).and_then(Value::as_str)
    }

    /// Unsigned integer argument lookup; accepts numeric strings.
    pub fn u64_arg(&self, key: &str) -> Option<u64> {
        match self.arguments.get(key)? {
            Value::Number(n) => n.as_u64(),
            Value::String(text) => text.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn bool_arg(&self, key: &str) -> Option<bool> {
        match self.arguments.get(key)? {
            Value::Bool(b) => Some(*b),
            Value::String(text) => text.trim().parse().ok(),
            _ => None,
        }
    }
}

/// One downstream tool service known to the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Core services are announced with their full description.
    #[serde(default)]
    pub is_core: bool,
}

/// One tool in a service catalogue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, alias = "inputSchema", skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
}

/// Handle for a large result the bridge kept server-side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRef {
    pub cache_id: String,
    pub size_bytes: u64,
    pub kind: Option<String>,
}

/// Successful tool result shapes.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolSuccess {
    /// Raw result value returned inline.
    Value(Value),
    /// Large result deferred to the paged-retrieval protocol.
    Cached(CacheRef),
    /// Catalogue of one service, answering `list_tools_in_service`.
    Listing { service: String, tools: Vec<ToolInfo> },
}

/// Failure classes surfaced to the model and to the event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    TransportTimeout,
    BridgeUnreachable,
    Execution,
    InvalidResponse,
    InvalidArguments,
}

/// Failed tool call, excerpted for model-facing feedback.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolFailure {
    pub message: String,
    pub kind: FailureKind,
    pub error_type: Option<String>,
    pub stack_excerpt: Option<String>,
}

/// Result of dispatching one tool call.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    Success(ToolSuccess),
    Failure(ToolFailure),
}

impl ToolOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}
