//! Error types for the interception pipeline and the bridge client.

use std::fmt;

// ---------------------------------------------------------------------------
// ErrorDetail
// ---------------------------------------------------------------------------

/// Failure detail reported by the bridge service.
///
/// The bridge sends `detail` either as a plain string or as an object with
/// `error`, `type`, and `traceback` fields. Both shapes land here.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ErrorDetail {
    pub message: String,
    pub error_type: Option<String>,
    pub traceback: Option<String>,
}

impl ErrorDetail {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    /// Build a detail from a bridge `detail` value of either accepted shape.
    pub fn from_value(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::String(text) => Self::message(text.clone()),
            serde_json::Value::Object(map) => {
                let text_field = |key: &str| {
                    map.get(key)
                        .and_then(serde_json::Value::as_str)
                        .map(str::to_string)
                };
                Self {
                    message: text_field("error").unwrap_or_else(|| value.to_string()),
                    error_type: text_field("type"),
                    traceback: text_field("traceback"),
                }
            }
            other => Self::message(other.to_string()),
        }
    }
}

impl fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.error_type {
            Some(kind) => write!(f, "[{kind}] {}", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

// ---------------------------------------------------------------------------
// BridgeError
// ---------------------------------------------------------------------------

/// Errors from calls to the local bridge service.
#[derive(Debug)]
pub enum BridgeError {
    /// The call exceeded its timeout budget and was cancelled.
    Timeout { endpoint: String, secs: u64 },
    /// Connection refused, DNS failure, or other connect-level error.
    Unreachable(String),
    /// Non-2xx status with the parsed failure detail.
    Status { code: u16, detail: ErrorDetail },
    /// 2xx response whose envelope reported `success: false`.
    Application(ErrorDetail),
    /// Body could not be decoded into the expected shape.
    InvalidResponse(String),
}

impl BridgeError {
    /// Structured failure detail when the bridge supplied one.
    pub fn detail(&self) -> Option<&ErrorDetail> {
        match self {
            Self::Status { detail, .. } | Self::Application(detail) => Some(detail),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::Unreachable(_))
    }

    /// Classify a reqwest failure for the given endpoint.
    pub fn from_reqwest(endpoint: &str, secs: u64, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout {
                endpoint: endpoint.to_string(),
                secs,
            }
        } else if err.is_connect() {
            Self::Unreachable(err.to_string())
        } else if err.is_decode() {
            Self::InvalidResponse(err.to_string())
        } else {
            Self::Unreachable(err.to_string())
        }
    }
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout { endpoint, secs } => {
                write!(f, "request to {endpoint} timed out after {secs}s")
            }
            Self::Unreachable(msg) => write!(
                f,
                "bridge service unreachable ({msg}); make sure it is running"
            ),
            Self::Status { code, detail } => write!(f, "status {code}: {detail}"),
            Self::Application(detail) => write!(f, "{detail}"),
            Self::InvalidResponse(msg) => write!(f, "invalid bridge response: {msg}"),
        }
    }
}

impl std::error::Error for BridgeError {}

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

/// Errors when loading or parsing configuration.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Toml(toml::de::Error),
    Json(serde_json::Error),
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "io: {e}"),
            Self::Toml(e) => write!(f, "toml: {e}"),
            Self::Json(e) => write!(f, "json: {e}"),
            Self::Invalid(msg) => write!(f, "invalid config: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        Self::Toml(e)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

// ---------------------------------------------------------------------------
// FieldPathError
// ---------------------------------------------------------------------------

/// Failures while navigating or writing a request-body field path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldPathError {
    /// An intermediate segment did not resolve.
    Missing(String),
    /// The value at the embedded segment was not a JSON string.
    NotEmbeddedString(String),
    /// The embedded string did not parse as JSON.
    EmbeddedParse(String),
    /// The write target is not an object or an in-bounds array slot.
    NotWritable(String),
}

impl fmt::Display for FieldPathError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing(seg) => write!(f, "segment `{seg}` not found"),
            Self::NotEmbeddedString(seg) => {
                write!(f, "field `{seg}` is not an embedded JSON string")
            }
            Self::EmbeddedParse(msg) => write!(f, "embedded JSON does not parse: {msg}"),
            Self::NotWritable(seg) => write!(f, "cannot write segment `{seg}`"),
        }
    }
}

impl std::error::Error for FieldPathError {}

// ---------------------------------------------------------------------------
// MalformedToolCall
// ---------------------------------------------------------------------------

/// A marker span was found but its payload is unusable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MalformedToolCall {
    /// The interior is not valid JSON.
    InvalidJson(String),
    /// The payload has no (or an empty) tool name.
    MissingName,
    /// The payload or its `arguments` is not a JSON object.
    InvalidShape(String),
}

impl fmt::Display for MalformedToolCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidJson(msg) => write!(f, "tool call payload is not valid JSON: {msg}"),
            Self::MissingName => write!(f, "tool call payload has no `tool_name`"),
            Self::InvalidShape(msg) => write!(f, "tool call payload has the wrong shape: {msg}"),
        }
    }
}

impl std::error::Error for MalformedToolCall {}

// ---------------------------------------------------------------------------
// RewriteSkip
// ---------------------------------------------------------------------------

/// Why a request passed through the rewriter untouched.
///
/// None of these is an error for the host page: the original body is always
/// forwarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewriteSkip {
    /// No site profile matches the request URL.
    NoProfile,
    /// The request body is not JSON.
    MalformedBody,
    /// The pipeline is switched off.
    Disabled,
}

impl fmt::Display for RewriteSkip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoProfile => write!(f, "no site profile matches the request"),
            Self::MalformedBody => write!(f, "request body is not JSON"),
            Self::Disabled => write!(f, "pipeline disabled"),
        }
    }
}

// ---------------------------------------------------------------------------
// PageError / RuntimeError
// ---------------------------------------------------------------------------

/// Failure reported by a page agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageError {
    /// The page (or the channel to it) is gone.
    Closed,
    /// The page could not carry out the action.
    Failed(String),
    /// The page did not answer in time.
    Timeout,
}

impl fmt::Display for PageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "page channel closed"),
            Self::Failed(msg) => write!(f, "page action failed: {msg}"),
            Self::Timeout => write!(f, "page did not answer in time"),
        }
    }
}

impl std::error::Error for PageError {}

/// The runtime actor is no longer running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeClosed;

impl fmt::Display for RuntimeClosed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "runtime command channel closed")
    }
}

impl std::error::Error for RuntimeClosed {}

// ---------------------------------------------------------------------------
// HostError
// ---------------------------------------------------------------------------

/// Failure of the stdio host itself (not of any single message).
#[derive(Debug)]
pub enum HostError {
    Config(ConfigError),
    Io(std::io::Error),
}

impl fmt::Display for HostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => write!(f, "{e}"),
            Self::Io(e) => write!(f, "host channel: {e}"),
        }
    }
}

impl std::error::Error for HostError {}

impl From<ConfigError> for HostError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<std::io::Error> for HostError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}
