//! Declarative per-site profile: what to intercept, where the prompt lives,
//! and how to pull model text out of responses.

use super::field_path::FieldPath;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Default delay budget the page agent spreads over focus, typing, and submit.
pub const DEFAULT_SUBMIT_DELAY_MS: u64 = 1600;

/// One target site.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct SiteProfile {
    /// Stable identifier used in logs and config overrides.
    pub id: String,
    /// Page hostname this profile belongs to (e.g. `chatgpt.com`).
    pub hostname: String,
    /// Endpoint fragments; a request URL matches when either string contains
    /// the other.
    pub intercepted_endpoints: Vec<String>,
    /// Dotted paths to the prompt text in the request body.
    pub prompt_paths: Vec<String>,
    /// Prompt paths end inside a JSON document stored as a string field.
    #[serde(default)]
    pub embedded_json: bool,
    #[serde(default)]
    pub new_conversation: NewConversationRule,
    #[serde(default)]
    pub response: ResponseRules,
    #[serde(default)]
    pub input: Option<InputTarget>,
    #[serde(default)]
    pub ui_parsing: Option<UiParsing>,
}

impl SiteProfile {
    /// True when `url` hits one of the intercepted endpoints.
    pub fn matches_url(&self, url: &str) -> bool {
        self.intercepted_endpoints
            .iter()
            .map(|endpoint| endpoint.trim())
            .filter(|endpoint| !endpoint.is_empty())
            .any(|endpoint| url.contains(endpoint) || endpoint.contains(url))
    }

    /// Compiled prompt paths, honoring the embedded-JSON flag.
    pub fn prompt_field_paths(&self) -> Vec<FieldPath> {
        self.prompt_paths
            .iter()
            .map(|path| FieldPath::parse_with_embedding(path, self.embedded_json))
            .collect()
    }

    /// UI parsing rules when enabled and usable.
    pub fn active_ui_parsing(&self) -> Option<&UiParsing> {
        self.ui_parsing
            .as_ref()
            .filter(|ui| ui.enabled && !ui.message_container.trim().is_empty())
    }
}

// ---------------------------------------------------------------------------
// New-conversation detection
// ---------------------------------------------------------------------------

/// Decides whether an outgoing request starts a new conversation.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct NewConversationRule {
    /// Fields whose non-empty presence marks a continuing conversation.
    pub continuation_fields: Vec<String>,
    /// Site-specific markers checked before the continuation fields.
    pub sentinels: Vec<Sentinel>,
}

impl Default for NewConversationRule {
    fn default() -> Self {
        Self {
            continuation_fields: vec![
                "conversation_id".to_string(),
                "parent_message_id".to_string(),
                "sessionId".to_string(),
            ],
            sentinels: Vec::new(),
        }
    }
}

impl NewConversationRule {
    pub fn is_new_conversation(&self, body: &Value) -> bool {
        for sentinel in &self.sentinels {
            if let Some(decision) = sentinel.evaluate(body) {
                return decision;
            }
        }
        !self
            .continuation_fields
            .iter()
            .any(|field| FieldPath::parse(field).get(body).is_ok_and(|v| is_truthy(&v)))
    }
}

/// A field whose value alone decides new-vs-continuing when it is present,
/// e.g. an all-zero parent id or a literal `"0"` conversation id.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Sentinel {
    pub field: String,
    #[serde(default)]
    pub equals: Option<String>,
    #[serde(default)]
    pub contains: Option<String>,
}

impl Sentinel {
    /// `None` when the field is absent, otherwise whether it matches.
    fn evaluate(&self, body: &Value) -> Option<bool> {
        let value = FieldPath::parse(&self.field).get(body).ok()?;
        let text = scalar_text(&value)?;
        let equals = self.equals.as_deref().is_some_and(|want| text == want);
        let contains = self
            .contains
            .as_deref()
            .is_some_and(|needle| text.contains(needle));
        Some(equals || contains)
    }
}

// ---------------------------------------------------------------------------
// Response extraction rules
// ---------------------------------------------------------------------------

/// How the response body reaches us.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Sse,
    Json,
    #[default]
    Text,
}

/// Rules for turning a response body into model text.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ResponseRules {
    pub transport: Transport,
    /// Priority-ordered candidate paths for the text delta.
    pub content_paths: Vec<FieldPath>,
    pub filter: Option<ContentFilter>,
}

impl ResponseRules {
    /// Passthrough rules used for DOM text and operator-pasted content.
    pub fn plain_text() -> Self {
        Self::default()
    }
}

/// Event-kind filter for streams that interleave several channels.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ContentFilter {
    /// Top-level event field whose value names the channel.
    pub discriminator_field: String,
    /// Reject the candidate when the discriminator contains any of these.
    pub exclude_patterns: Vec<String>,
    /// When non-empty, the discriminator must contain one of these.
    pub include_patterns: Vec<String>,
}

// ---------------------------------------------------------------------------
// Page collaborator descriptors
// ---------------------------------------------------------------------------

/// Where and how the page agent types feedback text.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct InputTarget {
    pub selector: String,
    /// Key that submits the input; `None` leaves submission to the user.
    #[serde(default)]
    pub submit_key: Option<String>,
    #[serde(default)]
    pub submit_modifiers: Vec<String>,
    #[serde(default = "default_submit_delay_ms")]
    pub submit_delay_ms: u64,
}

fn default_submit_delay_ms() -> u64 {
    DEFAULT_SUBMIT_DELAY_MS
}

/// Which text source wins when both transport and DOM text exist.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UiPriority {
    #[default]
    Api,
    Ui,
}

/// How the page agent locates the most recent rendered message.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct UiParsing {
    #[serde(default)]
    pub enabled: bool,
    pub message_container: String,
    /// Container index; negative values count from the end.
    #[serde(default = "default_message_index")]
    pub message_index: i64,
    #[serde(default)]
    pub content_selector: Option<String>,
    #[serde(default)]
    pub priority: UiPriority,
}

fn default_message_index() -> i64 {
    -1
}

/// Stringify a scalar; `None` for null, objects, and arrays.
pub(crate) fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(text) => !text.is_empty(),
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::Array(_) | Value::Object(_) => true,
    }
}
