//! Runtime event schema.
//!
//! Events are the data-plane contract: hosts forward them to a status panel
//! or a log, and tests assert on them instead of scraping tracing output.

use crate::types::{Signature, TabId};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Monotonic envelope for runtime events.
///
/// `seq` is assigned by the coordinator in emission order; `ts_unix_ms` is
/// wall-clock capture time for diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuntimeEventEnvelope {
    pub seq: u64,
    pub ts_unix_ms: u64,
    pub event: RuntimeEvent,
}

impl RuntimeEventEnvelope {
    pub fn new(seq: u64, event: RuntimeEvent) -> Self {
        Self {
            seq,
            ts_unix_ms: now_unix_millis(),
            event,
        }
    }
}

/// Typed runtime event families.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload")]
pub enum RuntimeEvent {
    Lifecycle(LifecycleEvent),
    Tab(TabEvent),
    Tool(ToolEvent),
    Warning(WarningEvent),
    Error(ErrorEvent),
}

impl RuntimeEvent {
    /// Tab the event belongs to, if any.
    pub fn tab(&self) -> Option<TabId> {
        match self {
            Self::Lifecycle(_) => None,
            Self::Tab(event) => Some(event.tab()),
            Self::Tool(event) => Some(event.tab()),
            Self::Warning(event) => event.tab,
            Self::Error(event) => event.tab,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEvent {
    RuntimeStarted,
    RuntimeStopped,
}

/// Conversation transitions of one tab.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TabEvent {
    Opened {
        tab: TabId,
    },
    /// A matched request went out; `injection` names the prompt that was
    /// prepended, `None` for pass-through.
    RequestSent {
        tab: TabId,
        site: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        injection: Option<String>,
    },
    /// The prepared feedback replaced the outgoing prompt.
    FeedbackSubstituted {
        tab: TabId,
    },
    /// The page was asked to type feedback.
    FeedbackInjected {
        tab: TabId,
        chars: usize,
    },
    /// The response finished without a tool call.
    Reset {
        tab: TabId,
    },
    Closed {
        tab: TabId,
    },
}

impl TabEvent {
    pub fn tab(&self) -> TabId {
        match self {
            Self::Opened { tab }
            | Self::RequestSent { tab, .. }
            | Self::FeedbackSubstituted { tab }
            | Self::FeedbackInjected { tab, .. }
            | Self::Reset { tab }
            | Self::Closed { tab } => *tab,
        }
    }
}

/// Tool invocation/result events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ToolEvent {
    CallDetected {
        tab: TabId,
        name: String,
        arguments_json: String,
        signature: Signature,
    },
    Completed {
        tab: TabId,
        name: String,
        signature: Signature,
        success: bool,
        /// Full error text for failures, a short preview for successes.
        detail: String,
    },
    Malformed {
        tab: TabId,
        message: String,
    },
}

impl ToolEvent {
    pub fn tab(&self) -> TabId {
        match self {
            Self::CallDetected { tab, .. }
            | Self::Completed { tab, .. }
            | Self::Malformed { tab, .. } => *tab,
        }
    }
}

/// Non-fatal warning surfaced to hosts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WarningEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tab: Option<TabId>,
    pub message: String,
}

/// Error surfaced to hosts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tab: Option<TabId>,
    pub message: String,
}

fn now_unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
