//! Host-facing seams: the interception hook the page shim calls, and the page
//! agent the runtime drives.
//!
//! - `stdio`: line-delimited JSON host over stdin/stdout

use crate::error::PageError;
use crate::runtime::RuntimeHandle;
use crate::site::{InputTarget, UiParsing};
use crate::types::TabId;
use async_trait::async_trait;
use std::time::Duration;

pub mod stdio;

/// Request/response interception points of one page.
///
/// Nothing crosses this boundary as an error: the request path always yields
/// a body to send.
#[async_trait]
pub trait InterceptionHook: Send + Sync {
    /// Body to send in place of `body`.
    async fn on_request(&self, url: &str, body: String) -> String;

    /// Raw response buffer received so far for `url`.
    async fn on_response_fragment(&self, url: &str, text: &str, is_final: bool);
}

/// Page-side actions the runtime needs.
#[async_trait]
pub trait PageAgent: Send + Sync {
    /// Type `text` into the site's input and optionally submit it.
    async fn inject_text(
        &self,
        tab: TabId,
        text: &str,
        input: Option<&InputTarget>,
        submit: bool,
    ) -> Result<(), PageError>;

    /// Rendered text of the most recent model message.
    async fn read_last_message(
        &self,
        tab: TabId,
        ui: &UiParsing,
    ) -> Result<Option<String>, PageError>;

    /// Hostname of the page currently loaded in `tab`.
    async fn hostname(&self, tab: TabId) -> Option<String>;
}

/// [`InterceptionHook`] bound to one tab of a running runtime.
#[derive(Clone)]
pub struct TabHook {
    tab: TabId,
    runtime: RuntimeHandle,
    reply_timeout: Duration,
}

impl TabHook {
    pub fn new(tab: TabId, runtime: RuntimeHandle, reply_timeout: Duration) -> Self {
        Self {
            tab,
            runtime,
            reply_timeout,
        }
    }

    pub fn tab(&self) -> TabId {
        self.tab
    }
}

#[async_trait]
impl InterceptionHook for TabHook {
    async fn on_request(&self, url: &str, body: String) -> String {
        let reply = self.runtime.request(self.tab, url, body.clone());
        match tokio::time::timeout(self.reply_timeout, reply).await {
            Ok(Ok(rewritten)) => rewritten,
            Ok(Err(err)) => {
                tracing::warn!(tab = %self.tab, "{err}; sending request unchanged");
                body
            }
            Err(_) => {
                tracing::warn!(
                    tab = %self.tab,
                    "no rewrite within {:?}; sending request unchanged",
                    self.reply_timeout
                );
                body
            }
        }
    }

    async fn on_response_fragment(&self, url: &str, text: &str, is_final: bool) {
        if let Err(err) = self
            .runtime
            .fragment(self.tab, url, text.to_string(), is_final)
            .await
        {
            tracing::debug!(tab = %self.tab, "dropping response fragment: {err}");
        }
    }
}
