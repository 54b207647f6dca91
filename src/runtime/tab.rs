//! Per-tab actor.
//!
//! Each tab owns its [`ConversationState`] and processes its inbox in order.
//! Tool dispatch runs in a spawned task whose completion comes back through
//! the same inbox, so the actor stays the only writer of the state.

use crate::bridge::ToolBackend;
use crate::config::PipelineConfig;
use crate::conversation::{Action, ConversationState, Fragment, Ignored, Status};
use crate::dispatch::ToolDispatcher;
use crate::hook::PageAgent;
use crate::pipeline::{Injection, RequestRewriter, RewriteStatus, TagDetector};
use crate::site::SiteProfile;
use crate::textutil::preview;
use crate::types::{Signature, TabId, ToolCall, ToolOutcome, ToolSuccess};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::{ErrorEvent, RuntimeEvent, TabEvent, ToolEvent, WarningEvent};

/// Inbox message of one tab actor.
pub(super) enum TabMessage {
    Request {
        url: String,
        body: String,
        reply: oneshot::Sender<String>,
    },
    Fragment {
        url: String,
        text: String,
        is_final: bool,
    },
    Redetect,
    ManualParse {
        content: String,
    },
    RefreshPrompt,
    DispatchDone {
        signature: Signature,
        call: ToolCall,
        outcome: ToolOutcome,
    },
}

/// Collaborators shared by every tab.
pub(super) struct TabShared {
    pub(super) rewriter: RequestRewriter,
    pub(super) detector: TagDetector,
    pub(super) dispatcher: ToolDispatcher,
    pub(super) backend: Arc<dyn ToolBackend>,
    pub(super) page: Arc<dyn PageAgent>,
    pub(super) pipeline: PipelineConfig,
}

/// Coordinator-side handle of a running tab actor.
pub(super) struct TabHandle {
    pub(super) inbox: mpsc::UnboundedSender<TabMessage>,
    pub(super) task: JoinHandle<()>,
}

pub(super) fn spawn_tab(
    tab: TabId,
    shared: Arc<TabShared>,
    events: mpsc::UnboundedSender<RuntimeEvent>,
) -> TabHandle {
    let (inbox_tx, mut inbox_rx) = mpsc::unbounded_channel::<TabMessage>();
    let mut actor = TabActor {
        tab,
        shared,
        events,
        inbox: inbox_tx.clone(),
        state: ConversationState::new(),
        profile: None,
    };
    let task = tokio::spawn(async move {
        while let Some(message) = inbox_rx.recv().await {
            actor.handle(message).await;
        }
    });
    TabHandle {
        inbox: inbox_tx,
        task,
    }
}

struct TabActor {
    tab: TabId,
    shared: Arc<TabShared>,
    events: mpsc::UnboundedSender<RuntimeEvent>,
    inbox: mpsc::UnboundedSender<TabMessage>,
    state: ConversationState,
    /// Site of the last matched request.
    profile: Option<Arc<SiteProfile>>,
}

impl TabActor {
    async fn handle(&mut self, message: TabMessage) {
        match message {
            TabMessage::Request { url, body, reply } => {
                let body = self.on_request(&url, body).await;
                let _ = reply.send(body);
            }
            TabMessage::Fragment {
                url,
                text,
                is_final,
            } => self.on_fragment(&url, &text, is_final).await,
            TabMessage::Redetect => self.redetect().await,
            TabMessage::ManualParse { content } => self.manual_parse(&content).await,
            TabMessage::RefreshPrompt => self.refresh_prompt().await,
            TabMessage::DispatchDone {
                signature,
                call,
                outcome,
            } => self.on_dispatch_done(signature, call, outcome).await,
        }
    }

    async fn on_request(&mut self, url: &str, body: String) -> String {
        if !self.shared.pipeline.enabled {
            return body;
        }
        let Some(profile) = self.shared.rewriter.catalog().match_url(url) else {
            tracing::debug!(tab = %self.tab, "request to {url} matches no site");
            return body;
        };
        self.profile = Some(profile.clone());

        if let Action::Substitute(substituted) = self.state.on_request(&body) {
            tracing::info!(tab = %self.tab, site = %profile.id, "feedback substituted into request");
            self.emit(RuntimeEvent::Tab(TabEvent::FeedbackSubstituted { tab: self.tab }));
            return substituted;
        }

        let outcome = self.shared.rewriter.rewrite(url, &body).await;
        let injection = match &outcome.status {
            RewriteStatus::Injected(Injection::Full) => Some("full".to_string()),
            RewriteStatus::Injected(Injection::Reminder) => Some("reminder".to_string()),
            RewriteStatus::FailedOpen(reason) => {
                self.warn(format!("prompt not injected: {reason}"));
                None
            }
            RewriteStatus::Skipped(skip) => {
                tracing::debug!(tab = %self.tab, "rewrite skipped: {skip}");
                None
            }
            RewriteStatus::PassThrough => None,
        };
        self.state.begin_cycle(outcome.template);
        self.emit(RuntimeEvent::Tab(TabEvent::RequestSent {
            tab: self.tab,
            site: profile.id.clone(),
            injection,
        }));
        outcome.body
    }

    async fn on_fragment(&mut self, url: &str, text: &str, is_final: bool) {
        let Some(profile) = self.shared.rewriter.catalog().match_url(url) else {
            return;
        };

        let mut dom_text = None;
        if is_final && self.state.status() == Status::AwaitingResponse {
            if let Some(ui) = profile.active_ui_parsing() {
                match self.shared.page.read_last_message(self.tab, ui).await {
                    Ok(Some(text)) => dom_text = Some((ui.priority, text)),
                    Ok(None) => {}
                    Err(err) => tracing::debug!(tab = %self.tab, "reading rendered message failed: {err}"),
                }
            }
        }

        let fragment = Fragment {
            raw: text,
            is_final,
            dom_text: dom_text
                .as_ref()
                .map(|(priority, text)| (*priority, text.as_str())),
        };
        let action = self.state.on_fragment(
            fragment,
            &profile.response,
            &self.shared.detector,
            self.shared.rewriter.prompts(),
        );
        self.report_malformed(&action);
        self.apply(action).await;
    }

    async fn redetect(&mut self) {
        let Some(profile) = self.current_profile().await else {
            self.error("no site profile for this tab".to_string());
            return;
        };
        let Some(ui) = profile.active_ui_parsing() else {
            self.error(format!("UI parsing is not enabled for site `{}`", profile.id));
            return;
        };
        match self.shared.page.read_last_message(self.tab, ui).await {
            Ok(Some(text)) => self.manual_parse(&text).await,
            Ok(None) => self.warn("no rendered message found".to_string()),
            Err(err) => self.error(format!("reading rendered message failed: {err}")),
        }
    }

    async fn manual_parse(&mut self, content: &str) {
        let action = self.state.on_manual_text(
            content,
            &self.shared.detector,
            self.shared.rewriter.prompts(),
        );
        if let Action::Ignore(reason) = &action {
            let message = match reason {
                Ignored::NoMarker => "no tool call found in the text",
                Ignored::Duplicate => "this tool call was already executed",
                Ignored::InFlight => "another tool call is still running",
                _ => "nothing to do",
            };
            self.warn(message.to_string());
        }
        self.report_malformed(&action);
        self.apply(action).await;
    }

    async fn refresh_prompt(&mut self) {
        let profile = self.current_profile().await;
        let timeout = self.shared.rewriter.timeout();
        let services = match tokio::time::timeout(timeout, self.shared.backend.services()).await {
            Ok(Ok(services)) => services,
            Ok(Err(err)) => {
                self.error(format!("service discovery failed: {err}"));
                return;
            }
            Err(_) => {
                self.error(format!("service discovery exceeded {timeout:?}"));
                return;
            }
        };
        let text = self.shared.rewriter.prompts().initial(&services);
        let input = profile.as_ref().and_then(|p| p.input.as_ref());
        let submit = self.shared.pipeline.auto_submit_prompt;
        if let Err(err) = self
            .shared
            .page
            .inject_text(self.tab, &text, input, submit)
            .await
        {
            self.error(format!("typing the system prompt failed: {err}"));
        }
    }

    async fn on_dispatch_done(&mut self, signature: Signature, call: ToolCall, outcome: ToolOutcome) {
        let detail = match &outcome {
            ToolOutcome::Success(ToolSuccess::Value(value)) => preview(&value.to_string(), 200),
            ToolOutcome::Success(ToolSuccess::Cached(cache)) => {
                format!("cached as {} ({} bytes)", cache.cache_id, cache.size_bytes)
            }
            ToolOutcome::Success(ToolSuccess::Listing { service, tools }) => {
                format!("{} tools in {service}", tools.len())
            }
            ToolOutcome::Failure(failure) => match &failure.stack_excerpt {
                Some(stack) => format!("{}\n{stack}", failure.message),
                None => failure.message.clone(),
            },
        };
        self.emit(RuntimeEvent::Tool(ToolEvent::Completed {
            tab: self.tab,
            name: call.name.clone(),
            signature: signature.clone(),
            success: outcome.is_success(),
            detail,
        }));
        let action = self.state.on_dispatch_complete(
            &signature,
            &call,
            &outcome,
            self.shared.rewriter.prompts(),
        );
        self.apply(action).await;
    }

    async fn apply(&mut self, action: Action) {
        match action {
            Action::Dispatch { call, signature } => self.dispatch(call, signature),
            Action::Feedback(text) => self.inject_feedback(text).await,
            Action::Reset => {
                self.emit(RuntimeEvent::Tab(TabEvent::Reset { tab: self.tab }));
            }
            Action::Ignore(reason) => {
                tracing::trace!(tab = %self.tab, ?reason, "nothing to do");
            }
            Action::Rewrite | Action::Substitute(_) => {}
        }
    }

    fn dispatch(&self, call: ToolCall, signature: Signature) {
        self.emit(RuntimeEvent::Tool(ToolEvent::CallDetected {
            tab: self.tab,
            name: call.name.clone(),
            arguments_json: serde_json::Value::Object(call.arguments.clone()).to_string(),
            signature: signature.clone(),
        }));
        let dispatcher = self.shared.dispatcher.clone();
        let inbox = self.inbox.clone();
        tokio::spawn(async move {
            let outcome = dispatcher.dispatch(&call).await;
            let _ = inbox.send(TabMessage::DispatchDone {
                signature,
                call,
                outcome,
            });
        });
    }

    async fn inject_feedback(&mut self, text: String) {
        let input = self.profile.as_ref().and_then(|p| p.input.as_ref());
        match self
            .shared
            .page
            .inject_text(self.tab, &text, input, true)
            .await
        {
            Ok(()) => self.emit(RuntimeEvent::Tab(TabEvent::FeedbackInjected {
                tab: self.tab,
                chars: text.chars().count(),
            })),
            Err(err) => self.error(format!("typing feedback into the page failed: {err}")),
        }
    }

    /// Feedback straight from detection always answers a malformed call.
    fn report_malformed(&self, action: &Action) {
        if let Action::Feedback(text) = action {
            self.emit(RuntimeEvent::Tool(ToolEvent::Malformed {
                tab: self.tab,
                message: preview(text, 200),
            }));
        }
    }

    async fn current_profile(&mut self) -> Option<Arc<SiteProfile>> {
        if let Some(profile) = &self.profile {
            return Some(profile.clone());
        }
        let hostname = self.shared.page.hostname(self.tab).await?;
        let profile = self.shared.rewriter.catalog().by_hostname(&hostname)?;
        self.profile = Some(profile.clone());
        Some(profile)
    }

    fn emit(&self, event: RuntimeEvent) {
        let _ = self.events.send(event);
    }

    fn warn(&self, message: String) {
        tracing::warn!(tab = %self.tab, "{message}");
        self.emit(RuntimeEvent::Warning(WarningEvent {
            tab: Some(self.tab),
            message,
        }));
    }

    fn error(&self, message: String) {
        tracing::warn!(tab = %self.tab, "{message}");
        self.emit(RuntimeEvent::Error(ErrorEvent {
            tab: Some(self.tab),
            message,
        }));
    }
}
