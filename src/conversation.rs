//! Per-tab conversation state machine.
//!
//! Transitions are synchronous and side-effect free: each returns an
//! [`Action`] that the tab actor carries out (rewrite, dispatch, type the
//! feedback into the page). One response cycle runs from an intercepted
//! request to the feedback for the tool call it produced.

use crate::error::MalformedToolCall;
use crate::pipeline::{extract, write_prompt_paths, ExtractState, RequestTemplate, TagDetector};
use crate::prompt::{wrap_feedback, PromptBuilder};
use crate::site::{ResponseRules, UiPriority};
use crate::types::{Signature, ToolCall, ToolOutcome};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Status {
    #[default]
    Idle,
    AwaitingResponse,
    FeedingBack,
}

/// Feedback prepared for the next outgoing request.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingFeedback {
    /// Wrapped feedback text, as typed into the page.
    pub text: String,
    /// Last request body with the feedback as its prompt, if one could be
    /// built.
    pub body: Option<Value>,
}

/// Why a fragment or command produced nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ignored {
    /// No response is expected in the current state.
    NotAwaiting,
    NoMarker,
    /// The span was already handled in this cycle.
    Duplicate,
    /// A tool call is still running.
    InFlight,
    /// A malformed span waits for the end of the response.
    MalformedPending,
    /// A completion arrived for a call this state no longer tracks.
    Stale,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Run the request through the rewriter.
    Rewrite,
    /// Send this body instead of the incoming one.
    Substitute(String),
    Dispatch { call: ToolCall, signature: Signature },
    /// Type this (already wrapped) text into the page and submit it.
    Feedback(String),
    /// Response ended without a call; the state was dropped.
    Reset,
    Ignore(Ignored),
}

/// Text of one response notification as seen by the machine.
#[derive(Debug, Clone, Copy)]
pub struct Fragment<'a> {
    /// Full raw buffer received so far.
    pub raw: &'a str,
    pub is_final: bool,
    /// Rendered text of the last message, read from the page on the final
    /// fragment when the site parses its UI.
    pub dom_text: Option<(UiPriority, &'a str)>,
}

impl<'a> Fragment<'a> {
    pub fn partial(raw: &'a str) -> Self {
        Self {
            raw,
            is_final: false,
            dom_text: None,
        }
    }

    pub fn last(raw: &'a str) -> Self {
        Self {
            raw,
            is_final: true,
            dom_text: None,
        }
    }
}

/// What the previous response cycle left behind, used to recognise its late
/// notifications after the next request has already gone out.
#[derive(Debug, Clone, Default)]
struct PreviousCycle {
    signature: Option<Signature>,
    raw: Option<String>,
}

impl PreviousCycle {
    /// The buffer repeats or extends the previous response.
    fn owns(&self, raw: &str) -> bool {
        self.raw
            .as_deref()
            .is_some_and(|previous| !previous.is_empty() && raw.starts_with(previous))
    }
}

#[derive(Debug, Default)]
pub struct ConversationState {
    status: Status,
    last_signature: Option<Signature>,
    previous: Option<PreviousCycle>,
    in_flight: Option<Signature>,
    pending: Option<PendingFeedback>,
    last_request: Option<RequestTemplate>,
    detected_any: bool,
    malformed: Option<(Signature, MalformedToolCall)>,
    extract: ExtractState,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn last_signature(&self) -> Option<&Signature> {
        self.last_signature.as_ref()
    }

    pub fn in_flight(&self) -> Option<&Signature> {
        self.in_flight.as_ref()
    }

    pub fn pending(&self) -> Option<&PendingFeedback> {
        self.pending.as_ref()
    }

    pub fn last_request(&self) -> Option<&RequestTemplate> {
        self.last_request.as_ref()
    }

    pub fn detected_any(&self) -> bool {
        self.detected_any
    }

    /// An intercepted request on a matched endpoint.
    ///
    /// In `FeedingBack` the prepared feedback replaces the prompt; otherwise
    /// a new response cycle starts and the caller must rewrite the body and
    /// then call [`Self::begin_cycle`].
    pub fn on_request(&mut self, raw_body: &str) -> Action {
        self.start_cycle();
        if self.status != Status::FeedingBack {
            return Action::Rewrite;
        }

        let pending = self.pending.take();
        self.status = Status::AwaitingResponse;
        let Some(pending) = pending else {
            return Action::Rewrite;
        };

        let incoming = serde_json::from_str::<Value>(raw_body).ok();
        if let (Some(original), Some(template)) = (incoming, self.last_request.as_mut()) {
            let mut body = original.clone();
            let paths = template.profile.prompt_field_paths();
            let writes = write_prompt_paths(&mut body, &paths, |_| pending.text.clone());
            template.body = original;
            if writes.written > 0 {
                return Action::Substitute(body.to_string());
            }
        }
        match pending.body {
            Some(prepared) => Action::Substitute(prepared.to_string()),
            None => {
                tracing::debug!("no body could carry the feedback; sending request unchanged");
                Action::Substitute(raw_body.to_string())
            }
        }
    }

    /// Record the rewritten request and wait for its response.
    pub fn begin_cycle(&mut self, template: Option<RequestTemplate>) {
        self.status = Status::AwaitingResponse;
        if template.is_some() {
            self.last_request = template;
        }
    }

    /// A response notification for the current cycle.
    pub fn on_fragment(
        &mut self,
        fragment: Fragment<'_>,
        rules: &ResponseRules,
        detector: &TagDetector,
        prompts: &PromptBuilder,
    ) -> Action {
        if self.status != Status::AwaitingResponse {
            return Action::Ignore(Ignored::NotAwaiting);
        }
        if self.previous.as_ref().is_some_and(|p| p.owns(fragment.raw)) {
            tracing::debug!("dropping late notification of the previous response");
            return Action::Ignore(Ignored::Stale);
        }

        let mut text = extract(fragment.raw, rules, &mut self.extract);
        if fragment.is_final {
            if let Some((priority, dom)) = fragment.dom_text {
                let prefer_dom = match priority {
                    UiPriority::Ui => !dom.trim().is_empty(),
                    UiPriority::Api => text.trim().is_empty(),
                };
                if prefer_dom {
                    text = dom.to_string();
                }
            }
        }

        if let Some(previous) = &self.previous {
            let repeated = previous.signature.as_ref().is_some_and(|signature| {
                detector
                    .detect(&text)
                    .is_some_and(|detection| &detection.signature == signature)
            });
            if repeated {
                return Action::Ignore(Ignored::Duplicate);
            }
            self.previous = None;
        }

        let detected = self.observe(&text, detector);
        if let Action::Dispatch { .. } = detected {
            return detected;
        }
        if !fragment.is_final {
            return detected;
        }
        if let Some(action) = self.report_malformed(prompts) {
            return action;
        }
        if !self.detected_any && self.in_flight.is_none() {
            tracing::debug!("response finished without a tool call");
            *self = Self::default();
            return Action::Reset;
        }
        detected
    }

    /// Operator-supplied text (pasted, or read back from the page), handled
    /// like a complete response.
    pub fn on_manual_text(
        &mut self,
        text: &str,
        detector: &TagDetector,
        prompts: &PromptBuilder,
    ) -> Action {
        if self.in_flight.is_some() {
            return Action::Ignore(Ignored::InFlight);
        }
        let Some(detection) = detector.detect(text) else {
            return Action::Ignore(Ignored::NoMarker);
        };
        if self.last_signature.as_ref() == Some(&detection.signature) {
            return Action::Ignore(Ignored::Duplicate);
        }
        self.last_signature = Some(detection.signature.clone());
        self.detected_any = true;
        match detection.call {
            Ok(call) => {
                self.status = Status::AwaitingResponse;
                self.in_flight = Some(detection.signature.clone());
                Action::Dispatch {
                    call,
                    signature: detection.signature,
                }
            }
            Err(err) => self.feed_back(prompts.malformed_call(&err)),
        }
    }

    /// Completion of the call dispatched under `signature`.
    pub fn on_dispatch_complete(
        &mut self,
        signature: &Signature,
        call: &ToolCall,
        outcome: &ToolOutcome,
        prompts: &PromptBuilder,
    ) -> Action {
        if self.in_flight.as_ref() != Some(signature) {
            return Action::Ignore(Ignored::Stale);
        }
        self.in_flight = None;
        self.feed_back(prompts.format_outcome(call, outcome))
    }

    fn start_cycle(&mut self) {
        let signature = self.last_signature.take();
        let raw = self.extract.take_raw();
        if signature.is_some() || raw.is_some() {
            self.previous = Some(PreviousCycle { signature, raw });
        }
        self.detected_any = false;
        self.malformed = None;
    }

    fn observe(&mut self, text: &str, detector: &TagDetector) -> Action {
        let Some(detection) = detector.detect(text) else {
            return Action::Ignore(Ignored::NoMarker);
        };
        if self.last_signature.as_ref() == Some(&detection.signature) {
            return Action::Ignore(Ignored::Duplicate);
        }
        let signature = detection.signature;
        match detection.call {
            Ok(call) => {
                if let Some(running) = &self.in_flight {
                    tracing::debug!(
                        running = running.short(),
                        "ignoring tool call while another one is running"
                    );
                    return Action::Ignore(Ignored::InFlight);
                }
                tracing::info!(tool = %call.name, signature = signature.short(), "tool call detected");
                self.last_signature = Some(signature.clone());
                self.in_flight = Some(signature.clone());
                self.detected_any = true;
                self.malformed = None;
                Action::Dispatch { call, signature }
            }
            Err(err) => {
                self.malformed = Some((signature, err));
                Action::Ignore(Ignored::MalformedPending)
            }
        }
    }

    fn report_malformed(&mut self, prompts: &PromptBuilder) -> Option<Action> {
        let (signature, err) = self.malformed.take()?;
        if self.detected_any || self.in_flight.is_some() {
            return None;
        }
        tracing::info!(signature = signature.short(), "reporting malformed tool call: {err}");
        self.last_signature = Some(signature);
        self.detected_any = true;
        Some(self.feed_back(prompts.malformed_call(&err)))
    }

    fn feed_back(&mut self, text: String) -> Action {
        let text = wrap_feedback(&text);
        let body = self
            .last_request
            .as_ref()
            .and_then(|template| template.with_prompt(&text));
        self.pending = Some(PendingFeedback {
            text: text.clone(),
            body,
        });
        self.status = Status::FeedingBack;
        Action::Feedback(text)
    }
}
