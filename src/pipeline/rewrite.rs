//! Outgoing request rewriting: decide whether to inject, then prepend the
//! capability prompt or the reminder at every configured prompt path.
//!
//! The rewriter never fails the host's request. Anything unexpected leaves
//! the body as it was.

use crate::bridge::ToolBackend;
use crate::config::PipelineConfig;
use crate::error::{FieldPathError, RewriteSkip};
use crate::prompt::{inject, PromptBuilder};
use crate::site::profile::scalar_text;
use crate::site::{FieldPath, SiteCatalog, SiteProfile};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Which prompt was prepended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Injection {
    /// Full capability announcement (new conversation).
    Full,
    /// Short reminder (continuing conversation with always-inject on).
    Reminder,
}

/// The last intercepted request of a tab, kept to prepare feedback bodies.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestTemplate {
    pub profile: Arc<SiteProfile>,
    /// Body as the host sent it, before any injection.
    pub body: Value,
}

impl RequestTemplate {
    /// Copy of the template body with `text` as the prompt.
    pub fn with_prompt(&self, text: &str) -> Option<Value> {
        let mut body = self.body.clone();
        let written = write_prompt_paths(&mut body, &self.profile.prompt_field_paths(), |_| {
            text.to_string()
        });
        (written.written > 0).then_some(body)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RewriteStatus {
    Skipped(RewriteSkip),
    /// Matched profile, nothing to inject.
    PassThrough,
    Injected(Injection),
    /// Injection was wanted but could not be done in time or at all.
    FailedOpen(String),
}

#[derive(Debug, Clone)]
pub struct RewriteOutcome {
    /// Body to send on.
    pub body: String,
    /// Present whenever a profile matched and the body parsed.
    pub template: Option<RequestTemplate>,
    pub status: RewriteStatus,
}

impl RewriteOutcome {
    fn unchanged(raw: &str, template: Option<RequestTemplate>, status: RewriteStatus) -> Self {
        Self {
            body: raw.to_string(),
            template,
            status,
        }
    }

    /// True when a profile matched, so the tab should track the response.
    pub fn is_tracked(&self) -> bool {
        self.template.is_some()
    }
}

/// Result of writing every prompt path of a body.
#[derive(Debug, Default)]
pub struct PathWrites {
    pub written: usize,
    pub failures: Vec<(String, FieldPathError)>,
}

#[derive(Clone)]
pub struct RequestRewriter {
    catalog: Arc<SiteCatalog>,
    pipeline: PipelineConfig,
    prompts: PromptBuilder,
    backend: Arc<dyn ToolBackend>,
    timeout: Duration,
}

impl RequestRewriter {
    pub fn new(
        catalog: Arc<SiteCatalog>,
        pipeline: PipelineConfig,
        backend: Arc<dyn ToolBackend>,
    ) -> Self {
        let timeout = pipeline.rewrite_timeout();
        let prompts = PromptBuilder::new(pipeline.marker.clone());
        Self {
            catalog,
            pipeline,
            prompts,
            backend,
            timeout,
        }
    }

    /// Override the rewrite budget.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn catalog(&self) -> &Arc<SiteCatalog> {
        &self.catalog
    }

    pub fn prompts(&self) -> &PromptBuilder {
        &self.prompts
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn rewrite(&self, url: &str, raw_body: &str) -> RewriteOutcome {
        if !self.pipeline.enabled {
            return RewriteOutcome::unchanged(
                raw_body,
                None,
                RewriteStatus::Skipped(RewriteSkip::Disabled),
            );
        }
        let Some(profile) = self.catalog.match_url(url) else {
            tracing::debug!("no site profile for {url}; passing through");
            return RewriteOutcome::unchanged(
                raw_body,
                None,
                RewriteStatus::Skipped(RewriteSkip::NoProfile),
            );
        };
        let parsed: Value = match serde_json::from_str(raw_body) {
            Ok(value) => value,
            Err(err) => {
                tracing::debug!(site = %profile.id, "request body is not JSON ({err}); passing through");
                return RewriteOutcome::unchanged(
                    raw_body,
                    None,
                    RewriteStatus::Skipped(RewriteSkip::MalformedBody),
                );
            }
        };

        let is_new = profile.new_conversation.is_new_conversation(&parsed);
        let always_inject = self.pipeline.always_inject_for(&profile.hostname);
        let template = RequestTemplate {
            profile: profile.clone(),
            body: parsed,
        };
        if !is_new && !always_inject {
            return RewriteOutcome::unchanged(raw_body, Some(template), RewriteStatus::PassThrough);
        }

        let injection = if is_new {
            Injection::Full
        } else {
            Injection::Reminder
        };
        let prefix = match injection {
            Injection::Reminder => self.prompts.reminder(),
            Injection::Full => match tokio::time::timeout(self.timeout, self.backend.services()).await
            {
                Ok(Ok(services)) => self.prompts.initial(&services),
                Ok(Err(err)) => {
                    tracing::warn!(site = %profile.id, "service discovery failed, sending request unchanged: {err}");
                    return RewriteOutcome::unchanged(
                        raw_body,
                        Some(template),
                        RewriteStatus::FailedOpen(err.to_string()),
                    );
                }
                Err(_) => {
                    tracing::warn!(
                        site = %profile.id,
                        "service discovery exceeded {:?}, sending request unchanged",
                        self.timeout
                    );
                    return RewriteOutcome::unchanged(
                        raw_body,
                        Some(template),
                        RewriteStatus::FailedOpen("rewrite timed out".into()),
                    );
                }
            },
        };

        let mut body = template.body.clone();
        let writes = write_prompt_paths(&mut body, &profile.prompt_field_paths(), |original| {
            inject(&prefix, original)
        });
        for (path, err) in &writes.failures {
            tracing::debug!(site = %profile.id, "prompt path `{path}` left unmodified: {err}");
        }
        if writes.written == 0 {
            return RewriteOutcome::unchanged(
                raw_body,
                Some(template),
                RewriteStatus::FailedOpen("no prompt path could be written".into()),
            );
        }
        tracing::info!(site = %profile.id, ?injection, paths = writes.written, "prompt injected");
        RewriteOutcome {
            body: body.to_string(),
            template: Some(template),
            status: RewriteStatus::Injected(injection),
        }
    }
}

/// Rewrite every prompt path with `transform(current_text)`.
///
/// A missing final key reads as empty text; non-string scalars are
/// stringified. A path that cannot be read or written is left untouched and
/// reported; the others still get written.
pub fn write_prompt_paths<F>(body: &mut Value, paths: &[FieldPath], transform: F) -> PathWrites
where
    F: Fn(&str) -> String,
{
    let mut writes = PathWrites::default();
    for path in paths {
        let current = match path.get(body) {
            Ok(Value::Null) | Err(FieldPathError::Missing(_)) => String::new(),
            Ok(value) => match scalar_text(&value) {
                Some(text) => text,
                None => {
                    writes.failures.push((
                        path.to_string(),
                        FieldPathError::NotWritable(path.to_string()),
                    ));
                    continue;
                }
            },
            Err(err) => {
                writes.failures.push((path.to_string(), err));
                continue;
            }
        };
        match path.set(body, Value::String(transform(&current))) {
            Ok(()) => writes.written += 1,
            Err(err) => writes.failures.push((path.to_string(), err)),
        }
    }
    writes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{CacheContextRequest, ExecuteResult, PageRange, SearchCacheRequest};
    use crate::error::BridgeError;
    use crate::prompt::INJECTION_SEPARATOR;
    use crate::site::{NewConversationRule, ResponseRules, Sentinel};
    use crate::types::{ServiceInfo, ToolInfo};
    use async_trait::async_trait;
    use serde_json::{json, Map};

    struct Services {
        delay: Duration,
        fail: bool,
    }

    #[async_trait]
    impl ToolBackend for Services {
        async fn services(&self) -> Result<Vec<ServiceInfo>, BridgeError> {
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(BridgeError::Unreachable("connection refused".into()));
            }
            Ok(vec![ServiceInfo {
                name: "filesystem".into(),
                description: "Local files".into(),
                is_core: true,
            }])
        }
        async fn list_tools(&self, _: &str) -> Result<Vec<ToolInfo>, BridgeError> {
            Ok(Vec::new())
        }
        async fn execute(
            &self,
            _: &str,
            _: &Map<String, Value>,
            _: Option<&str>,
        ) -> Result<ExecuteResult, BridgeError> {
            Ok(ExecuteResult::Inline(Value::Null))
        }
        async fn cache_page(&self, _: &str, _: PageRange) -> Result<Value, BridgeError> {
            Ok(Value::Null)
        }
        async fn search_cache(&self, _: &SearchCacheRequest) -> Result<Value, BridgeError> {
            Ok(Value::Null)
        }
        async fn cache_context(&self, _: &CacheContextRequest) -> Result<Value, BridgeError> {
            Ok(Value::Null)
        }
    }

    fn profile(embedded: bool, prompt_paths: &[&str]) -> SiteProfile {
        SiteProfile {
            id: "demo".into(),
            hostname: "chat.example.com".into(),
            intercepted_endpoints: vec!["/api/chat".into()],
            prompt_paths: prompt_paths.iter().map(|p| p.to_string()).collect(),
            embedded_json: embedded,
            new_conversation: NewConversationRule {
                sentinels: vec![Sentinel {
                    field: "conversation_id".into(),
                    equals: Some("0".into()),
                    contains: None,
                }],
                ..NewConversationRule::default()
            },
            response: ResponseRules::default(),
            input: None,
            ui_parsing: None,
        }
    }

    fn rewriter(profile: SiteProfile, always_inject: bool, backend: Services) -> RequestRewriter {
        let mut pipeline = PipelineConfig::default();
        if always_inject {
            pipeline
                .always_inject
                .insert("chat.example.com".into(), true);
        }
        RequestRewriter::new(
            Arc::new(SiteCatalog::new(vec![profile])),
            pipeline,
            Arc::new(backend),
        )
    }

    fn fast() -> Services {
        Services {
            delay: Duration::ZERO,
            fail: false,
        }
    }

    const URL: &str = "https://chat.example.com/api/chat";

    #[tokio::test]
    async fn new_conversation_gets_full_prompt_before_user_text() {
        let rw = rewriter(profile(false, &["prompt"]), false, fast());
        let out = rw.rewrite(URL, r#"{"prompt":"hello","conversation_id":"0"}"#).await;
        assert_eq!(out.status, RewriteStatus::Injected(Injection::Full));
        let body: Value = serde_json::from_str(&out.body).expect("json");
        let prompt = body["prompt"].as_str().expect("prompt");
        assert!(prompt.starts_with("# Tool access"));
        assert!(prompt.contains("- **filesystem**: Local files"));
        assert!(prompt.ends_with(&format!("{INJECTION_SEPARATOR}hello")));
        assert_eq!(body["conversation_id"], "0");
        let template = out.template.expect("template");
        assert_eq!(template.body["prompt"], "hello");
    }

    #[tokio::test]
    async fn continuing_conversation_passes_through_without_always_inject() {
        let rw = rewriter(profile(false, &["prompt"]), false, fast());
        let raw = r#"{"prompt":"next","conversation_id":"981"}"#;
        let out = rw.rewrite(URL, raw).await;
        assert_eq!(out.status, RewriteStatus::PassThrough);
        assert_eq!(out.body, raw);
        assert!(out.is_tracked());
    }

    #[tokio::test]
    async fn continuing_conversation_gets_only_reminder_with_always_inject() {
        let rw = rewriter(profile(false, &["prompt"]), true, fast());
        let out = rw
            .rewrite(URL, r#"{"prompt":"next","conversation_id":"981"}"#)
            .await;
        assert_eq!(out.status, RewriteStatus::Injected(Injection::Reminder));
        let body: Value = serde_json::from_str(&out.body).expect("json");
        let prompt = body["prompt"].as_str().expect("prompt");
        assert!(prompt.starts_with("# Tool reminder"));
        assert!(!prompt.contains("# Tool access"));
        assert!(prompt.ends_with("---\n\nnext"));
    }

    #[tokio::test]
    async fn embedded_prompt_is_rewritten_inside_the_json_string() {
        let rw = rewriter(profile(true, &["messages.0.content.text"]), true, fast());
        let raw = json!({
            "conversation_id": "5",
            "messages": [{"content": "{\"text\":\"hi\",\"attachments\":[]}"}]
        })
        .to_string();
        let out = rw.rewrite(URL, &raw).await;
        let body: Value = serde_json::from_str(&out.body).expect("json");
        let inner: Value =
            serde_json::from_str(body["messages"][0]["content"].as_str().expect("string"))
                .expect("inner json");
        assert!(inner["text"].as_str().expect("text").ends_with("\n\nhi"));
        assert_eq!(inner["attachments"], json!([]));
    }

    #[tokio::test]
    async fn discovery_timeout_fails_open() {
        let rw = rewriter(
            profile(false, &["prompt"]),
            false,
            Services {
                delay: Duration::from_millis(500),
                fail: false,
            },
        )
        .with_timeout(Duration::from_millis(50));
        let raw = r#"{"prompt":"hello"}"#;
        let out = rw.rewrite(URL, raw).await;
        assert_eq!(out.body, raw);
        assert!(matches!(out.status, RewriteStatus::FailedOpen(_)));
        assert!(out.is_tracked());
    }

    #[tokio::test]
    async fn discovery_failure_fails_open() {
        let rw = rewriter(
            profile(false, &["prompt"]),
            false,
            Services {
                delay: Duration::ZERO,
                fail: true,
            },
        );
        let raw = r#"{"prompt":"hello"}"#;
        let out = rw.rewrite(URL, raw).await;
        assert_eq!(out.body, raw);
        assert!(matches!(out.status, RewriteStatus::FailedOpen(ref m) if m.contains("unreachable")));
    }

    #[tokio::test]
    async fn skips_unmatched_malformed_and_disabled() {
        let rw = rewriter(profile(false, &["prompt"]), false, fast());
        let out = rw.rewrite("https://other.example/x", "{}").await;
        assert_eq!(out.status, RewriteStatus::Skipped(RewriteSkip::NoProfile));
        assert!(!out.is_tracked());

        let out = rw.rewrite(URL, "prompt=hello").await;
        assert_eq!(out.status, RewriteStatus::Skipped(RewriteSkip::MalformedBody));
        assert_eq!(out.body, "prompt=hello");

        let mut pipeline = PipelineConfig::default();
        pipeline.enabled = false;
        let off = RequestRewriter::new(
            Arc::new(SiteCatalog::new(vec![profile(false, &["prompt"])])),
            pipeline,
            Arc::new(fast()),
        );
        let out = off.rewrite(URL, r#"{"prompt":"x"}"#).await;
        assert_eq!(out.status, RewriteStatus::Skipped(RewriteSkip::Disabled));
    }

    #[tokio::test]
    async fn unwritable_path_does_not_abort_other_paths() {
        let rw = rewriter(profile(false, &["missing.deep.prompt", "prompt"]), false, fast());
        let out = rw.rewrite(URL, r#"{"prompt":"hello"}"#).await;
        assert_eq!(out.status, RewriteStatus::Injected(Injection::Full));
        let body: Value = serde_json::from_str(&out.body).expect("json");
        assert!(body["prompt"].as_str().expect("prompt").ends_with("hello"));
        assert!(body.get("missing").is_none());
    }

    #[test]
    fn write_prompt_paths_stringifies_scalars_and_creates_final_key() {
        let mut body = json!({"n": 7, "obj": {"x": 1}});
        let paths = vec![
            FieldPath::parse("n"),
            FieldPath::parse("fresh"),
            FieldPath::parse("obj"),
        ];
        let writes = write_prompt_paths(&mut body, &paths, |old| format!("P|{old}"));
        assert_eq!(writes.written, 2);
        assert_eq!(writes.failures.len(), 1);
        assert_eq!(body["n"], "P|7");
        assert_eq!(body["fresh"], "P|");
        assert_eq!(body["obj"], json!({"x": 1}));
    }

    #[test]
    fn template_with_prompt_replaces_text() {
        let template = RequestTemplate {
            profile: Arc::new(profile(false, &["prompt"])),
            body: json!({"prompt": "old", "conversation_id": "9"}),
        };
        let body = template.with_prompt("feedback").expect("body");
        assert_eq!(body["prompt"], "feedback");
        assert_eq!(body["conversation_id"], "9");
    }
}
