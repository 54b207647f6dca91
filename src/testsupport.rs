//! Shared test fixtures for pipeline, runtime, and host test modules.
//!
//! Keeping the stub backend and the recording page here prevents each test
//! module from rebuilding its own collaborator doubles.

use crate::bridge::{CacheContextRequest, ExecuteResult, PageRange, SearchCacheRequest, ToolBackend};
use crate::error::{BridgeError, PageError};
use crate::hook::PageAgent;
use crate::site::{InputTarget, NewConversationRule, ResponseRules, SiteProfile, UiParsing};
use crate::types::{ServiceInfo, TabId, ToolInfo};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;

static TEST_DIR_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Temporary directory fixture with best-effort cleanup.
#[derive(Debug)]
pub struct TestTempDir {
    path: PathBuf,
}

impl TestTempDir {
    /// Create a unique temporary directory with a readable prefix.
    pub fn new(prefix: &str) -> Self {
        let suffix = TEST_DIR_COUNTER.fetch_add(1, Ordering::Relaxed);
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let dir = std::env::temp_dir().join(format!("chatbridge-{prefix}-{millis}-{suffix}"));
        fs::create_dir_all(&dir).expect("failed to create temporary fixture directory");
        Self { path: dir }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn child(&self, relative: &str) -> PathBuf {
        self.path.join(relative)
    }
}

impl Drop for TestTempDir {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.path);
    }
}

/// One SSE `data:` block.
pub fn sse_data_block(data: &str) -> String {
    format!("data: {data}\n\n")
}

pub fn sse_done_block() -> &'static str {
    "data: [DONE]\n\n"
}

/// Plain-text site on `chat.example.com` with its prompt at `prompt`.
pub fn demo_profile() -> SiteProfile {
    SiteProfile {
        id: "demo".into(),
        hostname: "chat.example.com".into(),
        intercepted_endpoints: vec!["/api/chat".into()],
        prompt_paths: vec!["prompt".into()],
        embedded_json: false,
        new_conversation: NewConversationRule::default(),
        response: ResponseRules::plain_text(),
        input: Some(InputTarget {
            selector: "#prompt".into(),
            submit_key: Some("Enter".into()),
            submit_modifiers: Vec::new(),
            submit_delay_ms: 0,
        }),
        ui_parsing: None,
    }
}

pub const DEMO_URL: &str = "https://chat.example.com/api/chat";

// ---------------------------------------------------------------------------
// Backend double
// ---------------------------------------------------------------------------

/// Scripted [`ToolBackend`] that records every call it receives.
#[derive(Default)]
pub struct StubBackend {
    services: Vec<ServiceInfo>,
    results: Mutex<VecDeque<Result<ExecuteResult, BridgeError>>>,
    calls: Mutex<Vec<String>>,
    delay: Duration,
}

impl StubBackend {
    pub fn new() -> Self {
        Self {
            services: vec![ServiceInfo {
                name: "filesystem".into(),
                description: "Read and write local files".into(),
                is_core: true,
            }],
            ..Self::default()
        }
    }

    /// Queue the result of the next `execute`.
    pub fn push_result(&self, result: Result<ExecuteResult, BridgeError>) {
        self.results.lock().expect("results lock").push_back(result);
    }

    /// Delay every discovery and execution by `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }

    fn record(&self, entry: String) {
        self.calls.lock().expect("calls lock").push(entry);
    }
}

#[async_trait]
impl ToolBackend for StubBackend {
    async fn services(&self) -> Result<Vec<ServiceInfo>, BridgeError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(self.services.clone())
    }

    async fn list_tools(&self, service: &str) -> Result<Vec<ToolInfo>, BridgeError> {
        self.record(format!("list:{service}"));
        Ok(Vec::new())
    }

    async fn execute(
        &self,
        name: &str,
        _arguments: &Map<String, Value>,
        _server_name: Option<&str>,
    ) -> Result<ExecuteResult, BridgeError> {
        self.record(format!("execute:{name}"));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.results
            .lock()
            .expect("results lock")
            .pop_front()
            .unwrap_or_else(|| Ok(ExecuteResult::Inline(json!("ok"))))
    }

    async fn cache_page(&self, cache_id: &str, _range: PageRange) -> Result<Value, BridgeError> {
        self.record(format!("page:{cache_id}"));
        Ok(json!({"content": ""}))
    }

    async fn search_cache(&self, request: &SearchCacheRequest) -> Result<Value, BridgeError> {
        self.record(format!("search:{}", request.cache_id));
        Ok(json!({"matches": []}))
    }

    async fn cache_context(&self, request: &CacheContextRequest) -> Result<Value, BridgeError> {
        self.record(format!("context:{}", request.cache_id));
        Ok(json!({"context": ""}))
    }
}

// ---------------------------------------------------------------------------
// Page double
// ---------------------------------------------------------------------------

/// One `inject_text` call seen by [`RecordingPage`].
#[derive(Debug, Clone, PartialEq)]
pub struct Injected {
    pub tab: TabId,
    pub text: String,
    pub submit: bool,
}

/// [`PageAgent`] that reports injections on a channel and serves canned DOM
/// text.
pub struct RecordingPage {
    injected: mpsc::UnboundedSender<Injected>,
    last_message: Mutex<HashMap<TabId, String>>,
    hostname: Option<String>,
}

impl RecordingPage {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Injected>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                injected: tx,
                last_message: Mutex::new(HashMap::new()),
                hostname: Some("chat.example.com".into()),
            },
            rx,
        )
    }

    pub fn set_last_message(&self, tab: TabId, text: &str) {
        self.last_message
            .lock()
            .expect("message lock")
            .insert(tab, text.to_string());
    }
}

#[async_trait]
impl PageAgent for RecordingPage {
    async fn inject_text(
        &self,
        tab: TabId,
        text: &str,
        _input: Option<&InputTarget>,
        submit: bool,
    ) -> Result<(), PageError> {
        self.injected
            .send(Injected {
                tab,
                text: text.to_string(),
                submit,
            })
            .map_err(|_| PageError::Closed)
    }

    async fn read_last_message(
        &self,
        tab: TabId,
        _ui: &UiParsing,
    ) -> Result<Option<String>, PageError> {
        Ok(self
            .last_message
            .lock()
            .expect("message lock")
            .get(&tab)
            .cloned())
    }

    async fn hostname(&self, _tab: TabId) -> Option<String> {
        self.hostname.clone()
    }
}
