//! End-to-end request/response cycles through the public runtime API, with
//! the bridge served by wiremock.

use async_trait::async_trait;
use chatbridge::bridge::BridgeClient;
use chatbridge::config::{BridgeConfig, Config};
use chatbridge::error::PageError;
use chatbridge::hook::{InterceptionHook, PageAgent};
use chatbridge::runtime::{
    spawn_runtime, RuntimeEvent, RuntimeEventStream, RuntimeHandle, RuntimeSpawnConfig, ToolEvent,
};
use chatbridge::site::{InputTarget, SiteProfile, UiParsing};
use chatbridge::types::TabId;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const URL: &str = "https://chat.example.com/api/chat";
const TAB: TabId = TabId(7);

struct ChannelPage {
    injected: mpsc::UnboundedSender<(TabId, String, bool)>,
}

#[async_trait]
impl PageAgent for ChannelPage {
    async fn inject_text(
        &self,
        tab: TabId,
        text: &str,
        _input: Option<&InputTarget>,
        submit: bool,
    ) -> Result<(), PageError> {
        self.injected
            .send((tab, text.to_string(), submit))
            .map_err(|_| PageError::Closed)
    }

    async fn read_last_message(
        &self,
        _tab: TabId,
        _ui: &UiParsing,
    ) -> Result<Option<String>, PageError> {
        Ok(None)
    }

    async fn hostname(&self, _tab: TabId) -> Option<String> {
        Some("chat.example.com".to_string())
    }
}

struct Scenario {
    runtime: RuntimeHandle,
    events: RuntimeEventStream,
    injected: mpsc::UnboundedReceiver<(TabId, String, bool)>,
    server: MockServer,
}

fn profile(transport: &str) -> SiteProfile {
    serde_json::from_value(json!({
        "id": "demo",
        "hostname": "chat.example.com",
        "intercepted_endpoints": ["/api/chat"],
        "prompt_paths": ["prompt"],
        "response": {"transport": transport, "content_paths": ["content"]},
        "input": {"selector": "#prompt", "submit_key": "Enter", "submit_delay_ms": 0}
    }))
    .expect("profile json")
}

async fn scenario(transport: &str, always_inject: bool) -> Scenario {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tools"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "services": [
                {"name": "filesystem", "description": "Local files", "is_core": true},
                {"name": "search", "description": "Web search"}
            ]
        })))
        .mount(&server)
        .await;

    let mut config = Config::default();
    config.sites = vec![profile(transport)];
    config
        .pipeline
        .always_inject
        .insert("chat.example.com".to_string(), always_inject);
    config.bridge = BridgeConfig {
        host: "127.0.0.1".to_string(),
        port: server.address().port(),
        ..BridgeConfig::default()
    };

    let (tx, injected) = mpsc::unbounded_channel();
    let (runtime, events) = spawn_runtime(RuntimeSpawnConfig {
        backend: Arc::new(BridgeClient::new(&config.bridge)),
        page: Arc::new(ChannelPage { injected: tx }),
        config,
    })
    .expect("spawn runtime");

    Scenario {
        runtime,
        events,
        injected,
        server,
    }
}

impl Scenario {
    async fn next_injection(&mut self) -> (TabId, String, bool) {
        timeout(Duration::from_secs(5), self.injected.recv())
            .await
            .expect("injection timeout")
            .expect("page channel open")
    }

    async fn wait_for<F>(&mut self, mut predicate: F) -> RuntimeEvent
    where
        F: FnMut(&RuntimeEvent) -> bool,
    {
        loop {
            let envelope = timeout(Duration::from_secs(5), self.events.recv())
                .await
                .expect("event timeout")
                .expect("event stream open");
            if predicate(&envelope.event) {
                return envelope.event;
            }
        }
    }
}

fn prompt_of(body: &str) -> String {
    let value: Value = serde_json::from_str(body).expect("json body");
    value["prompt"].as_str().expect("prompt string").to_string()
}

#[tokio::test]
async fn new_conversation_gets_full_capability_prompt() {
    let s = scenario("text", false).await;
    let hook = s.runtime.tab_hook(TAB);

    let body = hook
        .on_request(URL, json!({"prompt": "list my files"}).to_string())
        .await;
    let prompt = prompt_of(&body);

    assert!(prompt.starts_with("# Tool access"));
    assert!(prompt.contains("filesystem"));
    assert!(prompt.contains("search"));
    assert!(prompt.ends_with("list my files"));
    let full = prompt.find("# Tool access").expect("prompt");
    let original = prompt.find("list my files").expect("original");
    assert!(full < original);
}

#[tokio::test]
async fn continuing_conversation_gets_reminder_only() {
    let s = scenario("text", true).await;
    let hook = s.runtime.tab_hook(TAB);

    let body = hook
        .on_request(
            URL,
            json!({"prompt": "and the next one", "conversation_id": "c-1"}).to_string(),
        )
        .await;
    let prompt = prompt_of(&body);

    assert!(prompt.starts_with("# Tool reminder"));
    assert!(!prompt.contains("# Tool access"));
    assert!(prompt.ends_with("and the next one"));
    let value: Value = serde_json::from_str(&body).expect("json");
    assert_eq!(value["conversation_id"], "c-1");
}

#[tokio::test]
async fn split_sse_marker_is_reassembled_and_dispatched() {
    let mut s = scenario("sse", false).await;
    Mock::given(method("POST"))
        .and(path("/execute"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "result": "x ran"
        })))
        .expect(1)
        .mount(&s.server)
        .await;
    let hook = s.runtime.tab_hook(TAB);
    hook.on_request(URL, json!({"prompt": "go"}).to_string())
        .await;

    let first = "data: {\"content\":\"<tool_co\"}\n\n";
    let second = "data: {\"content\":\"de>{\\\"tool_name\\\":\\\"x\\\",\\\"arguments\\\":{}}</tool_code>\"}\n\n";
    hook.on_response_fragment(URL, first, false).await;
    hook.on_response_fragment(URL, &format!("{first}{second}"), true)
        .await;

    let detected = s
        .wait_for(|event| matches!(event, RuntimeEvent::Tool(ToolEvent::CallDetected { .. })))
        .await;
    match detected {
        RuntimeEvent::Tool(ToolEvent::CallDetected {
            name,
            arguments_json,
            ..
        }) => {
            assert_eq!(name, "x");
            assert_eq!(arguments_json, "{}");
        }
        other => panic!("unexpected event: {other:?}"),
    }

    let (tab, text, submit) = s.next_injection().await;
    assert_eq!(tab, TAB);
    assert!(submit);
    assert!(text.contains("x ran"));

    let requests = s.server.received_requests().await.expect("recording on");
    let execute = requests
        .iter()
        .find(|request| request.url.path() == "/execute")
        .expect("execute request");
    let sent: Value = serde_json::from_slice(&execute.body).expect("json");
    assert_eq!(sent["name"], "x");
    assert_eq!(sent["arguments"], json!({}));
}

#[tokio::test]
async fn cached_reference_feeds_back_paging_instructions() {
    let mut s = scenario("text", false).await;
    Mock::given(method("POST"))
        .and(path("/execute"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "result_type": "cached_reference",
            "cache_id": "abc",
            "total_size": 50000
        })))
        .mount(&s.server)
        .await;
    let hook = s.runtime.tab_hook(TAB);
    hook.on_request(URL, json!({"prompt": "dump the log"}).to_string())
        .await;
    hook.on_response_fragment(
        URL,
        r#"<tool_code>{"tool_name":"read_log","arguments":{}}</tool_code>"#,
        true,
    )
    .await;

    let (_, text, _) = s.next_injection().await;
    assert!(text.contains("# Tool result (cached)"));
    assert!(text.contains("`abc`"));
    assert!(text.contains("\"end\": 8000"));

    let completed = s
        .wait_for(|event| matches!(event, RuntimeEvent::Tool(ToolEvent::Completed { .. })))
        .await;
    assert!(matches!(
        completed,
        RuntimeEvent::Tool(ToolEvent::Completed { success: true, .. })
    ));
}

#[tokio::test]
async fn malformed_call_is_reported_without_dispatch() {
    let mut s = scenario("text", false).await;
    let hook = s.runtime.tab_hook(TAB);
    hook.on_request(URL, json!({"prompt": "try"}).to_string())
        .await;
    hook.on_response_fragment(URL, "<tool_code>{not json}</tool_code>", true)
        .await;

    let (_, text, submit) = s.next_injection().await;
    assert!(submit);
    assert!(text.contains("# Tool call not understood"));
    assert!(text.contains("not valid JSON"));

    s.wait_for(|event| matches!(event, RuntimeEvent::Tool(ToolEvent::Malformed { .. })))
        .await;
    let requests = s.server.received_requests().await.expect("recording on");
    assert!(requests
        .iter()
        .all(|request| request.url.path() != "/execute"));
}
