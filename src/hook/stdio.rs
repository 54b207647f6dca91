//! Line-delimited JSON host.
//!
//! The page shim (or a browser native-messaging bridge) writes one JSON
//! object per line on our stdin and reads one per line from our stdout.
//! Requests are answered out of order, keyed by `id`; everything else is
//! fire-and-forget. Runtime events are forwarded as `event` lines.

use crate::bridge::ToolBackend;
use crate::config::Config;
use crate::error::{HostError, PageError};
use crate::hook::{InterceptionHook, PageAgent};
use crate::runtime::{spawn_runtime, RuntimeEventEnvelope, RuntimeHandle, RuntimeSpawnConfig};
use crate::site::{InputTarget, UiParsing};
use crate::types::TabId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, Mutex};

/// How long the runtime waits for a `page_reply`.
pub const PAGE_REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Messages from the page side.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Inbound {
    Request {
        id: u64,
        tab: TabId,
        url: String,
        body: String,
    },
    ResponseFragment {
        tab: TabId,
        url: String,
        text: String,
        #[serde(default)]
        is_final: bool,
    },
    TabClosed {
        tab: TabId,
    },
    Navigated {
        tab: TabId,
    },
    Redetect {
        tab: TabId,
    },
    ManualParse {
        tab: TabId,
        content: String,
    },
    RefreshPrompt {
        tab: TabId,
    },
    /// Answer to a `read_message`.
    PageReply {
        id: u64,
        #[serde(default)]
        content: Option<String>,
        #[serde(default)]
        error: Option<String>,
    },
}

/// Messages to the page side.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound {
    RequestBody {
        id: u64,
        body: String,
    },
    InjectText {
        tab: TabId,
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        input: Option<InputTarget>,
        submit: bool,
    },
    ReadMessage {
        id: u64,
        tab: TabId,
        ui: UiParsing,
    },
    Event(RuntimeEventEnvelope),
}

type PageReply = Result<Option<String>, String>;

/// [`PageAgent`] that talks to the page through the outbound line stream.
pub struct StdioPage {
    outbound: mpsc::UnboundedSender<Outbound>,
    replies: Mutex<HashMap<u64, oneshot::Sender<PageReply>>>,
    hostnames: Mutex<HashMap<TabId, String>>,
    next_id: AtomicU64,
    reply_timeout: Duration,
}

impl StdioPage {
    pub fn new(outbound: mpsc::UnboundedSender<Outbound>, reply_timeout: Duration) -> Self {
        Self {
            outbound,
            replies: Mutex::new(HashMap::new()),
            hostnames: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            reply_timeout,
        }
    }

    /// Track the hostname a tab is on from the URLs it reports.
    async fn remember_url(&self, tab: TabId, url: &str) {
        let Some(host) = reqwest::Url::parse(url)
            .ok()
            .and_then(|url| url.host_str().map(str::to_string))
        else {
            return;
        };
        self.hostnames.lock().await.insert(tab, host);
    }

    async fn forget(&self, tab: TabId) {
        self.hostnames.lock().await.remove(&tab);
    }

    async fn resolve(&self, id: u64, reply: PageReply) {
        match self.replies.lock().await.remove(&id) {
            Some(waiter) => {
                let _ = waiter.send(reply);
            }
            None => tracing::debug!("page reply {id} has no waiter"),
        }
    }
}

#[async_trait]
impl PageAgent for StdioPage {
    async fn inject_text(
        &self,
        tab: TabId,
        text: &str,
        input: Option<&InputTarget>,
        submit: bool,
    ) -> Result<(), PageError> {
        self.outbound
            .send(Outbound::InjectText {
                tab,
                text: text.to_string(),
                input: input.cloned(),
                submit,
            })
            .map_err(|_| PageError::Closed)
    }

    async fn read_last_message(
        &self,
        tab: TabId,
        ui: &UiParsing,
    ) -> Result<Option<String>, PageError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.replies.lock().await.insert(id, tx);
        self.outbound
            .send(Outbound::ReadMessage {
                id,
                tab,
                ui: ui.clone(),
            })
            .map_err(|_| PageError::Closed)?;

        match tokio::time::timeout(self.reply_timeout, rx).await {
            Ok(Ok(Ok(content))) => Ok(content),
            Ok(Ok(Err(message))) => Err(PageError::Failed(message)),
            Ok(Err(_)) => Err(PageError::Closed),
            Err(_) => {
                self.replies.lock().await.remove(&id);
                Err(PageError::Timeout)
            }
        }
    }

    async fn hostname(&self, tab: TabId) -> Option<String> {
        self.hostnames.lock().await.get(&tab).cloned()
    }
}

/// Run the host until `reader` reaches end of input.
pub async fn serve<R, W>(
    reader: R,
    writer: W,
    config: Config,
    backend: Arc<dyn ToolBackend>,
) -> Result<(), HostError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (out_tx, out_rx) = mpsc::unbounded_channel::<Outbound>();
    let page = Arc::new(StdioPage::new(out_tx.clone(), PAGE_REPLY_TIMEOUT));
    let (runtime, mut events) = spawn_runtime(RuntimeSpawnConfig {
        config,
        backend,
        page: page.clone(),
    })?;

    let writer_task = tokio::spawn(write_lines(writer, out_rx));
    let events_out = out_tx.clone();
    let events_task = tokio::spawn(async move {
        while let Some(envelope) = events.recv().await {
            if events_out.send(Outbound::Event(envelope)).is_err() {
                break;
            }
        }
    });

    tracing::info!("stdio host ready");
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<Inbound>(line) {
            Ok(message) => handle_inbound(message, &runtime, &page, &out_tx).await,
            Err(err) => tracing::warn!("ignoring unreadable host message: {err}"),
        }
    }

    tracing::info!("host input closed; shutting down");
    let _ = runtime.shutdown().await;
    drop(runtime);
    let _ = events_task.await;
    drop(page);
    drop(out_tx);
    match writer_task.await {
        Ok(result) => result?,
        Err(err) => tracing::warn!("output writer stopped abnormally: {err}"),
    }
    Ok(())
}

async fn handle_inbound(
    message: Inbound,
    runtime: &RuntimeHandle,
    page: &StdioPage,
    out: &mpsc::UnboundedSender<Outbound>,
) {
    let sent = match message {
        Inbound::Request { id, tab, url, body } => {
            page.remember_url(tab, &url).await;
            let hook = runtime.tab_hook(tab);
            let out = out.clone();
            tokio::spawn(async move {
                let body = hook.on_request(&url, body).await;
                let _ = out.send(Outbound::RequestBody { id, body });
            });
            Ok(())
        }
        Inbound::ResponseFragment {
            tab,
            url,
            text,
            is_final,
        } => {
            page.remember_url(tab, &url).await;
            runtime.fragment(tab, &url, text, is_final).await
        }
        Inbound::TabClosed { tab } => {
            page.forget(tab).await;
            runtime.tab_closed(tab).await
        }
        Inbound::Navigated { tab } => runtime.navigated(tab).await,
        Inbound::Redetect { tab } => runtime.redetect(tab).await,
        Inbound::ManualParse { tab, content } => runtime.manual_parse(tab, content).await,
        Inbound::RefreshPrompt { tab } => runtime.refresh_prompt(tab).await,
        Inbound::PageReply { id, content, error } => {
            let reply = match error {
                Some(message) => Err(message),
                None => Ok(content),
            };
            page.resolve(id, reply).await;
            Ok(())
        }
    };
    if let Err(err) = sent {
        tracing::debug!("dropping host message: {err}");
    }
}

async fn write_lines<W>(
    mut writer: W,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = rx.recv().await {
        let mut line = match serde_json::to_string(&message) {
            Ok(line) => line,
            Err(err) => {
                tracing::warn!("dropping unserializable host message: {err}");
                continue;
            }
        };
        line.push('\n');
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::site::UiPriority;
    use crate::testsupport::{demo_profile, StubBackend, DEMO_URL};
    use serde_json::{json, Value};
    use tokio::io::{AsyncWriteExt, BufReader, DuplexStream, Lines};

    const CALL: &str = r#"<tool_code>{"tool_name":"read_file","arguments":{"path":"/a"}}</tool_code>"#;

    struct Host {
        input: DuplexStream,
        output: Lines<BufReader<DuplexStream>>,
        task: tokio::task::JoinHandle<Result<(), HostError>>,
    }

    fn start(config: Config) -> Host {
        let (input, serve_in) = tokio::io::duplex(1 << 16);
        let (serve_out, output) = tokio::io::duplex(1 << 16);
        let backend: Arc<dyn ToolBackend> = Arc::new(StubBackend::new());
        let task = tokio::spawn(serve(BufReader::new(serve_in), serve_out, config, backend));
        Host {
            input,
            output: BufReader::new(output).lines(),
            task,
        }
    }

    impl Host {
        async fn send(&mut self, message: Value) {
            let mut line = message.to_string();
            line.push('\n');
            self.input.write_all(line.as_bytes()).await.expect("write");
        }

        /// Next outbound line that is not a runtime event.
        async fn next(&mut self) -> Value {
            loop {
                let line = tokio::time::timeout(Duration::from_secs(3), self.output.next_line())
                    .await
                    .expect("output timeout")
                    .expect("read")
                    .expect("output open");
                let value: Value = serde_json::from_str(&line).expect("json line");
                if value["type"] != "event" {
                    return value;
                }
            }
        }
    }

    fn config_with(profile: crate::site::SiteProfile) -> Config {
        let mut config = Config::default();
        config.sites = vec![profile];
        config
    }

    #[test]
    fn inbound_messages_parse_from_json_lines() {
        let parsed: Inbound = serde_json::from_str(
            r#"{"type":"response_fragment","tab":3,"url":"u","text":"t"}"#,
        )
        .expect("parse");
        assert_eq!(
            parsed,
            Inbound::ResponseFragment {
                tab: TabId(3),
                url: "u".into(),
                text: "t".into(),
                is_final: false,
            }
        );
        let reply: Inbound =
            serde_json::from_str(r#"{"type":"page_reply","id":9,"content":null}"#).expect("parse");
        assert_eq!(
            reply,
            Inbound::PageReply {
                id: 9,
                content: None,
                error: None,
            }
        );
    }

    #[test]
    fn outbound_event_lines_flatten_the_envelope() {
        let envelope = RuntimeEventEnvelope::new(
            2,
            crate::runtime::RuntimeEvent::Lifecycle(crate::runtime::LifecycleEvent::RuntimeStarted),
        );
        let value = serde_json::to_value(Outbound::Event(envelope)).expect("serialize");
        assert_eq!(value["type"], "event");
        assert_eq!(value["seq"], 2);
        assert_eq!(value["event"]["type"], "Lifecycle");
    }

    #[tokio::test]
    async fn request_and_stream_round_trip_over_lines() {
        let mut host = start(config_with(demo_profile()));
        host.send(json!({
            "type": "request", "id": 1, "tab": 7, "url": DEMO_URL,
            "body": json!({"prompt": "hello"}).to_string()
        }))
        .await;

        let reply = host.next().await;
        assert_eq!(reply["type"], "request_body");
        assert_eq!(reply["id"], 1);
        let body: Value =
            serde_json::from_str(reply["body"].as_str().expect("body")).expect("json body");
        assert!(body["prompt"].as_str().expect("prompt").ends_with("hello"));

        host.send(json!("not a message")).await;
        host.send(json!({
            "type": "response_fragment", "tab": 7, "url": DEMO_URL, "text": CALL, "is_final": true
        }))
        .await;

        let inject = host.next().await;
        assert_eq!(inject["type"], "inject_text");
        assert_eq!(inject["tab"], 7);
        assert_eq!(inject["submit"], true);
        assert_eq!(inject["input"]["selector"], "#prompt");
        assert!(inject["text"]
            .as_str()
            .expect("text")
            .starts_with("<tool_result>"));

        drop(host.input);
        host.task
            .await
            .expect("join")
            .expect("serve finishes cleanly");
    }

    #[tokio::test]
    async fn final_fragment_reads_rendered_message_through_page_reply() {
        let mut profile = demo_profile();
        profile.ui_parsing = Some(UiParsing {
            enabled: true,
            message_container: ".message".into(),
            message_index: -1,
            content_selector: None,
            priority: UiPriority::Ui,
        });
        let mut host = start(config_with(profile));
        host.send(json!({
            "type": "request", "id": 1, "tab": 2, "url": DEMO_URL,
            "body": json!({"prompt": "hi"}).to_string()
        }))
        .await;
        assert_eq!(host.next().await["type"], "request_body");

        host.send(json!({
            "type": "response_fragment", "tab": 2, "url": DEMO_URL,
            "text": "garbled transport text", "is_final": true
        }))
        .await;

        let read = host.next().await;
        assert_eq!(read["type"], "read_message");
        assert_eq!(read["ui"]["message_container"], ".message");
        host.send(json!({"type": "page_reply", "id": read["id"], "content": CALL}))
            .await;

        let inject = host.next().await;
        assert_eq!(inject["type"], "inject_text");
        assert!(inject["text"]
            .as_str()
            .expect("text")
            .contains("read_file"));
    }
}
