//! Runtime coordinator and schema facade.
//!
//! Event types live in `schema`, the per-tab actor in `tab`. The coordinator
//! owns the tab registry: it creates a tab actor on first contact, routes
//! commands to it, and stops it when the tab closes or navigates away.

use crate::bridge::ToolBackend;
use crate::config::Config;
use crate::dispatch::ToolDispatcher;
use crate::error::{ConfigError, RuntimeClosed};
use crate::hook::{PageAgent, TabHook};
use crate::pipeline::{RequestRewriter, TagDetector};
use crate::site::SiteCatalog;
use crate::types::TabId;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

mod schema;
mod tab;

pub use schema::*;
use tab::{spawn_tab, TabHandle, TabMessage, TabShared};

/// Extra time the hook waits for a rewritten body beyond the rewrite budget.
const REPLY_GRACE: Duration = Duration::from_secs(1);

/// Commands accepted by the runtime coordinator.
#[derive(Debug)]
pub enum RuntimeCommand {
    Request {
        tab: TabId,
        url: String,
        body: String,
        reply: oneshot::Sender<String>,
    },
    Fragment {
        tab: TabId,
        url: String,
        text: String,
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
    Shutdown,
}

/// Handle for sending commands to a spawned runtime.
#[derive(Clone)]
pub struct RuntimeHandle {
    commands: mpsc::Sender<RuntimeCommand>,
    reply_timeout: Duration,
}

impl RuntimeHandle {
    pub async fn send(&self, command: RuntimeCommand) -> Result<(), RuntimeClosed> {
        self.commands.send(command).await.map_err(|_| RuntimeClosed)
    }

    /// Run an intercepted request through its tab and wait for the body to
    /// send.
    pub async fn request(
        &self,
        tab: TabId,
        url: &str,
        body: String,
    ) -> Result<String, RuntimeClosed> {
        let (reply, rx) = oneshot::channel();
        self.send(RuntimeCommand::Request {
            tab,
            url: url.to_string(),
            body,
            reply,
        })
        .await?;
        rx.await.map_err(|_| RuntimeClosed)
    }

    pub async fn fragment(
        &self,
        tab: TabId,
        url: &str,
        text: String,
        is_final: bool,
    ) -> Result<(), RuntimeClosed> {
        self.send(RuntimeCommand::Fragment {
            tab,
            url: url.to_string(),
            text,
            is_final,
        })
        .await
    }

    pub async fn tab_closed(&self, tab: TabId) -> Result<(), RuntimeClosed> {
        self.send(RuntimeCommand::TabClosed { tab }).await
    }

    pub async fn navigated(&self, tab: TabId) -> Result<(), RuntimeClosed> {
        self.send(RuntimeCommand::Navigated { tab }).await
    }

    pub async fn redetect(&self, tab: TabId) -> Result<(), RuntimeClosed> {
        self.send(RuntimeCommand::Redetect { tab }).await
    }

    pub async fn manual_parse(&self, tab: TabId, content: String) -> Result<(), RuntimeClosed> {
        self.send(RuntimeCommand::ManualParse { tab, content }).await
    }

    pub async fn refresh_prompt(&self, tab: TabId) -> Result<(), RuntimeClosed> {
        self.send(RuntimeCommand::RefreshPrompt { tab }).await
    }

    pub async fn shutdown(&self) -> Result<(), RuntimeClosed> {
        self.send(RuntimeCommand::Shutdown).await
    }

    /// Interception hook bound to `tab`.
    pub fn tab_hook(&self, tab: TabId) -> TabHook {
        TabHook::new(tab, self.clone(), self.reply_timeout)
    }

    /// How long a hook waits for a rewritten body before sending the original.
    pub fn reply_timeout(&self) -> Duration {
        self.reply_timeout
    }
}

/// Event stream receiver returned by [`spawn_runtime`].
pub type RuntimeEventStream = mpsc::UnboundedReceiver<RuntimeEventEnvelope>;

/// Bootstrap inputs for the runtime.
pub struct RuntimeSpawnConfig {
    pub config: Config,
    pub backend: Arc<dyn ToolBackend>,
    pub page: Arc<dyn PageAgent>,
}

/// Spawn the coordinator; fails only on an invalid marker name.
pub fn spawn_runtime(
    spawn: RuntimeSpawnConfig,
) -> Result<(RuntimeHandle, RuntimeEventStream), ConfigError> {
    let RuntimeSpawnConfig {
        config,
        backend,
        page,
    } = spawn;
    let detector = TagDetector::new(&config.pipeline.marker)?;
    let catalog = Arc::new(SiteCatalog::new(config.sites));
    let rewriter = RequestRewriter::new(catalog, config.pipeline.clone(), backend.clone());
    let reply_timeout = rewriter.timeout() + REPLY_GRACE;
    let shared = Arc::new(TabShared {
        rewriter,
        detector,
        dispatcher: ToolDispatcher::new(backend.clone()),
        backend,
        page,
        pipeline: config.pipeline,
    });

    let (command_tx, mut command_rx) = mpsc::channel::<RuntimeCommand>(256);
    let (event_tx, event_rx) = mpsc::unbounded_channel::<RuntimeEventEnvelope>();

    tokio::spawn(async move {
        let (tab_event_tx, mut tab_event_rx) = mpsc::unbounded_channel::<RuntimeEvent>();
        let mut seq: u64 = 0;
        let mut tabs = HashMap::<TabId, TabHandle>::new();

        emit_event(
            &event_tx,
            &mut seq,
            RuntimeEvent::Lifecycle(LifecycleEvent::RuntimeStarted),
        );

        loop {
            tokio::select! {
                command = command_rx.recv() => {
                    let Some(command) = command else {
                        break;
                    };
                    let mut ctx = CoordinatorContext {
                        tabs: &mut tabs,
                        shared: &shared,
                        tab_event_tx: &tab_event_tx,
                        event_tx: &event_tx,
                        seq: &mut seq,
                    };
                    if handle_command(command, &mut ctx) {
                        break;
                    }
                }
                Some(event) = tab_event_rx.recv() => {
                    emit_event(&event_tx, &mut seq, event);
                }
            }
        }

        for (_, handle) in tabs.drain() {
            handle.task.abort();
        }
        while let Ok(event) = tab_event_rx.try_recv() {
            emit_event(&event_tx, &mut seq, event);
        }
        emit_event(
            &event_tx,
            &mut seq,
            RuntimeEvent::Lifecycle(LifecycleEvent::RuntimeStopped),
        );
    });

    Ok((
        RuntimeHandle {
            commands: command_tx,
            reply_timeout,
        },
        event_rx,
    ))
}

fn emit_event(
    tx: &mpsc::UnboundedSender<RuntimeEventEnvelope>,
    seq: &mut u64,
    event: RuntimeEvent,
) {
    let _ = tx.send(RuntimeEventEnvelope::new(*seq, event));
    *seq = seq.saturating_add(1);
}

struct CoordinatorContext<'a> {
    tabs: &'a mut HashMap<TabId, TabHandle>,
    shared: &'a Arc<TabShared>,
    tab_event_tx: &'a mpsc::UnboundedSender<RuntimeEvent>,
    event_tx: &'a mpsc::UnboundedSender<RuntimeEventEnvelope>,
    seq: &'a mut u64,
}

impl CoordinatorContext<'_> {
    fn tab(&mut self, tab: TabId) -> &TabHandle {
        if !self.tabs.contains_key(&tab) {
            let handle = spawn_tab(tab, Arc::clone(self.shared), self.tab_event_tx.clone());
            self.tabs.insert(tab, handle);
            emit_event(
                self.event_tx,
                self.seq,
                RuntimeEvent::Tab(TabEvent::Opened { tab }),
            );
        }
        &self.tabs[&tab]
    }

    fn forward(&mut self, tab: TabId, message: TabMessage) {
        let sent = self.tab(tab).inbox.send(message);
        let Err(mpsc::error::SendError(message)) = sent else {
            return;
        };
        tracing::warn!(tab = %tab, "tab actor is gone; restarting it");
        self.tabs.remove(&tab);
        let retried = self.tab(tab).inbox.send(message);
        if let Err(mpsc::error::SendError(TabMessage::Request { body, reply, .. })) = retried {
            let _ = reply.send(body);
        }
    }

    fn close(&mut self, tab: TabId) {
        if let Some(handle) = self.tabs.remove(&tab) {
            handle.task.abort();
            emit_event(
                self.event_tx,
                self.seq,
                RuntimeEvent::Tab(TabEvent::Closed { tab }),
            );
        }
    }
}

/// Returns `true` when the coordinator should stop.
fn handle_command(command: RuntimeCommand, ctx: &mut CoordinatorContext<'_>) -> bool {
    match command {
        RuntimeCommand::Request {
            tab,
            url,
            body,
            reply,
        } => ctx.forward(tab, TabMessage::Request { url, body, reply }),
        RuntimeCommand::Fragment {
            tab,
            url,
            text,
            is_final,
        } => {
            if ctx.tabs.contains_key(&tab) {
                ctx.forward(
                    tab,
                    TabMessage::Fragment {
                        url,
                        text,
                        is_final,
                    },
                );
            } else {
                tracing::debug!(tab = %tab, "response fragment for a tab without requests");
            }
        }
        RuntimeCommand::TabClosed { tab } | RuntimeCommand::Navigated { tab } => ctx.close(tab),
        RuntimeCommand::Redetect { tab } => ctx.forward(tab, TabMessage::Redetect),
        RuntimeCommand::ManualParse { tab, content } => {
            ctx.forward(tab, TabMessage::ManualParse { content })
        }
        RuntimeCommand::RefreshPrompt { tab } => ctx.forward(tab, TabMessage::RefreshPrompt),
        RuntimeCommand::Shutdown => return true,
    }
    false
}
