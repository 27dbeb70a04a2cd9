//! Relay worker: top-level state and channel lifecycle
//!
//! The worker owns the cancellation registry, the provider and the store.
//! Each accepted channel gets a cancellation handle on connect and a task
//! that serves its requests until the channel closes, at which point the
//! handle is released.

use crate::config::Config;
use crate::error::{Result, RelaywizError};
use crate::providers::Provider;
use crate::relay::capture::Capture;
use crate::relay::metrics::SessionOutcome;
use crate::relay::port::{self, PagePort, ReplySender, TabId, WorkerPort};
use crate::relay::protocol::{PageAction, PageRequest, Reply, ReplyAction};
use crate::relay::registry::{CancellationHandle, CancellationRegistry};
use crate::relay::session::{run_session, SessionContext, SessionRequest};
use crate::relay::speech::run_read;
use crate::storage::{ConversationLog, KeyValueStore, Settings};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Background relay between pages and the provider
pub struct RelayWorker {
    provider: Arc<dyn Provider>,
    store: Arc<dyn KeyValueStore>,
    history: ConversationLog,
    registry: CancellationRegistry,
    capture: Option<Arc<dyn Capture>>,
    channel_prefix: String,
    default_model: String,
}

impl RelayWorker {
    /// Create a worker from configuration
    pub fn new(config: &Config, provider: Arc<dyn Provider>, store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            provider,
            history: ConversationLog::new(Arc::clone(&store), config.relay.history_cap),
            store,
            registry: CancellationRegistry::new(),
            capture: None,
            channel_prefix: config.relay.channel_prefix.clone(),
            default_model: config.provider.model.clone(),
        }
    }

    /// Serve `capture` requests with `capture`
    pub fn with_capture(mut self, capture: Arc<dyn Capture>) -> Self {
        self.capture = Some(capture);
        self
    }

    /// Cancellation handles of open channels
    pub fn registry(&self) -> &CancellationRegistry {
        &self.registry
    }

    /// Conversation history
    pub fn history(&self) -> &ConversationLog {
        &self.history
    }

    /// Open a channel named `name` for `tab`
    ///
    /// Channels whose name lacks the configured prefix are closed right
    /// away. Must be called from within a Tokio runtime.
    pub fn connect(self: &Arc<Self>, name: &str, tab: TabId) -> PagePort {
        let (page, worker_port) = port::channel(name, tab);

        if !name.starts_with(&self.channel_prefix) {
            tracing::warn!(port = name, tab, "Refusing channel without expected prefix");
            worker_port.sender().disconnect();
            return page;
        }

        let handle = self
            .registry
            .register_channel(tab, worker_port.sender().closed_token());
        tracing::info!(port = name, tab, "Channel connected");

        let worker = Arc::clone(self);
        tokio::spawn(async move { worker.serve(worker_port, handle).await });
        page
    }

    async fn serve(self: Arc<Self>, mut port: WorkerPort, handle: CancellationHandle) {
        let tab = port.tab_id();
        let replies = port.sender();

        while let Some(request) = port.recv().await {
            tracing::debug!(port = port.name(), action = ?request.action, "Request received");
            match request.action {
                PageAction::Abort => self.registry.cancel_handle(tab, &handle),
                PageAction::Stream => self.spawn_stream(request, replies.clone(), handle.token()),
                PageAction::Read => self.spawn_read(request, replies.clone(), handle.token()),
                PageAction::Capture => self.capture(tab, &replies).await,
            }
        }

        tracing::info!(port = port.name(), tab, "Channel disconnected");
        self.registry.release_handle(tab, &handle);
    }

    /// Load settings on the blocking pool; unsealing the key is CPU-bound
    async fn settings(self: &Arc<Self>) -> Result<Settings> {
        let worker = Arc::clone(self);
        tokio::task::spawn_blocking(move || {
            let defaults = Settings {
                model: worker.default_model.clone(),
                ..Settings::default()
            };
            Settings::load_with(worker.store.as_ref(), defaults)
        })
        .await
        .map_err(|e| RelaywizError::Storage(format!("Settings load task failed: {}", e)))?
    }

    fn spawn_stream(self: &Arc<Self>, request: PageRequest, replies: ReplySender, cancel: CancellationToken) {
        let worker = Arc::clone(self);
        tokio::spawn(async move {
            let settings = match worker.settings().await {
                Ok(settings) => settings,
                Err(e) => {
                    tracing::error!("Failed to load settings: {:#}", e);
                    replies.send(Reply::fragment(
                        replies.port_name(),
                        request.task_kind(),
                        None,
                        e.to_string(),
                    ));
                    replies.disconnect();
                    return;
                }
            };

            let context = SessionContext {
                provider: Arc::clone(&worker.provider),
                history: worker.history.clone(),
                api_key: settings.api_key.clone(),
                model: settings.model.clone(),
            };
            let session = SessionRequest::from_page(&request, &settings.native_lang);
            let outcome = run_session(&context, session, &replies, cancel).await;
            close_unless_completed(&replies, outcome);
        });
    }

    fn spawn_read(self: &Arc<Self>, request: PageRequest, replies: ReplySender, cancel: CancellationToken) {
        let worker = Arc::clone(self);
        tokio::spawn(async move {
            let settings = match worker.settings().await {
                Ok(settings) => settings,
                Err(e) => {
                    tracing::error!("Failed to load settings: {:#}", e);
                    replies.send(Reply::stop(replies.port_name(), ReplyAction::Read, e.to_string()));
                    replies.disconnect();
                    return;
                }
            };

            let outcome = run_read(
                worker.provider.as_ref(),
                &settings.api_key,
                &settings.voice,
                &request.text,
                &replies,
                cancel,
            )
            .await;
            close_unless_completed(&replies, outcome);
        });
    }

    async fn capture(&self, tab: TabId, replies: &ReplySender) {
        let Some(capture) = &self.capture else {
            tracing::warn!(tab, "Capture requested but no capture source is configured");
            replies.send(Reply::stop(
                replies.port_name(),
                ReplyAction::Capture,
                "Screen capture is not available".to_string(),
            ));
            return;
        };

        match capture.capture_visible(tab).await {
            Ok(data_url) => {
                replies.send(Reply::capture(replies.port_name(), data_url));
            }
            Err(e) => {
                tracing::error!(tab, "Capture failed: {:#}", e);
                replies.send(Reply::stop(replies.port_name(), ReplyAction::Capture, e.to_string()));
            }
        }
    }
}

/// A session that ended without `done` closes its channel so the page
/// stops waiting
fn close_unless_completed(replies: &ReplySender, outcome: SessionOutcome) {
    if outcome != SessionOutcome::Completed {
        tracing::debug!(port = replies.port_name(), outcome = outcome.as_str(), "Closing channel");
        replies.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::protocol::ReplyStatus;
    use crate::relay::task::TaskKind;
    use crate::relay::INCORRECT_KEY_MESSAGE;
    use crate::storage::MemoryStore;
    use crate::test_utils::{sse_body, ScriptedProvider};
    use std::time::Duration;

    fn worker(provider: ScriptedProvider) -> Arc<RelayWorker> {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        Settings {
            api_key: "sk-test".into(),
            ..Settings::default()
        }
        .save(store.as_ref())
        .unwrap();
        Arc::new(RelayWorker::new(&Config::default(), Arc::new(provider), store))
    }

    async fn next(page: &mut PagePort) -> Reply {
        tokio::time::timeout(Duration::from_secs(5), page.recv())
            .await
            .expect("timed out waiting for reply")
            .expect("channel closed")
    }

    #[tokio::test]
    async fn test_connect_registers_and_disconnect_releases() {
        let worker = worker(ScriptedProvider::default());
        let page = worker.connect("content-script-a", 9);
        assert!(worker.registry().contains(9));

        drop(page);
        for _ in 0..50 {
            if !worker.registry().contains(9) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!worker.registry().contains(9));
    }

    #[tokio::test]
    async fn test_foreign_channel_is_closed() {
        let worker = worker(ScriptedProvider::default());
        let mut page = worker.connect("devtools", 1);
        assert!(page.recv().await.is_none());
        assert!(!worker.registry().contains(1));
    }

    #[tokio::test]
    async fn test_stream_request_relays_fragments_then_done() {
        let provider = ScriptedProvider::with_body(sse_body("c1", &["Xin ", "chào"]));
        let worker = worker(provider);
        let mut page = worker.connect("content-script-u1", 2);

        page.post(PageRequest::stream("Hello", "u1", TaskKind::Translate, "vi"))
            .unwrap();

        assert_eq!(next(&mut page).await.message.token.as_deref(), Some("Xin "));
        assert_eq!(next(&mut page).await.message.token.as_deref(), Some("chào"));
        let done = next(&mut page).await;
        assert!(done.is_done());
        assert_eq!(done.message.uuid.as_deref(), Some("u1"));

        let turns = worker.history().get("u1").unwrap();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].answer, "Xin chào");
    }

    #[tokio::test]
    async fn test_rejected_request_reports_incorrect_key() {
        let worker = worker(ScriptedProvider::rejected(401));
        let mut page = worker.connect("content-script-u2", 3);
        page.post(PageRequest::stream("Hi", "u2", TaskKind::Explain, "en"))
            .unwrap();

        let reply = next(&mut page).await;
        assert_eq!(reply.message.token.as_deref(), Some(INCORRECT_KEY_MESSAGE));
        assert_eq!(reply.status(), Some(ReplyStatus::Stream));
        assert!(page.recv().await.is_none());
        assert!(worker.history().get("u2").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_body_error_closes_channel_without_done() {
        let mut chunks = sse_body("c1", &["partial"]);
        chunks.pop();
        let worker = worker(ScriptedProvider::breaking_after(chunks, "connection reset"));
        let mut page = worker.connect("content-script-e", 7);
        page.post(PageRequest::stream("Hi", "e", TaskKind::Explain, "en"))
            .unwrap();

        assert_eq!(next(&mut page).await.message.token.as_deref(), Some("partial"));
        let failure = next(&mut page).await;
        assert!(!failure.is_done());
        assert!(failure
            .message
            .token
            .as_deref()
            .unwrap()
            .contains("connection reset"));
        assert!(page.recv().await.is_none());
        assert!(worker.history().get("e").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_capture_without_source_replies_stop() {
        let worker = worker(ScriptedProvider::default());
        let mut page = worker.connect("content-script-c", 4);
        page.post(PageRequest::capture()).unwrap();

        let reply = next(&mut page).await;
        assert_eq!(reply.action, ReplyAction::Capture);
        assert_eq!(reply.status(), Some(ReplyStatus::Stop));
    }

    #[tokio::test]
    async fn test_abort_cancels_tab_handle() {
        let worker = worker(ScriptedProvider::stalled());
        let mut page = worker.connect("content-script-s", 5);
        page.post(PageRequest::stream("Hi", "s", TaskKind::Ask, "en"))
            .unwrap();
        page.post(PageRequest::abort()).unwrap();

        let reply = next(&mut page).await;
        assert_eq!(reply.message.token.as_deref(), Some(crate::relay::STOPPED_MESSAGE));
        assert!(!worker.registry().contains(5));
    }

    #[tokio::test]
    async fn test_unsealing_key_does_not_stall_runtime() {
        let worker = worker(ScriptedProvider::with_body(sse_body("c1", &["ok"])));

        let started = std::time::Instant::now();
        Settings::load(worker.store.as_ref()).unwrap();
        let unseal = started.elapsed();

        let stop = CancellationToken::new();
        let ticker_stop = stop.clone();
        let ticker = tokio::spawn(async move {
            let mut longest = Duration::ZERO;
            let mut last = std::time::Instant::now();
            loop {
                tokio::select! {
                    _ = ticker_stop.cancelled() => return longest,
                    _ = tokio::time::sleep(Duration::from_millis(2)) => {}
                }
                longest = longest.max(last.elapsed());
                last = std::time::Instant::now();
            }
        });

        let mut page = worker.connect("content-script-t", 6);
        page.post(PageRequest::stream("Hi", "t", TaskKind::Explain, "en"))
            .unwrap();
        assert_eq!(next(&mut page).await.message.token.as_deref(), Some("ok"));
        assert!(next(&mut page).await.is_done());

        stop.cancel();
        let longest = ticker.await.unwrap();
        if unseal >= Duration::from_millis(40) {
            assert!(
                longest < unseal / 2,
                "ticker stalled for {:?} while unsealing takes {:?}",
                longest,
                unseal
            );
        }
    }
}
