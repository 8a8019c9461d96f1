use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::StreamExt as _;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{Instrument as _, debug, info, info_span, warn};

use crate::chat_api::{ChatApi, MessageHandle, MessageRequest};
use crate::config::StreamConfig;
use crate::errors::{ChatApiError, TransportError};
use crate::session::{
    Applied, CONNECT_FAILED_MESSAGE, CONNECTION_LOST_MESSAGE, IDLE_TIMEOUT_MESSAGE,
    SessionSnapshot, SessionState, StreamSession,
};
use crate::transport::{EventTransport, HttpEventTransport};
use crate::wire::CompletionMetadata;

/// Shown when `connect` is called outside a Tokio runtime.
pub const NO_RUNTIME_MESSAGE: &str = "No async runtime is available to run the answer stream.";

/// Invoked once when a session reaches `Completed` or `Errored`.
///
/// Runs on the connection task; keep it short and non-blocking.
pub type CompletionCallback = Arc<dyn Fn(&SessionSnapshot) + Send + Sync>;

struct Shared {
    state: watch::Sender<StreamSession>,
    on_complete: Option<CompletionCallback>,
}

impl Shared {
    /// Applies one mutation, notifies subscribers when something visible
    /// changed, and fires the completion callback on a terminal transition.
    fn commit(&self, mutate: impl FnOnce(&mut StreamSession) -> Applied) -> Applied {
        let mut applied = Applied::Stale;
        let mut finished: Option<SessionSnapshot> = None;
        self.state.send_if_modified(|session| {
            applied = mutate(session);
            if applied == Applied::Terminal && session.state() != SessionState::Cancelled {
                finished = Some(session.snapshot().clone());
            }
            applied.changed()
        });
        // Outside the write lock so the callback may read the manager.
        if let (Some(snapshot), Some(callback)) = (finished, self.on_complete.as_ref()) {
            callback(&snapshot);
        }
        applied
    }
}

/// Owns the live connection for one answer and the session it feeds.
///
/// At most one connection is active at a time. Presentation code reads the
/// current [`SessionSnapshot`] through the accessors or watches changes via
/// [`subscribe`](Self::subscribe). Dropping the manager closes the
/// connection.
pub struct StreamSessionManager {
    shared: Arc<Shared>,
    transport: Arc<dyn EventTransport>,
    config: StreamConfig,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl StreamSessionManager {
    /// Creates a manager with default configuration and the HTTP transport.
    pub fn new() -> Result<Self, TransportError> {
        Self::builder().build()
    }

    pub fn builder() -> StreamSessionManagerBuilder {
        StreamSessionManagerBuilder::default()
    }

    /// Opens the stream at `url` and starts accumulating events.
    ///
    /// A no-op while a connection is already connecting or streaming. From
    /// `Idle` or a terminal state the previous session is cleared first, which
    /// is how callers retry. Must be called from within a Tokio runtime;
    /// otherwise the session is marked errored.
    pub fn connect(&self, url: &str) {
        let mut started = None;
        self.shared.state.send_if_modified(|session| {
            started = session.begin_connect();
            started.is_some()
        });
        let Some(epoch) = started else {
            debug!(url, "connect ignored; a connection is already active");
            return;
        };

        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(err) => {
                warn!(error = %err, "cannot open answer stream outside a runtime");
                self.shared
                    .commit(|session| session.fail(epoch, NO_RUNTIME_MESSAGE));
                return;
            }
        };

        let join = handle.spawn(run_connection(
            self.shared.clone(),
            self.transport.clone(),
            url.to_string(),
            epoch,
            self.config.idle_timeout,
        ));
        if let Some(previous) = self.lock_task().replace(join) {
            previous.abort();
        }
    }

    /// Posts a message through `api` and connects to the stream it returns.
    ///
    /// Any previous session is reset first. When the API call fails the
    /// session is marked errored with the API's message and the error is
    /// returned.
    pub async fn send(
        &self,
        api: &dyn ChatApi,
        request: MessageRequest,
    ) -> Result<MessageHandle, ChatApiError> {
        let session_id = request.session_id.clone();
        let result = api.create_message(request).await;
        self.reset();
        match result {
            Ok(handle) => {
                info!(session_id = %session_id, message_id = %handle.message_id, "message accepted");
                self.connect(&handle.stream_url);
                Ok(handle)
            }
            Err(err) => {
                warn!(session_id = %session_id, error = %err, "message was not accepted");
                let message = err.message().to_string();
                self.shared.commit(|session| session.fail_request(message));
                Err(err)
            }
        }
    }

    /// Closes any connection and restores the session to `Idle` with empty
    /// buffers. Late events from the closed connection are discarded.
    pub fn reset(&self) {
        self.shared.state.send_modify(StreamSession::reset);
        self.abort_task();
    }

    /// Closes an active connection and marks the session `Cancelled`,
    /// keeping whatever was received. Does not fire the completion callback.
    pub fn cancel(&self) {
        if self.shared.state.send_if_modified(StreamSession::cancel) {
            info!("answer stream cancelled");
            self.abort_task();
        }
    }

    /// Watches session changes. The receiver sees every visible update,
    /// coalesced to the latest value when the reader falls behind.
    pub fn subscribe(&self) -> watch::Receiver<StreamSession> {
        self.shared.state.subscribe()
    }

    /// Copy of the current session view.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.shared.state.borrow().snapshot().clone()
    }

    pub fn state(&self) -> SessionState {
        self.shared.state.borrow().state()
    }

    /// Stage-1 lines joined, each newline-terminated.
    pub fn stage1_text(&self) -> String {
        self.shared.state.borrow().snapshot().stage1_text()
    }

    /// Current Stage-2 Markdown.
    pub fn content(&self) -> String {
        self.shared.state.borrow().snapshot().content().to_string()
    }

    pub fn message_id(&self) -> Option<String> {
        self.shared
            .state
            .borrow()
            .snapshot()
            .message_id()
            .map(ToOwned::to_owned)
    }

    pub fn metadata(&self) -> Option<CompletionMetadata> {
        self.shared.state.borrow().snapshot().metadata().cloned()
    }

    pub fn error(&self) -> Option<String> {
        self.shared
            .state
            .borrow()
            .snapshot()
            .error()
            .map(ToOwned::to_owned)
    }

    pub fn is_streaming(&self) -> bool {
        self.shared.state.borrow().snapshot().is_streaming()
    }

    pub fn is_complete(&self) -> bool {
        self.shared.state.borrow().snapshot().is_complete()
    }

    pub fn has_error(&self) -> bool {
        self.shared.state.borrow().snapshot().has_error()
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    fn lock_task(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn abort_task(&self) {
        if let Some(task) = self.lock_task().take() {
            task.abort();
        }
    }
}

impl Drop for StreamSessionManager {
    fn drop(&mut self) {
        self.abort_task();
    }
}

/// Builder for [`StreamSessionManager`].
#[derive(Default)]
pub struct StreamSessionManagerBuilder {
    config: Option<StreamConfig>,
    transport: Option<Arc<dyn EventTransport>>,
    on_complete: Option<CompletionCallback>,
}

impl StreamSessionManagerBuilder {
    pub fn config(mut self, config: StreamConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Replaces the default HTTP transport.
    pub fn transport(mut self, transport: Arc<dyn EventTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Registers the completion callback.
    pub fn on_complete<F>(mut self, callback: F) -> Self
    where
        F: Fn(&SessionSnapshot) + Send + Sync + 'static,
    {
        self.on_complete = Some(Arc::new(callback));
        self
    }

    pub fn build(self) -> Result<StreamSessionManager, TransportError> {
        let config = self.config.unwrap_or_default();
        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpEventTransport::new(&config)?),
        };
        let (state, _) = watch::channel(StreamSession::with_stage1_limit(config.stage1_line_limit));
        Ok(StreamSessionManager {
            shared: Arc::new(Shared {
                state,
                on_complete: self.on_complete,
            }),
            transport,
            config,
            task: Mutex::new(None),
        })
    }
}

async fn run_connection(
    shared: Arc<Shared>,
    transport: Arc<dyn EventTransport>,
    url: String,
    epoch: u64,
    idle_timeout: Option<Duration>,
) {
    let connection_id = uuid::Uuid::new_v4();
    let span = info_span!("answer_stream", %connection_id, epoch);
    async move {
        info!(url = %url, "connecting to answer stream");
        let mut stream = match transport.open(&url).await {
            Ok(stream) => stream,
            Err(err) => {
                warn!(error = %err, "failed to open answer stream");
                shared.commit(|session| session.fail(epoch, CONNECT_FAILED_MESSAGE));
                return;
            }
        };
        if shared.commit(|session| session.mark_open(epoch)) == Applied::Stale {
            return;
        }

        let mut deadline = idle_timeout.map(|timeout| Instant::now() + timeout);
        loop {
            let next = tokio::select! {
                next = stream.next() => next,
                _ = sleep_until(deadline) => {
                    warn!(?idle_timeout, "answer stream idle timeout");
                    shared.commit(|session| session.fail(epoch, IDLE_TIMEOUT_MESSAGE));
                    return;
                }
            };
            match next {
                Some(Ok(inbound)) => {
                    let keeps_alive_only = inbound.is_heartbeat();
                    match shared.commit(|session| session.apply(epoch, inbound)) {
                        Applied::Stale => {
                            debug!("connection superseded; closing");
                            return;
                        }
                        Applied::Terminal => {
                            info!("answer stream finished");
                            return;
                        }
                        Applied::Ignored | Applied::Updated => {}
                    }
                    if !keeps_alive_only && let Some(timeout) = idle_timeout {
                        deadline = Some(Instant::now() + timeout);
                    }
                }
                Some(Err(err)) => {
                    warn!(error = %err, "answer stream read failed");
                    let message = if err.is_mid_stream() {
                        CONNECTION_LOST_MESSAGE
                    } else {
                        CONNECT_FAILED_MESSAGE
                    };
                    shared.commit(|session| session.fail(epoch, message));
                    return;
                }
                None => {
                    warn!("answer stream closed without a terminal signal");
                    shared.commit(|session| session.fail(epoch, CONNECTION_LOST_MESSAGE));
                    return;
                }
            }
        }
    }
    .instrument(span)
    .await;
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::InboundStream;
    use crate::wire::{Inbound, WireEvent};
    use futures::stream;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    enum Script {
        Refuse,
        Items {
            items: Vec<Result<Inbound, TransportError>>,
            then_hang: bool,
        },
        /// Signals pushed by the test as it goes; one connection only.
        Channel(Mutex<Option<mpsc::UnboundedReceiver<Inbound>>>),
    }

    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    struct FakeTransport {
        script: Script,
        opens: AtomicUsize,
        urls: Mutex<Vec<String>>,
        closed: Arc<AtomicBool>,
    }

    impl FakeTransport {
        fn new(script: Script) -> Arc<Self> {
            Arc::new(Self {
                script,
                opens: AtomicUsize::new(0),
                urls: Mutex::new(Vec::new()),
                closed: Arc::new(AtomicBool::new(false)),
            })
        }

        fn channel() -> (Arc<Self>, mpsc::UnboundedSender<Inbound>) {
            let (tx, rx) = mpsc::unbounded_channel();
            (Self::new(Script::Channel(Mutex::new(Some(rx)))), tx)
        }

        fn items(items: Vec<Inbound>, then_hang: bool) -> Arc<Self> {
            Self::new(Script::Items {
                items: items.into_iter().map(Ok).collect(),
                then_hang,
            })
        }
    }

    #[async_trait::async_trait]
    impl EventTransport for FakeTransport {
        async fn open(&self, url: &str) -> Result<InboundStream, TransportError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            self.urls.lock().expect("urls").push(url.to_string());
            let guard = DropFlag(self.closed.clone());
            let items: InboundStream = match &self.script {
                Script::Refuse => return Err(TransportError::request("connection refused")),
                Script::Items { items, then_hang } => {
                    let head = stream::iter(items.clone());
                    if *then_hang {
                        Box::pin(head.chain(stream::pending()))
                    } else {
                        Box::pin(head)
                    }
                }
                Script::Channel(receiver) => {
                    let rx = receiver
                        .lock()
                        .expect("receiver")
                        .take()
                        .expect("channel transport opened twice");
                    Box::pin(stream::unfold(rx, |mut rx| async move {
                        rx.recv().await.map(|inbound| (Ok(inbound), rx))
                    }))
                }
            };
            Ok(Box::pin(items.map(move |item| {
                let _ = &guard;
                item
            })))
        }
    }

    fn manager_with(
        transport: Arc<FakeTransport>,
        config: StreamConfig,
    ) -> (StreamSessionManager, mpsc::UnboundedReceiver<SessionSnapshot>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let manager = StreamSessionManager::builder()
            .config(config)
            .transport(transport)
            .on_complete(move |snapshot: &SessionSnapshot| {
                let _ = tx.send(snapshot.clone());
            })
            .build()
            .expect("manager");
        (manager, rx)
    }

    async fn wait_until(
        manager: &StreamSessionManager,
        predicate: impl Fn(&SessionSnapshot) -> bool,
    ) -> SessionSnapshot {
        let mut updates = manager.subscribe();
        let session = tokio::time::timeout(
            Duration::from_secs(600),
            updates.wait_for(|session| predicate(session.snapshot())),
        )
        .await
        .expect("timed out waiting for session state")
        .expect("manager alive");
        session.snapshot().clone()
    }

    async fn wait_for_flag(flag: &AtomicBool) {
        for _ in 0..200 {
            if flag.load(Ordering::SeqCst) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("connection was not closed");
    }

    fn event(event_type: &str, content: &str) -> Inbound {
        Inbound::Event(WireEvent::new(event_type, content))
    }

    #[tokio::test]
    async fn completed_stream_fires_callback_once() {
        let transport = FakeTransport::items(
            vec![
                Inbound::Start {
                    message_id: Some("m-1".into()),
                },
                event("init_text", "warming up"),
                event("assistant", "The answer is 4"),
                event("result", "The answer is 4."),
                Inbound::Complete {
                    message_id: Some("m-1".into()),
                    metadata: None,
                    content: None,
                },
            ],
            false,
        );
        let (manager, mut completions) = manager_with(transport, StreamConfig::default());

        manager.connect("https://chat.example.com/api/messages/m-1/stream");
        let done = completions.recv().await.expect("completion");
        assert!(done.is_complete());
        assert_eq!(done.content(), "The answer is 4.");
        assert_eq!(done.stage1_text(), "warming up\n");

        assert!(manager.is_complete());
        assert!(!manager.is_streaming());
        assert_eq!(manager.message_id().as_deref(), Some("m-1"));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(completions.try_recv().is_err());
    }

    #[tokio::test]
    async fn stream_closing_without_terminal_signal_errors() {
        let transport = FakeTransport::items(
            vec![Inbound::Start { message_id: None }, event("assistant", "partial")],
            false,
        );
        let (manager, mut completions) = manager_with(transport, StreamConfig::default());

        manager.connect("https://chat.example.com/stream");
        let done = completions.recv().await.expect("completion");
        assert!(done.has_error());
        assert_eq!(done.error(), Some(CONNECTION_LOST_MESSAGE));
        assert_eq!(done.content(), "partial");
        assert!(!manager.is_streaming());
    }

    #[tokio::test]
    async fn read_failure_mid_stream_errors() {
        let transport = FakeTransport::new(Script::Items {
            items: vec![
                Ok(event("stream_token", "tok")),
                Err(TransportError::read("connection reset")),
            ],
            then_hang: false,
        });
        let (manager, mut completions) = manager_with(transport, StreamConfig::default());

        manager.connect("https://chat.example.com/stream");
        let done = completions.recv().await.expect("completion");
        assert_eq!(done.error(), Some(CONNECTION_LOST_MESSAGE));
        assert_eq!(done.stage1_lines(), ["tok".to_string()]);
    }

    #[tokio::test]
    async fn connect_failure_errors_session() {
        let transport = FakeTransport::new(Script::Refuse);
        let (manager, mut completions) = manager_with(transport, StreamConfig::default());

        manager.connect("https://chat.example.com/stream");
        let done = completions.recv().await.expect("completion");
        assert_eq!(done.error(), Some(CONNECT_FAILED_MESSAGE));
        assert_eq!(manager.error().as_deref(), Some(CONNECT_FAILED_MESSAGE));
    }

    #[tokio::test]
    async fn connect_while_active_is_a_no_op() {
        let transport = FakeTransport::items(vec![event("init_text", "hello")], true);
        let (manager, _completions) = manager_with(transport.clone(), StreamConfig::default());

        manager.connect("https://chat.example.com/a");
        manager.connect("https://chat.example.com/b");
        wait_until(&manager, |s| s.stage1_lines().len() == 1).await;
        manager.connect("https://chat.example.com/c");

        assert_eq!(transport.opens.load(Ordering::SeqCst), 1);
        assert_eq!(
            *transport.urls.lock().expect("urls"),
            vec!["https://chat.example.com/a".to_string()]
        );
        assert_eq!(manager.state(), SessionState::Streaming);
    }

    #[tokio::test]
    async fn reset_closes_connection_and_clears_session() {
        let transport = FakeTransport::items(vec![event("assistant", "draft")], true);
        let (manager, mut completions) = manager_with(transport.clone(), StreamConfig::default());

        manager.connect("https://chat.example.com/stream");
        wait_until(&manager, |s| s.content() == "draft").await;
        manager.reset();

        assert_eq!(manager.snapshot(), SessionSnapshot::default());
        assert_eq!(manager.state(), SessionState::Idle);
        wait_for_flag(&transport.closed).await;
        assert!(completions.try_recv().is_err());
    }

    #[tokio::test]
    async fn dropping_manager_closes_connection() {
        let transport = FakeTransport::items(Vec::new(), true);
        let (manager, _completions) = manager_with(transport.clone(), StreamConfig::default());

        manager.connect("https://chat.example.com/stream");
        wait_until(&manager, |s| s.state() == SessionState::Streaming).await;
        drop(manager);
        wait_for_flag(&transport.closed).await;
    }

    #[tokio::test]
    async fn cancel_keeps_content_without_completion() {
        let transport = FakeTransport::items(vec![event("assistant", "half an answer")], true);
        let (manager, mut completions) = manager_with(transport.clone(), StreamConfig::default());

        manager.connect("https://chat.example.com/stream");
        wait_until(&manager, |s| !s.content().is_empty()).await;
        manager.cancel();

        assert_eq!(manager.state(), SessionState::Cancelled);
        assert_eq!(manager.content(), "half an answer");
        wait_for_flag(&transport.closed).await;
        assert!(completions.try_recv().is_err());
    }

    #[tokio::test]
    async fn retry_after_error_starts_fresh_session() {
        let transport = FakeTransport::items(vec![event("init_text", "attempt")], false);
        let (manager, mut completions) = manager_with(transport.clone(), StreamConfig::default());

        manager.connect("https://chat.example.com/stream");
        completions.recv().await.expect("first completion");
        manager.connect("https://chat.example.com/stream");
        let second = completions.recv().await.expect("second completion");

        assert_eq!(transport.opens.load(Ordering::SeqCst), 2);
        assert_eq!(second.stage1_lines(), ["attempt".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_timeout_errors_despite_heartbeats() {
        let (transport, events) = FakeTransport::channel();
        let config = StreamConfig::default().idle_timeout(Some(Duration::from_secs(30)));
        let (manager, mut completions) = manager_with(transport, config);

        let started = Instant::now();
        manager.connect("https://chat.example.com/stream");
        events
            .send(Inbound::Start { message_id: None })
            .expect("send start");
        // Keep-alives every 10s, both as SSE comments and as heartbeat events.
        let feeder = tokio::spawn(async move {
            for beat in 0..8 {
                tokio::time::sleep(Duration::from_secs(10)).await;
                let signal = if beat % 2 == 0 {
                    Inbound::Heartbeat
                } else {
                    event("heartbeat", "")
                };
                if events.send(signal).is_err() {
                    return;
                }
            }
        });
        let done = completions.recv().await.expect("completion");
        let elapsed = started.elapsed();
        feeder.abort();

        assert_eq!(done.error(), Some(IDLE_TIMEOUT_MESSAGE));
        assert!(elapsed >= Duration::from_secs(30), "{elapsed:?}");
        assert!(elapsed < Duration::from_secs(40), "{elapsed:?}");
        assert!(done.stage1_lines().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_timeout_is_extended_by_content() {
        let (transport, events) = FakeTransport::channel();
        let config = StreamConfig::default().idle_timeout(Some(Duration::from_secs(30)));
        let (manager, mut completions) = manager_with(transport, config);

        let started = Instant::now();
        manager.connect("https://chat.example.com/stream");
        let feeder = tokio::spawn(async move {
            for content in ["thinking", "still thinking"] {
                tokio::time::sleep(Duration::from_secs(20)).await;
                let _ = events.send(event("stream_token", content));
            }
            std::future::pending::<()>().await;
        });
        let done = completions.recv().await.expect("completion");
        let elapsed = started.elapsed();
        feeder.abort();

        assert_eq!(done.error(), Some(IDLE_TIMEOUT_MESSAGE));
        assert!(elapsed >= Duration::from_secs(70), "{elapsed:?}");
        assert!(elapsed < Duration::from_secs(71), "{elapsed:?}");
        assert_eq!(
            done.stage1_lines(),
            ["thinking".to_string(), "still thinking".to_string()]
        );
    }

    #[test]
    fn connect_outside_runtime_marks_session_errored() {
        let transport = FakeTransport::items(Vec::new(), false);
        let (manager, mut completions) = manager_with(transport.clone(), StreamConfig::default());

        manager.connect("https://chat.example.com/stream");

        assert!(manager.has_error());
        assert_eq!(manager.error().as_deref(), Some(NO_RUNTIME_MESSAGE));
        assert!(completions.try_recv().is_ok());
        assert_eq!(transport.opens.load(Ordering::SeqCst), 0);
    }

    struct FakeChatApi {
        result: Result<MessageHandle, ChatApiError>,
    }

    #[async_trait::async_trait]
    impl ChatApi for FakeChatApi {
        async fn create_message(
            &self,
            _request: MessageRequest,
        ) -> Result<MessageHandle, ChatApiError> {
            self.result.clone()
        }
    }

    #[tokio::test]
    async fn send_connects_to_returned_stream_url() {
        let transport = FakeTransport::items(
            vec![Inbound::Complete {
                message_id: Some("m-9".into()),
                metadata: None,
                content: Some("done".into()),
            }],
            false,
        );
        let (manager, mut completions) = manager_with(transport.clone(), StreamConfig::default());
        let api = FakeChatApi {
            result: Ok(MessageHandle {
                message_id: "m-9".into(),
                stream_url: "https://chat.example.com/api/messages/m-9/stream".into(),
            }),
        };

        let handle = manager
            .send(&api, MessageRequest::new("s-1", "2 + 2?"))
            .await
            .expect("accepted");
        let done = completions.recv().await.expect("completion");

        assert_eq!(handle.message_id, "m-9");
        assert_eq!(done.content(), "done");
        assert_eq!(
            *transport.urls.lock().expect("urls"),
            vec![handle.stream_url.clone()]
        );
    }

    #[tokio::test]
    async fn send_failure_errors_session_with_api_message() {
        let transport = FakeTransport::items(Vec::new(), false);
        let (manager, _completions) = manager_with(transport.clone(), StreamConfig::default());
        let api = FakeChatApi {
            result: Err(ChatApiError::Rejected("session is closed".into())),
        };

        let err = manager
            .send(&api, MessageRequest::new("s-1", "hello"))
            .await
            .expect_err("rejected");

        assert_eq!(err.message(), "session is closed");
        assert_eq!(manager.error().as_deref(), Some("session is closed"));
        assert_eq!(transport.opens.load(Ordering::SeqCst), 0);
    }
}
