//! Streamable HTTP transport for one MCP session.
//!
//! ```text
//!  AwaitingInitialize ──initialize ok──▶ Active ──close()──▶ Closed
//!          │                                                  ▲
//!          └──────────────────────close()─────────────────────┘
//! ```
//!
//! POSTs carrying requests are answered on their own SSE stream (or as
//! plain JSON). A single GET per session opens the standalone stream that
//! carries server-initiated notifications. Every SSE frame is written to the
//! session's [`EventStore`] first, so a client can resume with
//! `Last-Event-ID`. Storing and sending happen under one lock per stream, so
//! frames reach the client in id order.

use async_trait::async_trait;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::future::join_all;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::http::event_store::{EventStore, StoredEvent};
use crate::http::session::{CloseHandle, SessionId};
use crate::mcp::protocol::{
    JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, MessageBatch,
};
use crate::mcp::server::{McpServer, McpServerFactory, ServerNotifier};
use crate::metrics::Metrics;

/// Session header, sent by the server at initialize and echoed by the client.
pub const MCP_SESSION_ID: &str = "mcp-session-id";

/// Resume header sent by a reconnecting client.
pub const LAST_EVENT_ID: &str = "last-event-id";

/// Stream id of the standalone GET stream.
pub const STANDALONE_STREAM: &str = "standalone";

type FrameSink = AsyncMutex<mpsc::UnboundedSender<Event>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Response formats the client accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Accepts {
    pub json: bool,
    pub sse: bool,
}

impl Accepts {
    /// Parse an `Accept` header. A missing header accepts everything.
    pub fn from_header(value: Option<&str>) -> Self {
        let Some(value) = value else {
            return Self {
                json: true,
                sse: true,
            };
        };

        let mut accepts = Self {
            json: false,
            sse: false,
        };
        for range in value.split(',') {
            let media = range.split(';').next().unwrap_or("").trim();
            match media.to_ascii_lowercase().as_str() {
                "*/*" => {
                    accepts.json = true;
                    accepts.sse = true;
                }
                "application/*" | "application/json" => accepts.json = true,
                "text/*" | "text/event-stream" => accepts.sse = true,
                _ => {}
            }
        }
        accepts
    }

    pub fn any(&self) -> bool {
        self.json || self.sse
    }
}

/// Per-transport settings.
#[derive(Debug, Clone, Default)]
pub struct TransportOptions {
    /// Answer POSTs with JSON even when the client accepts SSE.
    pub json_response: bool,
}

#[derive(Debug)]
enum TransportState {
    AwaitingInitialize,
    Active { session_id: SessionId },
    Closed,
}

/// Forwards server-initiated notifications to the standalone stream.
struct StandaloneNotifier {
    transport: Weak<StreamableHttpTransport>,
}

#[async_trait]
impl ServerNotifier for StandaloneNotifier {
    async fn notify(&self, notification: JsonRpcNotification) {
        if let Some(transport) = self.transport.upgrade() {
            transport.send_notification(notification).await;
        }
    }
}

/// Releases the standalone stream claim when the stream is dropped.
struct StreamClaim {
    flag: Arc<AtomicBool>,
}

impl Drop for StreamClaim {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// The standalone SSE stream, holding the session's stream claim.
struct StandaloneStream {
    inner: BoxStream<'static, std::result::Result<Event, Infallible>>,
    _claim: StreamClaim,
}

impl Stream for StandaloneStream {
    type Item = std::result::Result<Event, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

/// Streamable HTTP transport bound to one session.
pub struct StreamableHttpTransport {
    server: McpServer,
    events: Arc<dyn EventStore>,
    options: TransportOptions,
    metrics: Option<Arc<Metrics>>,
    state: Mutex<TransportState>,
    /// Live feed of the attached standalone stream. Held while storing a
    /// notification so ids and delivery order agree.
    standalone: AsyncMutex<Option<mpsc::UnboundedSender<StoredEvent>>>,
    stream_claimed: Arc<AtomicBool>,
    closed: CancellationToken,
    close_handle: Mutex<Option<CloseHandle>>,
    last_activity: Mutex<Instant>,
}

impl StreamableHttpTransport {
    /// A transport awaiting its initialize request, with a fresh server.
    pub fn new(
        factory: &McpServerFactory,
        events: Arc<dyn EventStore>,
        options: TransportOptions,
        metrics: Option<Arc<Metrics>>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| {
            let notifier = Arc::new(StandaloneNotifier {
                transport: weak.clone(),
            });
            Self {
                server: factory.create().with_notifier(notifier),
                events,
                options,
                metrics,
                state: Mutex::new(TransportState::AwaitingInitialize),
                standalone: AsyncMutex::new(None),
                stream_claimed: Arc::new(AtomicBool::new(false)),
                closed: CancellationToken::new(),
                close_handle: Mutex::new(None),
                last_activity: Mutex::new(Instant::now()),
            }
        })
    }

    /// Session id, once initialized and until closed.
    pub fn session_id(&self) -> Option<SessionId> {
        match &*lock(&self.state) {
            TransportState::Active { session_id } => Some(session_id.clone()),
            _ => None,
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(*lock(&self.state), TransportState::Closed)
    }

    /// Whether a standalone GET stream is attached.
    pub fn has_stream(&self) -> bool {
        self.stream_claimed.load(Ordering::SeqCst)
    }

    /// Time since the last request on this session.
    pub fn idle_for(&self) -> Duration {
        lock(&self.last_activity).elapsed()
    }

    fn touch(&self) {
        *lock(&self.last_activity) = Instant::now();
    }

    pub(crate) fn attach_close_handle(&self, handle: CloseHandle) {
        let state = lock(&self.state);
        if matches!(*state, TransportState::Closed) {
            drop(state);
            handle.fire();
            return;
        }
        *lock(&self.close_handle) = Some(handle);
    }

    fn ensure_active(&self) -> Result<SessionId> {
        match &*lock(&self.state) {
            TransportState::Active { session_id } => Ok(session_id.clone()),
            TransportState::AwaitingInitialize => Err(Error::NotInitialized),
            TransportState::Closed => Err(Error::TransportClosed),
        }
    }

    fn use_sse(&self, accepts: Accepts) -> bool {
        accepts.sse && !(self.options.json_response && accepts.json)
    }

    /// Run the initialize request and activate the session.
    pub async fn handle_initialize(
        self: &Arc<Self>,
        batch: MessageBatch,
        accepts: Accepts,
    ) -> Result<(SessionId, Response)> {
        if batch.messages.len() > 1 && batch.contains_initialize() {
            return Err(Error::BatchedInitialize);
        }
        let is_batch = batch.is_batch;
        let request = match batch.messages.into_iter().next() {
            Some(JsonRpcMessage::Request(req)) if req.method == "initialize" => req,
            _ => return Err(Error::NotInitializeRequest),
        };

        match &*lock(&self.state) {
            TransportState::AwaitingInitialize => {}
            TransportState::Active { .. } => return Err(Error::AlreadyInitialized),
            TransportState::Closed => return Err(Error::TransportClosed),
        }

        let response = self.server.handle_request(request, None).await;
        if let Some(error) = &response.error {
            return Err(Error::McpProtocol(error.message.clone()));
        }

        let session_id = Uuid::new_v4().to_string();
        {
            let mut state = lock(&self.state);
            match &*state {
                TransportState::AwaitingInitialize => {
                    *state = TransportState::Active {
                        session_id: session_id.clone(),
                    }
                }
                TransportState::Active { .. } => return Err(Error::AlreadyInitialized),
                TransportState::Closed => return Err(Error::TransportClosed),
            }
        }
        self.touch();
        debug!(session_id = %session_id, "Transport initialized");

        let reply = self.reply(vec![response], is_batch, accepts).await;
        Ok((session_id, reply))
    }

    /// Handle a POST on an initialized session.
    pub async fn handle_post(
        self: &Arc<Self>,
        batch: MessageBatch,
        accepts: Accepts,
    ) -> Result<Response> {
        let session_id = self.ensure_active()?;
        if batch.contains_initialize() {
            return Err(Error::AlreadyInitialized);
        }
        self.touch();

        let is_batch = batch.is_batch;
        let mut requests = Vec::new();
        for message in batch.messages {
            match message {
                JsonRpcMessage::Request(req) => requests.push(req),
                JsonRpcMessage::Notification(notification) => {
                    self.server.handle_notification(notification).await
                }
                JsonRpcMessage::Response(response) => {
                    debug!(session_id = %session_id, id = ?response.id, "Ignoring client response")
                }
            }
        }

        if requests.is_empty() {
            return Ok(StatusCode::ACCEPTED.into_response());
        }
        Ok(self.respond(requests, is_batch, accepts).await)
    }

    /// Open the standalone stream, replaying missed events first.
    pub async fn handle_get(&self, last_event_id: Option<&str>) -> Result<Response> {
        let session_id = self.ensure_active()?;
        if self.stream_claimed.swap(true, Ordering::SeqCst) {
            return Err(Error::StreamConflict);
        }
        let claim = StreamClaim {
            flag: self.stream_claimed.clone(),
        };
        self.touch();

        // Attach and replay under the publish lock: every event is either
        // replayed or sent live, exactly once and in id order.
        let (tx, rx) = mpsc::unbounded_channel::<StoredEvent>();
        let mut replayed = Vec::new();
        {
            let mut standalone = self.standalone.lock().await;
            if let Some(last) = last_event_id.filter(|id| !id.is_empty()) {
                let (replay_tx, mut replay_rx) = mpsc::unbounded_channel();
                let stream = self.events.replay_events_after(last, &replay_tx).await?;
                drop(replay_tx);
                while let Some(event) = replay_rx.recv().await {
                    replayed.push(event);
                }
                debug!(
                    session_id = %session_id,
                    stream = stream.as_deref().unwrap_or("-"),
                    replayed = replayed.len(),
                    "Replayed events"
                );
            }
            *standalone = Some(tx);
        }

        let replay = stream::iter(
            replayed
                .into_iter()
                .filter_map(|e| to_sse_event(Some(&e.id), &e.message)),
        );
        let live = UnboundedReceiverStream::new(rx)
            .filter_map(|e| async move { to_sse_event(Some(&e.id), &e.message) });

        let inner = replay
            .chain(live)
            .take_until(self.closed.clone().cancelled_owned())
            .map(Ok::<_, Infallible>)
            .boxed();

        info!(session_id = %session_id, "Standalone stream opened");
        Ok(sse_response(StandaloneStream {
            inner,
            _claim: claim,
        }))
    }

    /// Push a server-initiated notification on the standalone stream.
    ///
    /// The event is stored even when no stream is attached, so a client
    /// can pick it up by resuming.
    pub async fn send_notification(&self, notification: JsonRpcNotification) {
        if self.is_closed() {
            debug!(method = %notification.method, "Transport closed, dropping notification");
            return;
        }

        let message = JsonRpcMessage::from(notification);
        let mut standalone = self.standalone.lock().await;
        match self.events.store_event(STANDALONE_STREAM, &message).await {
            Ok(id) => {
                self.count_event();
                if let Some(tx) = standalone.as_ref() {
                    if tx.send(StoredEvent { id, message }).is_err() {
                        // Stream gone; the event stays stored for a resume.
                        *standalone = None;
                    }
                }
            }
            Err(e) => warn!("Failed to store notification: {}", e),
        }
    }

    /// Close the session. Idempotent.
    ///
    /// Ends the standalone stream and removes the session from the registry.
    /// POST responses already in flight still complete.
    pub fn close(&self) {
        let previous = std::mem::replace(&mut *lock(&self.state), TransportState::Closed);
        let session_id = match previous {
            TransportState::Closed => return,
            TransportState::Active { session_id } => Some(session_id),
            TransportState::AwaitingInitialize => None,
        };

        self.closed.cancel();
        if let Some(handle) = lock(&self.close_handle).take() {
            handle.fire();
        }
        info!(
            session_id = session_id.as_deref().unwrap_or("-"),
            "Session closed"
        );
    }

    fn count_event(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.inc_events_stored();
        }
    }

    /// Store a message on a request stream and send it.
    async fn emit(&self, sink: &FrameSink, stream_id: &str, message: JsonRpcMessage) {
        let tx = sink.lock().await;
        if let Some(event) = self.frame(stream_id, message).await {
            let _ = tx.send(event);
        }
    }

    /// Store a message on `stream_id` and turn it into an SSE frame.
    async fn frame(&self, stream_id: &str, message: JsonRpcMessage) -> Option<Event> {
        match self.events.store_event(stream_id, &message).await {
            Ok(id) => {
                self.count_event();
                to_sse_event(Some(&id), &message)
            }
            Err(e) => {
                warn!(stream_id, "Failed to store event, sending without id: {}", e);
                to_sse_event(None, &message)
            }
        }
    }

    /// Answer requests, streaming progress ahead of each response when SSE
    /// is used.
    async fn respond(
        self: &Arc<Self>,
        requests: Vec<JsonRpcRequest>,
        is_batch: bool,
        accepts: Accepts,
    ) -> Response {
        if !self.use_sse(accepts) {
            let responses = join_all(
                requests
                    .into_iter()
                    .map(|req| self.server.handle_request(req, None)),
            )
            .await;
            return json_reply(responses, is_batch);
        }

        let stream_id = Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::unbounded_channel::<Event>();
        let sink = Arc::new(AsyncMutex::new(tx));
        let this = self.clone();
        tokio::spawn(async move {
            let calls = requests.into_iter().map(|req| {
                let this = this.clone();
                let sink = sink.clone();
                let stream_id = stream_id.clone();
                async move {
                    let (progress_tx, mut progress_rx) =
                        mpsc::unbounded_channel::<JsonRpcNotification>();
                    let forward = async {
                        while let Some(notification) = progress_rx.recv().await {
                            this.emit(&sink, &stream_id, notification.into()).await;
                        }
                    };
                    let (response, ()) =
                        tokio::join!(this.server.handle_request(req, Some(progress_tx)), forward);
                    this.emit(&sink, &stream_id, response.into()).await;
                }
            });
            join_all(calls).await;
            debug!(stream_id = %stream_id, "Request stream complete");
        });

        sse_response(UnboundedReceiverStream::new(rx).map(Ok::<_, Infallible>))
    }

    /// Answer with responses that are already computed.
    async fn reply(
        &self,
        responses: Vec<JsonRpcResponse>,
        is_batch: bool,
        accepts: Accepts,
    ) -> Response {
        if !self.use_sse(accepts) {
            return json_reply(responses, is_batch);
        }

        let stream_id = Uuid::new_v4().to_string();
        let mut frames = Vec::with_capacity(responses.len());
        for response in responses {
            if let Some(event) = self.frame(&stream_id, response.into()).await {
                frames.push(Ok::<_, Infallible>(event));
            }
        }
        sse_response(stream::iter(frames))
    }
}

fn json_reply(mut responses: Vec<JsonRpcResponse>, is_batch: bool) -> Response {
    if is_batch {
        return Json(responses).into_response();
    }
    match responses.pop() {
        Some(response) => Json(response).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}

fn to_sse_event(id: Option<&str>, message: &JsonRpcMessage) -> Option<Event> {
    let event = Event::default().event("message");
    let event = match id {
        Some(id) => event.id(id),
        None => event,
    };
    match event.json_data(message) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!("Failed to encode SSE frame: {}", e);
            None
        }
    }
}

fn sse_response<S>(stream: S) -> Response
where
    S: Stream<Item = std::result::Result<Event, Infallible>> + Send + 'static,
{
    Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::event_store::InMemoryEventStore;
    use crate::mcp::handler::McpHandler;
    use axum::body::Body;
    use http_body_util::BodyExt;
    use serde_json::{json, Value};

    fn transport(options: TransportOptions) -> Arc<StreamableHttpTransport> {
        let factory = McpServerFactory::new(McpHandler::new());
        StreamableHttpTransport::new(
            &factory,
            Arc::new(InMemoryEventStore::default()),
            options,
            None,
        )
    }

    fn batch(value: Value) -> MessageBatch {
        MessageBatch::from_value(value).unwrap()
    }

    fn initialize() -> MessageBatch {
        batch(json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}}))
    }

    const JSON_ONLY: Accepts = Accepts {
        json: true,
        sse: false,
    };
    const BOTH: Accepts = Accepts {
        json: true,
        sse: true,
    };

    /// Reads SSE events off a response body.
    struct SseReader {
        body: Body,
        buffer: String,
    }

    impl SseReader {
        fn new(response: Response) -> Self {
            Self {
                body: response.into_body(),
                buffer: String::new(),
            }
        }

        /// Next event carrying data, as (id, parsed data).
        async fn next(&mut self) -> (Option<String>, Value) {
            loop {
                while let Some(end) = self.buffer.find("\n\n") {
                    let block: String = self.buffer.drain(..end + 2).collect();
                    let field = |name: &str| {
                        block
                            .lines()
                            .find_map(|l| l.strip_prefix(name))
                            .map(|v| v.trim().to_string())
                    };
                    if let Some(data) = field("data:") {
                        return (field("id:"), serde_json::from_str(&data).unwrap());
                    }
                }
                let frame = tokio::time::timeout(Duration::from_secs(2), self.body.frame())
                    .await
                    .expect("timed out waiting for SSE event")
                    .expect("stream ended")
                    .unwrap();
                if let Ok(data) = frame.into_data() {
                    self.buffer.push_str(&String::from_utf8_lossy(&data));
                }
            }
        }
    }

    #[test]
    fn test_accept_parsing() {
        assert_eq!(Accepts::from_header(None), BOTH);
        assert_eq!(Accepts::from_header(Some("application/json")), JSON_ONLY);
        assert_eq!(
            Accepts::from_header(Some("application/json, text/event-stream")),
            BOTH
        );
        assert_eq!(Accepts::from_header(Some("*/*;q=0.8")), BOTH);
        assert!(!Accepts::from_header(Some("text/html")).any());
    }

    #[tokio::test]
    async fn test_initialize_activates_once() {
        let t = transport(TransportOptions::default());
        assert!(t.session_id().is_none());

        let (id, response) = t.handle_initialize(initialize(), JSON_ONLY).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(t.session_id(), Some(id));

        let err = t.handle_initialize(initialize(), JSON_ONLY).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyInitialized));
    }

    #[tokio::test]
    async fn test_batched_initialize_rejected() {
        let t = transport(TransportOptions::default());
        let err = t
            .handle_initialize(
                batch(json!([
                    {"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}},
                    {"jsonrpc": "2.0", "id": 2, "method": "ping"}
                ])),
                JSON_ONLY,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BatchedInitialize));
        assert!(t.session_id().is_none());
    }

    #[tokio::test]
    async fn test_post_before_initialize() {
        let t = transport(TransportOptions::default());
        let err = t
            .handle_post(batch(json!({"jsonrpc": "2.0", "id": 1, "method": "ping"})), BOTH)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotInitialized));
    }

    #[tokio::test]
    async fn test_notification_only_post_is_accepted() {
        let t = transport(TransportOptions::default());
        t.handle_initialize(initialize(), JSON_ONLY).await.unwrap();

        let response = t
            .handle_post(
                batch(json!({"jsonrpc": "2.0", "method": "notifications/initialized"})),
                BOTH,
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn test_post_answers_over_sse_with_event_ids() {
        let t = transport(TransportOptions::default());
        t.handle_initialize(initialize(), JSON_ONLY).await.unwrap();

        let response = t
            .handle_post(batch(json!({"jsonrpc": "2.0", "id": 7, "method": "ping"})), BOTH)
            .await
            .unwrap();
        let (id, data) = SseReader::new(response).next().await;
        assert!(id.is_some());
        assert_eq!(data["id"], 7);
    }

    #[tokio::test]
    async fn test_json_response_mode() {
        let t = transport(TransportOptions {
            json_response: true,
        });
        t.handle_initialize(initialize(), BOTH).await.unwrap();

        let response = t
            .handle_post(batch(json!({"jsonrpc": "2.0", "id": 3, "method": "ping"})), BOTH)
            .await
            .unwrap();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["id"], 3);
    }

    #[tokio::test]
    async fn test_single_standalone_stream() {
        let t = transport(TransportOptions::default());
        t.handle_initialize(initialize(), JSON_ONLY).await.unwrap();

        let first = t.handle_get(None).await.unwrap();
        assert!(t.has_stream());
        assert!(matches!(
            t.handle_get(None).await.unwrap_err(),
            Error::StreamConflict
        ));

        // Dropping the stream releases the claim but keeps the session.
        drop(first);
        assert!(!t.has_stream());
        assert!(t.handle_get(None).await.is_ok());
        assert!(!t.is_closed());
    }

    #[tokio::test]
    async fn test_notifications_replay_then_live() {
        let t = transport(TransportOptions::default());
        t.handle_initialize(initialize(), JSON_ONLY).await.unwrap();

        let mut stream = SseReader::new(t.handle_get(None).await.unwrap());
        t.send_notification(JsonRpcNotification::new("test/one", None)).await;
        let (first_id, first) = stream.next().await;
        assert_eq!(first["method"], "test/one");
        drop(stream);

        // Missed while disconnected.
        t.send_notification(JsonRpcNotification::new("test/two", None)).await;

        let mut stream = SseReader::new(t.handle_get(first_id.as_deref()).await.unwrap());
        t.send_notification(JsonRpcNotification::new("test/three", None)).await;

        let (_, second) = stream.next().await;
        let (_, third) = stream.next().await;
        assert_eq!(second["method"], "test/two");
        assert_eq!(third["method"], "test/three");
    }

    fn numbered(n: usize) -> JsonRpcNotification {
        JsonRpcNotification::new("test/burst", Some(json!({ "n": n })))
    }

    #[tokio::test]
    async fn test_slow_reader_gets_every_live_event() {
        let t = transport(TransportOptions::default());
        t.handle_initialize(initialize(), JSON_ONLY).await.unwrap();

        // Nothing is read until all notifications are queued.
        let response = t.handle_get(None).await.unwrap();
        for n in 0..200 {
            t.send_notification(numbered(n)).await;
        }

        let mut stream = SseReader::new(response);
        for n in 0..200 {
            let (_, data) = stream.next().await;
            assert_eq!(data["params"]["n"], n);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_notifications_arrive_in_id_order() {
        let t = transport(TransportOptions::default());
        t.handle_initialize(initialize(), JSON_ONLY).await.unwrap();
        let mut stream = SseReader::new(t.handle_get(None).await.unwrap());

        for _ in 0..10 {
            let sends = (0..32).map(|n| {
                let t = t.clone();
                tokio::spawn(async move { t.send_notification(numbered(n)).await })
            });
            for handle in join_all(sends).await {
                handle.unwrap();
            }
        }

        let mut ids = Vec::new();
        for _ in 0..320 {
            ids.push(stream.next().await.0.unwrap());
        }
        let mut expected = ids.clone();
        expected.sort();
        expected.dedup();
        assert_eq!(ids, expected);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_resume_during_sends_has_no_gaps_or_duplicates() {
        let t = transport(TransportOptions::default());
        t.handle_initialize(initialize(), JSON_ONLY).await.unwrap();

        let mut stream = SseReader::new(t.handle_get(None).await.unwrap());
        for n in 0..10 {
            t.send_notification(numbered(n)).await;
        }
        let mut last = None;
        for _ in 0..5 {
            last = stream.next().await.0;
        }
        drop(stream);

        let sender = {
            let t = t.clone();
            tokio::spawn(async move {
                for n in 10..60 {
                    t.send_notification(numbered(n)).await;
                    tokio::task::yield_now().await;
                }
            })
        };
        let mut stream = SseReader::new(t.handle_get(last.as_deref()).await.unwrap());
        sender.await.unwrap();

        let mut seen = Vec::new();
        for _ in 5..60 {
            let (id, data) = stream.next().await;
            assert!(id.is_some());
            seen.push(data["params"]["n"].as_u64().unwrap());
        }
        assert_eq!(seen, (5..60).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_ends_stream() {
        let t = transport(TransportOptions::default());
        t.handle_initialize(initialize(), JSON_ONLY).await.unwrap();
        let mut body = t.handle_get(None).await.unwrap().into_body();

        t.close();
        t.close();
        assert!(t.is_closed());

        let end = tokio::time::timeout(Duration::from_secs(2), body.frame())
            .await
            .unwrap();
        assert!(end.is_none());

        assert!(matches!(
            t.handle_get(None).await.unwrap_err(),
            Error::TransportClosed
        ));
    }
}
