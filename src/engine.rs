//! The protocol engine.
//!
//! Owns the connection lifecycle, all cached device state, the correlation
//! of synchronous calls with their asynchronous replies, and the dispatch of
//! inbound messages into cache commits and listener notifications.
//!
//! # Architecture
//!
//! ```text
//! caller task                      delivery task
//! ───────────                      ─────────────
//! call(id, payload)                read_loop
//!   register oneshot for id   ┌──►   read_message
//!   send payload ─────────────┘      decode envelope
//!   await reply (bounded) ◄───────── dispatch: commit caches,
//!                                    notify listeners,
//!                                    complete pending call by id
//! ```
//!
//! Exactly one delivery task drives decode/dispatch per connection, so the
//! only concurrency hazard is between that task and application tasks using
//! the public API; each cached record has its own lock, and one shared send
//! lock serializes all synchronous senders.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock};
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tokio::io::BufReader;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use crate::calibration::CalibrationProgress;
use crate::listener::{
    CalibrationProcessListener, CalibrationResultListener, ConnectionStateListener, GazeListener,
    Registry, TrackerStateListener,
};
use crate::message::{Category, Message, Request, StatusCode};
use crate::protocol::{self, CallId, PROTOCOL_VERSION};
use crate::transport::{self, TransportError};
use crate::types::{CalibrationResult, GazeFrame, Screen, ServerState};

/// Default bound on a synchronous call's wait for its reply.
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Bound on establishing the TCP connection itself.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Bound on the uncorrelated version probe. The legacy reply carries no id,
/// so the engine polls the cached version field instead of awaiting a signal.
const VERSION_PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const VERSION_PROBE_INTERVAL: Duration = Duration::from_millis(10);

const STATE_STOPPED: u8 = 0;
const STATE_CONNECTING: u8 = 1;
const STATE_RUNNING: u8 = 2;

/// Engine error taxonomy.
///
/// Decode failures never surface here: a malformed inbound message is
/// discarded by the delivery task and the connection stays up.
#[derive(Debug, Error)]
pub enum GazeError {
    /// Failed to establish the TCP connection.
    #[error("connection failed: {0}")]
    ConnectionFailed(#[source] std::io::Error),

    /// `connect` was called while a session is already up.
    #[error("already connected")]
    AlreadyConnected,

    /// The command was issued without a live connection.
    #[error("not connected")]
    NotConnected,

    /// No reply arrived within the bounded wait. The command may still
    /// complete on the server and update the cache later.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The server speaks an older protocol generation than required.
    #[error("server protocol version {found} is older than required {required}")]
    UnsupportedServer { found: u32, required: u32 },

    /// The server answered the version upgrade with a non-OK status.
    #[error("version handshake rejected by server")]
    HandshakeRejected,

    /// A correlated reply arrived with a non-OK status.
    #[error("command rejected by server")]
    Rejected,

    /// Framing-level failure while sending.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

struct Connection {
    writer: OwnedWriteHalf,
    reader: JoinHandle<()>,
}

/// Shared engine state: caches, pending calls, and listener registries.
struct Inner {
    state: AtomicU8,
    call_timeout: StdMutex<Duration>,

    /// Live connection; `None` once stopped.
    conn: Mutex<Option<Connection>>,

    /// Pending correlated calls, keyed by correlation id. A fresh connect
    /// clears the table; disconnect fails every in-flight waiter.
    pending: StdMutex<HashMap<u16, oneshot::Sender<Message>>>,

    /// Serializes all synchronous senders across tasks.
    call_lock: Mutex<()>,

    // One lock per cached record so a gaze reader never blocks on a
    // concurrent screen update.
    server: RwLock<ServerState>,
    gaze: RwLock<GazeFrame>,
    screen: RwLock<Screen>,
    calibration: RwLock<CalibrationResult>,
    progress: StdMutex<CalibrationProgress>,

    gaze_listeners: Registry<dyn GazeListener>,
    result_listeners: Registry<dyn CalibrationResultListener>,
    tracker_listeners: Registry<dyn TrackerStateListener>,
    process_listeners: Registry<dyn CalibrationProcessListener>,
    connection_listeners: Registry<dyn ConnectionStateListener>,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            state: AtomicU8::new(STATE_STOPPED),
            call_timeout: StdMutex::new(DEFAULT_CALL_TIMEOUT),
            conn: Mutex::new(None),
            pending: StdMutex::new(HashMap::new()),
            call_lock: Mutex::new(()),
            server: RwLock::new(ServerState::default()),
            gaze: RwLock::new(GazeFrame::default()),
            screen: RwLock::new(Screen::default()),
            calibration: RwLock::new(CalibrationResult::default()),
            progress: StdMutex::new(CalibrationProgress::new()),
            gaze_listeners: Registry::new(),
            result_listeners: Registry::new(),
            tracker_listeners: Registry::new(),
            process_listeners: Registry::new(),
            connection_listeners: Registry::new(),
        }
    }
}

/// The protocol engine. Cheap to clone; all clones share one session.
#[derive(Clone, Default)]
pub struct Engine {
    inner: Arc<Inner>,
}

impl Engine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the bounded wait applied to synchronous calls.
    pub fn set_call_timeout(&self, timeout: Duration) {
        *self.inner.call_timeout.lock().unwrap() = timeout;
    }

    pub fn is_connected(&self) -> bool {
        self.inner.state.load(Ordering::SeqCst) == STATE_RUNNING
    }

    /// Connect to the tracker server and perform the version handshake.
    ///
    /// Rejected unless the engine is stopped. On success the engine is
    /// running, connection listeners have been notified, and the cache holds
    /// a full state snapshot. Any handshake failure tears the connection
    /// back down before returning.
    pub async fn connect(&self, host: &str, port: u16) -> Result<(), GazeError> {
        if self
            .inner
            .state
            .compare_exchange(
                STATE_STOPPED,
                STATE_CONNECTING,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            return Err(GazeError::AlreadyConnected);
        }

        match self.try_connect(host, port).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.inner.shutdown(false).await;
                Err(e)
            }
        }
    }

    async fn try_connect(&self, host: &str, port: u16) -> Result<(), GazeError> {
        let stream = timeout(CONNECT_TIMEOUT, TcpStream::connect((host, port)))
            .await
            .map_err(|_| GazeError::Timeout(CONNECT_TIMEOUT))?
            .map_err(GazeError::ConnectionFailed)?;
        let _ = stream.set_nodelay(true);
        let (read_half, write_half) = stream.into_split();

        // Fresh session: drop stale pending calls and zero every cache.
        self.inner.pending.lock().unwrap().clear();
        *self.inner.server.write().unwrap() = ServerState::default();
        *self.inner.gaze.write().unwrap() = GazeFrame::default();
        *self.inner.screen.write().unwrap() = Screen::default();
        self.inner.calibration.write().unwrap().clear();
        self.inner.progress.lock().unwrap().clear();

        let reader = tokio::spawn(read_loop(Arc::clone(&self.inner), read_half));
        *self.inner.conn.lock().await = Some(Connection {
            writer: write_half,
            reader,
        });

        // Legacy probe first: every server generation understands an
        // uncorrelated get, and the reply lands in the version cache.
        let found = self.probe_version().await?;
        if found < PROTOCOL_VERSION {
            return Err(GazeError::UnsupportedServer {
                found,
                required: PROTOCOL_VERSION,
            });
        }

        // Upgrade the session to correlated request/reply semantics.
        let reply = self
            .call(CallId::SetVersion, protocol::set_version(PROTOCOL_VERSION))
            .await?;
        if !reply.status.is_ok() {
            return Err(GazeError::HandshakeRejected);
        }

        self.inner.state.store(STATE_RUNNING, Ordering::SeqCst);
        info!("connected to {}:{} (protocol v{})", host, port, found);
        self.inner
            .connection_listeners
            .notify(|l| l.on_connection_state_changed(true));

        // Prime the cache with a full snapshot.
        self.update_server_state().await?;
        Ok(())
    }

    /// Poll the cached version field until the uncorrelated probe reply
    /// fills it, bounded by [`VERSION_PROBE_TIMEOUT`].
    async fn probe_version(&self) -> Result<u32, GazeError> {
        self.inner
            .send_raw(&protocol::tracker_get(None, &["version"]))
            .await?;

        let deadline = Instant::now() + VERSION_PROBE_TIMEOUT;
        loop {
            let version = self.inner.server.read().unwrap().version;
            if version != 0 {
                return Ok(version);
            }
            if Instant::now() >= deadline {
                return Err(GazeError::Timeout(VERSION_PROBE_TIMEOUT));
            }
            sleep(VERSION_PROBE_INTERVAL).await;
        }
    }

    /// Close the connection. Idempotent; commands issued afterwards are
    /// rejected without touching the transport.
    pub async fn disconnect(&self) {
        self.inner.shutdown(false).await;
    }

    /// Send a correlated command and await the matching reply.
    async fn call(&self, id: CallId, payload: String) -> Result<Message, GazeError> {
        let inner = &self.inner;
        let _guard = inner.call_lock.lock().await;

        if inner.state.load(Ordering::SeqCst) == STATE_STOPPED {
            return Err(GazeError::NotConnected);
        }

        let (tx, rx) = oneshot::channel();
        inner.pending.lock().unwrap().insert(id.as_u16(), tx);

        if let Err(e) = inner.send_raw(&payload).await {
            inner.pending.lock().unwrap().remove(&id.as_u16());
            return Err(e);
        }

        let wait = *inner.call_timeout.lock().unwrap();
        match timeout(wait, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            // Sender dropped: the connection went down with the call in flight.
            Ok(Err(_)) => Err(GazeError::NotConnected),
            Err(_) => {
                inner.pending.lock().unwrap().remove(&id.as_u16());
                Err(GazeError::Timeout(wait))
            }
        }
    }

    fn expect_ok(reply: Message) -> Result<(), GazeError> {
        if reply.status.is_ok() {
            Ok(())
        } else {
            Err(GazeError::Rejected)
        }
    }

    /// Push new display geometry to the server.
    pub async fn set_screen(&self, screen: &Screen) -> Result<(), GazeError> {
        let reply = self
            .call(CallId::SetScreen, protocol::set_screen(screen))
            .await?;
        Self::expect_ok(reply)
    }

    /// Cached display geometry.
    pub fn screen(&self) -> Screen {
        *self.inner.screen.read().unwrap()
    }

    /// Cached most-recent gaze frame.
    pub fn frame(&self) -> GazeFrame {
        self.inner.gaze.read().unwrap().clone()
    }

    /// Cached calibration result.
    pub fn calibration_result(&self) -> CalibrationResult {
        self.inner.calibration.read().unwrap().clone()
    }

    /// Cached device state snapshot.
    pub fn server_state(&self) -> ServerState {
        *self.inner.server.read().unwrap()
    }

    /// Force a fresh full-state fetch and return the updated snapshot.
    pub async fn update_server_state(&self) -> Result<ServerState, GazeError> {
        self.call(
            CallId::GetState,
            protocol::tracker_get(Some(CallId::GetState), protocol::STATE_FIELDS),
        )
        .await?;
        Ok(self.server_state())
    }

    /// Begin a calibration sequence expecting `point_count` points.
    pub async fn calibration_start(&self, point_count: u32) -> Result<(), GazeError> {
        self.inner
            .progress
            .lock()
            .unwrap()
            .start(point_count as usize);
        let reply = self
            .call(
                CallId::CalibrationStart,
                protocol::calibration_start(point_count),
            )
            .await?;
        Self::expect_ok(reply)
    }

    /// Announce that the user is looking at the point at `(x, y)`.
    pub async fn calibration_point_start(&self, x: i32, y: i32) -> Result<(), GazeError> {
        let reply = self
            .call(CallId::PointStart, protocol::calibration_point_start(x, y))
            .await?;
        Self::expect_ok(reply)
    }

    /// Announce that sampling for the current point is finished.
    /// Fire-and-forget; progress surfaces later as a point-end message.
    pub async fn calibration_point_end(&self) -> Result<(), GazeError> {
        self.inner
            .send_raw(&protocol::calibration_simple("pointend"))
            .await
    }

    /// Abort the in-progress calibration sequence. Fire-and-forget.
    pub async fn calibration_abort(&self) -> Result<(), GazeError> {
        self.inner
            .send_raw(&protocol::calibration_simple("abort"))
            .await
    }

    /// Discard the server's stored calibration. Fire-and-forget.
    pub async fn calibration_clear(&self) -> Result<(), GazeError> {
        self.inner
            .send_raw(&protocol::calibration_simple("clear"))
            .await
    }

    pub fn subscribe_gaze(&self, listener: Arc<dyn GazeListener>) {
        self.inner.gaze_listeners.subscribe(listener);
    }

    pub fn unsubscribe_gaze(&self, listener: &Arc<dyn GazeListener>) {
        self.inner.gaze_listeners.unsubscribe(listener);
    }

    pub fn subscribe_calibration_result(&self, listener: Arc<dyn CalibrationResultListener>) {
        self.inner.result_listeners.subscribe(listener);
    }

    pub fn unsubscribe_calibration_result(&self, listener: &Arc<dyn CalibrationResultListener>) {
        self.inner.result_listeners.unsubscribe(listener);
    }

    pub fn subscribe_tracker_state(&self, listener: Arc<dyn TrackerStateListener>) {
        self.inner.tracker_listeners.subscribe(listener);
    }

    pub fn unsubscribe_tracker_state(&self, listener: &Arc<dyn TrackerStateListener>) {
        self.inner.tracker_listeners.unsubscribe(listener);
    }

    pub fn subscribe_calibration_process(&self, listener: Arc<dyn CalibrationProcessListener>) {
        self.inner.process_listeners.subscribe(listener);
    }

    pub fn unsubscribe_calibration_process(&self, listener: &Arc<dyn CalibrationProcessListener>) {
        self.inner.process_listeners.unsubscribe(listener);
    }

    pub fn subscribe_connection_state(&self, listener: Arc<dyn ConnectionStateListener>) {
        self.inner.connection_listeners.subscribe(listener);
    }

    pub fn unsubscribe_connection_state(&self, listener: &Arc<dyn ConnectionStateListener>) {
        self.inner.connection_listeners.unsubscribe(listener);
    }
}

impl Inner {
    /// Tear the session down. `lost` marks a transport-detected failure,
    /// which (unlike an explicit disconnect) notifies connection listeners.
    async fn shutdown(&self, lost: bool) {
        let was_up = self.state.swap(STATE_STOPPED, Ordering::SeqCst) != STATE_STOPPED;

        if let Some(conn) = self.conn.lock().await.take() {
            conn.reader.abort();
            // dropping the writer closes our half of the socket
        }

        // Fail every in-flight call immediately.
        self.pending.lock().unwrap().clear();

        if was_up && lost {
            self.connection_listeners
                .notify(|l| l.on_connection_state_changed(false));
        }
    }

    async fn send_raw(&self, payload: &str) -> Result<(), GazeError> {
        if self.state.load(Ordering::SeqCst) == STATE_STOPPED {
            return Err(GazeError::NotConnected);
        }
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(GazeError::NotConnected)?;
        transport::write_message(&mut conn.writer, payload).await?;
        debug!("sent: {}", payload);
        Ok(())
    }

    /// Decode and dispatch one inbound message. Every failure gate discards
    /// the message and nothing else; the connection stays up.
    async fn handle_raw(&self, raw: &str) {
        let root: Value = match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(e) => {
                debug!("discarding unparsable message: {}", e);
                return;
            }
        };

        let Some(msg) = Message::decode(&root) else {
            debug!("discarding message with unrecognized envelope");
            return;
        };

        // Unsolicited change notifications carry no payload of their own;
        // refetch the affected fields with the reserved refetch id. The
        // reply flows back through the normal tracker/get dispatch.
        if msg.status.is_notification() {
            let fields = match msg.status {
                StatusCode::CalibrationChange => protocol::CALIBRATION_FIELDS,
                StatusCode::DisplayChange => protocol::DISPLAY_FIELDS,
                _ => protocol::TRACKER_FIELDS,
            };
            let request = protocol::tracker_get(Some(CallId::Refetch), fields);
            if let Err(e) = self.send_raw(&request).await {
                debug!("change refetch failed: {}", e);
            }
            return;
        }

        // A real per-call error: discarded here, so the caller observes a
        // timeout rather than a distinct error status.
        if let StatusCode::Error(code) = msg.status {
            debug!(
                "discarding error reply (status {}, {})",
                code,
                msg.description.as_deref().unwrap_or("no description")
            );
            return;
        }

        if msg.request == Request::Unknown {
            debug!("discarding message with unrecognized request");
            return;
        }

        match (msg.category, msg.request) {
            // Success already implied by passing the gates.
            (Category::Tracker, Request::Set) => {}
            (Category::Tracker, Request::Get) => self.apply_state_values(&root),
            (Category::Calibration, Request::Start) => {
                self.process_listeners.notify(|l| l.on_calibration_started());
            }
            // Acknowledgment only; completes its pending call below.
            (Category::Calibration, Request::PointStart) => {}
            (Category::Calibration, Request::PointEnd) => self.handle_point_end(&root),
            (Category::Calibration, Request::Abort) => {
                self.progress.lock().unwrap().clear();
            }
            (Category::Calibration, Request::Clear) => {
                self.calibration.write().unwrap().clear();
            }
            other => {
                debug!("discarding message with unexpected dispatch {:?}", other);
                return;
            }
        }

        // A tagged reply completes its pending call only after dispatch has
        // committed, so the caller reads a cache that already reflects it.
        if let Some(id) = msg.id {
            let sender = self.pending.lock().unwrap().remove(&id);
            if let Some(tx) = sender {
                let _ = tx.send(msg);
            }
        }
    }

    /// Apply a tracker/get reply: parse every recognized field into record
    /// candidates, commit what changed, and notify in order: gaze frame,
    /// calibration result, screen geometry, device connectivity.
    fn apply_state_values(&self, root: &Value) {
        let Some(values) = root.get("values") else {
            return;
        };

        let previous = *self.server.read().unwrap();
        let previous_screen = *self.screen.read().unwrap();
        let mut server = previous;
        let mut screen = previous_screen;

        let parsed = protocol::update_server_state(values, &mut server, &mut screen)
            .and_then(|()| Ok((protocol::gaze_frame(values)?, protocol::calibration_result(values)?)));
        let (frame, result) = match parsed {
            Ok(pair) => pair,
            Err(e) => {
                debug!("discarding state payload: {}", e);
                return;
            }
        };

        let connectivity_changed = server.tracker_state != previous.tracker_state;

        *self.server.write().unwrap() = server;

        if let Some(frame) = frame {
            *self.gaze.write().unwrap() = frame.clone();
            self.gaze_listeners.notify(|l| l.on_gaze_frame(&frame));
        }

        if let Some(result) = result {
            *self.calibration.write().unwrap() = result.clone();
            self.result_listeners
                .notify(|l| l.on_calibration_changed(result.result, &result));
        }

        if screen != previous_screen {
            *self.screen.write().unwrap() = screen;
            self.tracker_listeners.notify(|l| l.on_screen_changed(&screen));
        }

        if connectivity_changed {
            self.tracker_listeners
                .notify(|l| l.on_tracker_state_changed(server.tracker_state));
        }
    }

    /// Handle a calibration point-end message: advance progress, then
    /// process the attached result if the sequence is complete.
    fn handle_point_end(&self, root: &Value) {
        let progress = {
            let mut tracker = self.progress.lock().unwrap();
            tracker.point_end();
            tracker.progress()
        };
        self.process_listeners
            .notify(|l| l.on_calibration_progress(progress));

        let result = match root.get("values").map(protocol::calibration_result) {
            None => None,
            Some(Ok(result)) => result,
            Some(Err(e)) => {
                debug!("discarding point-end payload: {}", e);
                return;
            }
        };
        let Some(result) = result else {
            return;
        };

        // Only a successful calibration is committed to the shared cache;
        // the raw result is reported to process listeners either way.
        if result.result {
            *self.calibration.write().unwrap() = result.clone();
            self.result_listeners
                .notify(|l| l.on_calibration_changed(result.result, &result));
            self.progress.lock().unwrap().clear();
        }

        self.process_listeners
            .notify(|l| l.on_calibration_result(result.result, &result));
    }

    /// The delivery task saw the stream end. An explicit disconnect has
    /// already flipped the state to stopped, in which case this is a no-op.
    async fn on_transport_closed(&self) {
        if self.state.load(Ordering::SeqCst) == STATE_STOPPED {
            return;
        }
        warn!("connection to server lost");
        self.shutdown(true).await;
    }
}

/// Delivery task: drives the decode pipeline, one message at a time, in
/// arrival order.
async fn read_loop(inner: Arc<Inner>, read_half: OwnedReadHalf) {
    let mut reader = BufReader::new(read_half);
    loop {
        match transport::read_message(&mut reader).await {
            Ok(raw) => inner.handle_raw(&raw).await,
            Err(TransportError::Closed) => {
                debug!("server closed the connection");
                break;
            }
            Err(e) => {
                warn!("transport failure: {}", e);
                break;
            }
        }
    }
    inner.on_transport_closed().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Point2, TrackerState};
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex as PlainMutex;

    /// Counts every callback across all capabilities.
    #[derive(Default)]
    struct Recording {
        gaze: AtomicUsize,
        results: AtomicUsize,
        screens: AtomicUsize,
        tracker_states: AtomicUsize,
        started: AtomicUsize,
        progress: PlainMutex<Vec<f64>>,
        point_results: PlainMutex<Vec<bool>>,
    }

    impl GazeListener for Recording {
        fn on_gaze_frame(&self, _frame: &GazeFrame) {
            self.gaze.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl CalibrationResultListener for Recording {
        fn on_calibration_changed(&self, _calibrated: bool, _result: &CalibrationResult) {
            self.results.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl TrackerStateListener for Recording {
        fn on_tracker_state_changed(&self, _state: TrackerState) {
            self.tracker_states.fetch_add(1, Ordering::SeqCst);
        }

        fn on_screen_changed(&self, _screen: &Screen) {
            self.screens.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl CalibrationProcessListener for Recording {
        fn on_calibration_started(&self) {
            self.started.fetch_add(1, Ordering::SeqCst);
        }

        fn on_calibration_progress(&self, progress: f64) {
            self.progress.lock().unwrap().push(progress);
        }

        fn on_calibration_result(&self, succeeded: bool, _result: &CalibrationResult) {
            self.point_results.lock().unwrap().push(succeeded);
        }
    }

    fn wired_engine() -> (Engine, Arc<Recording>) {
        let engine = Engine::new();
        let recording = Arc::new(Recording::default());
        engine.subscribe_gaze(recording.clone());
        engine.subscribe_calibration_result(recording.clone());
        engine.subscribe_tracker_state(recording.clone());
        engine.subscribe_calibration_process(recording.clone());
        (engine, recording)
    }

    async fn feed(engine: &Engine, message: Value) {
        engine.inner.handle_raw(&message.to_string()).await;
    }

    #[tokio::test]
    async fn unrecognized_envelope_leaves_state_untouched() {
        let (engine, recording) = wired_engine();

        feed(&engine, json!({"category": "bogus", "statuscode": 200})).await;
        feed(&engine, json!({"request": "get", "statuscode": 200})).await;
        feed(&engine, json!({"category": "tracker", "statuscode": "ok"})).await;
        engine.inner.handle_raw("not json at all").await;

        assert_eq!(engine.server_state(), ServerState::default());
        assert_eq!(engine.frame(), GazeFrame::default());
        assert_eq!(engine.screen(), Screen::default());
        assert_eq!(recording.gaze.load(Ordering::SeqCst), 0);
        assert_eq!(recording.results.load(Ordering::SeqCst), 0);
        assert_eq!(recording.screens.load(Ordering::SeqCst), 0);
        assert_eq!(recording.tracker_states.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn gaze_only_reply_notifies_gaze_listeners_once() {
        let (engine, recording) = wired_engine();

        feed(
            &engine,
            json!({
                "category": "tracker",
                "request": "get",
                "statuscode": 200,
                "values": {
                    "frame": {
                        "time": 1200,
                        "fix": true,
                        "state": 7,
                        "raw": {"x": 100.0, "y": 200.0},
                        "avg": {"x": 101.0, "y": 201.0}
                    }
                }
            }),
        )
        .await;

        assert_eq!(recording.gaze.load(Ordering::SeqCst), 1);
        assert_eq!(recording.results.load(Ordering::SeqCst), 0);
        assert_eq!(recording.screens.load(Ordering::SeqCst), 0);
        assert_eq!(recording.tracker_states.load(Ordering::SeqCst), 0);

        let frame = engine.frame();
        assert_eq!(frame.time_ms, 1200);
        assert_eq!(frame.raw, Point2::new(100.0, 200.0));
        assert_eq!(engine.screen(), Screen::default());
        assert_eq!(engine.calibration_result(), CalibrationResult::default());
    }

    #[tokio::test]
    async fn state_reply_fires_screen_and_connectivity_changes() {
        let (engine, recording) = wired_engine();

        feed(
            &engine,
            json!({
                "category": "tracker",
                "request": "get",
                "statuscode": 200,
                "values": {
                    "trackerstate": 0,
                    "framerate": 60.0,
                    "screenindex": 0,
                    "screenresw": 1920,
                    "screenresh": 1080,
                    "screenpsyw": 510.0,
                    "screenpsyh": 287.0
                }
            }),
        )
        .await;

        assert_eq!(recording.screens.load(Ordering::SeqCst), 1);
        assert_eq!(recording.tracker_states.load(Ordering::SeqCst), 1);
        assert_eq!(engine.server_state().tracker_state, TrackerState::Connected);
        assert_eq!(engine.server_state().framerate, 60.0);
        assert_eq!(engine.screen().width_px, 1920);

        // Same values again: nothing changed, nobody notified.
        feed(
            &engine,
            json!({
                "category": "tracker",
                "request": "get",
                "statuscode": 200,
                "values": { "trackerstate": 0, "screenresw": 1920 }
            }),
        )
        .await;
        assert_eq!(recording.screens.load(Ordering::SeqCst), 1);
        assert_eq!(recording.tracker_states.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn malformed_state_payload_commits_nothing() {
        let (engine, recording) = wired_engine();

        feed(
            &engine,
            json!({
                "category": "tracker",
                "request": "get",
                "statuscode": 200,
                "values": { "trackerstate": 0, "framerate": "sixty" }
            }),
        )
        .await;

        assert_eq!(engine.server_state(), ServerState::default());
        assert_eq!(recording.tracker_states.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn four_point_calibration_reports_progress_and_one_result() {
        let (engine, recording) = wired_engine();
        engine.inner.progress.lock().unwrap().start(4);

        let plain = json!({
            "category": "calibration",
            "request": "pointend",
            "statuscode": 200
        });
        for _ in 0..3 {
            feed(&engine, plain.clone()).await;
        }
        feed(
            &engine,
            json!({
                "category": "calibration",
                "request": "pointend",
                "statuscode": 200,
                "values": {
                    "calibresult": {
                        "result": true,
                        "deg": 0.9,
                        "calibpoints": [{ "state": 2, "cp": {"x": 10.0, "y": 10.0} }]
                    }
                }
            }),
        )
        .await;

        assert_eq!(*recording.progress.lock().unwrap(), vec![0.25, 0.5, 0.75, 1.0]);
        assert_eq!(recording.results.load(Ordering::SeqCst), 1);
        assert_eq!(*recording.point_results.lock().unwrap(), vec![true]);
        assert!(engine.calibration_result().result);
        // success resets the progress tracker to idle
        assert!(!engine.inner.progress.lock().unwrap().is_calibrating());
    }

    #[tokio::test]
    async fn failed_point_result_is_reported_but_not_committed() {
        let (engine, recording) = wired_engine();
        engine.inner.progress.lock().unwrap().start(1);

        feed(
            &engine,
            json!({
                "category": "calibration",
                "request": "pointend",
                "statuscode": 200,
                "values": { "calibresult": { "result": false, "deg": 4.2 } }
            }),
        )
        .await;

        assert_eq!(recording.results.load(Ordering::SeqCst), 0);
        assert_eq!(*recording.point_results.lock().unwrap(), vec![false]);
        assert!(!engine.calibration_result().result);
        assert_eq!(engine.calibration_result().error_deg, 0.0);
        // an unsuccessful sequence stays in progress
        assert!(engine.inner.progress.lock().unwrap().is_calibrating());
    }

    #[tokio::test]
    async fn calibration_start_reply_notifies_process_listeners() {
        let (engine, recording) = wired_engine();
        feed(
            &engine,
            json!({"category": "calibration", "request": "start", "statuscode": 200}),
        )
        .await;
        assert_eq!(recording.started.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn abort_resets_progress_and_clear_empties_cache() {
        let (engine, recording) = wired_engine();
        engine.inner.progress.lock().unwrap().start(5);
        *engine.inner.calibration.write().unwrap() = CalibrationResult {
            result: true,
            ..CalibrationResult::default()
        };

        feed(
            &engine,
            json!({"category": "calibration", "request": "abort", "statuscode": 200}),
        )
        .await;
        assert!(!engine.inner.progress.lock().unwrap().is_calibrating());

        feed(
            &engine,
            json!({"category": "calibration", "request": "clear", "statuscode": 200}),
        )
        .await;
        assert!(!engine.calibration_result().result);
        // clear is silent: no registry hears about it
        assert_eq!(recording.results.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn error_reply_does_not_complete_its_pending_call() {
        let (engine, _recording) = wired_engine();
        let (tx, mut rx) = oneshot::channel();
        engine
            .inner
            .pending
            .lock()
            .unwrap()
            .insert(CallId::SetScreen.as_u16(), tx);

        feed(
            &engine,
            json!({
                "category": "tracker",
                "request": "set",
                "statuscode": 500,
                "id": CallId::SetScreen.as_u16(),
                "description": "internal error"
            }),
        )
        .await;

        // The waiter is still pending: the error was swallowed.
        assert!(rx.try_recv().is_err());
        assert!(engine
            .inner
            .pending
            .lock()
            .unwrap()
            .contains_key(&CallId::SetScreen.as_u16()));
    }

    #[tokio::test]
    async fn ok_reply_completes_its_pending_call_after_commit() {
        let (engine, _recording) = wired_engine();
        let (tx, mut rx) = oneshot::channel();
        engine
            .inner
            .pending
            .lock()
            .unwrap()
            .insert(CallId::GetState.as_u16(), tx);

        feed(
            &engine,
            json!({
                "category": "tracker",
                "request": "get",
                "statuscode": 200,
                "id": CallId::GetState.as_u16(),
                "values": { "version": 2 }
            }),
        )
        .await;

        let reply = rx.try_recv().expect("call should be completed");
        assert!(reply.status.is_ok());
        assert_eq!(reply.id, Some(CallId::GetState.as_u16()));
        // cache was committed before the call completed
        assert_eq!(engine.server_state().version, 2);
    }

    #[tokio::test]
    async fn commands_without_connection_are_rejected() {
        let engine = Engine::new();
        assert!(!engine.is_connected());
        assert!(matches!(
            engine.update_server_state().await,
            Err(GazeError::NotConnected)
        ));
        assert!(matches!(
            engine.calibration_point_end().await,
            Err(GazeError::NotConnected)
        ));
        assert!(matches!(
            engine.set_screen(&Screen::default()).await,
            Err(GazeError::NotConnected)
        ));
    }
}
