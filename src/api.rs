//! Public client facade.
//!
//! [`GazeClient`] is the stable surface applications hold. It is a thin
//! handle that forwards every call to the engine; cloning it is cheap and
//! every clone shares the same session, caches, and listener registries.
//!
//! ```ignore
//! use gazelink::GazeClient;
//!
//! let client = GazeClient::new();
//! client.connect().await?;
//! let frame = client.frame();
//! println!("gaze at {:.0},{:.0}", frame.avg.x, frame.avg.y);
//! ```

use std::sync::Arc;
use std::time::Duration;

use crate::engine::{Engine, GazeError};
use crate::listener::{
    CalibrationProcessListener, CalibrationResultListener, ConnectionStateListener, GazeListener,
    TrackerStateListener,
};
use crate::types::{CalibrationResult, GazeFrame, Screen, ServerState};

/// Host used by [`GazeClient::connect`].
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Port the tracker server listens on by default.
pub const DEFAULT_PORT: u16 = 6555;

/// Client handle for a tracker server session.
#[derive(Clone, Default)]
pub struct GazeClient {
    engine: Engine,
}

impl GazeClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect to the default endpoint, `127.0.0.1:6555`.
    pub async fn connect(&self) -> Result<(), GazeError> {
        self.engine.connect(DEFAULT_HOST, DEFAULT_PORT).await
    }

    /// Connect to a specific host and port.
    pub async fn connect_to(&self, host: &str, port: u16) -> Result<(), GazeError> {
        self.engine.connect(host, port).await
    }

    /// Close the session. Idempotent.
    pub async fn disconnect(&self) {
        self.engine.disconnect().await;
    }

    pub fn is_connected(&self) -> bool {
        self.engine.is_connected()
    }

    /// Override the bounded wait applied to synchronous calls.
    pub fn set_call_timeout(&self, timeout: Duration) {
        self.engine.set_call_timeout(timeout);
    }

    /// Push new display geometry to the server.
    pub async fn set_screen(&self, screen: &Screen) -> Result<(), GazeError> {
        self.engine.set_screen(screen).await
    }

    /// Cached display geometry.
    pub fn screen(&self) -> Screen {
        self.engine.screen()
    }

    /// Cached most-recent gaze frame.
    pub fn frame(&self) -> GazeFrame {
        self.engine.frame()
    }

    /// Cached calibration result.
    pub fn calibration_result(&self) -> CalibrationResult {
        self.engine.calibration_result()
    }

    /// Cached device state snapshot.
    pub fn server_state(&self) -> ServerState {
        self.engine.server_state()
    }

    /// Force a fresh full-state fetch and return the updated snapshot.
    pub async fn update_server_state(&self) -> Result<ServerState, GazeError> {
        self.engine.update_server_state().await
    }

    /// Begin a calibration sequence expecting `point_count` points.
    pub async fn calibration_start(&self, point_count: u32) -> Result<(), GazeError> {
        self.engine.calibration_start(point_count).await
    }

    /// Announce that the user is looking at the point at `(x, y)`.
    pub async fn calibration_point_start(&self, x: i32, y: i32) -> Result<(), GazeError> {
        self.engine.calibration_point_start(x, y).await
    }

    /// Announce that sampling for the current point is finished.
    pub async fn calibration_point_end(&self) -> Result<(), GazeError> {
        self.engine.calibration_point_end().await
    }

    /// Abort the in-progress calibration sequence.
    pub async fn calibration_abort(&self) -> Result<(), GazeError> {
        self.engine.calibration_abort().await
    }

    /// Discard the server's stored calibration.
    pub async fn calibration_clear(&self) -> Result<(), GazeError> {
        self.engine.calibration_clear().await
    }

    pub fn subscribe_gaze(&self, listener: Arc<dyn GazeListener>) {
        self.engine.subscribe_gaze(listener);
    }

    pub fn unsubscribe_gaze(&self, listener: &Arc<dyn GazeListener>) {
        self.engine.unsubscribe_gaze(listener);
    }

    pub fn subscribe_calibration_result(&self, listener: Arc<dyn CalibrationResultListener>) {
        self.engine.subscribe_calibration_result(listener);
    }

    pub fn unsubscribe_calibration_result(&self, listener: &Arc<dyn CalibrationResultListener>) {
        self.engine.unsubscribe_calibration_result(listener);
    }

    pub fn subscribe_tracker_state(&self, listener: Arc<dyn TrackerStateListener>) {
        self.engine.subscribe_tracker_state(listener);
    }

    pub fn unsubscribe_tracker_state(&self, listener: &Arc<dyn TrackerStateListener>) {
        self.engine.unsubscribe_tracker_state(listener);
    }

    pub fn subscribe_calibration_process(&self, listener: Arc<dyn CalibrationProcessListener>) {
        self.engine.subscribe_calibration_process(listener);
    }

    pub fn unsubscribe_calibration_process(&self, listener: &Arc<dyn CalibrationProcessListener>) {
        self.engine.unsubscribe_calibration_process(listener);
    }

    pub fn subscribe_connection_state(&self, listener: Arc<dyn ConnectionStateListener>) {
        self.engine.subscribe_connection_state(listener);
    }

    pub fn unsubscribe_connection_state(&self, listener: &Arc<dyn ConnectionStateListener>) {
        self.engine.unsubscribe_connection_state(listener);
    }
}
