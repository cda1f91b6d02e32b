//! gazelink: async client engine for JSON-speaking eye tracker servers.
//!
//! This crate maintains a live mirror of remote tracker state (device
//! connectivity, display geometry, gaze frames, calibration results) over a
//! persistent TCP connection, correlates command replies with the calls that
//! issued them, and fans state changes out to subscribed listeners.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐            ┌────────────┐   TCP (JSON lines)  ┌─────────┐
//! │ Application │ ◄────────► │ GazeClient │ ◄─────────────────► │ tracker │
//! │  + listeners│  callbacks │  (Engine)  │                     │ server  │
//! └─────────────┘            └────────────┘                     └─────────┘
//! ```
//!
//! The inbound stream carries three kinds of traffic: replies to calls,
//! unsolicited state-change notifications, and calibration-progress events.
//! The engine reconciles them into synchronous-looking async APIs plus
//! push-based callbacks; see [`engine`] for the dispatch rules and
//! [`listener`] for the callback contract.
//!
//! # Usage
//!
//! ```ignore
//! use gazelink::GazeClient;
//!
//! let client = GazeClient::new();
//! client.connect().await?;
//! client.calibration_start(9).await?;
//! ```

pub mod api;
pub mod calibration;
pub mod engine;
pub mod listener;
pub mod message;
pub mod protocol;
pub mod transport;
pub mod types;

pub use api::{GazeClient, DEFAULT_HOST, DEFAULT_PORT};
pub use engine::{Engine, GazeError};
pub use listener::{
    CalibrationProcessListener, CalibrationResultListener, ConnectionStateListener, GazeListener,
    TrackerStateListener,
};
pub use types::{
    CalibrationPoint, CalibrationResult, EyeData, GazeFrame, Point2, Screen, ServerState,
    TrackerState, TrackingFlags,
};
