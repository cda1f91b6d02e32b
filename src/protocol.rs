//! Outbound command construction and inbound payload parsing.
//!
//! Outbound commands are JSON objects with `category`, `request`, an
//! optional correlation `id`, and a `values` payload. Inbound `values`
//! payloads are applied to record candidates here; the envelope around them
//! is handled by [`crate::message`].

use serde_json::{json, Value};
use thiserror::Error;

use crate::types::{CalibrationResult, GazeFrame, Screen, ServerState, TrackerState};

/// Protocol generation this engine requires from the server.
///
/// Generation 1 has no correlation ids and relies on reply ordering;
/// generation 2 tags every request/reply pair with an id. The engine speaks
/// generation 1 only for the initial version probe, then upgrades.
pub const PROTOCOL_VERSION: u32 = 2;

/// Correlation ids for the synchronous command kinds.
///
/// Bitmask-distinct so a reply id can never be mistaken for another kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum CallId {
    /// Full state snapshot fetch.
    GetState = 1 << 1,
    /// Follow-up fetch triggered by a change notification.
    Refetch = 1 << 4,
    SetVersion = 1 << 5,
    SetScreen = 1 << 7,
    CalibrationStart = 1 << 8,
    PointStart = 1 << 9,
}

impl CallId {
    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

/// Every tracker field the engine mirrors; used for the connect-time
/// snapshot fetch.
pub const STATE_FIELDS: &[&str] = &[
    "version",
    "trackerstate",
    "framerate",
    "iscalibrated",
    "iscalibrating",
    "calibresult",
    "frame",
    "screenindex",
    "screenresw",
    "screenresh",
    "screenpsyw",
    "screenpsyh",
];

/// Fields refetched after a calibration-change notification.
pub const CALIBRATION_FIELDS: &[&str] = &["calibresult", "iscalibrated", "iscalibrating"];

/// Fields refetched after a display-change notification.
pub const DISPLAY_FIELDS: &[&str] = &[
    "screenindex",
    "screenresw",
    "screenresh",
    "screenpsyw",
    "screenpsyh",
];

/// Fields refetched after a tracker-state-change notification.
pub const TRACKER_FIELDS: &[&str] = &["trackerstate"];

/// Build a `tracker/get` request for the named fields.
pub fn tracker_get(id: Option<CallId>, fields: &[&str]) -> String {
    let mut request = json!({
        "category": "tracker",
        "request": "get",
        "values": fields,
    });
    if let Some(id) = id {
        request["id"] = json!(id.as_u16());
    }
    request.to_string()
}

/// Build a `tracker/set` request carrying `values`.
pub fn tracker_set(id: CallId, values: Value) -> String {
    json!({
        "id": id.as_u16(),
        "category": "tracker",
        "request": "set",
        "values": values,
    })
    .to_string()
}

/// Build the correlated set-version command that upgrades the session.
pub fn set_version(version: u32) -> String {
    tracker_set(CallId::SetVersion, json!({ "version": version }))
}

/// Build the correlated set-screen command.
pub fn set_screen(screen: &Screen) -> String {
    tracker_set(
        CallId::SetScreen,
        json!({
            "screenindex": screen.index,
            "screenresw": screen.width_px,
            "screenresh": screen.height_px,
            "screenpsyw": screen.width_mm,
            "screenpsyh": screen.height_mm,
        }),
    )
}

/// Build the correlated calibration-start command.
pub fn calibration_start(point_count: u32) -> String {
    json!({
        "id": CallId::CalibrationStart.as_u16(),
        "category": "calibration",
        "request": "start",
        "values": { "pointcount": point_count },
    })
    .to_string()
}

/// Build the correlated calibration point-start command.
pub fn calibration_point_start(x: i32, y: i32) -> String {
    json!({
        "id": CallId::PointStart.as_u16(),
        "category": "calibration",
        "request": "pointstart",
        "values": { "x": x, "y": y },
    })
    .to_string()
}

/// Build an uncorrelated fire-and-forget calibration command
/// (`pointend`, `abort`, `clear`).
pub fn calibration_simple(request: &str) -> String {
    json!({
        "category": "calibration",
        "request": request,
    })
    .to_string()
}

/// A `values` payload field that is present but structurally unusable.
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("field `{0}` has unexpected type")]
    FieldType(&'static str),
    #[error("invalid `{0}` payload: {1}")]
    Object(&'static str, #[source] serde_json::Error),
}

fn get_u64(values: &Value, field: &'static str) -> Result<Option<u64>, PayloadError> {
    match values.get(field) {
        None => Ok(None),
        Some(v) => v.as_u64().map(Some).ok_or(PayloadError::FieldType(field)),
    }
}

fn get_f64(values: &Value, field: &'static str) -> Result<Option<f64>, PayloadError> {
    match values.get(field) {
        None => Ok(None),
        Some(v) => v.as_f64().map(Some).ok_or(PayloadError::FieldType(field)),
    }
}

fn get_bool(values: &Value, field: &'static str) -> Result<Option<bool>, PayloadError> {
    match values.get(field) {
        None => Ok(None),
        Some(v) => v.as_bool().map(Some).ok_or(PayloadError::FieldType(field)),
    }
}

/// Apply the flat tracker fields of a `values` payload to state and screen
/// candidates. Absent fields leave the candidates untouched; a present field
/// of the wrong type fails the whole payload.
pub fn update_server_state(
    values: &Value,
    state: &mut ServerState,
    screen: &mut Screen,
) -> Result<(), PayloadError> {
    if let Some(version) = get_u64(values, "version")? {
        state.version = version as u32;
    }
    if let Some(code) = get_u64(values, "trackerstate")? {
        state.tracker_state = TrackerState::from_code(code);
    }
    if let Some(framerate) = get_f64(values, "framerate")? {
        state.framerate = framerate;
    }
    if let Some(calibrated) = get_bool(values, "iscalibrated")? {
        state.is_calibrated = calibrated;
    }
    if let Some(calibrating) = get_bool(values, "iscalibrating")? {
        state.is_calibrating = calibrating;
    }
    if let Some(index) = get_u64(values, "screenindex")? {
        state.screen_index = index as u32;
        screen.index = index as u32;
    }
    if let Some(width) = get_u64(values, "screenresw")? {
        screen.width_px = width as u32;
    }
    if let Some(height) = get_u64(values, "screenresh")? {
        screen.height_px = height as u32;
    }
    if let Some(width) = get_f64(values, "screenpsyw")? {
        screen.width_mm = width;
    }
    if let Some(height) = get_f64(values, "screenpsyh")? {
        screen.height_mm = height;
    }
    Ok(())
}

/// Extract the `frame` object of a `values` payload, if present.
pub fn gaze_frame(values: &Value) -> Result<Option<GazeFrame>, PayloadError> {
    match values.get("frame") {
        None => Ok(None),
        Some(v) => serde_json::from_value(v.clone())
            .map(Some)
            .map_err(|e| PayloadError::Object("frame", e)),
    }
}

/// Extract the `calibresult` object of a `values` payload, if present.
pub fn calibration_result(values: &Value) -> Result<Option<CalibrationResult>, PayloadError> {
    match values.get("calibresult") {
        None => Ok(None),
        Some(v) => serde_json::from_value(v.clone())
            .map(Some)
            .map_err(|e| PayloadError::Object("calibresult", e)),
    }
}
