//! Cached device state records.
//!
//! These structs mirror the field vocabulary of the tracker server's JSON
//! protocol. They use serde for deserialization of the structured payloads
//! (`frame`, `calibresult`); the flat tracker fields are applied field by
//! field in [`crate::protocol`].
//!
//! All records are snapshots: the engine replaces a cached value wholesale
//! rather than patching it in place, so readers never observe a
//! partially-applied update.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Tracker device connectivity, reported by the `trackerstate` field.
///
/// Includes an `Unknown` variant for forward-compatibility with new codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackerState {
    /// Device attached and streaming.
    Connected,
    /// No device attached.
    #[default]
    NotConnected,
    /// Device attached but running unsupported firmware.
    BadFirmware,
    /// Device attached to a USB port without USB3 bandwidth.
    NoUsb3,
    /// Device attached but unable to deliver a camera stream.
    NoStream,
    /// Forward-compatible fallback for unknown codes.
    Unknown,
}

impl TrackerState {
    /// Map a wire code to a connectivity state.
    pub fn from_code(code: u64) -> Self {
        match code {
            0 => TrackerState::Connected,
            1 => TrackerState::NotConnected,
            2 => TrackerState::BadFirmware,
            3 => TrackerState::NoUsb3,
            4 => TrackerState::NoStream,
            _ => TrackerState::Unknown,
        }
    }

    /// Get a short display string.
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackerState::Connected => "connected",
            TrackerState::NotConnected => "not connected",
            TrackerState::BadFirmware => "bad firmware",
            TrackerState::NoUsb3 => "no usb3",
            TrackerState::NoStream => "no stream",
            TrackerState::Unknown => "unknown",
        }
    }

    /// Check if the device is attached and usable.
    pub fn is_connected(&self) -> bool {
        matches!(self, TrackerState::Connected)
    }
}

/// Device-reported state snapshot.
///
/// Owned exclusively by the engine and replaced wholesale whenever a decode
/// produces a fresher snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ServerState {
    /// Protocol generation the server is speaking.
    pub version: u32,
    /// Tracker device connectivity.
    pub tracker_state: TrackerState,
    /// Sampling rate in frames per second.
    pub framerate: f64,
    /// Whether a calibration has been completed and stored.
    pub is_calibrated: bool,
    /// Whether a calibration sequence is currently in progress.
    pub is_calibrating: bool,
    /// Index of the active display.
    pub screen_index: u32,
}

/// A 2D coordinate in screen space.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point2 {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
}

impl Point2 {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Tracking-state bitmask attached to each gaze frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackingFlags(pub u32);

impl TrackingFlags {
    /// On-screen gaze coordinates are available.
    pub const GAZE: u32 = 0x1;
    /// Both eyes are located.
    pub const EYES: u32 = 0x2;
    /// A user is present in front of the device.
    pub const PRESENCE: u32 = 0x4;
    /// Tracking failed for this frame.
    pub const FAIL: u32 = 0x8;
    /// Tracking has been lost for a sustained period.
    pub const LOST: u32 = 0x10;

    pub fn gaze_tracked(self) -> bool {
        self.0 & Self::GAZE != 0
    }

    pub fn eyes_tracked(self) -> bool {
        self.0 & Self::EYES != 0
    }

    pub fn presence_detected(self) -> bool {
        self.0 & Self::PRESENCE != 0
    }

    pub fn failed(self) -> bool {
        self.0 & Self::FAIL != 0
    }

    pub fn lost(self) -> bool {
        self.0 & Self::LOST != 0
    }
}

/// Per-eye tracking data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EyeData {
    /// Unsmoothed gaze coordinates in pixels.
    #[serde(default)]
    pub raw: Point2,
    /// Smoothed gaze coordinates in pixels.
    #[serde(default)]
    pub avg: Point2,
    /// Pupil size, unitless relative measure.
    #[serde(default, rename = "psize")]
    pub pupil_size: f64,
    /// Pupil center in normalized camera coordinates.
    #[serde(default, rename = "pcenter")]
    pub pupil_center: Point2,
}

/// One gaze-tracking frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GazeFrame {
    /// Wall-clock timestamp string, e.g. `2016-03-21 14:39:30.861`.
    #[serde(default)]
    pub timestamp: String,
    /// Monotonic timestamp in milliseconds.
    #[serde(default, rename = "time")]
    pub time_ms: i64,
    /// Whether the gaze is currently fixated.
    #[serde(default, rename = "fix")]
    pub fixated: bool,
    /// Tracking-state bitmask for this frame.
    #[serde(default)]
    pub state: TrackingFlags,
    /// Unsmoothed combined gaze coordinates in pixels.
    #[serde(default)]
    pub raw: Point2,
    /// Smoothed combined gaze coordinates in pixels.
    #[serde(default)]
    pub avg: Point2,
    /// Left eye data.
    #[serde(default, rename = "lefteye")]
    pub left_eye: EyeData,
    /// Right eye data.
    #[serde(default, rename = "righteye")]
    pub right_eye: EyeData,
}

impl GazeFrame {
    /// Parse the wall-clock timestamp, if present and well-formed.
    pub fn wall_clock(&self) -> Option<NaiveDateTime> {
        NaiveDateTime::parse_from_str(&self.timestamp, "%Y-%m-%d %H:%M:%S%.3f").ok()
    }
}

/// Display geometry: index, resolution in pixels, and physical size in mm.
///
/// Equality-comparable; the engine only notifies screen observers when the
/// decoded value differs from the cached one.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Screen {
    pub index: u32,
    pub width_px: u32,
    pub height_px: u32,
    pub width_mm: f64,
    pub height_mm: f64,
}

/// Accuracy in degrees of visual angle (combined, left, right).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AccuracyDegrees {
    #[serde(default, rename = "ad")]
    pub average: f64,
    #[serde(default, rename = "adl")]
    pub left: f64,
    #[serde(default, rename = "adr")]
    pub right: f64,
}

/// Mean estimation error in pixels (combined, left, right).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MeanErrorPixels {
    #[serde(default, rename = "mep")]
    pub average: f64,
    #[serde(default, rename = "mepl")]
    pub left: f64,
    #[serde(default, rename = "mepr")]
    pub right: f64,
}

/// Standard deviation of estimates in pixels (combined, left, right).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviationPixels {
    #[serde(default, rename = "asd")]
    pub average: f64,
    #[serde(default, rename = "asdl")]
    pub left: f64,
    #[serde(default, rename = "asdr")]
    pub right: f64,
}

/// Quality metrics for a single calibration point.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CalibrationPoint {
    /// Sample state for this point (0 = no data, 1 = resample, 2 = ok).
    #[serde(default)]
    pub state: i32,
    /// The calibration point as shown on screen.
    #[serde(default, rename = "cp")]
    pub point: Point2,
    /// Mean of the gaze estimates collected for this point.
    #[serde(default, rename = "mecp")]
    pub estimated: Point2,
    #[serde(default, rename = "acd")]
    pub accuracy: AccuracyDegrees,
    #[serde(default, rename = "mepix")]
    pub mean_error: MeanErrorPixels,
    #[serde(default, rename = "asdp")]
    pub deviation: DeviationPixels,
}

/// Outcome of a calibration sequence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CalibrationResult {
    /// Whether the calibration as a whole succeeded.
    #[serde(default)]
    pub result: bool,
    /// Average accuracy in degrees of visual angle.
    #[serde(default, rename = "deg")]
    pub error_deg: f64,
    #[serde(default, rename = "degl")]
    pub error_deg_left: f64,
    #[serde(default, rename = "degr")]
    pub error_deg_right: f64,
    /// Per-point quality metrics.
    #[serde(default, rename = "calibpoints")]
    pub points: Vec<CalibrationPoint>,
}

impl CalibrationResult {
    /// Reset to the empty, unsuccessful state.
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn tracker_state_from_code() {
        assert_eq!(TrackerState::from_code(0), TrackerState::Connected);
        assert_eq!(TrackerState::from_code(1), TrackerState::NotConnected);
        assert_eq!(TrackerState::from_code(2), TrackerState::BadFirmware);
        assert_eq!(TrackerState::from_code(3), TrackerState::NoUsb3);
        assert_eq!(TrackerState::from_code(4), TrackerState::NoStream);
        assert_eq!(TrackerState::from_code(99), TrackerState::Unknown);
    }

    #[test]
    fn tracker_state_is_connected() {
        assert!(TrackerState::Connected.is_connected());
        assert!(!TrackerState::NotConnected.is_connected());
        assert!(!TrackerState::NoStream.is_connected());
    }

    #[test]
    fn gaze_frame_deserialize() {
        let json = r#"{
            "timestamp": "2016-03-21 14:39:30.861",
            "time": 1458567570861,
            "fix": true,
            "state": 7,
            "raw": {"x": 440.1, "y": 210.5},
            "avg": {"x": 442.8, "y": 212.0},
            "lefteye": {
                "raw": {"x": 437.0, "y": 209.1},
                "avg": {"x": 439.2, "y": 210.8},
                "psize": 18.4,
                "pcenter": {"x": 0.31, "y": 0.42}
            },
            "righteye": {
                "raw": {"x": 443.9, "y": 211.8},
                "avg": {"x": 446.1, "y": 213.3},
                "psize": 18.9,
                "pcenter": {"x": 0.68, "y": 0.43}
            }
        }"#;
        let frame: GazeFrame = serde_json::from_str(json).unwrap();
        assert_eq!(frame.time_ms, 1458567570861);
        assert!(frame.fixated);
        assert!(frame.state.gaze_tracked());
        assert!(frame.state.eyes_tracked());
        assert!(frame.state.presence_detected());
        assert!(!frame.state.failed());
        assert_eq!(frame.raw, Point2::new(440.1, 210.5));
        assert_eq!(frame.left_eye.pupil_size, 18.4);
        assert_eq!(frame.right_eye.avg.x, 446.1);
    }

    #[test]
    fn gaze_frame_missing_fields_default() {
        let frame: GazeFrame = serde_json::from_str(r#"{"state": 8}"#).unwrap();
        assert!(frame.state.failed());
        assert!(!frame.fixated);
        assert_eq!(frame.raw, Point2::default());
        assert_eq!(frame.left_eye, EyeData::default());
    }

    #[test]
    fn gaze_frame_wall_clock() {
        let frame = GazeFrame {
            timestamp: "2016-03-21 14:39:30.861".to_string(),
            ..GazeFrame::default()
        };
        let parsed = frame.wall_clock().unwrap();
        assert_eq!(parsed.format("%H:%M:%S").to_string(), "14:39:30");

        let bogus = GazeFrame {
            timestamp: "not a timestamp".to_string(),
            ..GazeFrame::default()
        };
        assert!(bogus.wall_clock().is_none());
    }

    #[test]
    fn calibration_result_deserialize() {
        let json = r#"{
            "result": true,
            "deg": 0.91,
            "degl": 0.88,
            "degr": 0.95,
            "calibpoints": [
                {
                    "state": 2,
                    "cp": {"x": 100.0, "y": 100.0},
                    "mecp": {"x": 103.2, "y": 98.7},
                    "acd": {"ad": 0.8, "adl": 0.7, "adr": 0.9},
                    "mepix": {"mep": 11.0, "mepl": 10.1, "mepr": 11.9},
                    "asdp": {"asd": 5.2, "asdl": 4.9, "asdr": 5.5}
                }
            ]
        }"#;
        let result: CalibrationResult = serde_json::from_str(json).unwrap();
        assert!(result.result);
        assert_eq!(result.error_deg, 0.91);
        assert_eq!(result.points.len(), 1);
        assert_eq!(result.points[0].state, 2);
        assert_eq!(result.points[0].accuracy.left, 0.7);
        assert_eq!(result.points[0].mean_error.average, 11.0);
    }

    #[test]
    fn calibration_result_clear() {
        let mut result = CalibrationResult {
            result: true,
            error_deg: 0.5,
            points: vec![CalibrationPoint::default()],
            ..CalibrationResult::default()
        };
        result.clear();
        assert!(!result.result);
        assert!(result.points.is_empty());
        assert_eq!(result.error_deg, 0.0);
    }

    #[test]
    fn screen_equality_drives_change_detection() {
        let a = Screen {
            index: 0,
            width_px: 1920,
            height_px: 1080,
            width_mm: 510.0,
            height_mm: 287.0,
        };
        let mut b = a;
        assert_eq!(a, b);
        b.width_px = 2560;
        assert_ne!(a, b);
    }
}
