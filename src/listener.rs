//! Listener capabilities and the broadcast registry.
//!
//! Consumers subscribe to exactly the event categories they care about; the
//! engine keeps one independent [`Registry`] per capability. Callbacks run
//! synchronously on the engine's delivery task, in registration order; a
//! listener that blocks stalls all message processing, and a listener must
//! not re-enter the engine's synchronous-call path.

use std::sync::{Arc, RwLock};

use crate::types::{CalibrationResult, GazeFrame, Screen, TrackerState};

/// Receives every decoded gaze frame.
pub trait GazeListener: Send + Sync {
    fn on_gaze_frame(&self, frame: &GazeFrame);
}

/// Receives committed calibration results.
pub trait CalibrationResultListener: Send + Sync {
    /// Called when a new calibration result is committed to the cache.
    /// `calibrated` mirrors the result's overall success flag.
    fn on_calibration_changed(&self, calibrated: bool, result: &CalibrationResult);
}

/// Receives device connectivity and display geometry changes.
pub trait TrackerStateListener: Send + Sync {
    fn on_tracker_state_changed(&self, _state: TrackerState) {}
    fn on_screen_changed(&self, _screen: &Screen) {}
}

/// Follows an in-progress calibration sequence.
pub trait CalibrationProcessListener: Send + Sync {
    fn on_calibration_started(&self) {}
    /// Progress fraction in `[0.0, 1.0]` after each processed point.
    fn on_calibration_progress(&self, _progress: f64) {}
    /// Raw per-sequence result, reported whether or not it succeeded.
    fn on_calibration_result(&self, _succeeded: bool, _result: &CalibrationResult) {}
}

/// Receives connection up/down transitions.
pub trait ConnectionStateListener: Send + Sync {
    fn on_connection_state_changed(&self, connected: bool);
}

/// A broadcast registry for one listener capability.
///
/// Duplicate subscriptions are allowed and each receives its own callback.
/// `notify` snapshots the listener list before dispatching, so a callback
/// may subscribe or unsubscribe without deadlocking the registry.
pub struct Registry<L: ?Sized> {
    entries: RwLock<Vec<Arc<L>>>,
}

impl<L: ?Sized> Default for Registry<L> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }
}

impl<L: ?Sized> Registry<L> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a listener. Registration order is dispatch order.
    pub fn subscribe(&self, listener: Arc<L>) {
        self.entries.write().unwrap().push(listener);
    }

    /// Remove every registration of this listener handle.
    pub fn unsubscribe(&self, listener: &Arc<L>) {
        self.entries
            .write()
            .unwrap()
            .retain(|entry| !Arc::ptr_eq(entry, listener));
    }

    /// Invoke `f` once per registered listener, in registration order.
    pub fn notify(&self, f: impl Fn(&L)) {
        let snapshot: Vec<Arc<L>> = self.entries.read().unwrap().clone();
        for listener in &snapshot {
            f(listener);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
