//! Position listeners: typed observer hooks for scan progress.
//!
//! External sinks (message brokers, progress bars, file writers) register a
//! [`PositionListener`] and receive fire-and-forget notifications around each
//! level and each full position. Listeners must be fast; a slow listener
//! slows the scan. The only veto point is `position_will_perform`: returning
//! `false` aborts the run with no work done and no error.

use chrono::{DateTime, Utc};
use std::sync::{Arc, RwLock};
use tracing::debug;

use crate::position::Position;

/// Snapshot passed to every listener hook.
#[derive(Clone, Debug)]
pub struct PositionEvent {
    /// The position this event concerns. For `level_performed` this is the
    /// composed position of the level's results.
    pub position: Position,
    /// Level the event concerns, where applicable.
    pub level: Option<i32>,
    /// Names of the participating devices, where applicable.
    pub device_names: Vec<String>,
    /// For write events, whether the device actually produced data.
    pub data_written: Option<bool>,
    /// When the event was raised.
    pub timestamp: DateTime<Utc>,
}

impl PositionEvent {
    /// Event for a bare position.
    pub fn new(position: Position) -> Self {
        Self {
            position,
            level: None,
            device_names: Vec::new(),
            data_written: None,
            timestamp: Utc::now(),
        }
    }

    /// Event for one level's devices.
    pub fn for_level(position: Position, level: i32, device_names: Vec<String>) -> Self {
        Self {
            level: Some(level),
            device_names,
            ..Self::new(position)
        }
    }

    /// Event for a single device action.
    pub fn for_device(position: Position, name: impl Into<String>) -> Self {
        Self {
            device_names: vec![name.into()],
            ..Self::new(position)
        }
    }
}

/// Observer hooks around scan positions. All methods default to no-ops so a
/// listener implements only what it cares about.
pub trait PositionListener: Send + Sync {
    /// Called before any level executes. Returning `false` vetoes the run.
    fn position_will_perform(&self, _event: &PositionEvent) -> bool {
        true
    }

    /// Called after every task of a level has completed, with the composed
    /// position of the level's results.
    fn level_performed(&self, _event: &PositionEvent) {}

    /// Called after the last level of a run.
    fn position_performed(&self, _event: &PositionEvent) {}

    /// Called before a detector's acquire action.
    fn run_will_perform(&self, _event: &PositionEvent) {}

    /// Called after a detector's acquire action.
    fn run_performed(&self, _event: &PositionEvent) {}

    /// Called after a detector's readout, with `data_written` set.
    fn write_performed(&self, _event: &PositionEvent) {}
}

/// Fan-out of [`PositionListener`]s. Cloning shares the listener list, so a
/// runner and the tasks it spawns notify the same observers.
#[derive(Clone, Default)]
pub struct PositionDelegate {
    listeners: Arc<RwLock<Vec<Arc<dyn PositionListener>>>>,
}

impl PositionDelegate {
    /// An empty delegate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener.
    pub fn add_listener(&self, listener: Arc<dyn PositionListener>) {
        if let Ok(mut listeners) = self.listeners.write() {
            listeners.push(listener);
        }
    }

    /// Ask every listener whether the position should be performed. The
    /// first `false` wins.
    pub fn fire_position_will_perform(&self, event: &PositionEvent) -> bool {
        if let Ok(listeners) = self.listeners.read() {
            for listener in listeners.iter() {
                if !listener.position_will_perform(event) {
                    debug!(position = %event.position, "position vetoed by listener");
                    return false;
                }
            }
        }
        true
    }

    /// Notify that one level completed.
    pub fn fire_level_performed(&self, event: &PositionEvent) {
        self.for_each(|l| l.level_performed(event));
    }

    /// Notify that the whole position completed.
    pub fn fire_position_performed(&self, event: &PositionEvent) {
        self.for_each(|l| l.position_performed(event));
    }

    /// Notify that a detector is about to acquire.
    pub fn fire_run_will_perform(&self, event: &PositionEvent) {
        self.for_each(|l| l.run_will_perform(event));
    }

    /// Notify that a detector finished acquiring.
    pub fn fire_run_performed(&self, event: &PositionEvent) {
        self.for_each(|l| l.run_performed(event));
    }

    /// Notify that a detector finished its readout.
    pub fn fire_write_performed(&self, event: &PositionEvent) {
        self.for_each(|l| l.write_performed(event));
    }

    fn for_each(&self, f: impl Fn(&Arc<dyn PositionListener>)) {
        if let Ok(listeners) = self.listeners.read() {
            for listener in listeners.iter() {
                f(listener);
            }
        }
    }
}

/// A delegate is itself a listener, forwarding every hook to its own
/// listeners. This lets one delegate relay the events of several runners.
impl PositionListener for PositionDelegate {
    fn position_will_perform(&self, event: &PositionEvent) -> bool {
        self.fire_position_will_perform(event)
    }

    fn level_performed(&self, event: &PositionEvent) {
        self.fire_level_performed(event);
    }

    fn position_performed(&self, event: &PositionEvent) {
        self.fire_position_performed(event);
    }

    fn run_will_perform(&self, event: &PositionEvent) {
        self.fire_run_will_perform(event);
    }

    fn run_performed(&self, event: &PositionEvent) {
        self.fire_run_performed(event);
    }

    fn write_performed(&self, event: &PositionEvent) {
        self.fire_write_performed(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        levels: AtomicUsize,
        veto: bool,
    }

    impl PositionListener for Counting {
        fn position_will_perform(&self, _event: &PositionEvent) -> bool {
            !self.veto
        }
        fn level_performed(&self, _event: &PositionEvent) {
            self.levels.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_fan_out_and_veto() {
        let delegate = PositionDelegate::new();
        let ok = Arc::new(Counting {
            levels: AtomicUsize::new(0),
            veto: false,
        });
        delegate.add_listener(ok.clone());

        let event = PositionEvent::new(Position::single("x", 1.0));
        assert!(delegate.fire_position_will_perform(&event));
        delegate.fire_level_performed(&event);
        assert_eq!(ok.levels.load(Ordering::SeqCst), 1);

        delegate.add_listener(Arc::new(Counting {
            levels: AtomicUsize::new(0),
            veto: true,
        }));
        assert!(!delegate.fire_position_will_perform(&event));
    }

    #[test]
    fn test_clone_shares_listeners() {
        let delegate = PositionDelegate::new();
        let clone = delegate.clone();
        let counter = Arc::new(Counting {
            levels: AtomicUsize::new(0),
            veto: false,
        });
        delegate.add_listener(counter.clone());
        clone.fire_level_performed(&PositionEvent::new(Position::new()));
        assert_eq!(counter.levels.load(Ordering::SeqCst), 1);
    }
}
