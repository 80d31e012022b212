//! Mock devices that simulate actuators and detectors.
//!
//! Used by the unit and integration tests, and handy for dry-running a scan
//! without hardware. The mocks record what was done to them (moves, run and
//! write counts) and can share a journal of timestamped entries so tests can
//! assert cross-device ordering. Failures are injectable to exercise the
//! abort paths.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::info;

use crate::device::{Detector, Scannable};
use crate::error::{ScanError, ScanResult};
use crate::position::Position;

/// Shared, ordered record of device actions across mocks.
pub type Journal = Arc<Mutex<Vec<String>>>;

/// A fresh empty journal.
pub fn new_journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

fn record(journal: &Option<Journal>, entry: String) {
    if let Some(journal) = journal {
        if let Ok(mut entries) = journal.lock() {
            entries.push(entry);
        }
    }
}

/// A mock actuator. Moves settle after a configurable delay and the reached
/// value can differ from the demand by a fixed offset.
pub struct MockScannable {
    name: String,
    level: i32,
    settle: Duration,
    offset: f64,
    fail: bool,
    timeout: Option<Duration>,
    position: Mutex<f64>,
    moves: Mutex<Vec<f64>>,
    journal: Option<Journal>,
}

impl MockScannable {
    /// A mock actuator at the given level.
    pub fn new(name: impl Into<String>, level: i32) -> Self {
        Self {
            name: name.into(),
            level,
            settle: Duration::ZERO,
            offset: 0.0,
            fail: false,
            timeout: None,
            position: Mutex::new(0.0),
            moves: Mutex::new(Vec::new()),
            journal: None,
        }
    }

    /// Simulate motion taking this long to settle.
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Reached value = demand + offset, to exercise read-back composition.
    pub fn with_offset(mut self, offset: f64) -> Self {
        self.offset = offset;
        self
    }

    /// Every move fails.
    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    /// Per-device move timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Share an action journal.
    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Demands this actuator has completed, in order.
    pub fn moves(&self) -> Vec<f64> {
        self.moves.lock().map(|m| m.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Scannable for MockScannable {
    fn name(&self) -> &str {
        &self.name
    }

    fn level(&self) -> i32 {
        self.level
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    async fn set_value(&self, value: f64) -> ScanResult<()> {
        record(&self.journal, format!("move-start {}", self.name));
        if !self.settle.is_zero() {
            tokio::time::sleep(self.settle).await;
        }
        if self.fail {
            return Err(ScanError::device(&self.name, "simulated move failure"));
        }
        if let Ok(mut position) = self.position.lock() {
            *position = value + self.offset;
        }
        if let Ok(mut moves) = self.moves.lock() {
            moves.push(value);
        }
        record(&self.journal, format!("move-end {}", self.name));
        Ok(())
    }

    async fn value(&self) -> ScanResult<f64> {
        self.position
            .lock()
            .map(|p| *p)
            .map_err(|_| ScanError::device(&self.name, "poisoned position lock"))
    }
}

/// A mock detector. Counts runs and writes; writes produce data every
/// `cadence`-th call so reduced-rate readouts can be exercised.
pub struct MockDetector {
    name: String,
    level: i32,
    exposure: Option<Duration>,
    timeout: Option<Duration>,
    subscan_axes: Vec<String>,
    run_delay: Duration,
    write_delay: Duration,
    cadence: usize,
    fail_run: bool,
    fail_write: bool,
    runs: AtomicUsize,
    writes: AtomicUsize,
    frames_written: AtomicUsize,
    journal: Option<Journal>,
}

impl MockDetector {
    /// A mock detector at the given level, writing data on every point.
    pub fn new(name: impl Into<String>, level: i32) -> Self {
        Self {
            name: name.into(),
            level,
            exposure: None,
            timeout: None,
            subscan_axes: Vec::new(),
            run_delay: Duration::ZERO,
            write_delay: Duration::ZERO,
            cadence: 1,
            fail_run: false,
            fail_write: false,
            runs: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
            frames_written: AtomicUsize::new(0),
            journal: None,
        }
    }

    /// Configured exposure time (sizes the runner wait when no timeout set).
    pub fn with_exposure(mut self, exposure: Duration) -> Self {
        self.exposure = Some(exposure);
        self
    }

    /// Explicit per-device timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Declare axes this detector sweeps internally.
    pub fn with_subscan_axes(mut self, axes: Vec<String>) -> Self {
        self.subscan_axes = axes;
        self
    }

    /// Simulated acquisition duration.
    pub fn with_run_delay(mut self, delay: Duration) -> Self {
        self.run_delay = delay;
        self
    }

    /// Simulated readout duration.
    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = delay;
        self
    }

    /// Produce data only every `cadence`-th write; the rest return `false`.
    pub fn with_write_cadence(mut self, cadence: usize) -> Self {
        self.cadence = cadence.max(1);
        self
    }

    /// Every acquisition fails.
    pub fn failing_run(mut self) -> Self {
        self.fail_run = true;
        self
    }

    /// Every readout fails.
    pub fn failing_write(mut self) -> Self {
        self.fail_write = true;
        self
    }

    /// Share an action journal.
    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Number of completed acquisitions.
    pub fn run_count(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    /// Number of completed readouts (whether or not data was produced).
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of readouts that actually produced data.
    pub fn frames_written(&self) -> usize {
        self.frames_written.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Detector for MockDetector {
    fn name(&self) -> &str {
        &self.name
    }

    fn level(&self) -> i32 {
        self.level
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    fn exposure_time(&self) -> Option<Duration> {
        self.exposure
    }

    fn subscan_axes(&self) -> Vec<String> {
        self.subscan_axes.clone()
    }

    async fn run(&self, position: &Position) -> ScanResult<()> {
        record(
            &self.journal,
            format!("run {} @{}", self.name, position.step_index()),
        );
        if !self.run_delay.is_zero() {
            tokio::time::sleep(self.run_delay).await;
        }
        if self.fail_run {
            return Err(ScanError::device(&self.name, "simulated acquisition failure"));
        }
        let runs = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
        info!(detector = %self.name, runs, step = position.step_index(), "mock acquisition complete");
        Ok(())
    }

    async fn write(&self, position: &Position) -> ScanResult<bool> {
        if !self.write_delay.is_zero() {
            tokio::time::sleep(self.write_delay).await;
        }
        if self.fail_write {
            return Err(ScanError::device(&self.name, "simulated readout failure"));
        }
        let nth = self.writes.fetch_add(1, Ordering::SeqCst) + 1;
        let produced = nth % self.cadence == 0;
        if produced {
            self.frames_written.fetch_add(1, Ordering::SeqCst);
        }
        record(
            &self.journal,
            format!("write {} @{}", self.name, position.step_index()),
        );
        Ok(produced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scannable_records_moves_and_offset() {
        let motor = MockScannable::new("x", 1).with_offset(0.25);
        motor.set_value(1.0).await.expect("move");
        motor.set_value(2.0).await.expect("move");
        assert_eq!(motor.moves(), vec![1.0, 2.0]);
        assert_eq!(motor.value().await.expect("read"), 2.25);
    }

    #[tokio::test]
    async fn test_failing_scannable() {
        let motor = MockScannable::new("x", 1).failing();
        let err = motor.set_value(1.0).await.expect_err("should fail");
        assert!(matches!(err, ScanError::Device { .. }));
    }

    #[tokio::test]
    async fn test_detector_write_cadence() {
        let det = MockDetector::new("det", 1).with_write_cadence(3);
        let pos = Position::single("x", 0.0);
        let mut produced = Vec::new();
        for _ in 0..6 {
            produced.push(det.write(&pos).await.expect("write"));
        }
        assert_eq!(produced, vec![false, false, true, false, false, true]);
        assert_eq!(det.write_count(), 6);
        assert_eq!(det.frames_written(), 2);
    }
}
