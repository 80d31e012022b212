//! Detector runners: triggering acquisition and readout level by level.
//!
//! [`DetectorRunner`] invokes each detector's `run` (acquire) action for a
//! position, blocking. [`DetectorWriter`] invokes `write` (readout) and is
//! normally run non-blocking so the caller can move to the next point while
//! readout happens in the background; the acquisition loop joins it with
//! `await_done` before starting the next readout.
//!
//! The wait bound is computed once from the detector set: the maximum over
//! all detectors of the explicit timeout, or the configured exposure time
//! where no timeout is set, floored at a default when no detector declares
//! either.

use std::sync::Arc;
use std::time::Duration;

use crate::config::ScanSettings;
use crate::device::Detector;
use crate::error::ScanResult;
use crate::events::{PositionDelegate, PositionEvent, PositionListener};
use crate::position::Position;
use crate::runner::{LevelRunner, LevelStrategy, LevelTask};

/// Max of each detector's timeout (or exposure time), floored at `floor`
/// when nothing is declared.
fn aggregate_timeout(detectors: &[Arc<dyn Detector>], floor: Duration) -> Duration {
    let declared = detectors
        .iter()
        .filter_map(|d| d.timeout().or_else(|| d.exposure_time()))
        .max()
        .unwrap_or(Duration::ZERO);
    if declared.is_zero() {
        floor
    } else {
        declared
    }
}

/// Strategy triggering detector acquisition.
pub struct RunStrategy {
    detectors: Vec<Arc<dyn Detector>>,
    delegate: PositionDelegate,
}

impl LevelStrategy for RunStrategy {
    type Device = Arc<dyn Detector>;

    fn devices(&self, _position: &Position) -> ScanResult<Vec<Arc<dyn Detector>>> {
        Ok(self.detectors.clone())
    }

    fn device_level(&self, device: &Arc<dyn Detector>) -> i32 {
        device.level()
    }

    fn device_name(&self, device: &Arc<dyn Detector>) -> String {
        device.name().to_string()
    }

    fn create_task(&self, device: &Arc<dyn Detector>, position: &Position) -> Option<LevelTask> {
        let device = Arc::clone(device);
        let position = position.clone();
        let delegate = self.delegate.clone();
        Some(Box::pin(async move {
            let event = PositionEvent::for_device(position.clone(), device.name());
            delegate.fire_run_will_perform(&event);
            device.run(&position).await?;
            delegate.fire_run_performed(&event);
            // No new axis information from an acquisition.
            Ok(None)
        }))
    }
}

/// Strategy triggering detector readout.
pub struct WriteStrategy {
    detectors: Vec<Arc<dyn Detector>>,
    delegate: PositionDelegate,
}

impl LevelStrategy for WriteStrategy {
    type Device = Arc<dyn Detector>;

    fn devices(&self, _position: &Position) -> ScanResult<Vec<Arc<dyn Detector>>> {
        Ok(self.detectors.clone())
    }

    fn device_level(&self, device: &Arc<dyn Detector>) -> i32 {
        device.level()
    }

    fn device_name(&self, device: &Arc<dyn Detector>) -> String {
        device.name().to_string()
    }

    fn create_task(&self, device: &Arc<dyn Detector>, position: &Position) -> Option<LevelTask> {
        let device = Arc::clone(device);
        let position = position.clone();
        let delegate = self.delegate.clone();
        Some(Box::pin(async move {
            // "No data produced" is a valid outcome, not an error: some
            // detectors only write at a reduced cadence.
            let produced = device.write(&position).await?;
            let mut event = PositionEvent::for_device(position.clone(), device.name());
            event.data_written = Some(produced);
            delegate.fire_write_performed(&event);
            Ok(None)
        }))
    }
}

/// Triggers detector acquisition for a position, blocking with the
/// aggregate detector timeout.
pub struct DetectorRunner {
    runner: LevelRunner<RunStrategy>,
    timeout: Duration,
}

impl DetectorRunner {
    /// Runner over the given detector set.
    pub fn new(detectors: Vec<Arc<dyn Detector>>, settings: &ScanSettings) -> Self {
        let timeout = aggregate_timeout(&detectors, settings.timeouts.detector_floor());
        let mut runner = LevelRunner::new(
            RunStrategy {
                detectors,
                delegate: PositionDelegate::new(),
            },
            settings,
            timeout,
        );
        // Tasks notify the same listeners as the runner itself.
        let shared = runner.delegate().clone();
        runner.strategy_mut().delegate = shared;
        Self { runner, timeout }
    }

    /// The computed aggregate wait bound.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Acquire at the given position. Blocking is the norm here.
    pub async fn run(&mut self, position: &Position, block: bool) -> ScanResult<bool> {
        self.runner.run(position, block).await
    }

    /// Join outstanding non-blocking work.
    pub async fn await_done(&mut self) -> ScanResult<Option<Position>> {
        self.runner.await_done(self.timeout).await
    }

    /// Register a progress listener.
    pub fn add_listener(&self, listener: Arc<dyn PositionListener>) {
        self.runner.add_listener(listener);
    }

    /// Cancel outstanding acquisitions.
    pub fn abort(&mut self) {
        self.runner.abort();
    }

    /// Clear a sticky failure.
    pub fn reset(&mut self) {
        self.runner.reset();
    }
}

/// Triggers detector readout for a position, normally non-blocking.
pub struct DetectorWriter {
    runner: LevelRunner<WriteStrategy>,
    timeout: Duration,
}

impl DetectorWriter {
    /// Writer over the given detector set.
    pub fn new(detectors: Vec<Arc<dyn Detector>>, settings: &ScanSettings) -> Self {
        let timeout = aggregate_timeout(&detectors, settings.timeouts.detector_floor());
        let mut runner = LevelRunner::new(
            WriteStrategy {
                detectors,
                delegate: PositionDelegate::new(),
            },
            settings,
            timeout,
        );
        let shared = runner.delegate().clone();
        runner.strategy_mut().delegate = shared;
        Self { runner, timeout }
    }

    /// The computed aggregate wait bound.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Start readout at the given position. Pass `block = false` to return
    /// immediately and overlap readout with the next point's motion.
    pub async fn run(&mut self, position: &Position, block: bool) -> ScanResult<bool> {
        self.runner.run(position, block).await
    }

    /// Wait for the previous point's readout to finish. No-op when nothing
    /// is pending. Returns the last position submitted for readout.
    pub async fn await_done(&mut self) -> ScanResult<Option<Position>> {
        self.runner.await_done(self.timeout).await
    }

    /// Register a progress listener.
    pub fn add_listener(&self, listener: Arc<dyn PositionListener>) {
        self.runner.add_listener(listener);
    }

    /// Cancel outstanding readouts.
    pub fn abort(&mut self) {
        self.runner.abort();
    }

    /// Clear a sticky failure.
    pub fn reset(&mut self) {
        self.runner.reset();
    }

    /// Readouts dropped by the backlog valve.
    pub fn dropped_tasks(&self) -> u64 {
        self.runner.dropped_tasks()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::mock::MockDetector;
    use crate::error::ScanError;
    use std::sync::Mutex;

    fn settings() -> ScanSettings {
        ScanSettings::default()
    }

    #[test]
    fn test_aggregate_timeout_prefers_explicit_then_exposure() {
        let detectors: Vec<Arc<dyn Detector>> = vec![
            Arc::new(MockDetector::new("a", 1).with_exposure(Duration::from_secs(2))),
            Arc::new(
                MockDetector::new("b", 1)
                    .with_exposure(Duration::from_secs(30))
                    .with_timeout(Duration::from_secs(5)),
            ),
        ];
        // b's explicit 5s beats its 30s exposure; a contributes 2s.
        assert_eq!(
            aggregate_timeout(&detectors, Duration::from_secs(10)),
            Duration::from_secs(5)
        );
    }

    #[test]
    fn test_aggregate_timeout_floors_when_undeclared() {
        let detectors: Vec<Arc<dyn Detector>> = vec![Arc::new(MockDetector::new("a", 1))];
        assert_eq!(
            aggregate_timeout(&detectors, Duration::from_secs(10)),
            Duration::from_secs(10)
        );
    }

    #[tokio::test]
    async fn test_runner_triggers_every_detector() {
        let d1 = Arc::new(MockDetector::new("d1", 1));
        let d2 = Arc::new(MockDetector::new("d2", 2));
        let mut runner = DetectorRunner::new(vec![d1.clone(), d2.clone()], &settings());

        runner
            .run(&Position::single("x", 0.0), true)
            .await
            .expect("run");
        assert_eq!(d1.run_count(), 1);
        assert_eq!(d2.run_count(), 1);
    }

    #[tokio::test]
    async fn test_writer_reports_data_written() {
        struct Capture(Mutex<Vec<bool>>);
        impl PositionListener for Capture {
            fn write_performed(&self, event: &PositionEvent) {
                if let (Ok(mut seen), Some(produced)) = (self.0.lock(), event.data_written) {
                    seen.push(produced);
                }
            }
        }

        let det = Arc::new(MockDetector::new("sparse", 1).with_write_cadence(2));
        let mut writer = DetectorWriter::new(vec![det.clone()], &settings());
        let capture = Arc::new(Capture(Mutex::new(Vec::new())));
        writer.add_listener(capture.clone());

        for step in 0..4 {
            let pos = Position::single("x", step as f64).with_step_index(step);
            writer.run(&pos, false).await.expect("submit readout");
            writer.await_done().await.expect("join readout");
        }

        assert_eq!(det.write_count(), 4);
        let seen = capture.0.lock().expect("seen").clone();
        assert_eq!(seen, vec![false, true, false, true]);
    }

    #[tokio::test]
    async fn test_failing_write_surfaces_on_await() {
        let det = Arc::new(
            MockDetector::new("bad", 1)
                .failing_write()
                .with_write_delay(Duration::from_millis(5)),
        );
        let mut writer = DetectorWriter::new(vec![det], &settings());

        writer
            .run(&Position::single("x", 0.0), false)
            .await
            .expect("submission succeeds");
        let err = writer.await_done().await.expect_err("failure on join");
        assert!(matches!(err, ScanError::Aborted { .. }));

        // Sticky: further runs fail until reset.
        assert!(writer.run(&Position::single("x", 1.0), false).await.is_err());
        writer.reset();
    }
}
