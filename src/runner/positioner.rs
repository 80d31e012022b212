//! Positioner: moves the actuators named in a target position, level by
//! level, blocking until every move has completed.
//!
//! The participant collection is rebuilt per position from the device
//! registry: only the actuators named in the position's axes take part (plus
//! any configured per-point monitors). Each task moves one actuator and
//! reports a single-axis position holding the value actually reached, which
//! may differ from the demand.

use std::sync::Arc;
use std::time::Duration;

use crate::config::ScanSettings;
use crate::device::Scannable;
use crate::error::{ScanError, ScanResult};
use crate::events::PositionListener;
use crate::position::Position;
use crate::registry::DeviceRegistry;
use crate::runner::{LevelRunner, LevelStrategy, LevelTask};

/// Strategy resolving the actuators a position names.
pub struct PositionerStrategy {
    registry: Arc<DeviceRegistry>,
    monitors: Vec<Arc<dyn Scannable>>,
}

impl LevelStrategy for PositionerStrategy {
    type Device = Arc<dyn Scannable>;

    fn devices(&self, position: &Position) -> ScanResult<Vec<Arc<dyn Scannable>>> {
        let mut devices: Vec<Arc<dyn Scannable>> = Vec::with_capacity(position.len());
        for name in position.names() {
            devices.push(self.registry.scannable(&name)?);
        }
        for monitor in &self.monitors {
            if !position.contains(monitor.name()) {
                devices.push(Arc::clone(monitor));
            }
        }
        Ok(devices)
    }

    fn device_level(&self, device: &Arc<dyn Scannable>) -> i32 {
        device.level()
    }

    fn device_name(&self, device: &Arc<dyn Scannable>) -> String {
        device.name().to_string()
    }

    fn create_task(&self, device: &Arc<dyn Scannable>, position: &Position) -> Option<LevelTask> {
        let device = Arc::clone(device);
        // Monitors carry no demand value; they only read back.
        let demand = position.get(device.name());
        let index = position.index_of(device.name());
        Some(Box::pin(async move {
            if let Some(value) = demand {
                device.set_value(value).await?;
            }
            let reached = device.value().await?;
            let name = device.name().to_string();
            let result = match index {
                Some(index) => Position::single_indexed(name, reached, index),
                None => Position::single(name, reached),
            };
            Ok(Some(result))
        }))
    }

    fn level_timeout(&self, devices: &[Arc<dyn Scannable>]) -> Option<Duration> {
        devices.iter().filter_map(|d| d.timeout()).max()
    }
}

/// Moves actuators to the values a [`Position`] specifies, always blocking.
pub struct Positioner {
    runner: LevelRunner<PositionerStrategy>,
    registry: Arc<DeviceRegistry>,
}

impl Positioner {
    /// A positioner resolving devices through the given registry.
    pub fn new(registry: Arc<DeviceRegistry>, settings: &ScanSettings) -> Self {
        let strategy = PositionerStrategy {
            registry: Arc::clone(&registry),
            monitors: Vec::new(),
        };
        let runner = LevelRunner::new(
            strategy,
            settings,
            settings.timeouts.positioner_timeout(),
        );
        Self { runner, registry }
    }

    /// Per-point monitors to include in every level run alongside the
    /// position's own actuators.
    pub fn set_monitors(&mut self, monitors: Vec<Arc<dyn Scannable>>) {
        self.runner.strategy_mut().monitors = monitors;
    }

    /// Move every actuator the position names, blocking until all levels
    /// complete. A failed move aborts the whole positioner and becomes this
    /// call's error.
    pub async fn set_position(&mut self, position: &Position) -> ScanResult<bool> {
        self.runner.run(position, true).await
    }

    /// Read back the live value of every actuator named in the last target
    /// position into a freshly composed position. Always queries current
    /// state, never cached results.
    pub async fn position(&self) -> ScanResult<Option<Position>> {
        let Some(target) = self.runner.position() else {
            return Ok(None);
        };
        let mut current = Position::new().with_step_index(target.step_index());
        for name in target.names() {
            let device = self.registry.scannable(&name)?;
            let value = device
                .value()
                .await
                .map_err(|e| ScanError::device(&name, e))?;
            current.insert(name, value);
        }
        Ok(Some(current))
    }

    /// Register a progress listener.
    pub fn add_listener(&self, listener: Arc<dyn PositionListener>) {
        self.runner.add_listener(listener);
    }

    /// Cancel outstanding moves and free the pool.
    pub fn abort(&mut self) {
        self.runner.abort();
    }

    /// Clear a sticky failure.
    pub fn reset(&mut self) {
        self.runner.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::mock::{new_journal, MockScannable};

    fn registry(devices: Vec<Arc<dyn Scannable>>) -> Arc<DeviceRegistry> {
        let mut registry = DeviceRegistry::new();
        for device in devices {
            registry.register_scannable(device);
        }
        Arc::new(registry)
    }

    #[tokio::test]
    async fn test_set_position_moves_in_level_order() {
        let journal = new_journal();
        let coarse = Arc::new(
            MockScannable::new("coarse", 1)
                .with_settle(Duration::from_millis(20))
                .with_journal(journal.clone()),
        );
        let fine = Arc::new(MockScannable::new("fine", 2).with_journal(journal.clone()));
        let registry = registry(vec![coarse.clone(), fine.clone()]);

        let mut positioner = Positioner::new(registry, &ScanSettings::default());
        let mut target = Position::new();
        target.insert("coarse", 10.0);
        target.insert("fine", 0.5);
        positioner.set_position(&target).await.expect("move");

        assert_eq!(coarse.moves(), vec![10.0]);
        assert_eq!(fine.moves(), vec![0.5]);
        let entries = journal.lock().expect("journal").clone();
        let coarse_end = entries
            .iter()
            .position(|e| e == "move-end coarse")
            .expect("coarse finished");
        let fine_start = entries
            .iter()
            .position(|e| e == "move-start fine")
            .expect("fine started");
        assert!(coarse_end < fine_start, "level 1 before level 2: {entries:?}");
    }

    #[tokio::test]
    async fn test_position_reads_back_live_values() {
        let motor = Arc::new(MockScannable::new("x", 1).with_offset(0.1));
        let registry = registry(vec![motor.clone()]);
        let mut positioner = Positioner::new(registry, &ScanSettings::default());

        assert!(positioner.position().await.expect("no target yet").is_none());

        positioner
            .set_position(&Position::single("x", 2.0))
            .await
            .expect("move");
        let current = positioner
            .position()
            .await
            .expect("read")
            .expect("position known");
        assert_eq!(current.get("x"), Some(2.1));

        // The actuator moves outside the engine; read-back sees it.
        motor.set_value(5.0).await.expect("external move");
        let current = positioner
            .position()
            .await
            .expect("read")
            .expect("position known");
        assert_eq!(current.get("x"), Some(5.1));
    }

    #[tokio::test]
    async fn test_failed_move_aborts_and_sticks() {
        let registry = registry(vec![
            Arc::new(MockScannable::new("ok", 1)),
            Arc::new(MockScannable::new("broken", 1).failing()),
        ]);
        let mut positioner = Positioner::new(registry, &ScanSettings::default());
        let mut target = Position::new();
        target.insert("ok", 1.0);
        target.insert("broken", 1.0);

        let err = positioner
            .set_position(&target)
            .await
            .expect_err("move fails");
        assert!(matches!(err, ScanError::Aborted { .. }));

        // Sticky until reset.
        assert!(positioner.set_position(&target).await.is_err());
        positioner.reset();
        // Still fails (the device is broken) but the run is attempted again.
        assert!(positioner.set_position(&target).await.is_err());
    }

    #[tokio::test]
    async fn test_unknown_axis_fails_fast() {
        let registry = registry(vec![]);
        let mut positioner = Positioner::new(registry, &ScanSettings::default());
        let err = positioner
            .set_position(&Position::single("ghost", 0.0))
            .await
            .expect_err("unknown device");
        assert!(matches!(err, ScanError::UnknownDevice(_)));
    }

    #[tokio::test]
    async fn test_monitors_join_the_run() {
        let monitor = Arc::new(MockScannable::new("temperature", 5));
        let motor = Arc::new(MockScannable::new("x", 1));
        let registry = registry(vec![motor.clone(), monitor.clone()]);

        let mut positioner = Positioner::new(registry, &ScanSettings::default());
        positioner.set_monitors(vec![monitor.clone()]);
        positioner
            .set_position(&Position::single("x", 1.0))
            .await
            .expect("move");

        // The monitor was read, not moved.
        assert_eq!(motor.moves(), vec![1.0]);
        assert!(monitor.moves().is_empty());
    }
}
