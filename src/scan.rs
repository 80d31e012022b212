//! The acquisition device: the top-level scan orchestrator.
//!
//! An [`AcquisitionDevice`] is configured with a [`ScanModel`], then `run`
//! drives the whole pipeline point by point: move actuators to the point,
//! join the previous point's readout, trigger acquisition, start this
//! point's readout without blocking, and move on. Readout of point N
//! therefore overlaps motion and exposure of point N+1.
//!
//! The device is a small state machine (unconfigured, configured, running,
//! finished, aborted). Any participant failure aborts the scan and leaves
//! the device in the aborted state until `reset`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::config::ScanSettings;
use crate::device::{Detector, Scannable};
use crate::error::{ScanError, ScanResult};
use crate::events::{PositionDelegate, PositionListener};
use crate::moderator::SubscanModerator;
use crate::points::PointsModel;
use crate::position::Position;
use crate::registry::DeviceRegistry;
use crate::runner::detector::{DetectorRunner, DetectorWriter};
use crate::runner::positioner::Positioner;

/// Lifecycle state of an acquisition device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceState {
    /// No scan model has been accepted yet.
    Unconfigured,
    /// A scan model is validated and resolved; `run` may be called.
    Configured,
    /// A scan is in progress.
    Running,
    /// The last scan completed every point.
    Finished,
    /// The last scan stopped on a failure or an abort request.
    Aborted,
}

/// Declarative description of one scan: the path plus the participating
/// device names, resolved against the registry at configure time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScanModel {
    /// The scan path.
    pub points: PointsModel,
    /// Names of the detectors to trigger at every point.
    #[serde(default)]
    pub detectors: Vec<String>,
    /// Names of actuators to read (not move) at every point.
    #[serde(default)]
    pub monitors: Vec<String>,
}

/// Progress snapshot, serializable for status endpoints and logs.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScanProgress {
    /// Current device state.
    pub state: DeviceState,
    /// Points completed so far.
    pub point: usize,
    /// Total points the engine will step.
    pub size: usize,
    /// `point / size` as a percentage.
    pub percent_complete: f64,
    /// The last position completed, if any.
    pub position: Option<Position>,
}

/// A configured scan with every name resolved to a live device.
struct PreparedScan {
    outer: PointsModel,
    inner: Option<PointsModel>,
    size: usize,
    detectors: Vec<Arc<dyn Detector>>,
    monitors: Vec<Arc<dyn Scannable>>,
}

/// Handle for requesting an abort of a running scan from another task.
#[derive(Clone, Default)]
pub struct AbortHandle {
    flag: Arc<AtomicBool>,
}

impl AbortHandle {
    /// Request that the scan stop before its next point.
    pub fn abort(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    fn clear(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Orchestrates a complete scan over a device registry.
pub struct AcquisitionDevice {
    registry: Arc<DeviceRegistry>,
    settings: ScanSettings,
    delegate: PositionDelegate,
    state: DeviceState,
    scan: Option<PreparedScan>,
    abort: AbortHandle,
    completed: usize,
    last_position: Option<Position>,
}

impl AcquisitionDevice {
    /// An unconfigured device over the given registry.
    pub fn new(registry: Arc<DeviceRegistry>, settings: ScanSettings) -> Self {
        Self {
            registry,
            settings,
            delegate: PositionDelegate::new(),
            state: DeviceState::Unconfigured,
            scan: None,
            abort: AbortHandle::default(),
            completed: 0,
            last_position: None,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> DeviceState {
        self.state
    }

    /// Progress of the current or last scan.
    pub fn progress(&self) -> ScanProgress {
        let size = self.scan.as_ref().map_or(0, |s| s.size);
        let percent = if size == 0 {
            0.0
        } else {
            (self.completed as f64 / size as f64) * 100.0
        };
        ScanProgress {
            state: self.state,
            point: self.completed,
            size,
            percent_complete: percent,
            position: self.last_position.clone(),
        }
    }

    /// Handle for aborting a running scan from elsewhere.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Register a listener for every event of the scan pipeline.
    pub fn add_listener(&self, listener: Arc<dyn PositionListener>) {
        self.delegate.add_listener(listener);
    }

    /// The path the detectors will perform internally at each point, if the
    /// configured model was split by subscan moderation.
    pub fn inner_model(&self) -> Option<&PointsModel> {
        self.scan.as_ref().and_then(|s| s.inner.as_ref())
    }

    /// Validate a scan model and resolve its device names. Allowed in any
    /// state except running.
    pub fn configure(&mut self, model: ScanModel) -> ScanResult<()> {
        if self.state == DeviceState::Running {
            return Err(ScanError::IllegalState(
                "cannot reconfigure while a scan is running".to_string(),
            ));
        }

        let mut detectors = Vec::with_capacity(model.detectors.len());
        for name in &model.detectors {
            detectors.push(self.registry.detector(name)?);
        }
        let mut monitors = Vec::with_capacity(model.monitors.len());
        for name in &model.monitors {
            monitors.push(self.registry.scannable(name)?);
        }

        let moderated = SubscanModerator::moderate(&model.points, &detectors)?;
        let size = moderated.outer_size();
        info!(
            points = size,
            detectors = detectors.len(),
            moderated = moderated.inner_model().is_some(),
            "scan configured"
        );

        self.scan = Some(PreparedScan {
            outer: moderated.outer_model().clone(),
            inner: moderated.inner_model().cloned(),
            size,
            detectors,
            monitors,
        });
        self.completed = 0;
        self.last_position = None;
        self.abort.clear();
        self.state = DeviceState::Configured;
        Ok(())
    }

    /// Run the configured scan to completion.
    ///
    /// For each point: actuators move first (blocking, level by level), the
    /// previous point's readout is joined, acquisition is triggered
    /// (blocking), and readout is started without blocking. A final join
    /// ensures the last point's data is on disk before the call returns.
    #[instrument(skip(self), fields(points = tracing::field::Empty))]
    pub async fn run(&mut self) -> ScanResult<()> {
        match self.state {
            DeviceState::Configured | DeviceState::Finished => {}
            DeviceState::Unconfigured => {
                return Err(ScanError::IllegalState(
                    "run called before configure".to_string(),
                ));
            }
            DeviceState::Running => {
                return Err(ScanError::IllegalState(
                    "a scan is already running".to_string(),
                ));
            }
            DeviceState::Aborted => {
                return Err(ScanError::IllegalState(
                    "device is aborted, call reset first".to_string(),
                ));
            }
        }
        let Some(scan) = self.scan.as_ref() else {
            return Err(ScanError::IllegalState(
                "run called before configure".to_string(),
            ));
        };
        if scan.size == 0 {
            return Err(ScanError::EmptyScan);
        }
        tracing::Span::current().record("points", scan.size as u64);

        self.state = DeviceState::Running;
        self.completed = 0;
        self.last_position = None;
        let started = Instant::now();

        let outcome = self.run_points().await;
        match outcome {
            Ok(()) => {
                self.state = DeviceState::Finished;
                info!(
                    points = self.completed,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "scan finished"
                );
                Ok(())
            }
            Err(err) => {
                self.state = DeviceState::Aborted;
                warn!(
                    error = %err,
                    points = self.completed,
                    "scan aborted"
                );
                Err(err)
            }
        }
    }

    async fn run_points(&mut self) -> ScanResult<()> {
        let (outer, detectors, monitors) = match self.scan.as_ref() {
            Some(scan) => (
                scan.outer.clone(),
                scan.detectors.clone(),
                scan.monitors.clone(),
            ),
            None => {
                return Err(ScanError::IllegalState("no scan prepared".to_string()));
            }
        };

        let mut positioner = Positioner::new(Arc::clone(&self.registry), &self.settings);
        positioner.set_monitors(monitors);
        let mut runner = DetectorRunner::new(detectors.clone(), &self.settings);
        let mut writer = DetectorWriter::new(detectors, &self.settings);

        // All three runners report into the device's own listener set.
        let relay: Arc<dyn PositionListener> = Arc::new(self.delegate.clone());
        positioner.add_listener(Arc::clone(&relay));
        runner.add_listener(Arc::clone(&relay));
        writer.add_listener(relay);

        let generator = outer.generator()?;
        let result = async {
            for position in generator.iter() {
                if self.abort.is_set() {
                    return Err(ScanError::aborted(Arc::new(ScanError::IllegalState(
                        "scan aborted by request".to_string(),
                    ))));
                }
                positioner.set_position(&position).await?;
                // The previous point's readout must land before this
                // point's acquisition starts.
                writer.await_done().await?;
                runner.run(&position, true).await?;
                writer.run(&position, false).await?;
                self.completed = position.step_index() + 1;
                self.last_position = Some(position);
            }
            writer.await_done().await?;
            Ok(())
        }
        .await;

        if result.is_err() {
            positioner.abort();
            runner.abort();
            writer.abort();
        }
        result
    }

    /// Not implemented: pausing mid-point is not supported by this engine.
    pub fn pause(&mut self) -> ScanResult<()> {
        Err(ScanError::NotSupported("pause"))
    }

    /// Not implemented: see [`pause`](Self::pause).
    pub fn resume(&mut self) -> ScanResult<()> {
        Err(ScanError::NotSupported("resume"))
    }

    /// Clear an aborted state, keeping the configured scan.
    pub fn reset(&mut self) {
        self.abort.clear();
        self.state = if self.scan.is_some() {
            DeviceState::Configured
        } else {
            DeviceState::Unconfigured
        };
    }
}
