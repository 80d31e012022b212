//! Device traits: the participants a scan coordinates.
//!
//! Every participant carries an integer `level` controlling ordering: lower
//! levels act first, devices sharing a level act concurrently with no
//! ordering guarantee among them. That tie-breaking is deliberate
//! parallelism, not an oversight.
//!
//! Two participant kinds exist:
//!
//! - [`Scannable`]: an actuator (motor, temperature controller) that can be
//!   moved to a demanded value and read back.
//! - [`Detector`]: an acquisition device that is triggered (`run`) at each
//!   position and later read out (`write`), and that may expose timeout,
//!   exposure and subscan metadata.

pub mod mock;

use async_trait::async_trait;
use std::time::Duration;

use crate::error::ScanResult;
use crate::position::Position;

/// An actuator participating in a scan.
#[async_trait]
pub trait Scannable: Send + Sync {
    /// Unique device name, matched against position axis names.
    fn name(&self) -> &str;

    /// Ordering level; lower levels move first.
    fn level(&self) -> i32;

    /// How long a move to this device may take. `None` means use the
    /// positioner's default bound.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// Move to the demanded value, returning only once motion is complete.
    async fn set_value(&self, value: f64) -> ScanResult<()>;

    /// Read back the live value. The value reached may differ from the
    /// demand.
    async fn value(&self) -> ScanResult<f64>;
}

/// An acquisition device participating in a scan.
#[async_trait]
pub trait Detector: Send + Sync {
    /// Unique device name.
    fn name(&self) -> &str;

    /// Ordering level; lower levels acquire first.
    fn level(&self) -> i32;

    /// Explicit per-device timeout, if configured.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// Configured exposure time, used to size waits when no explicit
    /// timeout is set.
    fn exposure_time(&self) -> Option<Duration> {
        None
    }

    /// Axis names this detector will sweep internally, if it performs
    /// subscans. The moderator removes these axes from the outer sequence.
    fn subscan_axes(&self) -> Vec<String> {
        Vec::new()
    }

    /// Trigger acquisition for the given position, returning once the frame
    /// has been taken.
    async fn run(&self, position: &Position) -> ScanResult<()>;

    /// Read out / persist the just-acquired frame. Returns `false` when no
    /// data was produced for this point, which is a valid outcome for
    /// detectors writing at a reduced cadence.
    async fn write(&self, position: &Position) -> ScanResult<bool>;
}
