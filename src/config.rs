//! Engine settings: worker-pool sizing and wait timeouts.
//!
//! Settings are plain serde structs with defaults for every field, so the
//! engine runs without any configuration file. `ScanSettings::load` layers an
//! optional TOML file and `RUST_SCAN_*` environment variables over the
//! defaults using the `config` crate builder.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{ScanError, ScanResult};

/// Sizing of one level runner's worker pool.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PoolSettings {
    /// Core number of tasks run concurrently within one level. `None` means
    /// use the machine's available parallelism. Peak concurrency is twice
    /// this value.
    #[serde(default)]
    pub workers: Option<usize>,

    /// Maximum number of queued tasks per runner. Submissions beyond this
    /// bound are dropped (counted and logged), a deliberate degradation valve
    /// for massively parallel levels.
    #[serde(default = "default_backlog")]
    pub backlog: usize,
}

fn default_backlog() -> usize {
    1000
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            workers: None,
            backlog: default_backlog(),
        }
    }
}

impl PoolSettings {
    /// Core worker count: the configured value, or the machine's available
    /// parallelism, never zero.
    pub fn core_workers(&self) -> usize {
        self.workers
            .filter(|w| *w > 0)
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(4)
            })
    }
}

/// Wait bounds for the different runners.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TimeoutSettings {
    /// Default bound for a blocking level wait or `await_done`, in seconds.
    #[serde(default = "default_await_secs")]
    pub await_secs: u64,

    /// Default bound for a positioner level, in seconds. Actuator moves can
    /// be slow; individual devices override this through their `timeout()`.
    #[serde(default = "default_positioner_secs")]
    pub positioner_secs: u64,

    /// Floor for the detector runner's computed timeout, in seconds.
    #[serde(default = "default_detector_floor_secs")]
    pub detector_floor_secs: u64,
}

fn default_await_secs() -> u64 {
    10
}

fn default_positioner_secs() -> u64 {
    3 * 60
}

fn default_detector_floor_secs() -> u64 {
    10
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            await_secs: default_await_secs(),
            positioner_secs: default_positioner_secs(),
            detector_floor_secs: default_detector_floor_secs(),
        }
    }
}

impl TimeoutSettings {
    /// Default wait bound as a `Duration`.
    pub fn await_timeout(&self) -> Duration {
        Duration::from_secs(self.await_secs)
    }

    /// Positioner level bound as a `Duration`.
    pub fn positioner_timeout(&self) -> Duration {
        Duration::from_secs(self.positioner_secs)
    }

    /// Detector timeout floor as a `Duration`.
    pub fn detector_floor(&self) -> Duration {
        Duration::from_secs(self.detector_floor_secs)
    }
}

/// Top-level engine settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ScanSettings {
    /// Worker-pool sizing shared by all level runners.
    #[serde(default)]
    pub pool: PoolSettings,

    /// Wait bounds.
    #[serde(default)]
    pub timeouts: TimeoutSettings,
}

impl ScanSettings {
    /// Load settings from an optional TOML file, with environment overrides
    /// (`RUST_SCAN_POOL__BACKLOG=...` style) on top of built-in defaults.
    pub fn load(path: Option<&Path>) -> ScanResult<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("RUST_SCAN").separator("__"),
        );
        let settings: ScanSettings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Semantic validation beyond what parsing enforces.
    pub fn validate(&self) -> ScanResult<()> {
        if self.pool.backlog == 0 {
            return Err(ScanError::Configuration(
                "pool.backlog must be at least 1".to_string(),
            ));
        }
        if self.timeouts.await_secs == 0 {
            return Err(ScanError::Configuration(
                "timeouts.await_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = ScanSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.pool.backlog, 1000);
        assert_eq!(settings.timeouts.detector_floor(), Duration::from_secs(10));
        assert!(settings.pool.core_workers() > 0);
    }

    #[test]
    fn test_zero_backlog_rejected() {
        let settings = ScanSettings {
            pool: PoolSettings {
                workers: None,
                backlog: 0,
            },
            ..Default::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(ScanError::Configuration(_))
        ));
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let settings = ScanSettings::load(None).expect("load with no file");
        assert_eq!(settings.pool.backlog, 1000);
    }
}
