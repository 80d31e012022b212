//! Custom error types for the scan engine.
//!
//! This module defines the primary error type, `ScanError`, for the whole
//! crate. Using the `thiserror` crate, it provides a centralized way to
//! handle the failure modes of a scan:
//!
//! - **`Device`**: a participant failure. A move, run or write task raised an
//!   error; this is recorded as the run's sticky fatal error and aborts the
//!   scan.
//! - **`Timeout`**: waiting on a blocking level or an `await_done` exceeded
//!   its bound. Timeouts are surfaced, never silently absorbed.
//! - **`Config`** / **`Configuration`**: file-level parse errors from the
//!   `config` crate, and semantic errors that pass parsing but are logically
//!   invalid. Both fail fast before any device is touched.
//! - **`UnknownDevice`** / **`EmptyScan`** / **`IllegalState`**: further
//!   fail-fast configuration errors.
//! - **`Aborted`**: re-raise of a sticky error recorded by an earlier task
//!   failure. Cleared only by an explicit `reset()`.
//! - **`NotSupported`**: the operation is declared in the public contract but
//!   deliberately not implemented (scan pause/resume).

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the engine error type.
pub type ScanResult<T> = std::result::Result<T, ScanError>;

/// Error type covering every failure mode of the scan engine.
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("Device '{device}' failed: {message}")]
    Device { device: String, message: String },

    #[error("Timeout of {waited:?} reached waiting for {what}")]
    Timeout { waited: Duration, what: String },

    #[error("No device named '{0}' is registered")]
    UnknownDevice(String),

    #[error("The scan model must contain some points to scan")]
    EmptyScan,

    #[error("Scan aborted: {source}")]
    Aborted {
        #[source]
        source: Arc<ScanError>,
    },

    #[error("Illegal state: {0}")]
    IllegalState(String),

    #[error("Operation '{0}' is not supported by this device")]
    NotSupported(&'static str),
}

impl ScanError {
    /// Participant failure for a named device.
    pub fn device(device: impl Into<String>, message: impl std::fmt::Display) -> Self {
        ScanError::Device {
            device: device.into(),
            message: message.to_string(),
        }
    }

    /// Wrap a sticky error for re-raising on a later call.
    pub fn aborted(source: Arc<ScanError>) -> Self {
        ScanError::Aborted { source }
    }
}
