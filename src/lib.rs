//! Core library for the rust_scan engine.
//!
//! This library contains the scan-path models, the level-ordered concurrent
//! execution engine, and the acquisition pipeline that drives actuators and
//! detectors through a scan. Hardware integrations implement the
//! [`device::Scannable`] and [`device::Detector`] traits and register with a
//! [`registry::DeviceRegistry`]; the [`scan::AcquisitionDevice`] does the
//! rest.

pub mod config;
pub mod device;
pub mod error;
pub mod events;
pub mod moderator;
pub mod points;
pub mod position;
pub mod registry;
pub mod runner;
pub mod scan;

pub use config::ScanSettings;
pub use error::{ScanError, ScanResult};
pub use position::Position;
