//! Name-to-device resolution.
//!
//! The registry is read-only from the engine's perspective: it is populated
//! up front and passed explicitly into the positioner and acquisition device
//! constructors. Lookup failure is a fail-fast configuration error raised
//! before any device is touched.

use std::collections::HashMap;
use std::sync::Arc;

use crate::device::{Detector, Scannable};
use crate::error::{ScanError, ScanResult};

/// Registry of live devices keyed by name.
#[derive(Default)]
pub struct DeviceRegistry {
    scannables: HashMap<String, Arc<dyn Scannable>>,
    detectors: HashMap<String, Arc<dyn Detector>>,
}

impl DeviceRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an actuator under its own name.
    pub fn register_scannable(&mut self, scannable: Arc<dyn Scannable>) {
        self.scannables
            .insert(scannable.name().to_string(), scannable);
    }

    /// Register a detector under its own name.
    pub fn register_detector(&mut self, detector: Arc<dyn Detector>) {
        self.detectors.insert(detector.name().to_string(), detector);
    }

    /// Resolve an actuator by name.
    pub fn scannable(&self, name: &str) -> ScanResult<Arc<dyn Scannable>> {
        self.scannables
            .get(name)
            .cloned()
            .ok_or_else(|| ScanError::UnknownDevice(name.to_string()))
    }

    /// Resolve a detector by name.
    pub fn detector(&self, name: &str) -> ScanResult<Arc<dyn Detector>> {
        self.detectors
            .get(name)
            .cloned()
            .ok_or_else(|| ScanError::UnknownDevice(name.to_string()))
    }

    /// Names of all registered actuators.
    pub fn scannable_names(&self) -> Vec<String> {
        self.scannables.keys().cloned().collect()
    }
}
