//! Core data types shared across the acquisition system.
//!
//! # Data Flow
//!
//! ```text
//! SpectrometerDriver --[SpectrumFrame]--> watch channel ---> UI/consumer
//!                                     \--> acquisition buffer / scan records
//! ```
//!
//! Wavelength calibration is fixed for the lifetime of a device session, so
//! every frame carries the same `Arc<Vec<f64>>` instead of a fresh copy.

use chrono::{Local, Timelike};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One spectrum sample handed from the acquisition loop to its consumers.
///
/// Invariant: `wavelengths.len() == intensities.len()` for every frame of a
/// given device session.
#[derive(Clone, Debug)]
pub struct SpectrumFrame {
    /// Wavelength per pixel (nm). Shared, immutable for the session.
    pub wavelengths: Arc<Vec<f64>>,
    /// Intensity per pixel. May contain negative values after background
    /// subtraction.
    pub intensities: Vec<f64>,
    /// Wall-clock capture time, seconds of day.
    pub timestamp: f64,
    /// Stage position the frame was captured at, set only for scan samples.
    pub position: Option<f64>,
}

impl SpectrumFrame {
    /// Number of pixels in the frame.
    pub fn pixel_count(&self) -> usize {
        self.intensities.len()
    }
}

/// One completed scan step: a settled stage position paired with exactly one
/// spectrum.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScanRecord {
    /// Commanded stage position for this step.
    pub position: f64,
    /// Captured intensities (post background subtraction, if enabled).
    pub intensities: Vec<f64>,
    /// Capture time, seconds of day.
    pub timestamp: f64,
}

/// A frozen, user-captured spectrum kept only for visual comparison.
///
/// References are pure display state: unbounded count, cleared only by
/// explicit user action, independent of the live feed.
#[derive(Clone, Debug)]
pub struct ReferenceTrace {
    /// Display label, e.g. "Reference 3".
    pub name: String,
    /// Wavelength axis shared with the session.
    pub wavelengths: Arc<Vec<f64>>,
    /// Frozen intensities.
    pub intensities: Vec<f64>,
}

/// Current local wall-clock time as fractional seconds since midnight.
pub fn seconds_of_day() -> f64 {
    let now = Local::now();
    f64::from(now.num_seconds_from_midnight()) + f64::from(now.nanosecond()) * 1e-9
}
