//! Spectrometer capability boundary.
//!
//! All vendor SDK details stay behind [`SpectrometerDriver`]; the rest of the
//! system only ever sees wavelengths, intensities, and an integration time.
//!
//! Backend selection is an ordered fallback evaluated once at startup (see
//! [`crate::session::DeviceSession::open`]): Avantes, then SeaBreeze, then,
//! when permitted, the synthetic demo source, which keeps the whole system
//! testable without hardware.

pub mod avantes;
pub mod demo;
pub mod seabreeze;

use crate::error::AppResult;
use async_trait::async_trait;

pub use demo::DemoSpectrometer;

/// Capability interface over one spectrometer backend.
#[async_trait]
pub trait SpectrometerDriver: Send + Sync {
    /// Backend name for logs and notifications.
    fn name(&self) -> &str;

    /// Wavelength calibration, one value per pixel. Fixed for the session.
    fn wavelengths(&self) -> &[f64];

    /// Set the sensor integration time in milliseconds.
    ///
    /// Fails with `InvalidParameter` for `ms == 0`. Hardware backends
    /// translate to device-native units (microseconds) before forwarding.
    async fn set_integration_time(&mut self, ms: u32) -> AppResult<()>;

    /// Read one spectrum. Blocks for up to the current integration time.
    ///
    /// Returns one intensity per pixel; the wavelength axis comes from
    /// [`Self::wavelengths`]. Any error here is fatal to the session.
    async fn read_spectrum(&mut self) -> AppResult<Vec<f64>>;

    /// Release the hardware handle. Called exactly once at shutdown.
    async fn close(&mut self) -> AppResult<()>;
}
