//! Device session lifecycle.
//!
//! A [`DeviceSession`] owns the open spectrometer handle, the pixel count,
//! and the wavelength calibration for the whole run. It is created once at
//! startup through an ordered backend fallback and destroyed exactly once at
//! shutdown.

use crate::config::AcquisitionSettings;
use crate::error::{AcqError, AppResult};
use crate::spectrometer::{
    avantes::AvantesSpectrometer, seabreeze::SeaBreezeSpectrometer, DemoSpectrometer,
    SpectrometerDriver,
};
use log::{info, warn};
use std::sync::Arc;

/// An open spectrometer plus its session-constant calibration.
pub struct DeviceSession {
    driver: Box<dyn SpectrometerDriver>,
    wavelengths: Arc<Vec<f64>>,
    closed: bool,
}

impl DeviceSession {
    /// Open the first backend that succeeds: Avantes, then SeaBreeze, then,
    /// if `allow_demo`, the synthetic demo source.
    ///
    /// Evaluated once at startup; the winning backend is fixed for the
    /// session.
    pub fn open(settings: &AcquisitionSettings) -> AppResult<Self> {
        let integration_ms = settings.integration_time_ms;
        if integration_ms == 0 {
            return Err(AcqError::InvalidParameter(
                "integration time must be > 0 ms".to_string(),
            ));
        }

        match AvantesSpectrometer::open(integration_ms) {
            Ok(driver) => return Ok(Self::from_driver(Box::new(driver))),
            Err(e) => warn!("Avantes backend unavailable: {}", e),
        }

        match SeaBreezeSpectrometer::open(integration_ms) {
            Ok(driver) => return Ok(Self::from_driver(Box::new(driver))),
            Err(e) => warn!("SeaBreeze backend unavailable: {}", e),
        }

        if settings.allow_demo {
            let driver = DemoSpectrometer::open(settings.demo_pixels, integration_ms)?;
            Ok(Self::from_driver(Box::new(driver)))
        } else {
            Err(AcqError::Device(
                "no spectrometer backend available and demo mode is disabled".to_string(),
            ))
        }
    }

    fn from_driver(driver: Box<dyn SpectrometerDriver>) -> Self {
        let wavelengths = Arc::new(driver.wavelengths().to_vec());
        info!(
            "Device session opened on '{}' backend, {} pixels",
            driver.name(),
            wavelengths.len()
        );
        Self {
            driver,
            wavelengths,
            closed: false,
        }
    }

    /// Backend name of the open driver.
    pub fn backend(&self) -> &str {
        self.driver.name()
    }

    /// Pixel count of the device.
    pub fn pixel_count(&self) -> usize {
        self.wavelengths.len()
    }

    /// Wavelength calibration, shared and immutable for the session.
    pub fn wavelengths(&self) -> Arc<Vec<f64>> {
        Arc::clone(&self.wavelengths)
    }

    /// Hand the driver to the acquisition loop, keeping the calibration.
    pub fn into_driver(mut self) -> (Box<dyn SpectrometerDriver>, Arc<Vec<f64>>) {
        self.closed = true;
        let wavelengths = Arc::clone(&self.wavelengths);
        // Swap in a closed demo stand-in so Drop has something to hold.
        let driver = std::mem::replace(&mut self.driver, Box::new(ClosedDriver));
        (driver, wavelengths)
    }

    /// Release the hardware handle. Safe to call once; later calls are no-ops.
    pub async fn close(&mut self) -> AppResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.driver.close().await
    }
}

/// Placeholder driver left behind by [`DeviceSession::into_driver`].
struct ClosedDriver;

#[async_trait::async_trait]
impl SpectrometerDriver for ClosedDriver {
    fn name(&self) -> &str {
        "closed"
    }

    fn wavelengths(&self) -> &[f64] {
        &[]
    }

    async fn set_integration_time(&mut self, _ms: u32) -> AppResult<()> {
        Err(AcqError::Device("device session is closed".to_string()))
    }

    async fn read_spectrum(&mut self) -> AppResult<Vec<f64>> {
        Err(AcqError::Device("device session is closed".to_string()))
    }

    async fn close(&mut self) -> AppResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AcquisitionSettings;

    fn demo_settings() -> AcquisitionSettings {
        AcquisitionSettings {
            integration_time_ms: 2,
            poll_interval_ms: 10,
            demo_pixels: 32,
            allow_demo: true,
        }
    }

    #[tokio::test]
    async fn test_fallback_lands_on_demo() {
        let session = DeviceSession::open(&demo_settings()).unwrap();
        assert_eq!(session.backend(), "demo");
        assert_eq!(session.pixel_count(), 32);
    }

    #[tokio::test]
    async fn test_fallback_without_demo_fails() {
        let mut settings = demo_settings();
        settings.allow_demo = false;
        assert!(DeviceSession::open(&settings).is_err());
    }

    #[tokio::test]
    async fn test_wavelengths_shared_across_clones() {
        let session = DeviceSession::open(&demo_settings()).unwrap();
        let a = session.wavelengths();
        let b = session.wavelengths();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let mut session = DeviceSession::open(&demo_settings()).unwrap();
        session.close().await.unwrap();
        session.close().await.unwrap();
    }
}
