//! Synthetic spectrometer backend.
//!
//! Produces `wavelengths = 0..N-1` and uniform-random intensities scaled by
//! the configured integration time, so intensities always fall in
//! `[0, integration_time_ms)`. The read blocks for the integration time to
//! mimic a real exposure.

use crate::error::{AcqError, AppResult};
use crate::spectrometer::SpectrometerDriver;
use async_trait::async_trait;
use log::info;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

/// Simulated spectrometer used when no hardware backend opens.
pub struct DemoSpectrometer {
    wavelengths: Vec<f64>,
    integration_ms: u32,
    // StdRng instead of thread_rng so the driver stays Send across awaits.
    rng: StdRng,
    open: bool,
}

impl DemoSpectrometer {
    /// Open a demo device with the given pixel count and integration time.
    pub fn open(pixels: usize, integration_ms: u32) -> AppResult<Self> {
        if pixels == 0 {
            return Err(AcqError::InvalidParameter(
                "demo pixel count must be > 0".to_string(),
            ));
        }
        if integration_ms == 0 {
            return Err(AcqError::InvalidParameter(
                "integration time must be > 0 ms".to_string(),
            ));
        }
        info!("Demo spectrometer opened with {} pixels", pixels);
        Ok(Self {
            wavelengths: (0..pixels).map(|i| i as f64).collect(),
            integration_ms,
            rng: StdRng::from_entropy(),
            open: true,
        })
    }

    /// Last integration time that was set, in milliseconds.
    ///
    /// Exists so tests can verify that `set_integration_time` actually
    /// reaches the device.
    pub fn integration_time_ms(&self) -> u32 {
        self.integration_ms
    }
}

#[async_trait]
impl SpectrometerDriver for DemoSpectrometer {
    fn name(&self) -> &str {
        "demo"
    }

    fn wavelengths(&self) -> &[f64] {
        &self.wavelengths
    }

    async fn set_integration_time(&mut self, ms: u32) -> AppResult<()> {
        if ms == 0 {
            return Err(AcqError::InvalidParameter(
                "integration time must be > 0 ms".to_string(),
            ));
        }
        self.integration_ms = ms;
        Ok(())
    }

    async fn read_spectrum(&mut self) -> AppResult<Vec<f64>> {
        if !self.open {
            return Err(AcqError::Device("demo spectrometer is closed".to_string()));
        }
        // Simulated exposure: the read is bounded by the integration time.
        tokio::time::sleep(Duration::from_millis(u64::from(self.integration_ms))).await;

        let scale = f64::from(self.integration_ms);
        let intensities = (0..self.wavelengths.len())
            .map(|_| self.rng.gen::<f64>() * scale)
            .collect();
        Ok(intensities)
    }

    async fn close(&mut self) -> AppResult<()> {
        self.open = false;
        info!("Demo spectrometer closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_integration_time_is_recorded() {
        let mut dev = DemoSpectrometer::open(16, 100).unwrap();
        dev.set_integration_time(5).await.unwrap();
        assert_eq!(dev.integration_time_ms(), 5);
        let _ = dev.read_spectrum().await.unwrap();
        assert_eq!(dev.integration_time_ms(), 5);
    }

    #[tokio::test]
    async fn test_zero_integration_time_rejected() {
        let mut dev = DemoSpectrometer::open(16, 100).unwrap();
        assert!(matches!(
            dev.set_integration_time(0).await,
            Err(AcqError::InvalidParameter(_))
        ));
        // The rejected value must not disturb the device state.
        assert_eq!(dev.integration_time_ms(), 100);
    }

    #[tokio::test]
    async fn test_intensities_bounded_by_integration_time() {
        let mut dev = DemoSpectrometer::open(64, 3).unwrap();
        let intensities = dev.read_spectrum().await.unwrap();
        assert_eq!(intensities.len(), 64);
        assert!(intensities.iter().all(|&v| (0.0..3.0).contains(&v)));
    }

    #[tokio::test]
    async fn test_wavelengths_are_pixel_indices() {
        let dev = DemoSpectrometer::open(4, 10).unwrap();
        assert_eq!(dev.wavelengths(), &[0.0, 1.0, 2.0, 3.0]);
    }

    #[tokio::test]
    async fn test_read_after_close_is_device_error() {
        let mut dev = DemoSpectrometer::open(4, 1).unwrap();
        dev.close().await.unwrap();
        assert!(matches!(
            dev.read_spectrum().await,
            Err(AcqError::Device(_))
        ));
    }
}
