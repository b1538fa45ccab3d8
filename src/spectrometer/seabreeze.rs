//! Ocean Optics SeaBreeze backend (backend B in the startup fallback).
//!
//! Binds the vendor `libseabreeze` C API. The device-native integration time
//! unit is microseconds, so the millisecond capability value is translated
//! before forwarding. Builds without the SDK get a stub whose `open` fails
//! with `FeatureNotEnabled`.

#[cfg(feature = "hardware_seabreeze")]
#[allow(unsafe_code)]
mod seabreeze_enabled {
    use crate::error::{AcqError, AppResult};
    use crate::spectrometer::SpectrometerDriver;
    use async_trait::async_trait;
    use log::info;

    #[allow(non_snake_case, missing_docs)]
    mod ffi {
        use std::os::raw::c_int;

        #[link(name = "seabreeze")]
        extern "C" {
            pub fn seabreeze_open_spectrometer(index: c_int, error_code: *mut c_int) -> c_int;
            pub fn seabreeze_close_spectrometer(index: c_int, error_code: *mut c_int) -> c_int;
            pub fn seabreeze_set_integration_time_microsec(
                index: c_int,
                error_code: *mut c_int,
                integration_time_micros: u64,
            );
            pub fn seabreeze_get_formatted_spectrum_length(
                index: c_int,
                error_code: *mut c_int,
            ) -> c_int;
            pub fn seabreeze_get_formatted_spectrum(
                index: c_int,
                error_code: *mut c_int,
                buffer: *mut f64,
                buffer_length: c_int,
            ) -> c_int;
            pub fn seabreeze_get_wavelengths(
                index: c_int,
                error_code: *mut c_int,
                wavelengths: *mut f64,
                length: c_int,
            ) -> c_int;
        }
    }

    fn check(error_code: i32, what: &str) -> AppResult<()> {
        if error_code == 0 {
            Ok(())
        } else {
            Err(AcqError::Device(format!(
                "SeaBreeze {} failed with error code {}",
                what, error_code
            )))
        }
    }

    /// First SeaBreeze-compatible spectrometer on the bus.
    pub struct SeaBreezeSpectrometer {
        index: i32,
        wavelengths: Vec<f64>,
    }

    impl SeaBreezeSpectrometer {
        /// Open device 0 and read its wavelength calibration.
        pub fn open(integration_ms: u32) -> AppResult<Self> {
            if integration_ms == 0 {
                return Err(AcqError::InvalidParameter(
                    "integration time must be > 0 ms".to_string(),
                ));
            }

            let mut ec = 0i32;
            unsafe { ffi::seabreeze_open_spectrometer(0, &mut ec) };
            check(ec, "open")?;

            let len = unsafe { ffi::seabreeze_get_formatted_spectrum_length(0, &mut ec) };
            check(ec, "spectrum_length")?;
            if len <= 0 {
                return Err(AcqError::Device(
                    "SeaBreeze reported a zero-pixel detector".to_string(),
                ));
            }

            let mut wavelengths = vec![0.0f64; len as usize];
            unsafe {
                ffi::seabreeze_get_wavelengths(0, &mut ec, wavelengths.as_mut_ptr(), len)
            };
            check(ec, "get_wavelengths")?;

            let mut dev = Self {
                index: 0,
                wavelengths,
            };
            // Blocking set is fine during open.
            dev.forward_integration_time(integration_ms)?;

            info!("SeaBreeze spectrometer opened with {} pixels", len);
            Ok(dev)
        }

        fn forward_integration_time(&mut self, ms: u32) -> AppResult<()> {
            let mut ec = 0i32;
            // Capability unit is ms; the device wants microseconds.
            let micros = u64::from(ms) * 1_000;
            unsafe {
                ffi::seabreeze_set_integration_time_microsec(self.index, &mut ec, micros)
            };
            check(ec, "set_integration_time")
        }
    }

    #[async_trait]
    impl SpectrometerDriver for SeaBreezeSpectrometer {
        fn name(&self) -> &str {
            "seabreeze"
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
            self.forward_integration_time(ms)
        }

        async fn read_spectrum(&mut self) -> AppResult<Vec<f64>> {
            let index = self.index;
            let len = self.wavelengths.len();
            // The formatted-spectrum read blocks for the exposure; run it off
            // the async executor like any other blocking hardware call.
            let spectrum = tokio::task::spawn_blocking(move || -> AppResult<Vec<f64>> {
                let mut ec = 0i32;
                let mut buffer = vec![0.0f64; len];
                unsafe {
                    ffi::seabreeze_get_formatted_spectrum(
                        index,
                        &mut ec,
                        buffer.as_mut_ptr(),
                        len as i32,
                    )
                };
                check(ec, "get_formatted_spectrum")?;
                Ok(buffer)
            })
            .await
            .map_err(|e| AcqError::Device(format!("spectrum read task panicked: {}", e)))??;
            Ok(spectrum)
        }

        async fn close(&mut self) -> AppResult<()> {
            let mut ec = 0i32;
            unsafe { ffi::seabreeze_close_spectrometer(self.index, &mut ec) };
            check(ec, "close")?;
            info!("SeaBreeze spectrometer closed");
            Ok(())
        }
    }
}

#[cfg(not(feature = "hardware_seabreeze"))]
mod seabreeze_disabled {
    use crate::error::{AcqError, AppResult};
    use crate::spectrometer::SpectrometerDriver;
    use async_trait::async_trait;

    /// Stub compiled without the SeaBreeze SDK.
    pub struct SeaBreezeSpectrometer;

    impl SeaBreezeSpectrometer {
        /// Always fails; the startup fallback proceeds to the demo backend.
        pub fn open(_integration_ms: u32) -> AppResult<Self> {
            Err(AcqError::FeatureNotEnabled("hardware_seabreeze".to_string()))
        }
    }

    #[async_trait]
    impl SpectrometerDriver for SeaBreezeSpectrometer {
        fn name(&self) -> &str {
            "seabreeze"
        }

        fn wavelengths(&self) -> &[f64] {
            &[]
        }

        async fn set_integration_time(&mut self, _ms: u32) -> AppResult<()> {
            Err(AcqError::FeatureNotEnabled("hardware_seabreeze".to_string()))
        }

        async fn read_spectrum(&mut self) -> AppResult<Vec<f64>> {
            Err(AcqError::FeatureNotEnabled("hardware_seabreeze".to_string()))
        }

        async fn close(&mut self) -> AppResult<()> {
            Ok(())
        }
    }
}

#[cfg(feature = "hardware_seabreeze")]
pub use seabreeze_enabled::SeaBreezeSpectrometer;

#[cfg(not(feature = "hardware_seabreeze"))]
pub use seabreeze_disabled::SeaBreezeSpectrometer;
