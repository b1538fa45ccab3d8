//! Avantes AvaSpec backend (backend A in the startup fallback).
//!
//! Talks to the vendor `libavs` runtime. Builds without the SDK get a stub
//! whose `open` fails with `FeatureNotEnabled`, which lets the startup
//! fallback move on to the next backend.
//!
//! Note: the AvaSpec measurement config takes the integration time in
//! milliseconds directly, so no unit translation happens here (unlike the
//! SeaBreeze backend).

#[cfg(feature = "hardware_avantes")]
#[allow(unsafe_code)]
mod avantes_enabled {
    use crate::error::{AcqError, AppResult};
    use crate::spectrometer::SpectrometerDriver;
    use async_trait::async_trait;
    use log::info;
    use std::time::Duration;

    #[allow(non_camel_case_types, non_snake_case, missing_docs)]
    mod ffi {
        use std::os::raw::{c_char, c_void};

        pub const AVS_SERIAL_LEN: usize = 10;
        pub const USER_ID_LEN: usize = 64;

        #[repr(C, packed)]
        pub struct AvsIdentityType {
            pub SerialNumber: [c_char; AVS_SERIAL_LEN],
            pub UserFriendlyName: [c_char; USER_ID_LEN],
            pub Status: u8,
        }

        #[repr(C, packed)]
        pub struct MeasConfigType {
            pub m_StartPixel: u16,
            pub m_StopPixel: u16,
            pub m_IntegrationTime: f32,
            pub m_IntegrationDelay: u32,
            pub m_NrAverages: u32,
            pub m_CorDynDark_m_Enable: u8,
            pub m_CorDynDark_m_ForgetPercentage: u8,
            pub m_Smoothing_m_SmoothPix: u16,
            pub m_Smoothing_m_SmoothModel: u8,
            pub m_SaturationDetection: u8,
            pub m_Trigger_m_Mode: u8,
            pub m_Trigger_m_Source: u8,
            pub m_Trigger_m_SourceType: u8,
            pub m_Control_m_StrobeControl: u16,
            pub m_Control_m_LaserDelay: u32,
            pub m_Control_m_LaserWidth: u32,
            pub m_Control_m_LaserWaveLength: f32,
            pub m_Control_m_StoreToRam: u16,
        }

        #[link(name = "avs")]
        extern "C" {
            pub fn AVS_Init(port: i16) -> i32;
            pub fn AVS_Done() -> i32;
            pub fn AVS_UpdateUSBDevices() -> i32;
            pub fn AVS_GetList(
                listsize: u32,
                required_size: *mut u32,
                list: *mut AvsIdentityType,
            ) -> i32;
            pub fn AVS_Activate(device_id: *mut AvsIdentityType) -> i32;
            pub fn AVS_Deactivate(handle: i32) -> bool;
            pub fn AVS_GetNumPixels(handle: i32, pixels: *mut u16) -> i32;
            pub fn AVS_GetLambda(handle: i32, wavelengths: *mut f64) -> i32;
            pub fn AVS_PrepareMeasure(handle: i32, config: *mut MeasConfigType) -> i32;
            pub fn AVS_Measure(handle: i32, window: *mut c_void, nummeas: i16) -> i32;
            pub fn AVS_PollScan(handle: i32) -> i32;
            pub fn AVS_GetScopeData(
                handle: i32,
                timestamp: *mut u32,
                spectrum: *mut f64,
            ) -> i32;
            pub fn AVS_StopMeasure(handle: i32) -> i32;
        }
    }

    fn check(ret: i32, what: &str) -> AppResult<()> {
        if ret >= 0 {
            Ok(())
        } else {
            Err(AcqError::Device(format!(
                "AvaSpec {} failed with code {}",
                what, ret
            )))
        }
    }

    /// One activated AvaSpec device.
    pub struct AvantesSpectrometer {
        handle: i32,
        pixels: usize,
        wavelengths: Vec<f64>,
        integration_ms: u32,
    }

    impl AvantesSpectrometer {
        /// Initialize the USB interface and activate the first device found.
        pub fn open(integration_ms: u32) -> AppResult<Self> {
            if integration_ms == 0 {
                return Err(AcqError::InvalidParameter(
                    "integration time must be > 0 ms".to_string(),
                ));
            }

            // Port 0 = USB only, matching the vendor default.
            let found = unsafe { ffi::AVS_Init(0) };
            if found <= 0 {
                unsafe { ffi::AVS_Done() };
                return Err(AcqError::Device(
                    "no AvaSpec spectrometer found".to_string(),
                ));
            }

            let n = unsafe { ffi::AVS_UpdateUSBDevices() };
            if n <= 0 {
                unsafe { ffi::AVS_Done() };
                return Err(AcqError::Device(
                    "no AvaSpec USB device attached".to_string(),
                ));
            }

            let mut id = unsafe { std::mem::zeroed::<ffi::AvsIdentityType>() };
            let mut required = 0u32;
            let ret = unsafe {
                ffi::AVS_GetList(
                    std::mem::size_of::<ffi::AvsIdentityType>() as u32,
                    &mut required,
                    &mut id,
                )
            };
            check(ret, "GetList")?;

            let handle = unsafe { ffi::AVS_Activate(&mut id) };
            if handle < 0 {
                unsafe { ffi::AVS_Done() };
                return Err(AcqError::Device(format!(
                    "AVS_Activate failed with code {}",
                    handle
                )));
            }

            let mut pixels = 0u16;
            check(unsafe { ffi::AVS_GetNumPixels(handle, &mut pixels) }, "GetNumPixels")?;

            let mut wavelengths = vec![0.0f64; usize::from(pixels)];
            check(
                unsafe { ffi::AVS_GetLambda(handle, wavelengths.as_mut_ptr()) },
                "GetLambda",
            )?;

            info!("AvaSpec spectrometer activated with {} pixels", pixels);
            Ok(Self {
                handle,
                pixels: usize::from(pixels),
                wavelengths,
                integration_ms,
            })
        }

        fn meas_config(&self) -> ffi::MeasConfigType {
            let mut config = unsafe { std::mem::zeroed::<ffi::MeasConfigType>() };
            config.m_StartPixel = 0;
            config.m_StopPixel = (self.pixels - 1) as u16;
            // AvaSpec takes the integration time in milliseconds.
            config.m_IntegrationTime = self.integration_ms as f32;
            config.m_NrAverages = 1;
            config
        }
    }

    #[async_trait]
    impl SpectrometerDriver for AvantesSpectrometer {
        fn name(&self) -> &str {
            "avantes"
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
            let mut config = self.meas_config();
            check(
                unsafe { ffi::AVS_PrepareMeasure(self.handle, &mut config) },
                "PrepareMeasure",
            )?;
            check(
                unsafe { ffi::AVS_Measure(self.handle, std::ptr::null_mut(), 1) },
                "Measure",
            )?;

            // Poll until the scan is ready; the exposure bounds the wait.
            loop {
                let ready = unsafe { ffi::AVS_PollScan(self.handle) };
                if ready < 0 {
                    return Err(AcqError::Device(format!(
                        "AvaSpec PollScan failed with code {}",
                        ready
                    )));
                }
                if ready > 0 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }

            let mut timestamp = 0u32;
            let mut spectrum = vec![0.0f64; self.pixels];
            check(
                unsafe {
                    ffi::AVS_GetScopeData(self.handle, &mut timestamp, spectrum.as_mut_ptr())
                },
                "GetScopeData",
            )?;
            Ok(spectrum)
        }

        async fn close(&mut self) -> AppResult<()> {
            unsafe {
                ffi::AVS_StopMeasure(self.handle);
                ffi::AVS_Deactivate(self.handle);
                ffi::AVS_Done();
            }
            info!("AvaSpec spectrometer deactivated");
            Ok(())
        }
    }
}

#[cfg(not(feature = "hardware_avantes"))]
mod avantes_disabled {
    use crate::error::{AcqError, AppResult};
    use crate::spectrometer::SpectrometerDriver;
    use async_trait::async_trait;

    /// Stub compiled without the AvaSpec SDK.
    pub struct AvantesSpectrometer;

    impl AvantesSpectrometer {
        /// Always fails; the startup fallback proceeds to the next backend.
        pub fn open(_integration_ms: u32) -> AppResult<Self> {
            Err(AcqError::FeatureNotEnabled("hardware_avantes".to_string()))
        }
    }

    #[async_trait]
    impl SpectrometerDriver for AvantesSpectrometer {
        fn name(&self) -> &str {
            "avantes"
        }

        fn wavelengths(&self) -> &[f64] {
            &[]
        }

        async fn set_integration_time(&mut self, _ms: u32) -> AppResult<()> {
            Err(AcqError::FeatureNotEnabled("hardware_avantes".to_string()))
        }

        async fn read_spectrum(&mut self) -> AppResult<Vec<f64>> {
            Err(AcqError::FeatureNotEnabled("hardware_avantes".to_string()))
        }

        async fn close(&mut self) -> AppResult<()> {
            Ok(())
        }
    }
}

#[cfg(feature = "hardware_avantes")]
pub use avantes_enabled::AvantesSpectrometer;

#[cfg(not(feature = "hardware_avantes"))]
pub use avantes_disabled::AvantesSpectrometer;
