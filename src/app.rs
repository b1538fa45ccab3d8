//! Application facade tying the device session, acquisition loop, stage and
//! storage together. The CLI front end in `main.rs` is a thin shell over
//! this type, and integration tests drive it directly.

use crate::acquisition::AcquisitionLoop;
use crate::config::Settings;
use crate::core::ReferenceTrace;
use crate::data::SpectraDataset;
use crate::error::{AcqError, AppResult};
use crate::scan::ScanController;
use crate::session::DeviceSession;
use crate::spectrometer::SpectrometerDriver;
use crate::stage::{Esp300, SerialTransport, SharedEsp300};
use log::{info, warn};
use std::path::Path;
use std::sync::Arc;

/// Running application: one device session, one acquisition loop, optional
/// stage connection, and the captured overlay traces.
pub struct App {
    settings: Settings,
    backend: String,
    acquisition: AcquisitionLoop,
    references: Vec<ReferenceTrace>,
    stage: Option<SharedEsp300>,
    stage_axis: u8,
}

impl App {
    /// Open the best available spectrometer backend and start acquiring.
    pub fn start(settings: Settings) -> AppResult<Self> {
        let session = DeviceSession::open(&settings.acquisition)?;
        let backend = session.backend().to_string();
        let (driver, wavelengths) = session.into_driver();
        Ok(Self::assemble(settings, backend, driver, wavelengths))
    }

    /// Start over an explicit driver. Used by tests and by callers that do
    /// their own device selection.
    pub fn start_with_driver(settings: Settings, driver: Box<dyn SpectrometerDriver>) -> Self {
        let backend = driver.name().to_string();
        let wavelengths = Arc::new(driver.wavelengths().to_vec());
        Self::assemble(settings, backend, driver, wavelengths)
    }

    fn assemble(
        settings: Settings,
        backend: String,
        driver: Box<dyn SpectrometerDriver>,
        wavelengths: Arc<Vec<f64>>,
    ) -> Self {
        let stage_axis = settings.stage.axis;
        let acquisition = AcquisitionLoop::start(driver, wavelengths, &settings.acquisition);
        info!("application started on backend '{}'", backend);
        Self {
            settings,
            backend,
            acquisition,
            references: Vec::new(),
            stage: None,
            stage_axis,
        }
    }

    /// Which spectrometer backend the session landed on.
    pub fn backend(&self) -> &str {
        &self.backend
    }

    /// The settings the application was started with.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The live acquisition handle (frames, background, buffer control).
    pub fn acquisition(&self) -> &AcquisitionLoop {
        &self.acquisition
    }

    /// Freeze the currently displayed spectrum as a named overlay trace.
    pub fn take_reference(&mut self) -> AppResult<ReferenceTrace> {
        let frame = self
            .acquisition
            .latest_frame()
            .ok_or_else(|| AcqError::Device("no spectrum available yet".into()))?;
        let name = format!("Reference {}", self.references.len() + 1);
        info!("captured overlay trace '{}'", name);
        let trace = ReferenceTrace {
            name,
            wavelengths: frame.wavelengths,
            intensities: frame.intensities,
        };
        self.references.push(trace.clone());
        Ok(trace)
    }

    /// Overlay traces captured so far, in capture order.
    pub fn references(&self) -> &[ReferenceTrace] {
        &self.references
    }

    /// Discard every overlay trace and restart the numbering.
    pub fn clear_references(&mut self) {
        self.references.clear();
    }

    /// Attach a delay stage over an already open serial transport.
    pub fn connect_stage(&mut self, link: Box<dyn SerialTransport>, axis: u8) {
        self.stage = Some(Esp300::new(link).into_shared());
        self.stage_axis = axis;
        info!("stage connected on axis {}", axis);
    }

    /// Close and drop the stage connection, if any.
    pub async fn disconnect_stage(&mut self) {
        if let Some(stage) = self.stage.take() {
            if let Err(e) = stage.lock().await.close().await {
                warn!("error closing stage: {}", e);
            }
        }
    }

    /// Run a scan with the configured range and save the result if an
    /// output path is given.
    pub async fn run_scan(&self, output: Option<&Path>) -> AppResult<SpectraDataset> {
        let stage = self
            .stage
            .clone()
            .ok_or(AcqError::SerialPortNotConnected)?;
        let controller = ScanController::new(stage, self.stage_axis, self.settings.scan.clone());
        let dataset = controller
            .run(&self.acquisition, self.acquisition.wavelengths())
            .await?;
        if let Some(path) = output {
            dataset.save(path)?;
        }
        Ok(dataset)
    }

    /// Save whatever the acquisition buffer currently holds.
    pub fn save_acquisition(&self, path: impl AsRef<Path>) -> AppResult<SpectraDataset> {
        let buffer = self.acquisition.buffer_snapshot();
        if buffer.spectra.is_empty() {
            return Err(AcqError::Save("no spectra have been collected".into()));
        }
        let dataset =
            SpectraDataset::from_acquisition(&self.acquisition.wavelengths(), &buffer);
        dataset.save(path)?;
        Ok(dataset)
    }

    /// Stop acquisition and release every device.
    pub async fn shutdown(&mut self) {
        self.acquisition.stop().await;
        self.disconnect_stage().await;
        info!("application shut down");
    }
}
