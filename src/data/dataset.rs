//! The spectra dataset and its default JSON on-disk form.

use crate::acquisition::AcquireBuffer;
use crate::core::ScanRecord;
use crate::error::{AcqError, AppResult};
use log::info;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A batch of spectra sharing one wavelength axis.
///
/// `positions` is present for scan output (one stage position per spectrum)
/// and absent for plain acquisition-to-file output.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpectraDataset {
    /// Wavelength per pixel (nm), shared by every row of `spectra`.
    pub wavelengths: Vec<f64>,
    /// One intensity vector per capture.
    pub spectra: Vec<Vec<f64>>,
    /// Seconds-of-day capture timestamps, one per spectrum.
    pub timestamps: Vec<f64>,
    /// Stage position per spectrum, scans only.
    pub positions: Option<Vec<f64>>,
}

impl SpectraDataset {
    /// Package an acquisition-to-file buffer.
    pub fn from_acquisition(wavelengths: &[f64], buffer: &AcquireBuffer) -> Self {
        Self {
            wavelengths: wavelengths.to_vec(),
            spectra: buffer.spectra.clone(),
            timestamps: buffer.timestamps.clone(),
            positions: None,
        }
    }

    /// Package position-tagged scan records.
    pub fn from_scan(wavelengths: &[f64], records: &[ScanRecord]) -> Self {
        Self {
            wavelengths: wavelengths.to_vec(),
            spectra: records.iter().map(|r| r.intensities.clone()).collect(),
            timestamps: records.iter().map(|r| r.timestamp).collect(),
            positions: Some(records.iter().map(|r| r.position).collect()),
        }
    }

    /// Number of spectra in the batch.
    pub fn len(&self) -> usize {
        self.spectra.len()
    }

    /// Whether the batch holds no spectra.
    pub fn is_empty(&self) -> bool {
        self.spectra.is_empty()
    }

    /// Check internal length consistency, for datasets loaded from disk.
    pub fn validate(&self) -> AppResult<()> {
        if self.timestamps.len() != self.spectra.len() {
            return Err(AcqError::Save(format!(
                "{} spectra but {} timestamps",
                self.spectra.len(),
                self.timestamps.len()
            )));
        }
        if let Some(positions) = &self.positions {
            if positions.len() != self.spectra.len() {
                return Err(AcqError::Save(format!(
                    "{} spectra but {} positions",
                    self.spectra.len(),
                    positions.len()
                )));
            }
        }
        if let Some(bad) = self
            .spectra
            .iter()
            .find(|s| s.len() != self.wavelengths.len())
        {
            return Err(AcqError::Save(format!(
                "spectrum has {} samples but the wavelength axis has {}",
                bad.len(),
                self.wavelengths.len()
            )));
        }
        Ok(())
    }

    /// Write the dataset as JSON. The file is written next to the target
    /// under a `.part` suffix and renamed into place, so an existing file
    /// is never left truncated by a failed save.
    pub fn save(&self, path: impl AsRef<Path>) -> AppResult<()> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(AcqError::Save("empty output path".into()));
        }
        self.validate()?;
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| AcqError::Save(format!("serialization failed: {}", e)))?;

        let mut partial = path.as_os_str().to_owned();
        partial.push(".part");
        let partial = std::path::PathBuf::from(partial);
        std::fs::write(&partial, json)
            .map_err(|e| AcqError::Save(format!("cannot write {}: {}", partial.display(), e)))?;
        std::fs::rename(&partial, path)
            .map_err(|e| AcqError::Save(format!("cannot finalize {}: {}", path.display(), e)))?;
        info!("saved {} spectra to {}", self.len(), path.display());
        Ok(())
    }

    /// Read a dataset written by [`SpectraDataset::save`].
    pub fn load(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let dataset: Self = serde_json::from_slice(&bytes)
            .map_err(|e| AcqError::Save(format!("cannot parse {}: {}", path.display(), e)))?;
        dataset.validate()?;
        Ok(dataset)
    }
}
