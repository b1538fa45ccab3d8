//! Two-column CSV export of a single displayed spectrum.

#[cfg(feature = "storage_csv")]
mod csv_enabled {
    use crate::error::{AcqError, AppResult};
    use log::info;
    use std::path::Path;

    /// Write one spectrum as `wavelength,intensity` rows with a header.
    pub fn write_snapshot(
        path: impl AsRef<Path>,
        wavelengths: &[f64],
        intensities: &[f64],
    ) -> AppResult<()> {
        let path = path.as_ref();
        if wavelengths.len() != intensities.len() {
            return Err(AcqError::Save(format!(
                "{} wavelengths but {} intensities",
                wavelengths.len(),
                intensities.len()
            )));
        }
        let mut writer = csv::Writer::from_path(path)
            .map_err(|e| AcqError::Save(format!("cannot open {}: {}", path.display(), e)))?;
        writer
            .write_record(["wavelength_nm", "intensity"])
            .map_err(|e| AcqError::Save(e.to_string()))?;
        for (wl, value) in wavelengths.iter().zip(intensities) {
            writer
                .write_record([wl.to_string(), value.to_string()])
                .map_err(|e| AcqError::Save(e.to_string()))?;
        }
        writer.flush().map_err(|e| AcqError::Save(e.to_string()))?;
        info!("snapshot written to {}", path.display());
        Ok(())
    }
}

#[cfg(not(feature = "storage_csv"))]
mod csv_disabled {
    use crate::error::{AcqError, AppResult};
    use std::path::Path;

    pub fn write_snapshot(
        _path: impl AsRef<Path>,
        _wavelengths: &[f64],
        _intensities: &[f64],
    ) -> AppResult<()> {
        Err(AcqError::FeatureNotEnabled("storage_csv".to_string()))
    }
}

#[cfg(feature = "storage_csv")]
pub use csv_enabled::write_snapshot;
#[cfg(not(feature = "storage_csv"))]
pub use csv_disabled::write_snapshot;
