//! HDF5 export, behind the `storage_hdf5` feature.
//!
//! Layout: root-level datasets `wavelengths` (1D), `spectra` (2D, one row
//! per capture), `timestamps` (1D), and `positions` (1D, scans only).

#[cfg(feature = "storage_hdf5")]
mod hdf5_enabled {
    use crate::data::SpectraDataset;
    use crate::error::{AcqError, AppResult};
    use log::info;
    use std::path::Path;

    fn save_err(e: hdf5::Error) -> AcqError {
        AcqError::Save(format!("hdf5: {}", e))
    }

    /// Write a dataset to an HDF5 file, replacing any existing file.
    pub fn save(path: impl AsRef<Path>, dataset: &SpectraDataset) -> AppResult<()> {
        let path = path.as_ref();
        dataset.validate()?;
        let file = hdf5::File::create(path).map_err(save_err)?;

        file.new_dataset_builder()
            .with_data(&dataset.wavelengths)
            .create("wavelengths")
            .map_err(save_err)?;
        file.new_dataset_builder()
            .with_data(&dataset.timestamps)
            .create("timestamps")
            .map_err(save_err)?;

        let rows = dataset.spectra.len();
        let cols = dataset.wavelengths.len();
        let spectra = file
            .new_dataset::<f64>()
            .shape((rows, cols))
            .create("spectra")
            .map_err(save_err)?;
        let flat: Vec<f64> = dataset.spectra.iter().flatten().copied().collect();
        spectra.write_raw(&flat).map_err(save_err)?;

        if let Some(positions) = &dataset.positions {
            file.new_dataset_builder()
                .with_data(positions)
                .create("positions")
                .map_err(save_err)?;
        }
        info!("saved {} spectra to {}", rows, path.display());
        Ok(())
    }

    /// Read a file written by [`save`].
    pub fn load(path: impl AsRef<Path>) -> AppResult<SpectraDataset> {
        let path = path.as_ref();
        let file = hdf5::File::open(path).map_err(save_err)?;

        let wavelengths: Vec<f64> = file
            .dataset("wavelengths")
            .map_err(save_err)?
            .read_raw()
            .map_err(save_err)?;
        let timestamps: Vec<f64> = file
            .dataset("timestamps")
            .map_err(save_err)?
            .read_raw()
            .map_err(save_err)?;

        let spectra_ds = file.dataset("spectra").map_err(save_err)?;
        let shape = spectra_ds.shape();
        if shape.len() != 2 {
            return Err(AcqError::Save(format!(
                "spectra dataset has rank {}, expected 2",
                shape.len()
            )));
        }
        let flat: Vec<f64> = spectra_ds.read_raw().map_err(save_err)?;
        let spectra = flat.chunks(shape[1]).map(<[f64]>::to_vec).collect();

        let positions = match file.dataset("positions") {
            Ok(ds) => Some(ds.read_raw().map_err(save_err)?),
            Err(_) => None,
        };

        let dataset = SpectraDataset {
            wavelengths,
            spectra,
            timestamps,
            positions,
        };
        dataset.validate()?;
        Ok(dataset)
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_hdf5_round_trip() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("scan.h5");
            let dataset = SpectraDataset {
                wavelengths: vec![500.0, 501.0],
                spectra: vec![vec![1.0, 2.0], vec![3.0, 4.0]],
                timestamps: vec![10.0, 11.0],
                positions: Some(vec![0.5, 0.6]),
            };
            save(&path, &dataset).unwrap();
            assert_eq!(load(&path).unwrap(), dataset);
        }
    }
}

#[cfg(not(feature = "storage_hdf5"))]
mod hdf5_disabled {
    use crate::data::SpectraDataset;
    use crate::error::{AcqError, AppResult};
    use std::path::Path;

    /// Stub compiled without HDF5 support.
    pub fn save(_path: impl AsRef<Path>, _dataset: &SpectraDataset) -> AppResult<()> {
        Err(AcqError::FeatureNotEnabled("storage_hdf5".to_string()))
    }

    /// Stub compiled without HDF5 support.
    pub fn load(_path: impl AsRef<Path>) -> AppResult<SpectraDataset> {
        Err(AcqError::FeatureNotEnabled("storage_hdf5".to_string()))
    }
}

#[cfg(feature = "storage_hdf5")]
pub use hdf5_enabled::{load, save};
#[cfg(not(feature = "storage_hdf5"))]
pub use hdf5_disabled::{load, save};
