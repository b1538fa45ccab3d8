//! Datasets and on-disk formats.

mod dataset;
pub mod hdf5;
pub mod snapshot;

pub use dataset::SpectraDataset;
