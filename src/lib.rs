//! Spectrometer acquisition and delay-stage scanning for pulse
//! characterization experiments.
//!
//! The crate is built around one free-running [`acquisition`] loop that owns
//! the spectrometer and publishes frames over a single-slot channel. On top
//! of it sit background subtraction and acquisition-to-file ([`acquisition`]),
//! reference overlays and wiring ([`app`]), the ESP300 delay stage driver
//! ([`stage`]), scan orchestration ([`scan`]) and on-disk formats ([`data`]).
//!
//! Hardware backends are feature-gated; without vendor SDKs the session falls
//! back to a synthetic spectrometer, so the whole pipeline runs and tests
//! without instruments attached.

pub mod acquisition;
pub mod app;
pub mod config;
pub mod core;
pub mod data;
pub mod error;
pub mod scan;
pub mod session;
pub mod spectrometer;
pub mod stage;

pub use error::{AcqError, AppResult};
