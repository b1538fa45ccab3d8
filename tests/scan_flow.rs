//! End-to-end scan tests over the synthetic spectrometer and the scripted
//! serial transport. No hardware, no real ports.

use frogscan::acquisition::AcquisitionLoop;
use frogscan::config::{AcquisitionSettings, ScanSettings};
use frogscan::error::AcqError;
use frogscan::scan::{ScanController, ScanState};
use frogscan::spectrometer::{DemoSpectrometer, SpectrometerDriver};
use frogscan::stage::{Esp300, MockTransport, SharedEsp300};
use std::sync::Arc;

fn fast_acq_settings() -> AcquisitionSettings {
    AcquisitionSettings {
        integration_time_ms: 1,
        poll_interval_ms: 1,
        demo_pixels: 16,
        allow_demo: true,
    }
}

fn fast_scan_settings(start: f64, stop: f64, step: f64) -> ScanSettings {
    ScanSettings {
        start,
        stop,
        step,
        settle_ms: 1,
        status_poll_ms: 1,
        pending_poll_ms: 1,
        pending_timeout_ms: 2_000,
    }
}

fn demo_acquisition() -> AcquisitionLoop {
    let driver = DemoSpectrometer::open(16, 1).unwrap();
    let wavelengths = Arc::new(driver.wavelengths().to_vec());
    AcquisitionLoop::start(Box::new(driver), wavelengths, &fast_acq_settings())
}

fn mock_stage() -> SharedEsp300 {
    Esp300::new(Box::new(MockTransport::new(0.0, 2))).into_shared()
}

#[tokio::test]
async fn scan_pairs_every_position_with_one_spectrum() {
    let acq = demo_acquisition();
    let controller = ScanController::new(mock_stage(), 2, fast_scan_settings(10.0, 11.0, 0.1));

    let dataset = controller.run(&acq, acq.wavelengths()).await.unwrap();
    assert_eq!(dataset.len(), 10);
    dataset.validate().unwrap();

    let positions = dataset.positions.as_ref().unwrap();
    assert_eq!(positions[0], 10.0);
    assert!((positions[9] - 10.9).abs() < 1e-9);
    assert!(positions.windows(2).all(|w| w[1] > w[0]));

    // One spectrum per position, captured in stepping order with distinct
    // timestamps.
    assert!(dataset.timestamps.windows(2).all(|w| w[1] > w[0]));
    assert!(dataset.spectra.iter().all(|s| s.len() == 16));

    let progress = *controller.progress().borrow();
    assert_eq!(progress.state, ScanState::Idle);
    acq.stop().await;
}

#[tokio::test]
async fn scan_runs_descending_with_positive_step() {
    let acq = demo_acquisition();
    let controller = ScanController::new(mock_stage(), 1, fast_scan_settings(11.0, 10.0, 0.1));

    let dataset = controller.run(&acq, acq.wavelengths()).await.unwrap();
    let positions = dataset.positions.unwrap();
    assert_eq!(positions.len(), 10);
    assert_eq!(positions[0], 11.0);
    assert!(positions.windows(2).all(|w| w[1] < w[0]));
    acq.stop().await;
}

#[tokio::test]
async fn scan_aborts_when_acquisition_is_down() {
    let acq = demo_acquisition();
    acq.stop().await;

    let controller = {
        let mut settings = fast_scan_settings(0.0, 1.0, 0.5);
        settings.pending_timeout_ms = 200;
        ScanController::new(mock_stage(), 1, settings)
    };
    let err = controller.run(&acq, acq.wavelengths()).await.unwrap_err();
    assert!(matches!(err, AcqError::ScanAborted(_)));
    assert_eq!(controller.progress().borrow().state, ScanState::Aborted);
    // The unconsumed request was withdrawn.
    assert!(!acq.scan_sample_pending());
}

#[tokio::test]
async fn scan_survives_transient_status_poll_failures() {
    let acq = demo_acquisition();
    let mut transport = MockTransport::new(0.0, 1);
    transport.fail_next_queries(3);
    let stage = Esp300::new(Box::new(transport)).into_shared();
    let controller = ScanController::new(stage, 1, fast_scan_settings(0.0, 1.0, 0.5));

    let dataset = controller.run(&acq, acq.wavelengths()).await.unwrap();
    assert_eq!(dataset.len(), 2);
    acq.stop().await;
}

#[tokio::test]
async fn scan_result_round_trips_through_disk() {
    let acq = demo_acquisition();
    let controller = ScanController::new(mock_stage(), 3, fast_scan_settings(0.0, 0.4, 0.2));
    let dataset = controller.run(&acq, acq.wavelengths()).await.unwrap();
    acq.stop().await;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("frog.json");
    dataset.save(&path).unwrap();
    let loaded = frogscan::data::SpectraDataset::load(&path).unwrap();
    assert_eq!(loaded, dataset);
    assert_eq!(loaded.positions.unwrap(), vec![0.0, 0.2]);
}
