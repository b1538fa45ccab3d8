//! Viewer workflows driven through the application facade: background
//! subtraction, acquisition-to-file, and saving.

use frogscan::app::App;
use frogscan::config::{AcquisitionSettings, Settings};
use frogscan::data::SpectraDataset;
use frogscan::spectrometer::DemoSpectrometer;
use std::time::Duration;

fn fast_settings() -> Settings {
    Settings {
        acquisition: AcquisitionSettings {
            integration_time_ms: 1,
            poll_interval_ms: 1,
            demo_pixels: 8,
            allow_demo: true,
        },
        ..Settings::default()
    }
}

fn demo_app() -> App {
    let driver = DemoSpectrometer::open(8, 1).unwrap();
    App::start_with_driver(fast_settings(), Box::new(driver))
}

async fn wait_frames(app: &App, n: usize) {
    let mut rx = app.acquisition().frames();
    for _ in 0..n {
        tokio::time::timeout(Duration::from_secs(2), rx.changed())
            .await
            .expect("no frame arrived")
            .expect("frame channel closed");
    }
}

#[tokio::test]
async fn background_subtraction_changes_the_displayed_frame() {
    let mut app = demo_app();
    wait_frames(&app, 1).await;

    app.acquisition().request_background();
    wait_frames(&app, 2).await;
    let background = app.acquisition().background().expect("background cached");
    assert_eq!(background.len(), 8);

    // With subtraction on, frames are raw minus the fixed background, so
    // values may go negative; the demo source alone never produces them.
    app.acquisition().set_subtract(true);
    wait_frames(&app, 2).await;
    app.acquisition().set_subtract(false);
    wait_frames(&app, 2).await;
    let raw = app.acquisition().latest_frame().unwrap();
    assert!(raw.intensities.iter().all(|v| *v >= 0.0));
    app.shutdown().await;
}

#[tokio::test]
async fn acquisition_to_file_saves_what_was_buffered() {
    let mut app = demo_app();
    app.acquisition().start_acquisition();
    wait_frames(&app, 5).await;
    // At most one in-flight frame can predate arming, so at least four of
    // the five observed frames were buffered.
    let buffer = app.acquisition().stop_acquisition();
    assert!(buffer.spectra.len() >= 4);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("acquired.json");
    let saved = app.save_acquisition(&path).unwrap();
    assert_eq!(saved.len(), app.acquisition().buffer_snapshot().spectra.len());

    let loaded = SpectraDataset::load(&path).unwrap();
    assert_eq!(loaded, saved);
    assert!(loaded.positions.is_none());
    assert_eq!(loaded.wavelengths.len(), 8);
    // Timestamps are seconds of day, strictly ordered within one run.
    assert!(loaded.timestamps.windows(2).all(|w| w[1] >= w[0]));
    app.shutdown().await;
}

#[tokio::test]
async fn restarting_acquisition_discards_the_previous_buffer() {
    let mut app = demo_app();
    app.acquisition().start_acquisition();
    wait_frames(&app, 6).await;
    let first = app.acquisition().stop_acquisition();

    app.acquisition().start_acquisition();
    wait_frames(&app, 1).await;
    let second = app.acquisition().stop_acquisition();
    assert!(second.spectra.len() < first.spectra.len());
    app.shutdown().await;
}

#[cfg(feature = "storage_csv")]
#[tokio::test]
async fn snapshot_writes_the_latest_frame_as_csv() {
    let mut app = demo_app();
    wait_frames(&app, 1).await;
    let frame = app.acquisition().latest_frame().unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("snap.csv");
    frogscan::data::snapshot::write_snapshot(&path, &frame.wavelengths, &frame.intensities)
        .unwrap();
    let contents = std::fs::read_to_string(&path).unwrap();
    assert_eq!(contents.lines().count(), 9);
    assert!(contents.starts_with("wavelength_nm,intensity"));
    app.shutdown().await;
}
