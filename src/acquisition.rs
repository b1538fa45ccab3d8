//! Free-running acquisition loop.
//!
//! One background task owns the spectrometer driver and polls it on a fixed
//! interval. Everything else (UI-facing handles, the scan controller, tests)
//! talks to the loop through [`AcquisitionLoop`]: frames come out of a watch
//! channel where only the latest frame matters, one-shot requests (capture a
//! background, tag the next spectrum with a stage position) go in through
//! shared slots the loop consumes exactly once.

use crate::config::AcquisitionSettings;
use crate::core::{seconds_of_day, ScanRecord, SpectrumFrame};
use crate::error::{AcqError, AppResult};
use crate::spectrometer::SpectrometerDriver;
use log::{debug, error, info};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Notifications emitted by the loop for one-shot requests and faults.
#[derive(Clone, Debug, PartialEq)]
pub enum AcqEvent {
    /// A raw background spectrum was cached.
    BackgroundCaptured,
    /// The pending scan request was fulfilled at this stage position.
    ScanSampleCaptured {
        /// Stage position the spectrum was tagged with.
        position: f64,
    },
    /// The loop terminated because the device failed.
    LoopFault(String),
}

enum LoopCommand {
    SetIntegrationMs(u32),
}

/// Spectra and timestamps collected while acquisition-to-file is armed.
#[derive(Clone, Debug, Default)]
pub struct AcquireBuffer {
    /// One intensity vector per captured spectrum.
    pub spectra: Vec<Vec<f64>>,
    /// Seconds-of-day capture time, one per spectrum.
    pub timestamps: Vec<f64>,
}

struct Shared {
    running: AtomicBool,
    paused: AtomicBool,
    acquiring: AtomicBool,
    subtract: AtomicBool,
    background_requested: AtomicBool,
    background: Mutex<Option<Vec<f64>>>,
    scan_request: Mutex<Option<f64>>,
    scan_records: Mutex<Vec<ScanRecord>>,
    buffer: Mutex<AcquireBuffer>,
    fault: Mutex<Option<String>>,
    events: Mutex<Vec<AcqEvent>>,
}

// Lock poisoning only matters if a holder panicked mid-update; every
// critical section here is a plain read or append, so recover the guard.
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Handle to a running acquisition task.
pub struct AcquisitionLoop {
    shared: Arc<Shared>,
    frame_rx: watch::Receiver<Option<SpectrumFrame>>,
    cmd_tx: mpsc::UnboundedSender<LoopCommand>,
    handle: Mutex<Option<JoinHandle<()>>>,
    wavelengths: Arc<Vec<f64>>,
}

impl AcquisitionLoop {
    /// Take ownership of the driver and start polling it.
    pub fn start(
        mut driver: Box<dyn SpectrometerDriver>,
        wavelengths: Arc<Vec<f64>>,
        settings: &AcquisitionSettings,
    ) -> Self {
        let shared = Arc::new(Shared {
            running: AtomicBool::new(true),
            paused: AtomicBool::new(false),
            acquiring: AtomicBool::new(false),
            subtract: AtomicBool::new(false),
            background_requested: AtomicBool::new(false),
            background: Mutex::new(None),
            scan_request: Mutex::new(None),
            scan_records: Mutex::new(Vec::new()),
            buffer: Mutex::new(AcquireBuffer::default()),
            fault: Mutex::new(None),
            events: Mutex::new(Vec::new()),
        });
        let (frame_tx, frame_rx) = watch::channel(None);
        let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<LoopCommand>();

        let poll_interval = Duration::from_millis(settings.poll_interval_ms);
        let loop_shared = Arc::clone(&shared);
        let loop_wavelengths = Arc::clone(&wavelengths);
        let handle = tokio::spawn(async move {
            info!(
                "acquisition loop started ({} px, poll every {:?})",
                loop_wavelengths.len(),
                poll_interval
            );
            while loop_shared.running.load(Ordering::SeqCst) {
                while let Ok(cmd) = cmd_rx.try_recv() {
                    match cmd {
                        LoopCommand::SetIntegrationMs(ms) => {
                            if let Err(e) = driver.set_integration_time(ms).await {
                                error!("failed to set integration time: {}", e);
                            }
                        }
                    }
                }
                if loop_shared.paused.load(Ordering::SeqCst) {
                    tokio::time::sleep(poll_interval).await;
                    continue;
                }
                // Hardware-level read failures are not self-healing; any
                // error here ends the session rather than being retried.
                let raw = match driver.read_spectrum().await {
                    Ok(raw) => raw,
                    Err(e) => {
                        error!("acquisition loop terminated: {}", e);
                        *lock(&loop_shared.fault) = Some(e.to_string());
                        lock(&loop_shared.events).push(AcqEvent::LoopFault(e.to_string()));
                        loop_shared.running.store(false, Ordering::SeqCst);
                        break;
                    }
                };
                let timestamp = seconds_of_day();

                // One-shot background capture always caches the raw spectrum,
                // regardless of the subtraction toggle.
                if loop_shared
                    .background_requested
                    .swap(false, Ordering::SeqCst)
                {
                    debug!("captured background spectrum");
                    *lock(&loop_shared.background) = Some(raw.clone());
                    lock(&loop_shared.events).push(AcqEvent::BackgroundCaptured);
                }

                let intensities = if loop_shared.subtract.load(Ordering::SeqCst) {
                    match lock(&loop_shared.background).as_deref() {
                        Some(bg) => raw.iter().zip(bg).map(|(s, b)| s - b).collect(),
                        None => raw,
                    }
                } else {
                    raw
                };

                if loop_shared.acquiring.load(Ordering::SeqCst) {
                    let mut buffer = lock(&loop_shared.buffer);
                    buffer.spectra.push(intensities.clone());
                    buffer.timestamps.push(timestamp);
                }

                let position = lock(&loop_shared.scan_request).take();
                if let Some(position) = position {
                    lock(&loop_shared.scan_records).push(ScanRecord {
                        position,
                        intensities: intensities.clone(),
                        timestamp,
                    });
                    lock(&loop_shared.events)
                        .push(AcqEvent::ScanSampleCaptured { position });
                }

                let _ = frame_tx.send(Some(SpectrumFrame {
                    wavelengths: Arc::clone(&loop_wavelengths),
                    intensities,
                    timestamp,
                    position,
                }));

                tokio::time::sleep(poll_interval).await;
            }
            if let Err(e) = driver.close().await {
                error!("error closing spectrometer: {}", e);
            }
            info!("acquisition loop stopped");
        });

        Self {
            shared,
            frame_rx,
            cmd_tx,
            handle: Mutex::new(Some(handle)),
            wavelengths,
        }
    }

    /// Wavelength axis shared with every emitted frame.
    pub fn wavelengths(&self) -> Arc<Vec<f64>> {
        Arc::clone(&self.wavelengths)
    }

    /// Subscribe to the single-slot frame channel. Late or slow consumers
    /// see only the most recent frame.
    pub fn frames(&self) -> watch::Receiver<Option<SpectrumFrame>> {
        self.frame_rx.clone()
    }

    /// The most recently published frame, if any.
    pub fn latest_frame(&self) -> Option<SpectrumFrame> {
        self.frame_rx.borrow().clone()
    }

    /// Drain events emitted since the last call.
    pub fn take_events(&self) -> Vec<AcqEvent> {
        std::mem::take(&mut *lock(&self.shared.events))
    }

    /// Whether the loop task is still polling the device.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// The fault message that terminated the loop, if it terminated.
    pub fn fault(&self) -> Option<String> {
        lock(&self.shared.fault).clone()
    }

    /// Suspend polling without releasing the device.
    pub fn pause(&self) {
        self.shared.paused.store(true, Ordering::SeqCst);
    }

    /// Resume after [`AcquisitionLoop::pause`].
    pub fn resume(&self) {
        self.shared.paused.store(false, Ordering::SeqCst);
    }

    /// Cache the next raw spectrum as the background.
    pub fn request_background(&self) {
        self.shared.background_requested.store(true, Ordering::SeqCst);
    }

    /// Toggle background subtraction for displayed and recorded spectra.
    /// A no-op until a background has been captured.
    pub fn set_subtract(&self, enabled: bool) {
        self.shared.subtract.store(enabled, Ordering::SeqCst);
    }

    /// The cached raw background, if one has been captured.
    pub fn background(&self) -> Option<Vec<f64>> {
        lock(&self.shared.background).clone()
    }

    /// Arm acquisition-to-file. Clears any earlier buffer contents.
    pub fn start_acquisition(&self) {
        *lock(&self.shared.buffer) = AcquireBuffer::default();
        self.shared.acquiring.store(true, Ordering::SeqCst);
        info!("acquisition-to-file armed");
    }

    /// Disarm acquisition-to-file and return the collected buffer. The
    /// buffer itself is kept until the next [`AcquisitionLoop::start_acquisition`].
    pub fn stop_acquisition(&self) -> AcquireBuffer {
        self.shared.acquiring.store(false, Ordering::SeqCst);
        let buffer = lock(&self.shared.buffer).clone();
        info!("acquisition-to-file disarmed ({} spectra)", buffer.spectra.len());
        buffer
    }

    /// Snapshot the acquisition buffer without disarming.
    pub fn buffer_snapshot(&self) -> AcquireBuffer {
        lock(&self.shared.buffer).clone()
    }

    /// Ask the loop to tag its next spectrum with a stage position. Fails if
    /// an earlier request has not been consumed yet.
    pub fn request_scan_sample(&self, position: f64) -> AppResult<()> {
        let mut slot = lock(&self.shared.scan_request);
        if slot.is_some() {
            return Err(AcqError::InvalidParameter(
                "a scan sample request is already pending".into(),
            ));
        }
        *slot = Some(position);
        Ok(())
    }

    /// Whether a scan sample request is still waiting for the next spectrum.
    pub fn scan_sample_pending(&self) -> bool {
        lock(&self.shared.scan_request).is_some()
    }

    /// Withdraw an unconsumed scan sample request.
    pub fn cancel_scan_sample(&self) {
        *lock(&self.shared.scan_request) = None;
    }

    /// Drain the position-tagged records collected so far.
    pub fn take_scan_records(&self) -> Vec<ScanRecord> {
        std::mem::take(&mut *lock(&self.shared.scan_records))
    }

    /// Discard any position-tagged records.
    pub fn clear_scan_records(&self) {
        lock(&self.shared.scan_records).clear();
    }

    /// Forward a new integration time to the driver inside the loop.
    pub fn set_integration_time(&self, ms: u32) -> AppResult<()> {
        if ms == 0 {
            return Err(AcqError::InvalidParameter(
                "integration time must be positive".into(),
            ));
        }
        self.cmd_tx
            .send(LoopCommand::SetIntegrationMs(ms))
            .map_err(|_| AcqError::Device("acquisition loop is not running".into()))
    }

    /// Stop the loop and wait for the task to close the device and exit.
    pub async fn stop(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
        let handle = lock(&self.handle).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("acquisition task join failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spectrometer::DemoSpectrometer;
    use async_trait::async_trait;

    fn fast_settings() -> AcquisitionSettings {
        AcquisitionSettings {
            integration_time_ms: 1,
            poll_interval_ms: 1,
            demo_pixels: 8,
            allow_demo: true,
        }
    }

    async fn demo_loop() -> AcquisitionLoop {
        let driver = DemoSpectrometer::open(8, 1).unwrap();
        let wavelengths = Arc::new(driver.wavelengths().to_vec());
        AcquisitionLoop::start(Box::new(driver), wavelengths, &fast_settings())
    }

    async fn wait_for_frames(acq: &AcquisitionLoop, n: usize) {
        let mut rx = acq.frames();
        for _ in 0..n {
            tokio::time::timeout(Duration::from_secs(2), rx.changed())
                .await
                .expect("timed out waiting for a frame")
                .expect("frame channel closed");
        }
    }

    #[tokio::test]
    async fn test_frames_flow_and_stop() {
        let acq = demo_loop().await;
        wait_for_frames(&acq, 3).await;
        let frame = acq.latest_frame().unwrap();
        assert_eq!(frame.pixel_count(), 8);
        assert!(frame.position.is_none());
        acq.stop().await;
        assert!(!acq.is_running());
    }

    #[tokio::test]
    async fn test_background_capture_is_one_shot() {
        let acq = demo_loop().await;
        wait_for_frames(&acq, 1).await;
        assert!(acq.background().is_none());

        acq.request_background();
        wait_for_frames(&acq, 2).await;
        let first = acq.background().expect("background cached");
        assert_eq!(first.len(), 8);
        let events = acq.take_events();
        assert_eq!(
            events
                .iter()
                .filter(|e| **e == AcqEvent::BackgroundCaptured)
                .count(),
            1
        );

        // Without a new request the cached background stays fixed.
        wait_for_frames(&acq, 3).await;
        assert_eq!(acq.background().unwrap(), first);

        // A fresh request replaces it.
        acq.request_background();
        wait_for_frames(&acq, 2).await;
        assert!(acq.take_events().contains(&AcqEvent::BackgroundCaptured));
        acq.stop().await;
    }

    #[tokio::test]
    async fn test_subtraction_without_background_is_noop() {
        let acq = demo_loop().await;
        acq.set_subtract(true);
        wait_for_frames(&acq, 2).await;
        // Demo intensities are non-negative, so an accidental self-subtract
        // would show up as an all-zero frame.
        let frame = acq.latest_frame().unwrap();
        assert!(frame.intensities.iter().any(|v| *v > 0.0));
        acq.stop().await;
    }

    #[tokio::test]
    async fn test_acquisition_buffer_resets_on_start() {
        let acq = demo_loop().await;
        acq.start_acquisition();
        wait_for_frames(&acq, 4).await;
        let first = acq.stop_acquisition();
        assert!(!first.spectra.is_empty());
        assert_eq!(first.spectra.len(), first.timestamps.len());

        // Stopping keeps the buffer readable.
        assert_eq!(acq.buffer_snapshot().spectra.len(), first.spectra.len());

        // Re-arming discards it.
        acq.start_acquisition();
        wait_for_frames(&acq, 1).await;
        let second = acq.stop_acquisition();
        assert!(second.spectra.len() < first.spectra.len() + 3);
        acq.stop().await;
    }

    #[tokio::test]
    async fn test_scan_request_tags_exactly_one_frame() {
        let acq = demo_loop().await;
        wait_for_frames(&acq, 1).await;
        acq.request_scan_sample(4.25).unwrap();
        assert!(matches!(
            acq.request_scan_sample(9.9),
            Err(AcqError::InvalidParameter(_))
        ));
        while acq.scan_sample_pending() {
            wait_for_frames(&acq, 1).await;
        }
        let records = acq.take_scan_records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].position, 4.25);
        assert!(acq
            .take_events()
            .contains(&AcqEvent::ScanSampleCaptured { position: 4.25 }));

        // A consumed request does not keep tagging later frames.
        wait_for_frames(&acq, 3).await;
        assert!(acq.take_scan_records().is_empty());
        acq.stop().await;
    }

    #[tokio::test]
    async fn test_pause_suspends_frames() {
        let acq = demo_loop().await;
        wait_for_frames(&acq, 1).await;
        acq.pause();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let stamp = acq.latest_frame().unwrap().timestamp;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(acq.latest_frame().unwrap().timestamp, stamp);
        acq.resume();
        wait_for_frames(&acq, 1).await;
        acq.stop().await;
    }

    struct RampSpectrometer {
        wavelengths: Vec<f64>,
    }

    #[async_trait]
    impl SpectrometerDriver for RampSpectrometer {
        fn name(&self) -> &str {
            "ramp"
        }
        fn wavelengths(&self) -> &[f64] {
            &self.wavelengths
        }
        async fn set_integration_time(&mut self, _ms: u32) -> AppResult<()> {
            Ok(())
        }
        async fn read_spectrum(&mut self) -> AppResult<Vec<f64>> {
            Ok((0..self.wavelengths.len()).map(|i| i as f64 + 1.0).collect())
        }
        async fn close(&mut self) -> AppResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_subtraction_is_exact_elementwise() {
        // A constant source means background == every raw sample, so the
        // subtracted feed must be exactly zero.
        let driver = RampSpectrometer {
            wavelengths: vec![0.0, 1.0, 2.0, 3.0],
        };
        let wavelengths = Arc::new(driver.wavelengths.clone());
        let acq = AcquisitionLoop::start(Box::new(driver), wavelengths, &fast_settings());

        acq.request_background();
        wait_for_frames(&acq, 2).await;
        assert_eq!(acq.background().unwrap(), vec![1.0, 2.0, 3.0, 4.0]);

        acq.set_subtract(true);
        wait_for_frames(&acq, 2).await;
        assert_eq!(acq.latest_frame().unwrap().intensities, vec![0.0; 4]);

        // The cached background stays raw, so disabling restores the feed.
        acq.set_subtract(false);
        wait_for_frames(&acq, 2).await;
        assert_eq!(
            acq.latest_frame().unwrap().intensities,
            vec![1.0, 2.0, 3.0, 4.0]
        );
        acq.stop().await;
    }

    struct FailingSpectrometer {
        wavelengths: Vec<f64>,
        reads_before_failure: u32,
        failure: Option<AcqError>,
    }

    #[async_trait]
    impl SpectrometerDriver for FailingSpectrometer {
        fn name(&self) -> &str {
            "failing"
        }
        fn wavelengths(&self) -> &[f64] {
            &self.wavelengths
        }
        async fn set_integration_time(&mut self, _ms: u32) -> AppResult<()> {
            Ok(())
        }
        async fn read_spectrum(&mut self) -> AppResult<Vec<f64>> {
            if self.reads_before_failure == 0 {
                return Err(self
                    .failure
                    .take()
                    .unwrap_or_else(|| AcqError::Device("device gone".into())));
            }
            self.reads_before_failure -= 1;
            Ok(vec![0.0; self.wavelengths.len()])
        }
        async fn close(&mut self) -> AppResult<()> {
            Ok(())
        }
    }

    async fn run_until_stopped(failure: AcqError) -> AcquisitionLoop {
        let driver = FailingSpectrometer {
            wavelengths: vec![0.0, 1.0],
            reads_before_failure: 2,
            failure: Some(failure),
        };
        let wavelengths = Arc::new(driver.wavelengths.clone());
        let acq = AcquisitionLoop::start(Box::new(driver), wavelengths, &fast_settings());

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while acq.is_running() {
            assert!(tokio::time::Instant::now() < deadline, "loop did not stop");
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        acq
    }

    #[tokio::test]
    async fn test_device_failure_terminates_loop() {
        let acq = run_until_stopped(AcqError::Device("detector unplugged".into())).await;
        let fault = acq.fault().expect("fault recorded");
        assert!(fault.contains("detector unplugged"));
        assert!(acq
            .take_events()
            .iter()
            .any(|e| matches!(e, AcqEvent::LoopFault(_))));
        assert!(acq.set_integration_time(10).is_err());
        acq.stop().await;
    }

    #[tokio::test]
    async fn test_transient_read_error_also_terminates_loop() {
        // Read failures are never retried, whatever their category; the
        // loop stops and records the fault just like a device fault.
        let acq = run_until_stopped(AcqError::Communication("usb glitch".into())).await;
        assert!(!acq.is_running());
        let fault = acq.fault().expect("fault recorded");
        assert!(fault.contains("usb glitch"));
        assert!(acq
            .take_events()
            .iter()
            .any(|e| matches!(e, AcqEvent::LoopFault(_))));
        acq.stop().await;
    }
}
