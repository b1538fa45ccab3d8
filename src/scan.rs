//! Scan orchestration: step the delay stage through a position sequence and
//! pair every position with one freshly acquired spectrum.
//!
//! The controller never reads the spectrometer itself. It parks a one-shot
//! request with the acquisition loop and waits for the loop to consume it,
//! so every recorded spectrum was integrated after the stage settled.

use crate::acquisition::AcquisitionLoop;
use crate::config::ScanSettings;
use crate::data::SpectraDataset;
use crate::error::{AcqError, AppResult};
use crate::stage::SharedEsp300;
use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Where a scan currently is, for progress displays.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScanState {
    /// No scan in progress.
    Idle,
    /// Position sequence computed, nothing moved yet.
    Armed,
    /// Moving to the position with this sequence index.
    Stepping(usize),
    /// Motion done, waiting out the settle time.
    Settling,
    /// Waiting for the acquisition loop to deliver the tagged spectrum.
    SpectrumPending,
    /// All positions paired with a spectrum.
    Done,
    /// The scan gave up; see the returned error for the reason.
    Aborted,
}

/// Progress snapshot published after every state change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScanProgress {
    /// Current state of the scan.
    pub state: ScanState,
    /// Positions fully paired with a spectrum so far.
    pub completed: usize,
    /// Total positions in the sequence.
    pub total: usize,
}

impl ScanProgress {
    fn idle() -> Self {
        Self {
            state: ScanState::Idle,
            completed: 0,
            total: 0,
        }
    }
}

/// Drives one scan at a time over a shared stage handle.
pub struct ScanController {
    stage: SharedEsp300,
    axis: u8,
    settings: ScanSettings,
    progress_tx: watch::Sender<ScanProgress>,
    progress_rx: watch::Receiver<ScanProgress>,
}

impl ScanController {
    /// Build a controller for one stage axis. Nothing moves until
    /// [`ScanController::run`].
    pub fn new(stage: SharedEsp300, axis: u8, settings: ScanSettings) -> Self {
        let (progress_tx, progress_rx) = watch::channel(ScanProgress::idle());
        Self {
            stage,
            axis,
            settings,
            progress_tx,
            progress_rx,
        }
    }

    /// Subscribe to progress updates.
    pub fn progress(&self) -> watch::Receiver<ScanProgress> {
        self.progress_rx.clone()
    }

    /// Expand start/stop/step into the explicit position sequence.
    ///
    /// The sign of `step` is ignored; the direction comes from the
    /// start/stop ordering. `stop` itself is excluded, matching a
    /// half-open range.
    pub fn position_sequence(start: f64, stop: f64, step: f64) -> AppResult<Vec<f64>> {
        if step == 0.0 || !step.is_finite() {
            return Err(AcqError::InvalidParameter(format!(
                "scan step must be finite and non-zero, got {}",
                step
            )));
        }
        if !start.is_finite() || !stop.is_finite() {
            return Err(AcqError::InvalidParameter(
                "scan endpoints must be finite".into(),
            ));
        }
        let effective = if stop >= start {
            step.abs()
        } else {
            -step.abs()
        };
        let count = ((stop - start) / effective).ceil() as usize;
        if count == 0 {
            return Err(AcqError::InvalidParameter(format!(
                "scan range {}..{} with step {} contains no positions",
                start, stop, step
            )));
        }
        Ok((0..count).map(|i| start + i as f64 * effective).collect())
    }

    fn publish(&self, state: ScanState, completed: usize, total: usize) {
        let _ = self.progress_tx.send(ScanProgress {
            state,
            completed,
            total,
        });
    }

    async fn abort(&self, completed: usize, total: usize, reason: String) -> AcqError {
        self.publish(ScanState::Aborted, completed, total);
        AcqError::ScanAborted(reason)
    }

    /// Wait until the stage reports motion done. Transient communication
    /// errors are logged and retried on the next poll.
    async fn wait_for_motion_done(&self) -> AppResult<()> {
        let poll = Duration::from_millis(self.settings.status_poll_ms);
        loop {
            let status = self.stage.lock().await.is_moving(self.axis).await;
            match status {
                Ok(false) => return Ok(()),
                Ok(true) => {}
                Err(AcqError::Communication(msg)) => {
                    warn!("motion status poll failed, retrying: {}", msg);
                }
                Err(e) => return Err(e),
            }
            tokio::time::sleep(poll).await;
        }
    }

    /// Wait for the acquisition loop to consume the pending scan request.
    /// Gives up after the configured timeout or if the loop dies.
    async fn wait_for_sample(&self, acq: &AcquisitionLoop) -> Result<(), String> {
        let poll = Duration::from_millis(self.settings.pending_poll_ms);
        let deadline =
            tokio::time::Instant::now() + Duration::from_millis(self.settings.pending_timeout_ms);
        while acq.scan_sample_pending() {
            if !acq.is_running() {
                return Err(match acq.fault() {
                    Some(fault) => format!("acquisition loop failed: {}", fault),
                    None => "acquisition loop stopped".to_string(),
                });
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(format!(
                    "no spectrum arrived within {} ms",
                    self.settings.pending_timeout_ms
                ));
            }
            tokio::time::sleep(poll).await;
        }
        Ok(())
    }

    /// Run a full scan and return the assembled dataset.
    pub async fn run(
        &self,
        acq: &AcquisitionLoop,
        wavelengths: Arc<Vec<f64>>,
    ) -> AppResult<SpectraDataset> {
        let positions = Self::position_sequence(
            self.settings.start,
            self.settings.stop,
            self.settings.step,
        )?;
        let total = positions.len();
        info!(
            "scan armed: {} positions from {} toward {} (step {})",
            total, self.settings.start, self.settings.stop, self.settings.step
        );
        acq.clear_scan_records();
        self.publish(ScanState::Armed, 0, total);

        let settle = Duration::from_millis(self.settings.settle_ms);
        for (index, position) in positions.iter().enumerate() {
            self.publish(ScanState::Stepping(index), index, total);
            let moved = self.stage.lock().await.move_absolute(self.axis, *position).await;
            if let Err(e) = moved {
                return Err(self
                    .abort(index, total, format!("move to {} failed: {}", position, e))
                    .await);
            }
            if let Err(e) = self.wait_for_motion_done().await {
                return Err(self
                    .abort(index, total, format!("motion status lost: {}", e))
                    .await);
            }

            self.publish(ScanState::Settling, index, total);
            tokio::time::sleep(settle).await;

            self.publish(ScanState::SpectrumPending, index, total);
            if let Err(e) = acq.request_scan_sample(*position) {
                return Err(self.abort(index, total, e.to_string()).await);
            }
            if let Err(reason) = self.wait_for_sample(acq).await {
                acq.cancel_scan_sample();
                return Err(self.abort(index, total, reason).await);
            }
        }

        let records = acq.take_scan_records();
        if records.len() != total {
            return Err(self
                .abort(
                    records.len(),
                    total,
                    format!("expected {} spectra, collected {}", total, records.len()),
                )
                .await);
        }
        let dataset = SpectraDataset::from_scan(wavelengths.as_slice(), &records);
        self.publish(ScanState::Done, total, total);
        self.publish(ScanState::Idle, 0, 0);
        info!("scan complete: {} position/spectrum pairs", total);
        Ok(dataset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_ascending() {
        let seq = ScanController::position_sequence(10.0, 11.0, 0.1).unwrap();
        assert_eq!(seq.len(), 10);
        assert_eq!(seq[0], 10.0);
        assert!((seq[9] - 10.9).abs() < 1e-9);
        assert!(seq.windows(2).all(|w| w[1] > w[0]));
    }

    #[test]
    fn test_sequence_descending_negates_step() {
        // Same positive step, reversed endpoints.
        let seq = ScanController::position_sequence(11.0, 10.0, 0.1).unwrap();
        assert_eq!(seq.len(), 10);
        assert_eq!(seq[0], 11.0);
        assert!((seq[9] - 10.1).abs() < 1e-9);
        assert!(seq.windows(2).all(|w| w[1] < w[0]));
    }

    #[test]
    fn test_sequence_excludes_stop() {
        let seq = ScanController::position_sequence(0.0, 1.0, 0.5).unwrap();
        assert_eq!(seq, vec![0.0, 0.5]);
    }

    #[test]
    fn test_sequence_rejects_degenerate_input() {
        assert!(matches!(
            ScanController::position_sequence(0.0, 1.0, 0.0),
            Err(AcqError::InvalidParameter(_))
        ));
        assert!(matches!(
            ScanController::position_sequence(0.0, 1.0, f64::NAN),
            Err(AcqError::InvalidParameter(_))
        ));
        assert!(matches!(
            ScanController::position_sequence(5.0, 5.0, 0.1),
            Err(AcqError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_sequence_partial_last_step() {
        let seq = ScanController::position_sequence(0.0, 1.0, 0.3).unwrap();
        assert_eq!(seq.len(), 4);
        assert!(seq.iter().all(|p| *p < 1.0));
    }

}
