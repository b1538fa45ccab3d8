//! Custom error types for the application.
//!
//! `AcqError` is the single error enum for the acquisition core. The variants
//! map to how the rest of the system reacts to a failure:
//!
//! - **`Device`**: fatal to the device session. A device-level fault
//!   (disconnect, driver error, invalid measurement) terminates the
//!   acquisition loop and is surfaced to the user; it is never retried.
//! - **`Communication`**: transient serial/controller failure. Stage pollers
//!   log and retry on the next cycle; the initial connect and the
//!   acquisition loop treat it as fatal.
//! - **`InvalidParameter`**: user-input validation (non-positive integration
//!   time, unparseable position, bad scan range). Rejected without touching
//!   loop or scan state.
//! - **`Save`**: persistence failure. Reported to the user; acquired data
//!   stays in memory so the save can be retried.
//! - **`ScanAborted`**: the scan state machine gave up (stalled spectrum
//!   request, dead acquisition loop).

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, AcqError>;

/// Application error taxonomy.
#[derive(Error, Debug)]
pub enum AcqError {
    /// Device-level fault; terminates the acquisition session.
    #[error("Device error: {0}")]
    Device(String),

    /// Serial/controller failure; transient for stage pollers.
    #[error("Communication error: {0}")]
    Communication(String),

    /// Rejected user input; no state change.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Persistence failure; in-memory data is kept for retry.
    #[error("Save error: {0}")]
    Save(String),

    /// The scan state machine gave up mid-sequence.
    #[error("Scan aborted: {0}")]
    ScanAborted(String),

    /// Wrapped filesystem or stream error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Wrapped configuration load/parse error.
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// A stage operation ran without an open serial channel.
    #[error("Serial port not connected")]
    SerialPortNotConnected,

    /// The requested functionality was compiled out.
    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AcqError::Device("spectrometer unplugged".to_string());
        assert_eq!(err.to_string(), "Device error: spectrometer unplugged");
    }
}
