//! Motion controller support.
//!
//! The stage stack has three layers:
//!
//! - [`SerialTransport`]: the raw line-oriented channel (`send` writes one
//!   `\r`-terminated command, `query` writes and reads one response line).
//! - [`Esp300`]: the Newport ESP300 protocol client built on top of it.
//! - [`SharedEsp300`]: the explicitly-constructed shared handle whose
//!   internal mutex serializes every send/query pair, for when a position
//!   poller and the scan task share one serial channel.

pub mod esp300;
pub mod mock;
pub mod serial_link;

use crate::error::AppResult;
use async_trait::async_trait;

pub use esp300::{ControllerFault, Esp300, SharedEsp300};
pub use mock::MockTransport;
pub use serial_link::SerialLink;

/// Synchronous request/response channel to the motion controller.
///
/// Implementations are not required to tolerate concurrent use; callers that
/// share a channel across tasks must go through [`SharedEsp300`].
#[async_trait]
pub trait SerialTransport: Send + Sync {
    /// Write `"{command}\r"` without waiting for a response.
    async fn send(&mut self, command: &str) -> AppResult<()>;

    /// Write `"{command}\r"`, then read one newline-terminated response line,
    /// stripped of line terminators.
    ///
    /// Timeouts and framing problems surface as `Communication`.
    async fn query(&mut self, command: &str) -> AppResult<String>;

    /// Close the underlying channel.
    async fn close(&mut self) -> AppResult<()>;
}
