//! Newport ESP300 motion controller protocol client.
//!
//! Command forms are `{axis}{CMD}[{arg}]`; axis is a configuration value
//! (1..=3), never protocol state held by the controller session. Query
//! responses are returned as the controller's raw decimal strings; callers
//! parse on demand and map failures to `Communication`.

use crate::error::{AcqError, AppResult};
use crate::stage::SerialTransport;
use log::info;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

const NUM_AXES: u8 = 3;

/// One entry from the controller's error buffer (`TB?`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControllerFault {
    /// Controller error code ("0" means no error).
    pub code: String,
    /// Controller-internal timestamp of the error.
    pub timestamp: String,
    /// Human-readable message.
    pub message: String,
}

impl ControllerFault {
    /// Whether the controller reported no pending error.
    pub fn is_clear(&self) -> bool {
        self.code == "0"
    }
}

/// Exclusive ESP300 client. `&mut self` everywhere; the compiler enforces
/// single-task use. For cross-task sharing, convert with
/// [`Esp300::into_shared`].
pub struct Esp300 {
    link: Box<dyn SerialTransport>,
}

impl Esp300 {
    /// Wrap an open serial transport.
    pub fn new(link: Box<dyn SerialTransport>) -> Self {
        Self { link }
    }

    fn validate_axis(axis: u8) -> AppResult<()> {
        if axis == 0 || axis > NUM_AXES {
            return Err(AcqError::InvalidParameter(format!(
                "axis must be 1..={}, got {}",
                NUM_AXES, axis
            )));
        }
        Ok(())
    }

    /// Move the axis to an absolute position (`PA`). Fire-and-forget; poll
    /// [`Esp300::is_moving`] for completion.
    pub async fn move_absolute(&mut self, axis: u8, position: f64) -> AppResult<()> {
        Self::validate_axis(axis)?;
        if !position.is_finite() {
            return Err(AcqError::InvalidParameter(format!(
                "position must be finite, got {}",
                position
            )));
        }
        self.link.send(&format!("{}PA{}", axis, position)).await
    }

    /// Current position (`TP`) as the controller's raw decimal string.
    pub async fn get_position(&mut self, axis: u8) -> AppResult<String> {
        Self::validate_axis(axis)?;
        self.link.query(&format!("{}TP", axis)).await
    }

    /// Current velocity (`TV`) as the controller's raw decimal string.
    pub async fn get_velocity(&mut self, axis: u8) -> AppResult<String> {
        Self::validate_axis(axis)?;
        self.link.query(&format!("{}TV", axis)).await
    }

    /// Current acceleration (`AC?`) as the controller's raw decimal string.
    pub async fn get_acceleration(&mut self, axis: u8) -> AppResult<String> {
        Self::validate_axis(axis)?;
        self.link.query(&format!("{}AC?", axis)).await
    }

    /// Motion status (`MD?`), inverted so `true` means "still moving".
    ///
    /// The controller reports motion-done (non-zero when stopped); callers
    /// here read the direct question instead.
    pub async fn is_moving(&mut self, axis: u8) -> AppResult<bool> {
        Self::validate_axis(axis)?;
        let response = self.link.query(&format!("{}MD?", axis)).await?;
        let done: i32 = response.trim().parse().map_err(|_| {
            AcqError::Communication(format!("unparseable motion status: '{}'", response))
        })?;
        Ok(done == 0)
    }

    /// Start a home search (`OR`, or `OR{mode}` for a specific search mode).
    pub async fn search_for_home(&mut self, axis: u8, mode: Option<u8>) -> AppResult<()> {
        Self::validate_axis(axis)?;
        match mode {
            None => self.link.send(&format!("{}OR", axis)).await,
            Some(m) => self.link.send(&format!("{}OR{}", axis, m)).await,
        }
    }

    /// Set the default homing mode (`OM`).
    pub async fn set_homing_mode(&mut self, axis: u8, mode: u8) -> AppResult<()> {
        Self::validate_axis(axis)?;
        self.link.send(&format!("{}OM{}", axis, mode)).await
    }

    /// Read the default homing mode (`OM?`), raw.
    pub async fn get_homing_mode(&mut self, axis: u8) -> AppResult<String> {
        Self::validate_axis(axis)?;
        self.link.query(&format!("{}OM?", axis)).await
    }

    /// Energize the axis motor (`MO`).
    pub async fn turn_motor_on(&mut self, axis: u8) -> AppResult<()> {
        Self::validate_axis(axis)?;
        self.link.send(&format!("{}MO", axis)).await
    }

    /// De-energize the axis motor (`MF`).
    pub async fn turn_motor_off(&mut self, axis: u8) -> AppResult<()> {
        Self::validate_axis(axis)?;
        self.link.send(&format!("{}MF", axis)).await
    }

    /// Stop motion on one axis (`ST`).
    pub async fn stop_motion(&mut self, axis: u8) -> AppResult<()> {
        Self::validate_axis(axis)?;
        self.link.send(&format!("{}ST", axis)).await
    }

    /// Stop motion on all axes immediately (`AB`).
    pub async fn abort_motion(&mut self) -> AppResult<()> {
        self.link.send("AB").await
    }

    /// Set axis velocity (`VA`), units/second.
    pub async fn set_velocity(&mut self, axis: u8, velocity: f64) -> AppResult<()> {
        Self::validate_axis(axis)?;
        if !velocity.is_finite() || velocity <= 0.0 {
            return Err(AcqError::InvalidParameter(format!(
                "velocity must be positive, got {}",
                velocity
            )));
        }
        self.link.send(&format!("{}VA{}", axis, velocity)).await
    }

    /// Set axis acceleration (`AC`), units/second².
    pub async fn set_acceleration(&mut self, axis: u8, acceleration: f64) -> AppResult<()> {
        Self::validate_axis(axis)?;
        if !acceleration.is_finite() || acceleration <= 0.0 {
            return Err(AcqError::InvalidParameter(format!(
                "acceleration must be positive, got {}",
                acceleration
            )));
        }
        self.link.send(&format!("{}AC{}", axis, acceleration)).await
    }

    /// Read the first entry of the controller error buffer (`TB?`).
    pub async fn read_errors(&mut self) -> AppResult<ControllerFault> {
        let response = self.link.query("TB?").await?;
        let mut parts = response.splitn(3, ',');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(code), Some(timestamp), Some(message)) => Ok(ControllerFault {
                code: code.trim().to_string(),
                timestamp: timestamp.trim().to_string(),
                message: message.trim().to_string(),
            }),
            _ => Err(AcqError::Communication(format!(
                "malformed TB? response: '{}'",
                response
            ))),
        }
    }

    /// Reset the controller (`RS`).
    pub async fn reset(&mut self) -> AppResult<()> {
        self.link.send("RS").await
    }

    /// Close the serial channel.
    pub async fn close(&mut self) -> AppResult<()> {
        self.link.close().await?;
        info!("ESP300 connection closed");
        Ok(())
    }

    /// Convert into a shared handle whose internal mutex serializes every
    /// send/query pair across tasks.
    pub fn into_shared(self) -> SharedEsp300 {
        SharedEsp300 {
            inner: Arc::new(Mutex::new(self)),
        }
    }
}

/// Cloneable ESP300 handle for cross-task use.
///
/// Every operation goes through [`SharedEsp300::lock`], so a position-polling
/// task and a foreground move command can never interleave bytes on the
/// serial channel.
#[derive(Clone)]
pub struct SharedEsp300 {
    inner: Arc<Mutex<Esp300>>,
}

impl SharedEsp300 {
    /// Acquire exclusive access to the controller for one or more commands.
    pub async fn lock(&self) -> MutexGuard<'_, Esp300> {
        self.inner.lock().await
    }
}

/// Parse a controller-native decimal string (position, velocity) into `f64`.
///
/// Kept separate from the driver so the wire layer stays string-typed.
pub fn parse_controller_decimal(raw: &str) -> AppResult<f64> {
    raw.trim().parse::<f64>().map_err(|_| {
        AcqError::Communication(format!("unparseable controller value: '{}'", raw))
    })
}
