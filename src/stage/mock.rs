//! In-memory serial transport that speaks enough ESP300 dialect for tests.
//!
//! A move completes after a fixed number of motion-status polls, which lets
//! tests drive the poll/settle machinery deterministically without timers.

use crate::error::{AcqError, AppResult};
use crate::stage::SerialTransport;
use async_trait::async_trait;

/// Scripted ESP300 endpoint.
pub struct MockTransport {
    position: f64,
    target: f64,
    moving_polls_remaining: u32,
    move_duration_polls: u32,
    fail_next_queries: u32,
    commands: Vec<String>,
    closed: bool,
}

impl MockTransport {
    /// Start at `position`; each `PA` move reports "moving" for
    /// `move_duration_polls` status polls before landing on the target.
    pub fn new(position: f64, move_duration_polls: u32) -> Self {
        Self {
            position,
            target: position,
            moving_polls_remaining: 0,
            move_duration_polls,
            fail_next_queries: 0,
            commands: Vec::new(),
            closed: false,
        }
    }

    /// Make the next `n` queries fail with a communication error, then
    /// recover. Sends are unaffected.
    pub fn fail_next_queries(&mut self, n: u32) {
        self.fail_next_queries = n;
    }

    /// Every command received so far, in order.
    pub fn commands(&self) -> &[String] {
        &self.commands
    }

    /// Current simulated position (the target once a move completes).
    pub fn position(&self) -> f64 {
        self.position
    }

    fn strip_axis(command: &str) -> &str {
        command.trim_start_matches(|c: char| c.is_ascii_digit())
    }
}

#[async_trait]
impl SerialTransport for MockTransport {
    async fn send(&mut self, command: &str) -> AppResult<()> {
        if self.closed {
            return Err(AcqError::SerialPortNotConnected);
        }
        self.commands.push(command.to_string());
        let body = Self::strip_axis(command);
        if let Some(pos) = body.strip_prefix("PA") {
            self.target = pos.parse().map_err(|_| {
                AcqError::Communication(format!("mock: bad PA argument in '{}'", command))
            })?;
            self.moving_polls_remaining = self.move_duration_polls;
            if self.move_duration_polls == 0 {
                self.position = self.target;
            }
        } else if body == "ST" || body == "AB" {
            self.moving_polls_remaining = 0;
            self.target = self.position;
        }
        Ok(())
    }

    async fn query(&mut self, command: &str) -> AppResult<String> {
        if self.closed {
            return Err(AcqError::SerialPortNotConnected);
        }
        self.commands.push(command.to_string());
        if self.fail_next_queries > 0 {
            self.fail_next_queries -= 1;
            return Err(AcqError::Communication("mock: injected query failure".into()));
        }
        let body = Self::strip_axis(command);
        let response = match body {
            "MD?" => {
                if self.moving_polls_remaining > 0 {
                    self.moving_polls_remaining -= 1;
                    if self.moving_polls_remaining == 0 {
                        self.position = self.target;
                    }
                    "0".to_string()
                } else {
                    "1".to_string()
                }
            }
            "TP" => format!("{:.5}", self.position),
            "TV" => "5.00000".to_string(),
            "AC?" => "10.00000".to_string(),
            "OM?" => "4".to_string(),
            "TB?" => "0, 451322, NO ERROR DETECTED".to_string(),
            other => {
                return Err(AcqError::Communication(format!(
                    "mock: unscripted query '{}'",
                    other
                )))
            }
        };
        Ok(response)
    }

    async fn close(&mut self) -> AppResult<()> {
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_move_completes_after_fixed_polls() {
        let mut mock = MockTransport::new(0.0, 2);
        mock.send("1PA7.5").await.unwrap();
        assert_eq!(mock.query("1MD?").await.unwrap(), "0");
        assert_eq!(mock.query("1MD?").await.unwrap(), "0");
        assert_eq!(mock.query("1MD?").await.unwrap(), "1");
        assert_eq!(mock.query("1TP").await.unwrap(), "7.50000");
    }

    #[tokio::test]
    async fn test_stop_freezes_position() {
        let mut mock = MockTransport::new(1.0, 5);
        mock.send("1PA9.0").await.unwrap();
        mock.send("1ST").await.unwrap();
        assert_eq!(mock.query("1MD?").await.unwrap(), "1");
        assert_eq!(mock.position(), 1.0);
    }

    #[tokio::test]
    async fn test_injected_failures_then_recovery() {
        let mut mock = MockTransport::new(0.0, 0);
        mock.fail_next_queries(2);
        assert!(mock.query("1TP").await.is_err());
        assert!(mock.query("1TP").await.is_err());
        assert!(mock.query("1TP").await.is_ok());
    }

    #[tokio::test]
    async fn test_closed_transport_rejects_traffic() {
        let mut mock = MockTransport::new(0.0, 0);
        mock.close().await.unwrap();
        assert!(matches!(
            mock.send("1PA1").await,
            Err(AcqError::SerialPortNotConnected)
        ));
    }
}
