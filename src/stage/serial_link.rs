//! RS-232 link to the motion controller.
//!
//! Wraps the `serialport` crate and runs the blocking reads/writes on
//! Tokio's blocking executor. Fixed framing: commands end with `\r`,
//! responses end with `\n`; 8 data bits, no parity, one stop bit.

use crate::error::{AcqError, AppResult};
use crate::stage::SerialTransport;
use async_trait::async_trait;
use std::time::Duration;

#[cfg(feature = "instrument_serial")]
use log::debug;

#[cfg(feature = "instrument_serial")]
use std::sync::{Arc, Mutex};

#[cfg(feature = "instrument_serial")]
use serialport::SerialPort;

/// Open serial connection to the controller.
pub struct SerialLink {
    port_name: String,
    timeout: Duration,
    #[cfg(feature = "instrument_serial")]
    port: Option<Arc<Mutex<Box<dyn SerialPort>>>>,
}

impl SerialLink {
    /// Open `port_name` at the given baud rate (8-N-1).
    ///
    /// A failure here is fatal to the connect attempt, unlike later
    /// per-command `Communication` errors which pollers retry.
    #[cfg(feature = "instrument_serial")]
    pub fn open(port_name: &str, baud_rate: u32, timeout: Duration) -> AppResult<Self> {
        let port = serialport::new(port_name, baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            // Short internal timeout; the overall deadline is enforced below.
            .timeout(Duration::from_millis(100))
            .open()
            .map_err(|e| {
                AcqError::Communication(format!(
                    "failed to open serial port '{}' at {} baud: {}",
                    port_name, baud_rate, e
                ))
            })?;

        debug!("Serial port '{}' opened at {} baud", port_name, baud_rate);
        Ok(Self {
            port_name: port_name.to_string(),
            timeout,
            port: Some(Arc::new(Mutex::new(port))),
        })
    }

    /// Stub when serial support is compiled out.
    #[cfg(not(feature = "instrument_serial"))]
    pub fn open(_port_name: &str, _baud_rate: u32, _timeout: Duration) -> AppResult<Self> {
        Err(AcqError::FeatureNotEnabled("instrument_serial".to_string()))
    }

    /// List serial ports available on this machine.
    #[cfg(feature = "instrument_serial")]
    pub fn available_ports() -> AppResult<Vec<String>> {
        let ports = serialport::available_ports()
            .map_err(|e| AcqError::Communication(format!("port enumeration failed: {}", e)))?;
        Ok(ports.into_iter().map(|p| p.port_name).collect())
    }

    /// Stub when serial support is compiled out.
    #[cfg(not(feature = "instrument_serial"))]
    pub fn available_ports() -> AppResult<Vec<String>> {
        Err(AcqError::FeatureNotEnabled("instrument_serial".to_string()))
    }
}

#[cfg(feature = "instrument_serial")]
#[async_trait]
impl SerialTransport for SerialLink {
    async fn send(&mut self, command: &str) -> AppResult<()> {
        let port = self
            .port
            .as_ref()
            .ok_or(AcqError::SerialPortNotConnected)?
            .clone();
        let framed = format!("{}\r", command);
        let for_log = command.to_string();

        tokio::task::spawn_blocking(move || -> AppResult<()> {
            use std::io::Write;

            let mut guard = port
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            guard
                .write_all(framed.as_bytes())
                .map_err(|e| AcqError::Communication(format!("serial write failed: {}", e)))?;
            guard
                .flush()
                .map_err(|e| AcqError::Communication(format!("serial flush failed: {}", e)))?;
            debug!("Sent serial command: {}", for_log);
            Ok(())
        })
        .await
        .map_err(|e| AcqError::Communication(format!("serial I/O task panicked: {}", e)))?
    }

    async fn query(&mut self, command: &str) -> AppResult<String> {
        let port = self
            .port
            .as_ref()
            .ok_or(AcqError::SerialPortNotConnected)?
            .clone();
        let framed = format!("{}\r", command);
        let for_log = command.to_string();
        let timeout = self.timeout;

        tokio::task::spawn_blocking(move || -> AppResult<String> {
            use std::io::{Read, Write};

            let mut guard = port
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            guard
                .write_all(framed.as_bytes())
                .map_err(|e| AcqError::Communication(format!("serial write failed: {}", e)))?;
            guard
                .flush()
                .map_err(|e| AcqError::Communication(format!("serial flush failed: {}", e)))?;
            debug!("Sent serial command: {}", for_log);

            // Byte-at-a-time readline with an overall deadline.
            let mut response = String::new();
            let mut buffer = [0u8; 1];
            let start = std::time::Instant::now();

            loop {
                if start.elapsed() > timeout {
                    return Err(AcqError::Communication(format!(
                        "serial read timeout after {:?}",
                        timeout
                    )));
                }

                match guard.read(&mut buffer) {
                    Ok(1) => {
                        let ch = buffer[0] as char;
                        if ch == '\n' {
                            break;
                        }
                        response.push(ch);
                    }
                    Ok(_) => {
                        return Err(AcqError::Communication(
                            "unexpected EOF from serial port".to_string(),
                        ));
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                        // Port timeout is shorter than the overall deadline.
                        continue;
                    }
                    Err(e) => {
                        return Err(AcqError::Communication(format!(
                            "serial read error: {}",
                            e
                        )));
                    }
                }
            }

            let response = response.trim().to_string();
            debug!("Received serial response: {}", response);
            Ok(response)
        })
        .await
        .map_err(|e| AcqError::Communication(format!("serial I/O task panicked: {}", e)))?
    }

    async fn close(&mut self) -> AppResult<()> {
        if self.port.take().is_some() {
            debug!("Serial port '{}' closed", self.port_name);
        }
        Ok(())
    }
}

#[cfg(not(feature = "instrument_serial"))]
#[async_trait]
impl SerialTransport for SerialLink {
    async fn send(&mut self, _command: &str) -> AppResult<()> {
        Err(AcqError::FeatureNotEnabled("instrument_serial".to_string()))
    }

    async fn query(&mut self, _command: &str) -> AppResult<String> {
        Err(AcqError::FeatureNotEnabled("instrument_serial".to_string()))
    }

    async fn close(&mut self) -> AppResult<()> {
        let _ = &self.port_name;
        let _ = self.timeout;
        Ok(())
    }
}
