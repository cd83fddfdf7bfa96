//! # Device Transport Module
//!
//! Handles serial communication with the drone's microcontroller.
//!
//! This module handles:
//! - Opening the serial port at the configured baud rate
//! - Sending newline-delimited command lines
//! - Non-blocking, one-line-per-poll receive with internal buffering
//! - Lazy reconnect: an I/O failure invalidates the handle and the next
//!   send attempts a fresh connect

use std::time::Duration;

use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, warn};

use crate::config::SerialConfig;
use crate::error::{BridgeError, Result};

pub mod port_trait;

pub use port_trait::LinePort;

/// Receive poll buffer size; device lines are short ASCII
const READ_CHUNK_SIZE: usize = 256;

/// Factory producing a fresh port handle on (re)connect
pub type PortFactory = Box<dyn Fn(&SerialConfig) -> Result<Box<dyn LinePort>> + Send>;

/// Serial line transport to the device
///
/// Owns the serial connection. On any I/O failure during send or receive
/// the handle is dropped; the next `send_line` attempts a fresh connect
/// and reports failure immediately rather than retrying in a tight loop.
pub struct DeviceTransport {
    settings: SerialConfig,
    factory: PortFactory,
    port: Option<Box<dyn LinePort>>,
    rx_buf: Vec<u8>,
}

impl std::fmt::Debug for DeviceTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceTransport")
            .field("port", &self.settings.port)
            .field("connected", &self.port.is_some())
            .finish_non_exhaustive()
    }
}

impl DeviceTransport {
    /// Create a transport that opens the configured serial device
    pub fn new(settings: SerialConfig) -> Self {
        Self::with_factory(settings, Box::new(|s| {
            Ok(Box::new(SerialLinePort::open(s)?) as Box<dyn LinePort>)
        }))
    }

    /// Create a transport with a custom port factory (test seam)
    pub fn with_factory(settings: SerialConfig, factory: PortFactory) -> Self {
        Self {
            settings,
            factory,
            port: None,
            rx_buf: Vec::new(),
        }
    }

    /// Open a fresh connection to the device
    ///
    /// # Errors
    ///
    /// Returns error immediately if the device cannot be opened; the
    /// caller decides when to try again (normally the next send).
    pub fn connect(&mut self) -> Result<()> {
        let port = (self.factory)(&self.settings)?;
        info!("connected to device at {}", self.settings.port);
        self.port = Some(port);
        self.rx_buf.clear();
        Ok(())
    }

    /// Whether a device handle is currently held
    pub fn is_connected(&self) -> bool {
        self.port.is_some()
    }

    /// Release the device handle
    pub fn disconnect(&mut self) {
        if self.port.take().is_some() {
            info!("released device handle at {}", self.settings.port);
        }
    }

    /// Send one command line to the device
    ///
    /// Appends the newline delimiter, then waits the configured settle
    /// delay so the device can process the command before the next one.
    /// Reconnects first if no handle is held.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Connect`] if the device cannot be opened,
    /// or [`BridgeError::Serial`] if the write fails (the handle is
    /// invalidated; the next send reconnects).
    pub async fn send_line(&mut self, line: &str) -> Result<()> {
        if self.port.is_none() {
            warn!("serial connection not open, attempting to reconnect");
            self.connect()?;
        }

        let port = self
            .port
            .as_mut()
            .ok_or_else(|| BridgeError::Connect("no device handle".to_string()))?;

        let mut data = Vec::with_capacity(line.len() + 1);
        data.extend_from_slice(line.as_bytes());
        data.push(b'\n');

        if let Err(e) = port.write_all(&data).await {
            self.port = None;
            return Err(BridgeError::Serial(format!(
                "failed to send {:?}: {}",
                line, e
            )));
        }

        debug!("sent to device: {}", line);

        if self.settings.write_settle_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.settings.write_settle_ms)).await;
        }

        Ok(())
    }

    /// Poll for one complete line of device output
    ///
    /// Non-blocking beyond a short read deadline; returns at most one
    /// line per call, with the newline (and any carriage return)
    /// stripped. Returns `None` when no complete line is available or no
    /// handle is held. A read failure drops the handle.
    pub async fn try_receive_line(&mut self) -> Option<String> {
        if let Some(line) = self.take_buffered_line() {
            return Some(line);
        }

        let port = self.port.as_mut()?;
        let mut chunk = [0u8; READ_CHUNK_SIZE];

        match port.read_available(&mut chunk).await {
            Ok(0) => None,
            Ok(n) => {
                self.rx_buf.extend_from_slice(&chunk[..n]);
                self.take_buffered_line()
            }
            Err(e) => {
                warn!("error reading from device, dropping handle: {}", e);
                self.port = None;
                None
            }
        }
    }

    /// Extract the first complete line from the receive buffer
    fn take_buffered_line(&mut self) -> Option<String> {
        let pos = self.rx_buf.iter().position(|&b| b == b'\n')?;
        let taken: Vec<u8> = self.rx_buf.drain(..=pos).collect();
        let text = String::from_utf8_lossy(&taken[..pos]);
        Some(text.trim_end_matches('\r').to_string())
    }
}

/// Production [`LinePort`] backed by `tokio-serial`
pub struct SerialLinePort {
    stream: tokio_serial::SerialStream,
    read_poll: Duration,
}

impl SerialLinePort {
    /// Open the configured serial device with 8N1 framing
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Connect`] if the port cannot be opened.
    pub fn open(settings: &SerialConfig) -> Result<Self> {
        let stream = tokio_serial::new(&settings.port, settings.baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| {
                BridgeError::Connect(format!("failed to open {}: {}", settings.port, e))
            })?;

        Ok(Self {
            stream,
            read_poll: Duration::from_millis(settings.read_poll_ms),
        })
    }
}

#[async_trait::async_trait]
impl LinePort for SerialLinePort {
    async fn write_all(&mut self, data: &[u8]) -> std::io::Result<()> {
        use tokio::io::AsyncWriteExt;
        self.stream.write_all(data).await?;
        self.stream.flush().await
    }

    async fn read_available(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        use tokio::io::AsyncReadExt;

        match tokio::time::timeout(self.read_poll, self.stream.read(buf)).await {
            // Deadline passed with nothing to read - normal for a poll
            Err(_elapsed) => Ok(0),
            Ok(Ok(0)) => Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "device closed the connection",
            )),
            Ok(Ok(n)) => Ok(n),
            Ok(Err(e)) => Err(e),
        }
    }
}
