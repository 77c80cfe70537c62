//! Serial port transport implementation

use super::{Transport, TransportError, TransportKind};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Serial port flow control type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerialFlowControl {
    /// No flow control
    #[default]
    None,
    /// Hardware flow control (RTS/CTS)
    Hardware,
    /// Software flow control (XON/XOFF)
    Software,
}

impl std::str::FromStr for SerialFlowControl {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" | "n" => Ok(Self::None),
            "hardware" | "hw" | "rtscts" => Ok(Self::Hardware),
            "software" | "sw" | "xonxoff" => Ok(Self::Software),
            other => Err(format!("unknown flow control: {}", other)),
        }
    }
}

/// Serial port parity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerialParity {
    /// No parity
    #[default]
    None,
    /// Odd parity
    Odd,
    /// Even parity
    Even,
}

impl std::str::FromStr for SerialParity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" | "n" => Ok(Self::None),
            "odd" | "o" => Ok(Self::Odd),
            "even" | "e" => Ok(Self::Even),
            other => Err(format!("unknown parity: {}", other)),
        }
    }
}

/// Serial port configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Port name (e.g., COM3, /dev/ttyUSB0)
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Data bits (5, 6, 7, 8)
    pub data_bits: u8,
    /// Stop bits (1, 2)
    pub stop_bits: u8,
    /// Parity
    pub parity: SerialParity,
    /// Flow control
    pub flow_control: SerialFlowControl,
    /// Read/write timeout in milliseconds
    pub timeout_ms: u64,
}

impl SerialConfig {
    /// Create a new serial configuration with default settings
    pub fn new(port: &str, baud_rate: u32) -> Self {
        Self {
            port: port.to_string(),
            baud_rate,
            data_bits: 8,
            stop_bits: 1,
            parity: SerialParity::None,
            flow_control: SerialFlowControl::None,
            timeout_ms: 1000,
        }
    }

    /// Set data bits
    #[must_use]
    pub fn data_bits(mut self, bits: u8) -> Self {
        self.data_bits = bits;
        self
    }

    /// Set stop bits
    #[must_use]
    pub fn stop_bits(mut self, bits: u8) -> Self {
        self.stop_bits = bits;
        self
    }

    /// Set parity
    #[must_use]
    pub fn parity(mut self, parity: SerialParity) -> Self {
        self.parity = parity;
        self
    }

    /// Set flow control
    #[must_use]
    pub fn flow_control(mut self, flow: SerialFlowControl) -> Self {
        self.flow_control = flow;
        self
    }

    /// Short line description, e.g. `8N1`
    pub fn line_settings(&self) -> String {
        format!(
            "{}{}{}",
            self.data_bits,
            match self.parity {
                SerialParity::None => "N",
                SerialParity::Odd => "O",
                SerialParity::Even => "E",
            },
            self.stop_bits
        )
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self::new("COM1", 9600)
    }
}

/// Serial port transport
///
/// Holds two handles to the same device (the second from `try_clone`), one
/// used only for reading and one only for writing.
pub struct SerialTransport {
    config: SerialConfig,
    reader: Mutex<Option<Box<dyn SerialPort>>>,
    writer: Mutex<Option<Box<dyn SerialPort>>>,
    open: AtomicBool,
}

impl SerialTransport {
    /// Open the configured port with its line parameters
    pub fn open(config: SerialConfig) -> Result<Self, TransportError> {
        let data_bits = match config.data_bits {
            5 => DataBits::Five,
            6 => DataBits::Six,
            7 => DataBits::Seven,
            _ => DataBits::Eight,
        };

        let stop_bits = match config.stop_bits {
            2 => StopBits::Two,
            _ => StopBits::One,
        };

        let parity = match config.parity {
            SerialParity::Odd => Parity::Odd,
            SerialParity::Even => Parity::Even,
            SerialParity::None => Parity::None,
        };

        let flow_control = match config.flow_control {
            SerialFlowControl::Hardware => FlowControl::Hardware,
            SerialFlowControl::Software => FlowControl::Software,
            SerialFlowControl::None => FlowControl::None,
        };

        tracing::info!(
            "Opening {} @ {} baud ({})",
            config.port,
            config.baud_rate,
            config.line_settings()
        );

        let port_error = |e: serialport::Error| match e.kind() {
            serialport::ErrorKind::NoDevice => TransportError::PortNotFound(config.port.clone()),
            serialport::ErrorKind::Io(std::io::ErrorKind::NotFound) => {
                TransportError::PortNotFound(config.port.clone())
            }
            serialport::ErrorKind::Io(std::io::ErrorKind::PermissionDenied) => {
                TransportError::PermissionDenied(config.port.clone())
            }
            _ => TransportError::ConnectionFailed(format!("{}: {}", config.port, e)),
        };

        let reader = serialport::new(&config.port, config.baud_rate)
            .data_bits(data_bits)
            .stop_bits(stop_bits)
            .parity(parity)
            .flow_control(flow_control)
            .timeout(Duration::from_millis(config.timeout_ms))
            .open()
            .map_err(port_error)?;

        // Dropping `reader` on failure closes the device again
        let writer = reader.try_clone().map_err(port_error)?;

        Ok(Self {
            config,
            reader: Mutex::new(Some(reader)),
            writer: Mutex::new(Some(writer)),
            open: AtomicBool::new(true),
        })
    }

    fn pending_bytes(&self) -> Result<usize, TransportError> {
        let guard = self.reader.lock();
        let port = guard.as_ref().ok_or(TransportError::NotConnected)?;
        let pending = port.bytes_to_read().map_err(std::io::Error::from)?;
        Ok(pending as usize)
    }
}

#[async_trait]
impl Transport for SerialTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Serial
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn disconnect(&self) {
        if !self.open.swap(false, Ordering::SeqCst) {
            return;
        }
        *self.reader.lock() = None;
        *self.writer.lock() = None;
        tracing::info!("Closed {}", self.config.port);
    }

    /// Serial ports have no readiness notification; this checks the input
    /// queue once and, if empty, waits out `timeout` before reporting idle.
    async fn is_readable(&self, timeout: Duration) -> Result<bool, TransportError> {
        if self.pending_bytes()? > 0 {
            return Ok(true);
        }
        if !timeout.is_zero() {
            tokio::time::sleep(timeout).await;
            return Ok(self.pending_bytes()? > 0);
        }
        Ok(false)
    }

    async fn read_available(&self) -> Result<Bytes, TransportError> {
        let pending = self.pending_bytes()?;
        if pending == 0 {
            return Ok(Bytes::new());
        }

        let mut guard = self.reader.lock();
        let port = guard.as_mut().ok_or(TransportError::NotConnected)?;
        let mut buffer = vec![0u8; pending];

        match port.read(&mut buffer) {
            Ok(n) => {
                buffer.truncate(n);
                Ok(Bytes::from(buffer))
            }
            Err(ref e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
                ) =>
            {
                Ok(Bytes::new())
            }
            Err(e) => Err(TransportError::Io(e)),
        }
    }

    async fn write_all(&self, data: &[u8]) -> Result<(), TransportError> {
        let mut guard = self.writer.lock();
        let port = guard.as_mut().ok_or(TransportError::NotConnected)?;

        port.write_all(data)?;
        port.flush()?;

        Ok(())
    }

    fn set_timeout(&self, timeout: Duration) {
        for handle in [&self.reader, &self.writer] {
            if let Some(port) = handle.lock().as_mut() {
                if let Err(e) = port.set_timeout(timeout) {
                    tracing::warn!("Failed to set serial timeout: {}", e);
                }
            }
        }
    }

    fn connection_info(&self) -> String {
        format!(
            "{} @ {} baud ({} {})",
            self.config.port,
            self.config.baud_rate,
            self.config.line_settings(),
            match self.config.flow_control {
                SerialFlowControl::None => "No FC",
                SerialFlowControl::Hardware => "HW FC",
                SerialFlowControl::Software => "SW FC",
            }
        )
    }
}

/// List available serial ports
pub fn list_ports() -> Result<Vec<serialport::SerialPortInfo>, TransportError> {
    serialport::available_ports().map_err(|e| TransportError::Io(e.into()))
}
