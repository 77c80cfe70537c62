//! Transport layer for device connections
//!
//! Supports:
//! - Raw TCP connections (optionally carrying Telnet negotiation)
//! - Serial ports (RS-232, USB-Serial)
//!
//! Both implementations sit behind [`Transport`], so the receiver loop and the
//! command sender never branch on the connection kind except where the wire
//! protocol differs (Telnet filtering, serial polling).

mod serial;
mod tcp;
pub mod telnet;

pub use serial::{list_ports, SerialConfig, SerialFlowControl, SerialParity, SerialTransport};
pub use tcp::{TcpConfig, TcpTransport};

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Connection parameters, resolved by the settings provider
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum TransportParams {
    /// TCP socket endpoint
    Tcp(TcpConfig),
    /// Serial line
    Serial(SerialConfig),
}

impl TransportParams {
    /// Kind of transport these parameters open
    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Tcp(_) => TransportKind::Tcp,
            Self::Serial(_) => TransportKind::Serial,
        }
    }
}

/// Transport type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// TCP socket
    Tcp,
    /// Serial port
    Serial,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => write!(f, "TCP"),
            Self::Serial => write!(f, "Serial"),
        }
    }
}

/// Transport error types
#[derive(Error, Debug)]
pub enum TransportError {
    /// Connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection timeout
    #[error("Connection timeout after {0:?}")]
    Timeout(Duration),

    /// Port not found
    #[error("Port not found: {0}")]
    PortNotFound(String),

    /// Permission denied
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Remote side closed the connection
    #[error("Connection closed by peer")]
    ClosedByPeer,

    /// Operation on a transport that is not open
    #[error("Not connected")]
    NotConnected,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Whether the error happened while opening the transport
    pub fn is_connect_failure(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed(_)
                | Self::Timeout(_)
                | Self::PortNotFound(_)
                | Self::PermissionDenied(_)
        )
    }
}

/// Byte-stream capability shared by every connection kind.
///
/// Reads and writes go through disjoint handles, so the receiver loop may
/// read while a command is being written from another task.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    /// Get transport kind
    fn kind(&self) -> TransportKind;

    /// Check if the transport is still open
    fn is_open(&self) -> bool;

    /// Close the transport. Idempotent and best-effort: state is cleared even
    /// if the underlying close reports an error.
    async fn disconnect(&self);

    /// Wait up to `timeout` for incoming data
    async fn is_readable(&self, timeout: Duration) -> Result<bool, TransportError>;

    /// Read whatever is currently available; empty when nothing is pending
    async fn read_available(&self) -> Result<Bytes, TransportError>;

    /// Write the complete buffer
    async fn write_all(&self, data: &[u8]) -> Result<(), TransportError>;

    /// Change the read/write timeout of the open transport
    fn set_timeout(&self, timeout: Duration);

    /// Get connection info string
    fn connection_info(&self) -> String;
}

/// Open a transport from its parameters
pub async fn connect(params: &TransportParams) -> Result<Arc<dyn Transport>, TransportError> {
    match params {
        TransportParams::Tcp(cfg) => {
            let transport = TcpTransport::connect(cfg.clone()).await?;
            Ok(Arc::new(transport))
        }
        TransportParams::Serial(cfg) => {
            let transport = SerialTransport::open(cfg.clone())?;
            Ok(Arc::new(transport))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_kind() {
        let tcp = TransportParams::Tcp(TcpConfig::new("127.0.0.1", 23));
        let serial = TransportParams::Serial(SerialConfig::new("/dev/ttyUSB0", 9600));
        assert_eq!(tcp.kind(), TransportKind::Tcp);
        assert_eq!(serial.kind(), TransportKind::Serial);
    }

    #[test]
    fn test_connect_failure_classification() {
        assert!(TransportError::Timeout(Duration::from_secs(5)).is_connect_failure());
        assert!(TransportError::PortNotFound("COM9".into()).is_connect_failure());
        assert!(!TransportError::ClosedByPeer.is_connect_failure());
        assert!(!TransportError::NotConnected.is_connect_failure());
    }

    #[tokio::test]
    async fn test_connect_refused_is_reported() {
        // Bind then drop to get a local port with no listener
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let params = TransportParams::Tcp(TcpConfig::new("127.0.0.1", port));
        let err = connect(&params).await.err().unwrap();
        assert!(err.is_connect_failure());
    }
}
