//! TCP transport implementation

use super::{Transport, TransportError, TransportKind};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

/// Bytes read per `read_available` call
pub const READ_CHUNK_SIZE: usize = 1024;

/// TCP connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcpConfig {
    /// Host address
    pub host: String,
    /// Port number
    pub port: u16,
    /// Connect and write timeout in seconds
    pub timeout_secs: u64,
    /// Answer and strip Telnet negotiation
    #[serde(default = "default_telnet")]
    pub telnet: bool,
}

fn default_telnet() -> bool {
    true
}

impl TcpConfig {
    /// Create a new TCP configuration
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
            timeout_secs: 5,
            telnet: true,
        }
    }

    /// Set timeout
    #[must_use]
    pub fn timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Enable or disable Telnet negotiation handling
    #[must_use]
    pub fn telnet(mut self, enable: bool) -> Self {
        self.telnet = enable;
        self
    }

    /// `host:port` address string
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self::new("localhost", 23)
    }
}

/// TCP transport
///
/// The stream is split into owned halves, each behind its own lock, so a
/// pending read never blocks a concurrent write.
pub struct TcpTransport {
    config: TcpConfig,
    reader: Mutex<Option<OwnedReadHalf>>,
    writer: Mutex<Option<OwnedWriteHalf>>,
    timeout: RwLock<Duration>,
    open: AtomicBool,
}

impl TcpTransport {
    /// Connect to the configured endpoint, bounded by the connect timeout
    pub async fn connect(config: TcpConfig) -> Result<Self, TransportError> {
        let addr = config.address();
        let timeout = Duration::from_secs(config.timeout_secs);

        tracing::info!("Connecting to {}", addr);

        let stream = tokio::time::timeout(timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| TransportError::Timeout(timeout))?
            .map_err(|e| match e.kind() {
                ErrorKind::PermissionDenied => TransportError::PermissionDenied(addr.clone()),
                _ => TransportError::ConnectionFailed(format!("{}: {}", addr, e)),
            })?;

        // Set TCP_NODELAY for lower latency
        stream.set_nodelay(true)?;

        let (read_half, write_half) = stream.into_split();

        Ok(Self {
            config,
            reader: Mutex::new(Some(read_half)),
            writer: Mutex::new(Some(write_half)),
            timeout: RwLock::new(timeout),
            open: AtomicBool::new(true),
        })
    }

    /// Whether incoming data should pass through the Telnet filter
    pub fn telnet_enabled(&self) -> bool {
        self.config.telnet
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Tcp
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn disconnect(&self) {
        if !self.open.swap(false, Ordering::SeqCst) {
            return;
        }

        // Shut down the write direction first so the peer sees FIN, then drop
        // the read half. "Not connected" from a peer that already left is fine.
        if let Some(mut writer) = self.writer.lock().await.take() {
            if let Err(e) = writer.shutdown().await {
                if e.kind() != ErrorKind::NotConnected {
                    tracing::debug!("TCP shutdown error ignored: {}", e);
                }
            }
        }
        self.reader.lock().await.take();

        tracing::info!("Disconnected from {}", self.config.address());
    }

    async fn is_readable(&self, timeout: Duration) -> Result<bool, TransportError> {
        let guard = self.reader.lock().await;
        let reader = guard.as_ref().ok_or(TransportError::NotConnected)?;

        match tokio::time::timeout(timeout, reader.readable()).await {
            Ok(Ok(())) => Ok(true),
            Ok(Err(e)) => Err(TransportError::Io(e)),
            Err(_) => Ok(false),
        }
    }

    async fn read_available(&self) -> Result<Bytes, TransportError> {
        let guard = self.reader.lock().await;
        let reader = guard.as_ref().ok_or(TransportError::NotConnected)?;

        let mut buffer = vec![0u8; READ_CHUNK_SIZE];

        match reader.try_read(&mut buffer) {
            Ok(0) => Err(TransportError::ClosedByPeer),
            Ok(n) => {
                buffer.truncate(n);
                Ok(Bytes::from(buffer))
            }
            Err(ref e) if e.kind() == ErrorKind::WouldBlock => Ok(Bytes::new()),
            Err(e) => Err(TransportError::Io(e)),
        }
    }

    async fn write_all(&self, data: &[u8]) -> Result<(), TransportError> {
        let timeout = *self.timeout.read();
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(TransportError::NotConnected)?;

        tokio::time::timeout(timeout, async {
            writer.write_all(data).await?;
            writer.flush().await
        })
        .await
        .map_err(|_| TransportError::Timeout(timeout))??;

        Ok(())
    }

    fn set_timeout(&self, timeout: Duration) {
        *self.timeout.write() = timeout;
    }

    fn connection_info(&self) -> String {
        if self.config.telnet {
            format!("telnet://{}", self.config.address())
        } else {
            format!("tcp://{}", self.config.address())
        }
    }
}
