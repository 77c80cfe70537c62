//! Connection lifetime management
//!
//! A [`Connection`] owns one open transport, its receiver loop and the
//! consumer end of the message queue. [`Client`] holds at most one of them.

use crate::core::command::{self, CommandError, CommandFormat};
use crate::core::queue::{Message, MessageQueue};
use crate::core::receiver::{FramingConfig, ReceiverHandle, JOIN_TIMEOUT};
use crate::core::transport::{self, Transport, TransportError, TransportKind, TransportParams};
use std::sync::Arc;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Transport open, receiver running
    Connected,
    /// Receiver hit a fatal error; waiting for the controller to close
    Faulted,
    /// Closed
    Disconnected,
}

/// One open transport plus its receiver loop
pub struct Connection {
    transport: Arc<dyn Transport>,
    receiver: Option<ReceiverHandle>,
    queue: MessageQueue,
    format: CommandFormat,
}

impl Connection {
    /// Open the transport and start receiving
    pub async fn open(
        params: &TransportParams,
        framing: FramingConfig,
        format: CommandFormat,
    ) -> Result<Self, TransportError> {
        let transport = transport::connect(params).await?;

        let framing = match params {
            TransportParams::Tcp(cfg) => framing.telnet(cfg.telnet),
            TransportParams::Serial(_) => framing.telnet(false),
        };

        Ok(Self::with_transport(transport, framing, format))
    }

    /// Start receiving on an already open transport
    pub fn with_transport(
        transport: Arc<dyn Transport>,
        framing: FramingConfig,
        format: CommandFormat,
    ) -> Self {
        let (tx, queue) = MessageQueue::channel();
        let receiver = ReceiverHandle::spawn(transport.clone(), framing, tx);

        tracing::info!("Connected: {}", transport.connection_info());

        Self {
            transport,
            receiver: Some(receiver),
            queue,
            format,
        }
    }

    /// Current state
    pub fn state(&self) -> ConnectionState {
        match &self.receiver {
            _ if !self.transport.is_open() => ConnectionState::Disconnected,
            Some(receiver) if receiver.disconnect_requested() => ConnectionState::Faulted,
            Some(_) => ConnectionState::Connected,
            None => ConnectionState::Disconnected,
        }
    }

    /// Receiver loop asked for the transport to be closed
    pub fn disconnect_requested(&self) -> bool {
        self.state() == ConnectionState::Faulted
    }

    /// Take every completed message, oldest first
    pub fn drain(&mut self) -> Vec<Message> {
        self.queue.drain()
    }

    /// Send a command using the connection's command format
    pub async fn send(&self, raw_text: &str) -> Result<Vec<u8>, CommandError> {
        command::send(self.transport.as_ref(), raw_text, self.format).await
    }

    /// Command format in use
    pub fn format(&self) -> CommandFormat {
        self.format
    }

    /// Transport kind
    pub fn kind(&self) -> TransportKind {
        self.transport.kind()
    }

    /// Get connection info string
    pub fn connection_info(&self) -> String {
        self.transport.connection_info()
    }

    /// Stop the receiver (bounded by [`JOIN_TIMEOUT`]) and close the
    /// transport. Safe to call more than once.
    pub async fn close(&mut self) {
        if let Some(receiver) = self.receiver.take() {
            receiver.stop(JOIN_TIMEOUT).await;
        }
        self.transport.disconnect().await;
    }
}

/// Controller holding at most one open connection
#[derive(Default)]
pub struct Client {
    connection: Option<Connection>,
}

impl Client {
    /// Create a client with no connection
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new connection, closing any previous one first
    pub async fn connect(
        &mut self,
        params: &TransportParams,
        framing: FramingConfig,
        format: CommandFormat,
    ) -> Result<(), TransportError> {
        self.disconnect().await;
        self.connection = Some(Connection::open(params, framing, format).await?);
        Ok(())
    }

    /// Install an already constructed connection, closing any previous one
    pub async fn attach(&mut self, connection: Connection) {
        self.disconnect().await;
        self.connection = Some(connection);
    }

    /// Close the active connection, if any
    pub async fn disconnect(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            connection.close().await;
        }
    }

    /// Check if a connection is open
    pub fn is_connected(&self) -> bool {
        self.connection
            .as_ref()
            .is_some_and(|c| c.state() == ConnectionState::Connected)
    }

    /// Active connection
    pub fn connection(&self) -> Option<&Connection> {
        self.connection.as_ref()
    }

    /// Drain completed messages. When the receiver reported a fatal error
    /// the connection is closed after its last messages are collected.
    pub async fn poll(&mut self) -> Vec<Message> {
        let Some(connection) = self.connection.as_mut() else {
            return Vec::new();
        };

        let mut messages = connection.drain();

        if connection.state() != ConnectionState::Connected {
            connection.close().await;
            // Anything the loop pushed between the drain and the join
            messages.extend(connection.drain());
            self.connection = None;
            tracing::info!("Connection closed after receiver fault");
        }

        messages
    }

    /// Send a command on the active connection
    pub async fn send(&self, raw_text: &str) -> Result<Vec<u8>, CommandError> {
        match &self.connection {
            Some(connection) => connection.send(raw_text).await,
            None => Err(CommandError::NotConnected),
        }
    }
}
