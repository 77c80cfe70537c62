//! Framed messages and the queue that carries them to the consumer
//!
//! The queue is unbounded: if the consumer stops draining, memory grows
//! without limit. Nothing is ever dropped by the queue itself.

use crate::core::codec::TextEncoding;
use bytes::Bytes;
use chrono::{DateTime, Local};
use serde::Serialize;
use tokio::sync::mpsc;

/// What a message carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Bytes received from the device
    Data,
    /// Human-readable error reported by the receiver loop
    Error,
}

/// One framed unit of received data. Immutable once enqueued.
#[derive(Debug, Clone)]
pub struct Message {
    kind: MessageKind,
    payload: Bytes,
    enqueued_at: DateTime<Local>,
}

impl Message {
    /// Create a data message stamped with the current time
    pub fn data(payload: impl Into<Bytes>) -> Self {
        Self {
            kind: MessageKind::Data,
            payload: payload.into(),
            enqueued_at: Local::now(),
        }
    }

    /// Create an error message stamped with the current time
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Error,
            payload: Bytes::from(text.into()),
            enqueued_at: Local::now(),
        }
    }

    /// Message kind
    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    /// Whether this is a synthetic error message
    pub fn is_error(&self) -> bool {
        self.kind == MessageKind::Error
    }

    /// Raw payload
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// When the message was enqueued
    pub fn enqueued_at(&self) -> DateTime<Local> {
        self.enqueued_at
    }

    /// Decode for display. Error messages are always UTF-8.
    pub fn text(&self, encoding: TextEncoding) -> String {
        match self.kind {
            MessageKind::Data => encoding.decode_lossy(&self.payload),
            MessageKind::Error => TextEncoding::Utf8.decode_lossy(&self.payload),
        }
    }
}

/// Producer side, owned by the receiver loop
#[derive(Debug, Clone)]
pub struct MessageSender {
    tx: mpsc::UnboundedSender<Message>,
}

impl MessageSender {
    /// Enqueue a message. Returns `false` once the consumer is gone.
    pub fn push(&self, message: Message) -> bool {
        self.tx.send(message).is_ok()
    }

    /// Check if the consumer side has been dropped
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer side
#[derive(Debug)]
pub struct MessageQueue {
    rx: mpsc::UnboundedReceiver<Message>,
}

impl MessageQueue {
    /// Create a connected producer/consumer pair
    pub fn channel() -> (MessageSender, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (MessageSender { tx }, Self { rx })
    }

    /// Take every message queued so far, oldest first
    pub fn drain(&mut self) -> Vec<Message> {
        let mut messages = Vec::new();
        while let Ok(message) = self.rx.try_recv() {
            messages.push(message);
        }
        messages
    }

    /// Number of messages waiting
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Check if no message is waiting
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
