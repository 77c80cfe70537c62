//! Core module containing the main functionality of Sampleterm
//!
//! This module provides:
//! - Transport layer for TCP (with Telnet negotiation) and serial connections
//! - Idle-timeout framing of received data in a background receiver loop
//! - Message queue between the receiver and the consumer
//! - Connection lifetime management
//! - Command formatting and sending
//! - Sample ID extraction and log path resolution
//! - Response logging
//! - Text encodings and display formats

pub mod codec;
pub mod command;
pub mod connection;
pub mod logger;
pub mod queue;
pub mod receiver;
pub mod sample_id;
pub mod transport;
