//! # Sampleterm Core Library
//!
//! Command/response client for laboratory devices reachable over:
//! - TCP/IP connections (with minimal Telnet option negotiation)
//! - Serial ports (RS-232, USB-Serial adapters)
//!
//! ## Features
//!
//! - One uniform transport abstraction for both connection kinds
//! - Background receiver that frames the byte stream by inter-byte silence
//! - Thread-safe message queue drained by the consumer
//! - Sample ID extraction to name and categorize response logs
//!
//! ## Example
//!
//! ```rust,no_run
//! use sampleterm_core::{Client, CommandFormat, FramingConfig, TcpConfig, TransportParams};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let params = TransportParams::Tcp(TcpConfig::new("192.168.0.20", 23));
//!     let mut client = Client::new();
//!     client
//!         .connect(&params, FramingConfig::default(), CommandFormat::default())
//!         .await?;
//!
//!     client.send("REPORT").await?;
//!
//!     loop {
//!         for message in client.poll().await {
//!             println!("{}", message.text(Default::default()));
//!         }
//!         tokio::time::sleep(std::time::Duration::from_millis(100)).await;
//!     }
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod core;

// Re-exports for convenience
pub use crate::cli::{CliResult, ExitCodes};
pub use crate::config::Settings;
pub use crate::core::codec::{ResponseFormat, TextEncoding};
pub use crate::core::command::{CommandError, CommandFormat, LineEnding};
pub use crate::core::connection::{Client, Connection, ConnectionState};
pub use crate::core::logger::{ResponseLog, SavedLog};
pub use crate::core::queue::{Message, MessageKind, MessageQueue};
pub use crate::core::receiver::FramingConfig;
pub use crate::core::sample_id::{identify, SampleCategory, SampleClassification, SampleId};
pub use crate::core::transport::{
    SerialConfig, SerialFlowControl, SerialParity, TcpConfig, Transport, TransportError,
    TransportKind, TransportParams,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
