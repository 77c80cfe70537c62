//! Outbound command formatting and sending

use crate::core::codec::{CodecError, TextEncoding};
use crate::core::transport::{Transport, TransportError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Line ending type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LineEnding {
    /// Carriage Return only
    Cr,
    /// Line Feed only
    Lf,
    /// Both CR and LF
    #[default]
    CrLf,
}

impl LineEnding {
    /// Get the text for this line ending
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cr => "\r",
            Self::Lf => "\n",
            Self::CrLf => "\r\n",
        }
    }
}

impl std::str::FromStr for LineEnding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cr" => Ok(Self::Cr),
            "lf" => Ok(Self::Lf),
            "crlf" => Ok(Self::CrLf),
            other => Err(format!("unknown line ending: {}", other)),
        }
    }
}

/// Newline convention and encoding applied to every command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CommandFormat {
    /// Appended after the trimmed command text
    pub line_ending: LineEnding,
    /// Text encoding on the wire
    pub encoding: TextEncoding,
}

impl CommandFormat {
    /// Create a command format
    pub fn new(line_ending: LineEnding, encoding: TextEncoding) -> Self {
        Self {
            line_ending,
            encoding,
        }
    }

    /// Trim the input, append the line ending, and encode
    pub fn encode(&self, raw_text: &str) -> Result<Vec<u8>, CodecError> {
        let mut line = raw_text.trim().to_string();
        line.push_str(self.line_ending.as_str());
        self.encoding.encode(&line)
    }
}

/// Command sending errors
#[derive(Error, Debug)]
pub enum CommandError {
    /// No open transport
    #[error("Cannot send command: not connected")]
    NotConnected,

    /// Command text cannot be encoded
    #[error("Cannot send command: {0}")]
    Encoding(#[from] CodecError),

    /// Write failed
    #[error("Failed to send command: {0}")]
    Transport(TransportError),
}

impl From<TransportError> for CommandError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::NotConnected => Self::NotConnected,
            other => Self::Transport(other),
        }
    }
}

/// Format `raw_text` and write it through `transport`.
///
/// Returns the encoded bytes that were written. Errors leave the connection
/// state untouched; reacting to I/O failures is up to the caller.
pub async fn send(
    transport: &dyn Transport,
    raw_text: &str,
    format: CommandFormat,
) -> Result<Vec<u8>, CommandError> {
    if !transport.is_open() {
        return Err(CommandError::NotConnected);
    }

    let data = format.encode(raw_text)?;
    transport.write_all(&data).await?;

    tracing::debug!("Sent {} bytes: {:?}", data.len(), raw_text.trim());
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transport::MockTransport;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_encode_trims_and_appends_line_ending() {
        let format = CommandFormat::new(LineEnding::Lf, TextEncoding::Ascii);
        assert_eq!(format.encode("  MEAS?\t\n").unwrap(), b"MEAS?\n");
        let format = CommandFormat::new(LineEnding::Cr, TextEncoding::Ascii);
        assert_eq!(format.encode("RUN").unwrap(), b"RUN\r");
    }

    #[tokio::test]
    async fn test_crlf_round_trip_through_transport() {
        let written = Arc::new(Mutex::new(Vec::new()));
        let sink = written.clone();

        let mut transport = MockTransport::new();
        transport.expect_is_open().return_const(true);
        transport
            .expect_write_all()
            .times(1)
            .returning(move |data| {
                sink.lock().unwrap().extend_from_slice(data);
                Ok(())
            });

        let format = CommandFormat::new(LineEnding::CrLf, TextEncoding::Utf8);
        send(&transport, "  Sample ID?  ", format).await.unwrap();

        let bytes = written.lock().unwrap().clone();
        let decoded = TextEncoding::Utf8.decode_lossy(&bytes);
        assert_eq!(decoded, "Sample ID?\r\n");
    }

    #[tokio::test]
    async fn test_send_on_closed_transport_fails() {
        let mut transport = MockTransport::new();
        transport.expect_is_open().return_const(false);
        transport.expect_write_all().never();

        let err = send(&transport, "AT", CommandFormat::default()).await.unwrap_err();
        assert!(matches!(err, CommandError::NotConnected));
        assert!(err.to_string().contains("not connected"));
    }

    #[tokio::test]
    async fn test_unencodable_command_is_reported() {
        let mut transport = MockTransport::new();
        transport.expect_is_open().return_const(true);
        transport.expect_write_all().never();

        let format = CommandFormat::new(LineEnding::CrLf, TextEncoding::Ascii);
        let err = send(&transport, "Probe µ", format).await.unwrap_err();
        assert!(matches!(err, CommandError::Encoding(_)));
    }

    #[tokio::test]
    async fn test_write_failure_is_reported() {
        let mut transport = MockTransport::new();
        transport.expect_is_open().return_const(true);
        transport.expect_write_all().returning(|_| {
            Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "broken pipe",
            )))
        });

        let err = send(&transport, "AT", CommandFormat::default()).await.unwrap_err();
        assert!(matches!(err, CommandError::Transport(_)));
    }
}
