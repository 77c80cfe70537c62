//! Data codec module for encoding/decoding data
//!
//! Supports:
//! - Text encodings for outbound commands and inbound display (UTF-8, ASCII, Latin-1)
//! - Hex dump display of raw responses

mod text;

pub use text::TextEncoding;

use serde::{Deserialize, Serialize};
use std::fmt::Write;

/// How drained responses are rendered for display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseFormat {
    /// Decoded text
    #[default]
    Text,
    /// Hex dump (like xxd)
    Hex,
}

impl ResponseFormat {
    /// Render a raw payload for display
    pub fn render(self, data: &[u8], encoding: TextEncoding) -> String {
        match self {
            Self::Text => encoding.decode_lossy(data),
            Self::Hex => hexdump(data, 16),
        }
    }
}

impl std::str::FromStr for ResponseFormat {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "hex" => Ok(Self::Hex),
            other => Err(CodecError::UnknownName(other.to_string())),
        }
    }
}

/// Codec errors
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Character cannot be represented in the target encoding
    #[error("Character {ch:?} at position {position} cannot be encoded as {encoding}")]
    Unencodable {
        /// Offending character
        ch: char,
        /// Char index in the input
        position: usize,
        /// Target encoding
        encoding: TextEncoding,
    },

    /// Unknown encoding or format name
    #[error("Unknown name: {0}")]
    UnknownName(String),
}

/// Narrowest line `hexdump` produces
const MIN_HEXDUMP_WIDTH: usize = 2;

/// Format bytes as a hexdump (like xxd).
///
/// Widths below 2 are raised to 2 so every line has two halves.
pub fn hexdump(data: &[u8], bytes_per_line: usize) -> String {
    let width = bytes_per_line.max(MIN_HEXDUMP_WIDTH);
    let half = width / 2;
    let mut output = String::new();

    for (line, chunk) in data.chunks(width).enumerate() {
        let _ = write!(output, "{:08x}  ", line * width);

        // Short last lines are padded so the ASCII column stays aligned
        for i in 0..width {
            match chunk.get(i) {
                Some(byte) => {
                    let _ = write!(output, "{:02x} ", byte);
                }
                None => output.push_str("   "),
            }
            if i + 1 == half {
                output.push(' ');
            }
        }

        output.push_str(" |");
        output.extend(chunk.iter().map(|&byte| {
            if byte.is_ascii_graphic() || byte == b' ' {
                byte as char
            } else {
                '.'
            }
        }));
        output.extend(std::iter::repeat(' ').take(width - chunk.len()));
        output.push_str("|\n");
    }

    output
}
