//! Text encodings for commands and responses

use super::CodecError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Replacement marker substituted for undecodable bytes
pub const REPLACEMENT: char = '\u{FFFD}';

/// Text encoding type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextEncoding {
    /// UTF-8 encoding
    #[default]
    Utf8,
    /// ASCII (7-bit)
    Ascii,
    /// Latin-1 (ISO-8859-1)
    Latin1,
}

impl TextEncoding {
    /// Encode text, failing on the first character the encoding cannot carry
    pub fn encode(self, text: &str) -> Result<Vec<u8>, CodecError> {
        match self {
            Self::Utf8 => Ok(text.as_bytes().to_vec()),
            Self::Ascii => Self::encode_narrow(text, 0x7F, self),
            Self::Latin1 => Self::encode_narrow(text, 0xFF, self),
        }
    }

    fn encode_narrow(text: &str, max: u32, encoding: Self) -> Result<Vec<u8>, CodecError> {
        text.chars()
            .enumerate()
            .map(|(position, ch)| {
                u8::try_from(u32::from(ch))
                    .ok()
                    .filter(|b| u32::from(*b) <= max)
                    .ok_or(CodecError::Unencodable {
                        ch,
                        position,
                        encoding,
                    })
            })
            .collect()
    }

    /// Decode bytes for display; undecodable bytes become [`REPLACEMENT`]
    pub fn decode_lossy(self, data: &[u8]) -> String {
        match self {
            Self::Utf8 => String::from_utf8_lossy(data).into_owned(),
            Self::Ascii => data
                .iter()
                .map(|&b| if b.is_ascii() { b as char } else { REPLACEMENT })
                .collect(),
            Self::Latin1 => data.iter().map(|&b| b as char).collect(),
        }
    }
}

impl fmt::Display for TextEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Utf8 => write!(f, "UTF-8"),
            Self::Ascii => write!(f, "ASCII"),
            Self::Latin1 => write!(f, "Latin-1"),
        }
    }
}

impl std::str::FromStr for TextEncoding {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "utf-8" | "utf8" => Ok(Self::Utf8),
            "ascii" | "us-ascii" => Ok(Self::Ascii),
            "latin-1" | "latin1" | "iso-8859-1" => Ok(Self::Latin1),
            other => Err(CodecError::UnknownName(other.to_string())),
        }
    }
}
