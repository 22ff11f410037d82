//! Compressed transfer negotiation and decoding.

use std::io::Read;
use std::str::FromStr;

use flate2::read::{DeflateDecoder, MultiGzDecoder, ZlibDecoder};

use crate::error::FetchError;

/// Value sent in `Accept-Encoding` when compressed transfer is requested.
pub const ACCEPT_ENCODING: &str = "gzip, deflate";

/// A `Content-Encoding` this crate knows how to undo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentEncoding {
    Identity,
    Gzip,
    Deflate,
}

impl ContentEncoding {
    /// Decode a body encoded with this encoding.
    pub fn decode(&self, body: &[u8]) -> Result<Vec<u8>, FetchError> {
        match self {
            Self::Identity => Ok(body.to_vec()),
            Self::Gzip => read_all(MultiGzDecoder::new(body)),
            // RFC 9110 deflate is zlib-wrapped, but raw deflate streams are common in the wild.
            Self::Deflate => {
                read_all(ZlibDecoder::new(body)).or_else(|_| read_all(DeflateDecoder::new(body)))
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::Gzip => "gzip",
            Self::Deflate => "deflate",
        }
    }
}

impl FromStr for ContentEncoding {
    type Err = FetchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "identity" => Ok(Self::Identity),
            "gzip" | "x-gzip" => Ok(Self::Gzip),
            "deflate" => Ok(Self::Deflate),
            other => Err(FetchError::Decode(format!(
                "unsupported content encoding: {}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for ContentEncoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

fn read_all(mut reader: impl Read) -> Result<Vec<u8>, FetchError> {
    let mut out = Vec::new();
    reader
        .read_to_end(&mut out)
        .map_err(|e| FetchError::Decode(e.to_string()))?;
    Ok(out)
}
