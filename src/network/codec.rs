//! Binary codec for network message bodies.
//!
//! Centralizes the bincode configuration so that every message body is
//! encoded the same way across the crate. Fixed-width integer encoding keeps
//! sequence ids at a stable 2-byte slot relative to their message kind,
//! which the wire format requires.

use serde::{de::DeserializeOwned, Serialize};
use std::fmt;

// Fixed-int encoding: deterministic sizes, no varint surprises for the
// 16-bit sequence id fields.
fn config() -> impl bincode::config::Config {
    bincode::config::standard().with_fixed_int_encoding()
}

/// Errors that can occur during encoding or decoding.
///
/// The messages are plain `String`s because bincode errors are opaque; they
/// only expose a `Display` implementation, not structured failure reasons.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CodecError {
    /// The encoding operation failed.
    EncodeError {
        /// The underlying bincode error message.
        message: String,
    },
    /// The decoding operation failed.
    DecodeError {
        /// The underlying bincode error message.
        message: String,
    },
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EncodeError { message } => write!(f, "encoding failed: {message}"),
            Self::DecodeError { message } => write!(f, "decoding failed: {message}"),
        }
    }
}

impl std::error::Error for CodecError {}

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Encodes a value into a new `Vec<u8>`.
pub fn encode<T: Serialize>(value: &T) -> CodecResult<Vec<u8>> {
    bincode::serde::encode_to_vec(value, config()).map_err(|e| CodecError::EncodeError {
        message: e.to_string(),
    })
}

/// Encodes a value by appending to an existing `Vec<u8>`.
///
/// Used by the wire framer, which writes the message-kind tag byte first and
/// the body after it.
pub fn encode_append<T: Serialize>(value: &T, buffer: &mut Vec<u8>) -> CodecResult<usize> {
    let start_len = buffer.len();
    bincode::serde::encode_into_std_write(value, buffer, config())
        .map(|_| buffer.len() - start_len)
        .map_err(|e| CodecError::EncodeError {
            message: e.to_string(),
        })
}

/// Decodes a value from a byte slice.
///
/// Returns the decoded value and the number of bytes consumed, so the framer
/// can reject frames with trailing garbage.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> CodecResult<(T, usize)> {
    bincode::serde::decode_from_slice(bytes, config()).map_err(|e| CodecError::DecodeError {
        message: e.to_string(),
    })
}

/// Decodes a value from a byte slice, ignoring the bytes consumed.
pub fn decode_value<T: DeserializeOwned>(bytes: &[u8]) -> CodecResult<T> {
    decode(bytes).map(|(value, _)| value)
}
