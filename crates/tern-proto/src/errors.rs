//! Error types for the tern wire format.
//!
//! All errors are structured and testable. Decoding untrusted bytes must
//! never panic; every early exit in the codecs maps to a variant here.

use thiserror::Error;

/// Wire-level errors produced while encoding or decoding frames.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Buffer ended before the announced structure was complete
    #[error("truncated input: needed {needed} more bytes, {remaining} available")]
    Truncated {
        /// Bytes still required by the decoder
        needed: usize,
        /// Bytes actually left in the buffer
        remaining: usize,
    },

    /// Envelope declared a body length that is negative or not 4-aligned
    #[error("invalid body length: {0}")]
    InvalidLength(i32),

    /// Expected one constructor id, found another
    #[error("unexpected constructor: expected {expected:#010x}, got {actual:#010x}")]
    UnexpectedConstructor {
        /// The constructor the caller asked to decode
        expected: u32,
        /// The constructor found on the wire
        actual: u32,
    },

    /// Container declared more members than the protocol allows
    #[error("container too long: {count} messages exceeds maximum {max}")]
    ContainerTooLong {
        /// Declared member count
        count: usize,
        /// Maximum allowed members
        max: usize,
    },

    /// Payload exceeds the per-frame byte budget
    #[error("payload too large: {size} bytes exceeds maximum {max}")]
    PayloadTooLarge {
        /// Actual payload size
        size: usize,
        /// Maximum allowed size
        max: usize,
    },

    /// Gzip wrapper failed to compress or decompress
    #[error("compression error: {0}")]
    Compression(String),

    /// A length-prefixed string held bytes that are not valid UTF-8
    #[error("string is not valid utf-8")]
    InvalidUtf8,
}

/// Convenient Result alias for wire operations
pub type Result<T> = std::result::Result<T, ProtocolError>;
