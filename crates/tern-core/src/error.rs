//! Error types for the tern session manager.
//!
//! The taxonomy follows the recovery boundary, not the failure site:
//!
//! - [`CallError`] crosses the boundary to a single call's awaiter and never
//!   affects the session.
//! - [`SenderError`] is returned from sender-level operations (connect,
//!   submit while disconnected, internal consistency).
//! - Transport failures, salt corrections, clock skew, and sequence drift
//!   never appear here at all: they are absorbed by retransmission and
//!   reconnection inside the core.

use thiserror::Error;

use crate::schema::SchemaError;

/// Outcome delivered to exactly one call's awaiter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    /// The server rejected this specific call at the application level.
    /// Other in-flight calls are unaffected.
    #[error("rpc error {code}: {message}")]
    Rpc {
        /// Numeric error code
        code: i32,
        /// Machine-readable error tag
        message: String,
    },

    /// The server rejected the carrying message with a terminal reason
    /// code. Recoverable codes (clock skew, sequence drift) never surface
    /// here; they are retransmitted silently.
    #[error("message rejected by server: code {code}")]
    BadMessage {
        /// The terminal reason code
        code: i32,
    },

    /// The result arrived but the schema capability could not decode it
    #[error("result decoding failed: {0}")]
    Schema(#[from] SchemaError),

    /// The caller cancelled the call before a result arrived
    #[error("call cancelled")]
    Cancelled,

    /// The session was torn down by explicit disconnect before a result
    /// arrived
    #[error("session closed with call outstanding")]
    Dropped,

    /// The serialized request alone exceeds the per-frame byte budget
    #[error("request payload of {size} bytes exceeds frame budget {max}")]
    PayloadTooBig {
        /// Serialized request size
        size: usize,
        /// Per-frame byte budget
        max: usize,
    },
}

impl CallError {
    /// True when the failure came from the caller's side (cancellation or
    /// explicit disconnect) rather than from the server.
    #[must_use]
    pub const fn is_local(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Dropped)
    }
}

/// Sender-level failures.
#[derive(Error, Debug)]
pub enum SenderError {
    /// Every connection attempt failed, primary and fallback alike
    #[error("connection failed after {attempts} attempts: {last}")]
    ConnectFailed {
        /// Attempts made before giving up
        attempts: u32,
        /// The last transport error observed
        last: std::io::Error,
    },

    /// Operation requires a connected session
    #[error("not connected")]
    NotConnected,

    /// The authorization key is not recognized by the server. Reconnecting
    /// cannot help; the owning application must re-authenticate.
    #[error("authorization key rejected by server")]
    AuthKeyBroken,

    /// Internal consistency violation; indicates a bug, not a network
    /// condition
    #[error("internal error: {0}")]
    Internal(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_errors_classified() {
        assert!(CallError::Cancelled.is_local());
        assert!(CallError::Dropped.is_local());
        assert!(!CallError::Rpc { code: 400, message: "BAD_REQUEST".into() }.is_local());
        assert!(!CallError::BadMessage { code: 48 }.is_local());
    }
}
