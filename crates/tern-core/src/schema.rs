//! Schema capability: the only window the session layer has into the
//! wrapped application protocol.
//!
//! The core moves opaque byte bodies. Three questions require knowledge of
//! the application schema, and only these three cross the boundary:
//!
//! 1. Is this non-control body an update worth forwarding?
//! 2. Given the original request, is this result body well-formed?
//! 3. How should an embedded application error map to a typed error?

use bytes::Bytes;
use thiserror::Error;

use crate::error::CallError;

/// Failures raised by the schema capability.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    /// The result body does not decode as the type the request declared
    #[error("result does not match request shape: {0}")]
    ResultMismatch(String),

    /// The body's constructor is unknown to the schema
    #[error("unknown constructor {0:#010x}")]
    UnknownConstructor(u32),
}

/// Application-schema knowledge, supplied by the caller.
pub trait Schema: Send + Sync + 'static {
    /// Whether a non-control body is a server-initiated update the
    /// application wants forwarded. Bodies that are neither call results
    /// nor updates are logged and dropped.
    fn is_update(&self, body: &[u8]) -> bool;

    /// Validate and decode a result body against the request that
    /// produced it, returning the bytes to hand to the awaiter.
    ///
    /// # Errors
    ///
    /// [`SchemaError`] when the body does not match the declared shape;
    /// the awaiter sees it as [`CallError::Schema`].
    fn decode_result(&self, request: &[u8], result: &[u8]) -> Result<Bytes, SchemaError>;

    /// Map an application-level error to the typed error the awaiter
    /// receives. The default keeps the numeric code and tag as-is.
    fn map_rpc_error(&self, code: i32, message: &str) -> CallError {
        CallError::Rpc { code, message: message.to_owned() }
    }
}
