//! Call results and the embedded application-level error shape.

use bytes::{Buf, Bytes};

use crate::{
    errors::{ProtocolError, Result},
    ids::constructors,
    primitives::read_string,
};

/// Result for a previously sent call.
///
/// The body is left raw: it may be the declared result type, a gzip-packed
/// version of it, or an [`RpcError`]. The dispatcher peels those layers
/// before handing the bytes to the schema capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcResult {
    /// Message id of the call this result answers
    pub req_msg_id: i64,
    /// Raw result body
    pub body: Bytes,
}

impl RpcResult {
    /// Decode a call result (constructor id already consumed). Consumes the
    /// rest of the buffer as the result body.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Truncated`] if the request id is missing.
    pub fn decode(buf: &mut impl Buf) -> Result<Self> {
        if buf.remaining() < 8 {
            return Err(ProtocolError::Truncated { needed: 8, remaining: buf.remaining() });
        }
        let req_msg_id = buf.get_i64_le();
        let body = buf.copy_to_bytes(buf.remaining());
        Ok(Self { req_msg_id, body })
    }
}

/// Application-level error the server attached to a specific call.
///
/// This is not a protocol failure: the session stays healthy and other
/// in-flight calls are unaffected. The schema capability maps the numeric
/// code and message into whatever typed error the application wants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcError {
    /// Numeric error code (e.g. 400, 420)
    pub code: i32,
    /// Machine-readable error tag
    pub message: String,
}

impl RpcError {
    /// Try to interpret a result body as an error payload.
    ///
    /// Returns `Ok(None)` when the body is not error-shaped, so callers can
    /// fall through to normal result decoding.
    ///
    /// # Errors
    ///
    /// Fails only when the body *is* error-shaped but malformed.
    pub fn from_body(body: &[u8]) -> Result<Option<Self>> {
        let mut buf = body;
        if buf.remaining() < 4 {
            return Ok(None);
        }
        if buf.get_u32_le() != constructors::RPC_ERROR {
            return Ok(None);
        }
        if buf.remaining() < 4 {
            return Err(ProtocolError::Truncated { needed: 4, remaining: buf.remaining() });
        }
        let code = buf.get_i32_le();
        let message = read_string(&mut buf)?;
        Ok(Some(Self { code, message }))
    }
}
