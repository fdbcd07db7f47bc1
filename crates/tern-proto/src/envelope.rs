//! Message envelope: the unit the session layer encrypts and dispatches.
//!
//! An envelope pairs a message id and sequence number with an opaque body.
//! Containers nest envelopes; everything else about the body is interpreted
//! by the payload codecs or the schema capability.
//!
//! # Invariants
//!
//! - **Length consistency**: the encoded `len` field always matches
//!   `body.len()`; [`Envelope::encode`] derives it and [`Envelope::decode`]
//!   verifies it against the remaining buffer.
//! - **Alignment**: bodies are a multiple of 4 bytes on the wire. Decoding
//!   rejects misaligned lengths; encoders in this crate only ever produce
//!   aligned bodies.

use bytes::{Buf, BufMut, Bytes};

use crate::errors::{ProtocolError, Result};

/// Bytes added around a body by the envelope: id (8) + seq (4) + len (4).
pub const ENVELOPE_OVERHEAD: usize = 16;

/// One protocol message: id, sequence number, and raw body bytes.
///
/// The body is held as [`Bytes`], so cloning an envelope is cheap. This
/// matters when a container is split into members that are dispatched (and
/// possibly re-queued) independently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Message id: time-derived, monotonic, divisible by 4
    pub msg_id: i64,
    /// Sequence number: odd for content-related messages, even otherwise
    pub seq_no: i32,
    /// Raw body, starting with a constructor id
    pub body: Bytes,
}

impl Envelope {
    /// Create an envelope over the given body.
    #[must_use]
    pub fn new(msg_id: i64, seq_no: i32, body: impl Into<Bytes>) -> Self {
        Self { msg_id, seq_no, body: body.into() }
    }

    /// Total encoded size of this envelope.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        ENVELOPE_OVERHEAD + self.body.len()
    }

    /// Whether the sequence number marks a content-related message.
    #[must_use]
    pub const fn is_content_related(&self) -> bool {
        self.seq_no % 2 == 1
    }

    /// Write `msg_id | seq_no | len | body` into `dst`.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_i64_le(self.msg_id);
        dst.put_i32_le(self.seq_no);
        dst.put_i32_le(self.body.len() as i32);
        dst.put_slice(&self.body);
    }

    /// Decode one envelope from `buf`, consuming exactly its bytes.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::Truncated`] if the header or the announced body
    ///   does not fit in the remaining buffer
    /// - [`ProtocolError::InvalidLength`] if the announced length is
    ///   negative or not a multiple of 4
    pub fn decode(buf: &mut impl Buf) -> Result<Self> {
        if buf.remaining() < ENVELOPE_OVERHEAD {
            return Err(ProtocolError::Truncated {
                needed: ENVELOPE_OVERHEAD,
                remaining: buf.remaining(),
            });
        }

        let msg_id = buf.get_i64_le();
        let seq_no = buf.get_i32_le();
        let len = buf.get_i32_le();

        if len < 0 || len % 4 != 0 {
            return Err(ProtocolError::InvalidLength(len));
        }
        let len = len as usize;

        if buf.remaining() < len {
            return Err(ProtocolError::Truncated { needed: len, remaining: buf.remaining() });
        }

        Ok(Self { msg_id, seq_no, body: buf.copy_to_bytes(len) })
    }
}
