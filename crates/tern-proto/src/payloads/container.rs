//! Container payload: several independent envelopes in one frame.
//!
//! Containers exist so a burst of small calls and piggybacked acks costs a
//! single transport write and a single encryption pass. Members are fully
//! independent: the receiver dispatches each on its own, and a failed
//! container is never retried as a unit, only member by member.

use bytes::{Buf, BufMut};

use crate::{
    envelope::Envelope,
    errors::{ProtocolError, Result},
    ids::constructors,
};

/// A bundle of envelopes sharing one outer frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    /// Member envelopes in wire order
    pub messages: Vec<Envelope>,
}

impl Container {
    /// Maximum total bytes of member content per container.
    pub const MAX_PAYLOAD: usize = 1_044_448;

    /// Maximum number of member envelopes per container.
    pub const MAX_MESSAGES: usize = 100;

    /// Decode a container body (constructor id already consumed).
    ///
    /// # Errors
    ///
    /// Fails on truncation, on a negative count, on more members than
    /// [`Self::MAX_MESSAGES`], or on any malformed member envelope.
    pub fn decode(buf: &mut impl Buf) -> Result<Self> {
        if buf.remaining() < 4 {
            return Err(ProtocolError::Truncated { needed: 4, remaining: buf.remaining() });
        }
        let count = buf.get_i32_le();
        if count < 0 {
            return Err(ProtocolError::InvalidLength(count));
        }
        let count = count as usize;
        if count > Self::MAX_MESSAGES {
            return Err(ProtocolError::ContainerTooLong { count, max: Self::MAX_MESSAGES });
        }

        let mut messages = Vec::with_capacity(count);
        for _ in 0..count {
            messages.push(Envelope::decode(buf)?);
        }
        Ok(Self { messages })
    }

    /// Encode the container body, constructor id included.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u32_le(constructors::CONTAINER);
        dst.put_i32_le(self.messages.len() as i32);
        for message in &self.messages {
            message.encode(dst);
        }
    }
}
