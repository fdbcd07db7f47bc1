//! Service payloads: pings, acknowledgments, salt management, and the
//! correction messages that keep a session healthy.
//!
//! Decoders assume the constructor id has already been consumed during
//! classification; encoders write it. Only the payloads a client ever sends
//! carry an `encode`.

use bytes::{Buf, BufMut, Bytes};

use crate::{
    errors::{ProtocolError, Result},
    ids::constructors,
    primitives::{ensure, read_bytes, read_i64_vector, write_bytes, write_i64_vector},
};

/// Keepalive ping carrying a caller-chosen id echoed back in the reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ping {
    /// Opaque id matched against the eventual [`Pong`]
    pub ping_id: i64,
}

impl Ping {
    /// Encode, constructor included.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u32_le(constructors::PING);
        dst.put_i64_le(self.ping_id);
    }
}

/// Reply to a ping. Arrives outside any call result but still answers a
/// pending message; its own msg id doubles as clock-skew evidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pong {
    /// Message id of the ping being answered
    pub msg_id: i64,
    /// Echoed ping id
    pub ping_id: i64,
}

impl Pong {
    /// Decode (constructor already consumed).
    ///
    /// # Errors
    ///
    /// [`ProtocolError::Truncated`] if either id is missing.
    pub fn decode(buf: &mut impl Buf) -> Result<Self> {
        ensure(buf, 16)?;
        Ok(Self { msg_id: buf.get_i64_le(), ping_id: buf.get_i64_le() })
    }
}

/// Salt correction: a frame was sent under a stale server salt.
///
/// Carries the salt to adopt; every message sent under the rejected id must
/// be retransmitted, which the dispatcher arranges via the pending table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BadServerSalt {
    /// Message id the server rejected
    pub bad_msg_id: i64,
    /// Sequence number of the rejected message
    pub bad_msg_seqno: i32,
    /// Numeric reason (always the salt code, kept for logging)
    pub error_code: i32,
    /// Replacement salt to use from now on
    pub new_server_salt: i64,
}

impl BadServerSalt {
    /// Decode (constructor already consumed).
    ///
    /// # Errors
    ///
    /// [`ProtocolError::Truncated`] on short input.
    pub fn decode(buf: &mut impl Buf) -> Result<Self> {
        ensure(buf, 24)?;
        Ok(Self {
            bad_msg_id: buf.get_i64_le(),
            bad_msg_seqno: buf.get_i32_le(),
            error_code: buf.get_i32_le(),
            new_server_salt: buf.get_i64_le(),
        })
    }
}

/// What a bad-message reason code means for the affected calls.
///
/// The mapping is deliberately data-driven and lives here, next to the
/// payload, so correcting a code never touches the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BadMsgPolicy {
    /// Message id derived from a skewed clock: fix the offset, retransmit
    ClockSkew,
    /// Sequence number too low: bump the counter, retransmit
    SeqNoTooLow,
    /// Sequence number too high: pull the counter back, retransmit
    SeqNoTooHigh,
    /// Anything else: reject the affected calls with a typed error
    Terminal,
}

/// Rejection of a specific message with a numeric reason code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BadMsgNotification {
    /// Message id the server rejected
    pub bad_msg_id: i64,
    /// Sequence number of the rejected message
    pub bad_msg_seqno: i32,
    /// Numeric reason code, interpreted through [`Self::policy`]
    pub error_code: i32,
}

impl BadMsgNotification {
    /// Decode (constructor already consumed).
    ///
    /// # Errors
    ///
    /// [`ProtocolError::Truncated`] on short input.
    pub fn decode(buf: &mut impl Buf) -> Result<Self> {
        ensure(buf, 16)?;
        Ok(Self {
            bad_msg_id: buf.get_i64_le(),
            bad_msg_seqno: buf.get_i32_le(),
            error_code: buf.get_i32_le(),
        })
    }

    /// Recovery policy for this notification's reason code.
    ///
    /// Codes 16 and 17 are "id too low / too high", both symptoms of a
    /// wrong local clock. Codes 32 and 33 are sequence drift. Every other
    /// code is terminal for the affected calls.
    #[must_use]
    pub const fn policy(&self) -> BadMsgPolicy {
        match self.error_code {
            16 | 17 => BadMsgPolicy::ClockSkew,
            32 => BadMsgPolicy::SeqNoTooLow,
            33 => BadMsgPolicy::SeqNoTooHigh,
            _ => BadMsgPolicy::Terminal,
        }
    }
}

/// Bare acknowledgment of received message ids. Advisory only: it resolves
/// nothing and is itself never acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsgsAck {
    /// Ids being acknowledged
    pub msg_ids: Vec<i64>,
}

impl MsgsAck {
    /// Decode (constructor already consumed).
    ///
    /// # Errors
    ///
    /// Propagates vector decoding failures.
    pub fn decode(buf: &mut impl Buf) -> Result<Self> {
        Ok(Self { msg_ids: read_i64_vector(buf)? })
    }

    /// Encode, constructor included.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u32_le(constructors::MSGS_ACK);
        write_i64_vector(dst, &self.msg_ids);
    }

    /// Encode into a fresh body buffer.
    #[must_use]
    pub fn to_body(&self) -> Bytes {
        let mut out = Vec::with_capacity(16 + self.msg_ids.len() * 8);
        self.encode(&mut out);
        Bytes::from(out)
    }
}

/// Server-side notice that a new session was created for us; carries the
/// salt that is current from now on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewSessionCreated {
    /// First message id valid in the new session
    pub first_msg_id: i64,
    /// Server-chosen unique id for the session
    pub unique_id: i64,
    /// Salt to adopt
    pub server_salt: i64,
}

impl NewSessionCreated {
    /// Decode (constructor already consumed).
    ///
    /// # Errors
    ///
    /// [`ProtocolError::Truncated`] on short input.
    pub fn decode(buf: &mut impl Buf) -> Result<Self> {
        ensure(buf, 24)?;
        Ok(Self {
            first_msg_id: buf.get_i64_le(),
            unique_id: buf.get_i64_le(),
            server_salt: buf.get_i64_le(),
        })
    }
}

/// One future salt with its validity window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FutureSalt {
    /// Unix time the salt becomes valid
    pub valid_since: i32,
    /// Unix time the salt expires
    pub valid_until: i32,
    /// The salt value
    pub salt: i64,
}

/// Response to an explicit future-salts request. The core only ferries the
/// payload to the awaiting caller; rotation scheduling is theirs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FutureSalts {
    /// Message id of the request being answered
    pub req_msg_id: i64,
    /// Server time the response was generated
    pub now: i32,
    /// Salts, soonest first
    pub salts: Vec<FutureSalt>,
}

impl FutureSalts {
    /// Decode (constructor already consumed). The salt list is a bare
    /// count-prefixed sequence, not a tagged vector.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::Truncated`] or [`ProtocolError::InvalidLength`] on
    /// malformed input.
    pub fn decode(buf: &mut impl Buf) -> Result<Self> {
        ensure(buf, 16)?;
        let req_msg_id = buf.get_i64_le();
        let now = buf.get_i32_le();
        let count = buf.get_i32_le();
        if count < 0 {
            return Err(ProtocolError::InvalidLength(count));
        }

        ensure(buf, (count as usize).saturating_mul(16))?;
        let mut salts = Vec::with_capacity(count as usize);
        for _ in 0..count {
            salts.push(FutureSalt {
                valid_since: buf.get_i32_le(),
                valid_until: buf.get_i32_le(),
                salt: buf.get_i64_le(),
            });
        }
        Ok(Self { req_msg_id, now, salts })
    }
}

/// Delivery status for a message we sent; the referenced answer id must be
/// acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsgDetailedInfo {
    /// Id of our original message
    pub msg_id: i64,
    /// Id of the server's answer, to be acknowledged
    pub answer_msg_id: i64,
    /// Size of the answer in bytes
    pub bytes: i32,
    /// Delivery status flags
    pub status: i32,
}

impl MsgDetailedInfo {
    /// Decode (constructor already consumed).
    ///
    /// # Errors
    ///
    /// [`ProtocolError::Truncated`] on short input.
    pub fn decode(buf: &mut impl Buf) -> Result<Self> {
        ensure(buf, 24)?;
        Ok(Self {
            msg_id: buf.get_i64_le(),
            answer_msg_id: buf.get_i64_le(),
            bytes: buf.get_i32_le(),
            status: buf.get_i32_le(),
        })
    }
}

/// Like [`MsgDetailedInfo`], for an answer whose original we never saw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsgNewDetailedInfo {
    /// Id of the server's answer, to be acknowledged
    pub answer_msg_id: i64,
    /// Size of the answer in bytes
    pub bytes: i32,
    /// Delivery status flags
    pub status: i32,
}

impl MsgNewDetailedInfo {
    /// Decode (constructor already consumed).
    ///
    /// # Errors
    ///
    /// [`ProtocolError::Truncated`] on short input.
    pub fn decode(buf: &mut impl Buf) -> Result<Self> {
        ensure(buf, 16)?;
        Ok(Self {
            answer_msg_id: buf.get_i64_le(),
            bytes: buf.get_i32_le(),
            status: buf.get_i32_le(),
        })
    }
}

/// The server forgot the state of some of our messages and asks about them.
/// Answered with a synthetic [`MsgsStateInfo`], never awaited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsgsStateReq {
    /// Ids the server is asking about
    pub msg_ids: Vec<i64>,
}

impl MsgsStateReq {
    /// Decode (constructor already consumed). Also used for resend
    /// requests, which share the shape.
    ///
    /// # Errors
    ///
    /// Propagates vector decoding failures.
    pub fn decode(buf: &mut impl Buf) -> Result<Self> {
        Ok(Self { msg_ids: read_i64_vector(buf)? })
    }
}

/// Our reply to a state or resend request: one status byte per queried id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsgsStateInfo {
    /// Message id of the request being answered
    pub req_msg_id: i64,
    /// Status bytes, one per queried id
    pub info: Bytes,
}

impl MsgsStateInfo {
    /// Encode, constructor included.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u32_le(constructors::MSGS_STATE_INFO);
        dst.put_i64_le(self.req_msg_id);
        write_bytes(dst, &self.info);
    }

    /// Encode into a fresh body buffer.
    #[must_use]
    pub fn to_body(&self) -> Bytes {
        let mut out = Vec::with_capacity(20 + self.info.len());
        self.encode(&mut out);
        Bytes::from(out)
    }
}

/// Informational summary of message states. Requires no action and no
/// acknowledgment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsgsAllInfo {
    /// Ids covered by the summary
    pub msg_ids: Vec<i64>,
    /// Status bytes, one per id
    pub info: Bytes,
}

impl MsgsAllInfo {
    /// Decode (constructor already consumed).
    ///
    /// # Errors
    ///
    /// Propagates vector and byte-string decoding failures.
    pub fn decode(buf: &mut impl Buf) -> Result<Self> {
        let msg_ids = read_i64_vector(buf)?;
        let info = read_bytes(buf)?;
        Ok(Self { msg_ids, info })
    }
}

/// Long-poll control call: asks the server to hold the request open until
/// it has data to push or the wait window closes. Only meaningful on the
/// fallback transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpWait {
    /// Maximum delay before the server may respond early, in ms
    pub max_delay: i32,
    /// Extra wait after new data arrives, in ms
    pub wait_after: i32,
    /// Maximum total time the server holds the request, in ms
    pub max_wait: i32,
}

impl HttpWait {
    /// Encode, constructor included.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u32_le(constructors::HTTP_WAIT);
        dst.put_i32_le(self.max_delay);
        dst.put_i32_le(self.wait_after);
        dst.put_i32_le(self.max_wait);
    }

    /// Encode into a fresh body buffer.
    #[must_use]
    pub fn to_body(&self) -> Bytes {
        let mut out = Vec::with_capacity(16);
        self.encode(&mut out);
        Bytes::from(out)
    }
}
