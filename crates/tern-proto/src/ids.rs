//! Constructor ids and message-kind classification.
//!
//! Every body starts with a `u32` constructor id. The ids this layer knows
//! about are the protocol-control constructors; anything else is either an
//! application call result or a server-initiated update, both opaque here.
//!
//! # Security
//!
//! - **Unknown constructors**: [`MessageKind::from_constructor`] is total
//!   and returns [`MessageKind::Other`] for ids it does not recognize.
//!   Whether an unknown body is an update or garbage is decided upstream by
//!   the schema capability; nothing is silently executed based on an
//!   unrecognized id.

use bytes::Buf;

use crate::errors::{ProtocolError, Result};

/// Raw constructor id constants.
///
/// Grouped by direction: ids the client both sends and receives, ids only
/// ever received, and ids only ever sent.
pub mod constructors {
    /// Generic vector wrapper
    pub const VECTOR: u32 = 0x1cb5_c415;

    // Received
    /// Call result carrying a response body
    pub const RPC_RESULT: u32 = 0xf35c_6d01;
    /// Application-level error inside a call result
    pub const RPC_ERROR: u32 = 0x2144_ca19;
    /// Bundle of independent envelopes
    pub const CONTAINER: u32 = 0x73f1_f8dc;
    /// Gzip-wrapped inner body
    pub const GZIP_PACKED: u32 = 0x3072_cfa1;
    /// Reply to a ping
    pub const PONG: u32 = 0x3477_73c5;
    /// Salt correction: the frame was sent under a stale salt
    pub const BAD_SERVER_SALT: u32 = 0xedab_447b;
    /// Rejection of a specific message with a numeric reason code
    pub const BAD_MSG_NOTIFICATION: u32 = 0xa7ef_f811;
    /// Bare acknowledgment of received message ids
    pub const MSGS_ACK: u32 = 0x62d6_b459;
    /// Server opened a fresh session for us
    pub const NEW_SESSION_CREATED: u32 = 0x9ec2_0908;
    /// Upcoming salts, answering an explicit request
    pub const FUTURE_SALTS: u32 = 0xae50_0895;
    /// Delivery status for a message we sent
    pub const MSG_DETAILED_INFO: u32 = 0x276d_3ec6;
    /// Delivery status for a message whose original we never saw
    pub const MSG_NEW_DETAILED_INFO: u32 = 0x809d_b6df;
    /// Server forgot our message state and asks for it
    pub const MSGS_STATE_REQ: u32 = 0xda69_fb52;
    /// Server asks us to resend specific messages
    pub const MSG_RESEND_REQ: u32 = 0x7d86_1a08;
    /// Summary state for a set of messages; informational only
    pub const MSGS_ALL_INFO: u32 = 0x8cc0_d131;

    // Sent
    /// Ping keepalive
    pub const PING: u32 = 0x7abe_77ec;
    /// Reply to a state request
    pub const MSGS_STATE_INFO: u32 = 0x04de_b57d;
    /// Long-poll control call holding the request open server-side
    pub const HTTP_WAIT: u32 = 0x9299_359f;
    /// Dependency wrapper: run the query only after another message id
    pub const INVOKE_AFTER: u32 = 0xcb9f_372d;
}

/// Typed classification of a decrypted body, keyed off its constructor id.
///
/// This enum drives the dispatcher table: each variant maps to exactly one
/// handling policy. [`MessageKind::Other`] covers application payloads
/// (call results arrive as [`MessageKind::RpcResult`]; everything the
/// schema capability recognizes as an update is forwarded, the rest is
/// logged and dropped).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Result for a previously sent call
    RpcResult,
    /// Bundle of inner envelopes, each dispatched independently
    Container,
    /// Compressed body, unwrap then re-dispatch
    GzipPacked,
    /// Ping reply
    Pong,
    /// Salt correction
    BadServerSalt,
    /// Per-message rejection with a reason code
    BadMsgNotification,
    /// Bare acknowledgment, advisory only
    MsgsAck,
    /// New-session notice carrying the salt to adopt
    NewSessionCreated,
    /// Future-salts response
    FutureSalts,
    /// Delivery info; referenced answer id needs acknowledgment
    MsgDetailedInfo,
    /// Delivery info without a known original
    MsgNewDetailedInfo,
    /// Server-side state request; answered with a synthetic reply
    MsgsStateReq,
    /// Resend request; answered like a state request
    MsgResendReq,
    /// Informational message state summary
    MsgsAllInfo,
    /// Not a control constructor: application result body or update
    Other(u32),
}

impl MessageKind {
    /// Classify a constructor id.
    ///
    /// Total over all `u32` values; unknown ids land in [`Self::Other`].
    #[must_use]
    pub const fn from_constructor(id: u32) -> Self {
        match id {
            constructors::RPC_RESULT => Self::RpcResult,
            constructors::CONTAINER => Self::Container,
            constructors::GZIP_PACKED => Self::GzipPacked,
            constructors::PONG => Self::Pong,
            constructors::BAD_SERVER_SALT => Self::BadServerSalt,
            constructors::BAD_MSG_NOTIFICATION => Self::BadMsgNotification,
            constructors::MSGS_ACK => Self::MsgsAck,
            constructors::NEW_SESSION_CREATED => Self::NewSessionCreated,
            constructors::FUTURE_SALTS => Self::FutureSalts,
            constructors::MSG_DETAILED_INFO => Self::MsgDetailedInfo,
            constructors::MSG_NEW_DETAILED_INFO => Self::MsgNewDetailedInfo,
            constructors::MSGS_STATE_REQ => Self::MsgsStateReq,
            constructors::MSG_RESEND_REQ => Self::MsgResendReq,
            constructors::MSGS_ALL_INFO => Self::MsgsAllInfo,
            other => Self::Other(other),
        }
    }

    /// Classify a body by peeking at its leading constructor id.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Truncated`] if the body is shorter than the
    /// 4-byte constructor id.
    pub fn of_body(body: &[u8]) -> Result<Self> {
        let mut buf = body;
        if buf.remaining() < 4 {
            return Err(ProtocolError::Truncated { needed: 4, remaining: buf.remaining() });
        }
        Ok(Self::from_constructor(buf.get_u32_le()))
    }
}
