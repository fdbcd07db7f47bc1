//! Control payload codecs and the decoded [`ControlMessage`] enum.
//!
//! One module per payload family, mirroring the wire grouping: call results
//! ([`rpc`]), bundled envelopes ([`container`]), and the service messages
//! that keep a session healthy ([`service`]).
//!
//! # Design
//!
//! The dispatcher in tern-core works on [`ControlMessage`], a tagged enum
//! decoded in one step from a body. This replaces constructor-keyed
//! callback tables with an exhaustive `match`: adding a variant is a
//! compile error at every dispatch site until it is handled.

pub mod container;
pub mod rpc;
pub mod service;

use bytes::{Buf, Bytes};

pub use container::Container;
pub use rpc::{RpcError, RpcResult};
pub use service::{
    BadMsgNotification, BadMsgPolicy, BadServerSalt, FutureSalt, FutureSalts, HttpWait,
    MsgDetailedInfo, MsgNewDetailedInfo, MsgsAck, MsgsAllInfo, MsgsStateInfo, MsgsStateReq,
    NewSessionCreated, Ping, Pong,
};

use crate::{
    errors::Result,
    ids::MessageKind,
    wrap::gzip_unpack,
};

/// A fully decoded control-layer message.
///
/// Application payloads are not decoded here: call result bodies stay raw
/// inside [`ControlMessage::RpcResult`], and non-control bodies surface as
/// [`ControlMessage::Other`] for the schema capability to classify.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    /// Result for a previously sent call
    RpcResult(RpcResult),
    /// Bundle of inner envelopes
    Container(Container),
    /// Unwrapped inner body of a compressed message
    GzipPacked(Bytes),
    /// Ping reply
    Pong(Pong),
    /// Salt correction
    BadServerSalt(BadServerSalt),
    /// Per-message rejection
    BadMsgNotification(BadMsgNotification),
    /// Bare acknowledgment
    MsgsAck(MsgsAck),
    /// New-session notice
    NewSessionCreated(NewSessionCreated),
    /// Future-salts response
    FutureSalts(FutureSalts),
    /// Delivery info for a known message
    MsgDetailedInfo(MsgDetailedInfo),
    /// Delivery info for an unknown message
    MsgNewDetailedInfo(MsgNewDetailedInfo),
    /// State request, answered with a synthetic reply
    MsgsStateReq(MsgsStateReq),
    /// Resend request, answered like a state request
    MsgResendReq(MsgsStateReq),
    /// Informational state summary
    MsgsAllInfo(MsgsAllInfo),
    /// Application payload: constructor id plus the untouched body
    Other {
        /// Leading constructor id
        constructor: u32,
        /// The full body, constructor included
        body: Bytes,
    },
}

impl ControlMessage {
    /// Classify and decode a body in one step.
    ///
    /// Compressed bodies are unwrapped one level; the caller re-dispatches
    /// the inner body, which keeps unbounded nesting out of the decoder.
    ///
    /// # Errors
    ///
    /// Fails when the body is shorter than a constructor id or a control
    /// payload is malformed. Unknown constructors are not an error.
    pub fn decode(body: &Bytes) -> Result<Self> {
        let kind = MessageKind::of_body(body)?;
        let mut buf = &body[4..];

        Ok(match kind {
            MessageKind::RpcResult => Self::RpcResult(RpcResult::decode(&mut buf)?),
            MessageKind::Container => Self::Container(Container::decode(&mut buf)?),
            MessageKind::GzipPacked => Self::GzipPacked(gzip_unpack(&mut buf)?),
            MessageKind::Pong => Self::Pong(Pong::decode(&mut buf)?),
            MessageKind::BadServerSalt => Self::BadServerSalt(BadServerSalt::decode(&mut buf)?),
            MessageKind::BadMsgNotification => {
                Self::BadMsgNotification(BadMsgNotification::decode(&mut buf)?)
            }
            MessageKind::MsgsAck => Self::MsgsAck(MsgsAck::decode(&mut buf)?),
            MessageKind::NewSessionCreated => {
                Self::NewSessionCreated(NewSessionCreated::decode(&mut buf)?)
            }
            MessageKind::FutureSalts => Self::FutureSalts(FutureSalts::decode(&mut buf)?),
            MessageKind::MsgDetailedInfo => {
                Self::MsgDetailedInfo(MsgDetailedInfo::decode(&mut buf)?)
            }
            MessageKind::MsgNewDetailedInfo => {
                Self::MsgNewDetailedInfo(MsgNewDetailedInfo::decode(&mut buf)?)
            }
            MessageKind::MsgsStateReq => Self::MsgsStateReq(MsgsStateReq::decode(&mut buf)?),
            MessageKind::MsgResendReq => Self::MsgResendReq(MsgsStateReq::decode(&mut buf)?),
            MessageKind::MsgsAllInfo => Self::MsgsAllInfo(MsgsAllInfo::decode(&mut buf)?),
            MessageKind::Other(constructor) => Self::Other { constructor, body: body.clone() },
        })
    }
}
