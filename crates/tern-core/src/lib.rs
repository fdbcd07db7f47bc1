//! Session manager for the tern protocol.
//!
//! This crate turns outgoing calls into wire-ready encrypted frames,
//! tracks which calls await a response, decodes and dispatches incoming
//! frames, and keeps the session alive across network failures by
//! reconnecting and, when necessary, switching transports.
//!
//! # Architecture
//!
//! Protocol logic is sans-IO wherever possible and reaches the outside
//! world only through four capability traits:
//!
//! ```text
//!              ┌───────────────────────────────┐
//!              │ tern-core                     │
//!              │  SessionState  PendingCalls   │
//!              │  MessagePacker dispatcher     │
//!              │  Sender loops + supervisor    │
//!              └───────────────────────────────┘
//!                 │         │        │      │
//!            Transport  FrameCipher  Schema Environment
//!            (bytes)    (crypto)     (app)  (time/rng)
//! ```
//!
//! The caller-facing contract is deliberately small: submit a request,
//! eventually observe exactly one typed result or error. Everything
//! recoverable by retransmission or reconnection is absorbed inside;
//! only outcomes that need a caller decision cross the boundary.
//!
//! # Concurrency
//!
//! Each session owns one send loop, one receive loop, and (on the
//! fallback transport) one long-poll loop. The pending-call table and the
//! packer are the synchronization points; both are cheaply cloneable
//! handles over shared state. Multiple sessions run fully independently.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod config;
pub mod crypto;
mod dispatch;
pub mod env;
pub mod error;
pub mod packer;
pub mod pending;
pub mod schema;
pub mod sender;
pub mod session;
pub mod transport;

pub use config::{LongPollParams, SenderConfig};
pub use crypto::{CipherError, FrameCipher};
pub use env::{Environment, SystemEnv};
pub use error::{CallError, SenderError};
pub use packer::MessagePacker;
pub use pending::{Call, CallResult, OutgoingKind, PendingCalls, RecentAcks};
pub use schema::{Schema, SchemaError};
pub use sender::{CallHandle, EventCallback, Sender, SenderEvent};
pub use session::{FrameError, SessionState};
pub use transport::Transport;
