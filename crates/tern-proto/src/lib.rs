//! Wire format for the tern protocol.
//!
//! This crate contains the pure data layer: message envelopes, constructor
//! ids, control payload codecs, and the compression wrapper. It performs no
//! I/O and holds no session state, which keeps every codec testable in
//! isolation and fuzzable without a network.
//!
//! # Layers
//!
//! ```text
//! ciphertext frame                      (tern-core + cipher capability)
//!   └── plaintext frame: salt | session_id | envelope
//!         └── Envelope: msg_id | seq_no | len | body
//!               └── body: constructor id + payload
//!                     ├── control payloads (this crate)
//!                     ├── containers of further envelopes
//!                     ├── gzip-wrapped inner bodies
//!                     └── application calls/updates (opaque here)
//! ```
//!
//! All integers on the wire are little-endian. A body always begins with a
//! `u32` constructor id; [`MessageKind::from_constructor`] classifies the
//! ids this layer understands and leaves everything else to the schema
//! capability upstream.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod envelope;
mod errors;
mod ids;
pub mod payloads;
mod primitives;
mod wrap;

pub use envelope::{Envelope, ENVELOPE_OVERHEAD};
pub use errors::{ProtocolError, Result};
pub use ids::{constructors, MessageKind};
pub use primitives::{read_bytes, read_i64_vector, write_bytes, write_i64_vector};
pub use wrap::{gzip_if_smaller, gzip_pack, gzip_unpack, invoke_after, COMPRESS_MIN};
