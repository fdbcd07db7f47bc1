//! Deterministic simulation harness for the tern session manager.
//!
//! Everything here exists to run a real [`tern_core::Sender`] against a
//! scripted in-process peer with no network, no wall clock, and no OS
//! entropy:
//!
//! - [`SimEnv`]: virtual unix clock + seeded RNG
//! - [`MockTransport`] / [`ServerHandle`]: channel-backed transport pair
//!   with fault injection (link drops, refused connects)
//! - [`PlainCipher`]: length-and-checksum "cipher" that makes integrity
//!   and auth-key faults injectable without real cryptography
//! - [`EchoSchema`]: pass-through schema with a marker update constructor
//! - [`ServerSim`]: decrypts client frames and answers per test script
//!
//! Scenario tests live under `tests/`; run them with paused tokio time so
//! backoff delays elapse instantly.

#![forbid(unsafe_code)]

mod cipher;
mod mock;
mod schema;
mod server;
mod sim_env;

pub use cipher::PlainCipher;
pub use mock::{pair, MockTransport, ServerHandle};
pub use schema::{EchoSchema, UPDATE_MARKER};
pub use server::{extract_calls, ClientFrame, ServerSim};
pub use sim_env::SimEnv;
