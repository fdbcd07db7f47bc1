//! Transport abstraction: an ordered, reliable, message-oriented byte pipe.
//!
//! The session layer assumes nothing about the underlying pipe beyond
//! ordered reliable delivery of whole frames while connected. Two shapes of
//! implementation exist in practice:
//!
//! - **Persistent stream** (socket-like): full duplex, the server can push
//!   at any moment. `is_long_poll()` is false.
//! - **Long-poll fallback** (request/response-shaped): the server can only
//!   answer outstanding requests, so the sender keeps a standing long-poll
//!   call open. `is_long_poll()` is true.
//!
//! The sender selects between a primary and a fallback transport and may
//! switch at runtime; implementations never see that policy.
//!
//! # Contract
//!
//! - `connect()` must return the transport to a fresh, usable state, also
//!   after a previous `disconnect()` or failure. Reconnection reuses the
//!   same instance.
//! - `send`/`recv` operate on whole encrypted frames; no partial delivery.
//! - All methods may be called from different tasks; implementations
//!   handle their own synchronization (methods take `&self`).

use std::io;

use async_trait::async_trait;

/// A bidirectional frame pipe to one peer.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Establish (or re-establish) the connection.
    ///
    /// # Errors
    ///
    /// Returns an `io::Error` when the peer is unreachable or refuses the
    /// connection. The instance must remain safely re-connectable.
    async fn connect(&self) -> io::Result<()>;

    /// Send one whole frame.
    ///
    /// # Errors
    ///
    /// Any error means the connection is unusable; the sender reacts by
    /// tearing it down and reconnecting. In-flight calls are preserved.
    async fn send(&self, frame: &[u8]) -> io::Result<()>;

    /// Receive the next whole frame, suspending until one is available.
    ///
    /// # Errors
    ///
    /// Any error means the connection is closed or broken. A clean
    /// server-side close is an error too (`UnexpectedEof`), because the
    /// session treats every involuntary close the same way: reconnect.
    async fn recv(&self) -> io::Result<Vec<u8>>;

    /// Tear the connection down. Idempotent; never fails.
    async fn disconnect(&self);

    /// Whether the transport currently considers itself connected.
    fn is_connected(&self) -> bool;

    /// True for request/response-shaped transports that need a standing
    /// long-poll call to receive server pushes.
    fn is_long_poll(&self) -> bool {
        false
    }
}
