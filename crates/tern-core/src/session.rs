//! Per-session protocol state: identifiers, sequencing, salt, clock skew.
//!
//! `SessionState` owns everything the wire format stamps onto outgoing
//! messages and everything incoming frames are validated against. It holds
//! no I/O and no key material; encryption is delegated to the
//! [`FrameCipher`] capability with this state supplying the frame header.
//!
//! # Lifecycle
//!
//! Created when a session begins. The salt and time offset mutate only in
//! response to specific control messages (the dispatcher's job); sequence
//! and last-id mutate on every packed message. [`SessionState::reset`]
//! clears salt and counters on hard reconnect but keeps the session id;
//! [`SessionState::rotate`] additionally issues a fresh id for when the
//! authorization key itself was replaced.

use std::collections::VecDeque;

use bytes::{Buf, BufMut, Bytes};
use tern_proto::{gzip_if_smaller, invoke_after, Envelope, ProtocolError};

use crate::{
    crypto::{CipherError, FrameCipher},
    env::Environment,
};

/// How many server message ids are remembered for duplicate detection.
const SEEN_IDS_CAPACITY: usize = 500;

/// Allowed slack between plaintext length and the envelope's declared body
/// length: frame header plus padding.
const MIN_PLAINTEXT_SLACK: usize = 12;
const MAX_PLAINTEXT_SLACK: usize = 1024;

/// Failure opening a received frame.
///
/// The receive loop's reaction depends on the variant: security violations
/// and malformed envelopes drop the single frame; cipher failures are
/// classified by [`CipherError`].
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The cipher capability failed
    #[error(transparent)]
    Cipher(#[from] CipherError),

    /// The plaintext violates a session-level check; the frame is not
    /// trustworthy and is dropped
    #[error("security check failed: {0}")]
    Security(&'static str),

    /// The plaintext envelope does not parse
    #[error("malformed frame: {0}")]
    Envelope(#[from] ProtocolError),
}

/// Negotiated state of one logical session.
#[derive(Debug)]
pub struct SessionState {
    session_id: i64,
    salt: i64,
    sequence: i32,
    time_offset: i64,
    last_msg_id: i64,
    seen_ids: VecDeque<i64>,
}

impl SessionState {
    /// Create a fresh session with a random id and zeroed counters.
    pub fn new(env: &impl Environment) -> Self {
        Self {
            session_id: env.random_i64(),
            salt: 0,
            sequence: 0,
            time_offset: 0,
            last_msg_id: 0,
            seen_ids: VecDeque::with_capacity(SEEN_IDS_CAPACITY),
        }
    }

    /// Clear salt and sequencing state for a hard reconnect.
    ///
    /// The session id survives: the logical session continues across
    /// reconnects, and the server re-announces the salt (or corrects it)
    /// once frames flow again. When the *authorization key* itself
    /// changed, the owner should instead start over via
    /// [`SessionState::rotate`].
    pub fn reset(&mut self) {
        self.salt = 0;
        self.sequence = 0;
        self.last_msg_id = 0;
        self.seen_ids.clear();
    }

    /// [`SessionState::reset`] plus a fresh session id, for when the
    /// authorization key was replaced and the old identity must not leak
    /// into the new one.
    pub fn rotate(&mut self, env: &impl Environment) {
        self.reset();
        self.session_id = env.random_i64();
    }

    /// Current server salt.
    #[must_use]
    pub fn salt(&self) -> i64 {
        self.salt
    }

    /// Replace the server salt (salt correction or new-session notice).
    pub fn set_salt(&mut self, salt: i64) {
        self.salt = salt;
    }

    /// Current local-to-server clock offset in seconds.
    #[must_use]
    pub fn time_offset(&self) -> i64 {
        self.time_offset
    }

    /// Nudge the sequence counter after a sequence-drift correction.
    pub fn adjust_sequence(&mut self, delta: i32) {
        self.sequence += delta;
    }

    /// Generate the next outgoing message id.
    ///
    /// Ids are `(adjusted unix seconds) << 32 | nanoseconds << 2`: time-
    /// ordered, unique, and divisible by 4. When the clock stalls or steps
    /// backwards the previous id plus 4 keeps the sequence monotonic.
    pub fn next_msg_id(&mut self, env: &impl Environment) -> i64 {
        let now = env.unix_time();
        let secs = now.as_secs() as i64 + self.time_offset;
        let nanos = i64::from(now.subsec_nanos());

        let mut msg_id = (secs << 32) | (nanos << 2);
        if self.last_msg_id >= msg_id {
            msg_id = self.last_msg_id + 4;
        }
        self.last_msg_id = msg_id;
        msg_id
    }

    /// Next sequence number: odd (and counted) for content-related
    /// messages, even (and uncounted) otherwise.
    pub fn next_seq_no(&mut self, content_related: bool) -> i32 {
        if content_related {
            let seq = self.sequence * 2 + 1;
            self.sequence += 1;
            seq
        } else {
            self.sequence * 2
        }
    }

    /// Frame `body` as a message and append it to `dst`.
    ///
    /// Applies the dependency wrapper when `after_id` is set, then
    /// compress-if-smaller for content-related bodies, then the envelope.
    /// Returns the assigned message id.
    pub fn write_message(
        &mut self,
        dst: &mut impl BufMut,
        body: Bytes,
        content_related: bool,
        after_id: Option<i64>,
        env: &impl Environment,
    ) -> i64 {
        let body = match after_id {
            Some(id) => invoke_after(id, &body),
            None => body,
        };
        let body = gzip_if_smaller(content_related, body);

        let msg_id = self.next_msg_id(env);
        let seq_no = self.next_seq_no(content_related);
        Envelope::new(msg_id, seq_no, body).encode(dst);
        msg_id
    }

    /// Seal an encoded message (or container) into a wire frame.
    ///
    /// Prefixes the current salt and session id, then hands the plaintext
    /// to the cipher.
    ///
    /// # Errors
    ///
    /// Only if the cipher itself fails, e.g. [`CipherError::MissingKey`].
    pub fn encrypt_frame(
        &self,
        cipher: &impl FrameCipher,
        message: &[u8],
    ) -> Result<Vec<u8>, CipherError> {
        let mut plaintext = Vec::with_capacity(16 + message.len());
        plaintext.put_i64_le(self.salt);
        plaintext.put_i64_le(self.session_id);
        plaintext.put_slice(message);
        cipher.encrypt(&plaintext)
    }

    /// Open a wire frame into a validated plaintext envelope.
    ///
    /// Checks, in order: the cipher's integrity verdict, the session id,
    /// envelope structure, the declared-length slack (header plus padding
    /// must stay within protocol bounds), and the duplicate-id ring.
    ///
    /// # Errors
    ///
    /// See [`FrameError`]. A failed frame leaves the session state
    /// untouched apart from the cipher call.
    pub fn decrypt_frame(
        &mut self,
        cipher: &impl FrameCipher,
        raw: &[u8],
    ) -> Result<Envelope, FrameError> {
        let plaintext = cipher.decrypt(raw)?;

        if plaintext.len() < 32 {
            return Err(FrameError::Security("plaintext shorter than frame header"));
        }

        let mut buf = plaintext.as_slice();
        let _salt = buf.get_i64_le();
        let session_id = buf.get_i64_le();
        if session_id != self.session_id {
            return Err(FrameError::Security("frame addressed to another session"));
        }

        let envelope = Envelope::decode(&mut buf)?;

        // Declared length vs plaintext length: the difference covers the
        // 32-byte header plus padding and is bounded by the protocol.
        let slack = plaintext.len() - envelope.body.len();
        if !(MIN_PLAINTEXT_SLACK..=MAX_PLAINTEXT_SLACK).contains(&slack) {
            return Err(FrameError::Security("implausible frame padding"));
        }

        if self.seen_ids.contains(&envelope.msg_id) {
            return Err(FrameError::Security("duplicate server message id"));
        }
        if self.seen_ids.len() >= SEEN_IDS_CAPACITY {
            self.seen_ids.pop_front();
        }
        self.seen_ids.push_back(envelope.msg_id);

        Ok(envelope)
    }

    /// Recompute the clock offset from a message id known to carry correct
    /// server time. Returns the new offset.
    ///
    /// Resets the last generated id when the offset changed, so the next
    /// outgoing id is derived from the corrected clock instead of being
    /// dragged upward by a skewed predecessor.
    pub fn update_time_offset(&mut self, correct_msg_id: i64, env: &impl Environment) -> i64 {
        let old = self.time_offset;
        let now_secs = env.unix_time().as_secs() as i64;
        self.time_offset = (correct_msg_id >> 32) - now_secs;

        if self.time_offset != old {
            self.last_msg_id = 0;
            tracing::debug!(old, new = self.time_offset, "time offset updated");
        }
        self.time_offset
    }
}
