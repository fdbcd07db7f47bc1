//! Toy frame cipher for simulation.
//!
//! No secrecy, but the same failure surface as the real thing: a key-id
//! prefix, a checksum standing in for the integrity tag, the short
//! error-code frames servers substitute for ciphertext, and switches for
//! injecting each failure mode from tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::{Buf, BufMut};
use tern_core::{CipherError, FrameCipher};

/// Server-side error code meaning "authorization key not found".
pub(crate) const AUTH_KEY_UNKNOWN_CODE: i32 = -404;

const PADDING: usize = 12;

fn checksum(data: &[u8]) -> u64 {
    // FNV-1a, enough to notice flipped bits
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in data {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

/// Shared-state stand-in for the symmetric frame cipher.
///
/// Wire layout: `key_id (8) | payload | padding (12) | checksum (8)`.
/// Clones share the fault switches, so a test can hold one handle and
/// flip behavior underneath a running sender.
#[derive(Clone)]
pub struct PlainCipher {
    key_id: i64,
    key_missing: Arc<AtomicBool>,
}

impl PlainCipher {
    /// Cipher with the given key id.
    pub fn new(key_id: i64) -> Self {
        Self { key_id, key_missing: Arc::new(AtomicBool::new(false)) }
    }

    /// Simulate the authorization key disappearing locally.
    pub fn set_key_missing(&self, missing: bool) {
        self.key_missing.store(missing, Ordering::SeqCst);
    }

    /// Build the short error frame a server sends in place of ciphertext.
    pub fn error_frame(code: i32) -> Vec<u8> {
        code.to_le_bytes().to_vec()
    }

    /// Corrupt an encrypted frame so the integrity check fails.
    pub fn corrupt(mut frame: Vec<u8>) -> Vec<u8> {
        if let Some(byte) = frame.get_mut(12) {
            *byte ^= 0xff;
        }
        frame
    }
}

impl FrameCipher for PlainCipher {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
        if self.key_missing.load(Ordering::SeqCst) {
            return Err(CipherError::MissingKey);
        }
        let mut out = Vec::with_capacity(plaintext.len() + 28);
        out.put_i64_le(self.key_id);
        out.put_slice(plaintext);
        out.put_bytes(0, PADDING);
        out.put_u64_le(checksum(plaintext));
        Ok(out)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CipherError> {
        if self.key_missing.load(Ordering::SeqCst) {
            return Err(CipherError::MissingKey);
        }

        // Short frames carry a bare error code instead of ciphertext.
        if ciphertext.len() == 4 {
            let code = i32::from_le_bytes(ciphertext.try_into().expect("checked length"));
            return if code == AUTH_KEY_UNKNOWN_CODE {
                Err(CipherError::AuthKeyUnknown)
            } else {
                Err(CipherError::Malformed(format!("server error code {code}")))
            };
        }

        if ciphertext.len() < 16 + PADDING {
            return Err(CipherError::Malformed("frame shorter than cipher framing".into()));
        }

        let mut buf = ciphertext;
        let key_id = buf.get_i64_le();
        if key_id != self.key_id {
            return Err(CipherError::IntegrityFailure);
        }

        let payload_len = ciphertext.len() - 16 - PADDING;
        let payload = &ciphertext[8..8 + payload_len];
        let tag = u64::from_le_bytes(
            ciphertext[ciphertext.len() - 8..].try_into().expect("checked length"),
        );
        if tag != checksum(payload) {
            return Err(CipherError::IntegrityFailure);
        }

        // Return payload plus padding: the session layer validates the
        // padding slack itself.
        Ok(ciphertext[8..ciphertext.len() - 8].to_vec())
    }
}
