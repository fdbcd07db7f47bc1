//! Frame cipher capability.
//!
//! Key derivation, the encryption scheme, and integrity protection are
//! external: the session layer hands over the plaintext frame (salt,
//! session id, envelope) and gets ciphertext back, or the reverse. The
//! cipher owns the authorization key and the padding scheme; decrypted
//! plaintext is returned padding included, and the session layer validates
//! the padding slack.

use thiserror::Error;

/// Failures at the cipher boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CipherError {
    /// No key material available to encrypt or decrypt
    #[error("authorization key unset")]
    MissingKey,

    /// Integrity check failed on a received frame. The frame is discarded;
    /// the connection survives.
    #[error("frame failed integrity check")]
    IntegrityFailure,

    /// Ciphertext is structurally invalid (bad length, wrong key id
    /// prefix). Treated as connection-fatal corruption.
    #[error("malformed ciphertext: {0}")]
    Malformed(String),

    /// The server does not recognize our authorization key. Fatal to the
    /// whole session, not just the connection: the owner must
    /// re-authenticate.
    #[error("authorization key not recognized by server")]
    AuthKeyUnknown,
}

/// Symmetric frame encryption, supplied by the caller.
pub trait FrameCipher: Send + Sync + 'static {
    /// Encrypt a plaintext frame into wire bytes.
    ///
    /// # Errors
    ///
    /// [`CipherError::MissingKey`] when no key is installed.
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError>;

    /// Decrypt wire bytes into a plaintext frame (padding included).
    ///
    /// Implementations are expected to surface short error frames the
    /// server sends in place of ciphertext: a negative four-byte error
    /// code maps to [`CipherError::AuthKeyUnknown`] for the key-not-found
    /// code and [`CipherError::Malformed`] otherwise.
    ///
    /// # Errors
    ///
    /// See [`CipherError`] for the failure taxonomy and how the session
    /// layer reacts to each variant.
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CipherError>;
}
