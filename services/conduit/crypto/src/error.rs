//! Crypto error types.

use thiserror::Error;

/// Key exchange and AEAD errors
#[derive(Error, Debug)]
pub enum CryptoError {
    /// Stream failed while exchanging keys
    #[error("key exchange i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Peer sent a low-order public key
    #[error("peer public key is not contributory")]
    WeakPeerKey,

    /// Key derivation failed
    #[error("key derivation failed")]
    KeyDerivation,

    /// Sealing a payload failed
    #[error("encryption failed")]
    Encrypt,

    /// Ciphertext was truncated or failed authentication
    #[error("decryption failed")]
    Decrypt,
}
