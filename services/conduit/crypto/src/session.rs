//! Authenticated encryption for an established connection.

use crate::CryptoError;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use std::fmt;

/// ChaCha20-Poly1305 nonce size
pub const NONCE_SIZE: usize = 12;

/// Poly1305 tag size
pub const TAG_SIZE: usize = 16;

/// Encrypt/decrypt capability produced by a key exchange
pub trait CryptoSession: Send + Sync + fmt::Debug {
    /// Seal a plaintext for the peer
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// Open a ciphertext produced by the peer
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError>;
}

/// ChaCha20-Poly1305 session with one key per direction.
///
/// Ciphertext layout is `nonce (12) || sealed payload || tag (16)`.
pub struct ChaChaSession {
    seal: ChaCha20Poly1305,
    open: ChaCha20Poly1305,
}

impl ChaChaSession {
    /// Build a session from the key used for outbound payloads and the key
    /// used for inbound ones
    pub fn new(send_key: [u8; 32], recv_key: [u8; 32]) -> Self {
        Self {
            seal: ChaCha20Poly1305::new(Key::from_slice(&send_key)),
            open: ChaCha20Poly1305::new(Key::from_slice(&recv_key)),
        }
    }
}

impl fmt::Debug for ChaChaSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChaChaSession").finish_non_exhaustive()
    }
}

impl CryptoSession for ChaChaSession {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut nonce = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce);

        let sealed = self
            .seal
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| CryptoError::Encrypt)?;

        let mut out = Vec::with_capacity(NONCE_SIZE + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if ciphertext.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CryptoError::Decrypt);
        }

        let (nonce, sealed) = ciphertext.split_at(NONCE_SIZE);
        self.open
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| CryptoError::Decrypt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> (ChaChaSession, ChaChaSession) {
        let c2s = [0x11; 32];
        let s2c = [0x22; 32];
        (ChaChaSession::new(c2s, s2c), ChaChaSession::new(s2c, c2s))
    }

    #[test]
    fn test_directional_keys() {
        let (client, server) = pair();

        let sealed = client.encrypt(b"hello").unwrap();
        assert_eq!(sealed.len(), NONCE_SIZE + 5 + TAG_SIZE);
        assert_eq!(server.decrypt(&sealed).unwrap(), b"hello");

        // A side cannot open its own outbound traffic
        assert!(matches!(client.decrypt(&sealed), Err(CryptoError::Decrypt)));
    }

    #[test]
    fn test_nonce_is_fresh_per_message() {
        let (client, _) = pair();
        let a = client.encrypt(b"same").unwrap();
        let b = client.encrypt(b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_tampered_or_truncated_ciphertext_rejected() {
        let (client, server) = pair();

        let mut sealed = client.encrypt(&[0x00, 0x01, 0xFF]).unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x80;
        assert!(matches!(server.decrypt(&sealed), Err(CryptoError::Decrypt)));

        assert!(matches!(server.decrypt(&[0u8; 10]), Err(CryptoError::Decrypt)));
    }

    #[test]
    fn test_empty_plaintext() {
        let (client, server) = pair();
        let sealed = client.encrypt(&[]).unwrap();
        assert!(server.decrypt(&sealed).unwrap().is_empty());
    }
}
