//! Key exchange and authenticated encryption sessions for conduit.
//!
//! A conduit connection runs one key exchange directly over the raw stream
//! right after the greeting line, then uses the resulting [`CryptoSession`]
//! to seal every application payload for the rest of its lifetime.
//!
//! The default engine is [`X25519KeyExchange`]: ephemeral X25519 keys,
//! HKDF-SHA256 directional keys, and ChaCha20-Poly1305 with a random nonce
//! prefixed to each ciphertext.
//!
//! ```text
//! client                                server
//!   | -- client ephemeral public (32B) --> |
//!   | <-- server ephemeral public (32B) -- |
//!   |                                      |
//!   |   c2s = HKDF(ss, "conduit/v1 c2s")   |
//!   |   s2c = HKDF(ss, "conduit/v1 s2c")   |
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod kex;
pub mod session;

use tokio::io::{AsyncRead, AsyncWrite};

// Re-export main types
pub use error::CryptoError;
pub use kex::{KeyExchange, X25519KeyExchange, PUBLIC_KEY_SIZE};
pub use session::{ChaChaSession, CryptoSession, NONCE_SIZE, TAG_SIZE};

/// Byte stream a key exchange can run over
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> AsyncStream for T where T: AsyncRead + AsyncWrite + Send + Unpin {}
