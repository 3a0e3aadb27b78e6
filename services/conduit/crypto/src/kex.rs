//! Key exchange run over the raw stream during the handshake.

use crate::session::{ChaChaSession, CryptoSession};
use crate::{AsyncStream, CryptoError};
use async_trait::async_trait;
use hkdf::Hkdf;
use rand::rngs::OsRng;
use sha2::Sha256;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, trace};
use x25519_dalek::{EphemeralSecret, PublicKey};

/// X25519 public key size on the wire
pub const PUBLIC_KEY_SIZE: usize = 32;

const INFO_CLIENT_TO_SERVER: &[u8] = b"conduit/v1 c2s";
const INFO_SERVER_TO_CLIENT: &[u8] = b"conduit/v1 s2c";

/// Establishes a [`CryptoSession`] over a freshly connected stream.
///
/// The exchange owns the stream until it returns; nothing else may read or
/// write it concurrently.
#[async_trait]
pub trait KeyExchange: Send + Sync + 'static {
    /// Run the dialing side of the exchange
    async fn client_key_exchange(
        &self,
        stream: &mut dyn AsyncStream,
    ) -> Result<Box<dyn CryptoSession>, CryptoError>;

    /// Run the accepting side of the exchange
    async fn server_key_exchange(
        &self,
        stream: &mut dyn AsyncStream,
    ) -> Result<Box<dyn CryptoSession>, CryptoError>;
}

/// Ephemeral X25519 exchange with HKDF-SHA256 directional keys
#[derive(Debug, Clone, Copy, Default)]
pub struct X25519KeyExchange;

impl X25519KeyExchange {
    /// Create the default key exchange
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl KeyExchange for X25519KeyExchange {
    async fn client_key_exchange(
        &self,
        stream: &mut dyn AsyncStream,
    ) -> Result<Box<dyn CryptoSession>, CryptoError> {
        let secret = EphemeralSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);

        stream.write_all(public.as_bytes()).await?;
        stream.flush().await?;
        trace!("Sent client public key");

        let peer = read_public_key(stream).await?;
        let (c2s, s2c) = derive_keys(secret, &peer)?;
        debug!("Client key exchange complete");

        Ok(Box::new(ChaChaSession::new(c2s, s2c)))
    }

    async fn server_key_exchange(
        &self,
        stream: &mut dyn AsyncStream,
    ) -> Result<Box<dyn CryptoSession>, CryptoError> {
        let peer = read_public_key(stream).await?;
        trace!("Received client public key");

        let secret = EphemeralSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        stream.write_all(public.as_bytes()).await?;
        stream.flush().await?;

        let (c2s, s2c) = derive_keys(secret, &peer)?;
        debug!("Server key exchange complete");

        Ok(Box::new(ChaChaSession::new(s2c, c2s)))
    }
}

async fn read_public_key(stream: &mut dyn AsyncStream) -> Result<PublicKey, CryptoError> {
    let mut bytes = [0u8; PUBLIC_KEY_SIZE];
    stream.read_exact(&mut bytes).await?;
    Ok(PublicKey::from(bytes))
}

/// Returns `(client_to_server, server_to_client)` keys
fn derive_keys(
    secret: EphemeralSecret,
    peer: &PublicKey,
) -> Result<([u8; 32], [u8; 32]), CryptoError> {
    let shared = secret.diffie_hellman(peer);
    if !shared.was_contributory() {
        return Err(CryptoError::WeakPeerKey);
    }

    let hk = Hkdf::<Sha256>::new(None, shared.as_bytes());
    let mut c2s = [0u8; 32];
    let mut s2c = [0u8; 32];
    hk.expand(INFO_CLIENT_TO_SERVER, &mut c2s)
        .map_err(|_| CryptoError::KeyDerivation)?;
    hk.expand(INFO_SERVER_TO_CLIENT, &mut s2c)
        .map_err(|_| CryptoError::KeyDerivation)?;

    Ok((c2s, s2c))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_exchange_over_duplex() {
        let (mut client_io, mut server_io) = tokio::io::duplex(1024);
        let kex = X25519KeyExchange::new();

        let server = tokio::spawn(async move {
            X25519KeyExchange::new()
                .server_key_exchange(&mut server_io)
                .await
        });
        let client = kex.client_key_exchange(&mut client_io).await.unwrap();
        let server = server.await.unwrap().unwrap();

        let sealed = client.encrypt(b"from client").unwrap();
        assert_eq!(server.decrypt(&sealed).unwrap(), b"from client");

        let sealed = server.encrypt(b"from server").unwrap();
        assert_eq!(client.decrypt(&sealed).unwrap(), b"from server");
    }

    #[tokio::test]
    async fn test_low_order_peer_key_rejected() {
        let (mut client_io, mut server_io) = tokio::io::duplex(1024);

        let peer = tokio::spawn(async move {
            let mut theirs = [0u8; PUBLIC_KEY_SIZE];
            server_io.read_exact(&mut theirs).await.unwrap();
            // All-zero point yields an all-zero shared secret
            server_io.write_all(&[0u8; PUBLIC_KEY_SIZE]).await.unwrap();
            server_io
        });

        let result = X25519KeyExchange::new()
            .client_key_exchange(&mut client_io)
            .await;
        assert!(matches!(result, Err(CryptoError::WeakPeerKey)));
        drop(peer.await.unwrap());
    }

    #[tokio::test]
    async fn test_truncated_exchange_is_io_error() {
        let (mut client_io, mut server_io) = tokio::io::duplex(1024);

        let peer = tokio::spawn(async move {
            let mut theirs = [0u8; PUBLIC_KEY_SIZE];
            server_io.read_exact(&mut theirs).await.unwrap();
            server_io.write_all(&[1u8; 8]).await.unwrap();
            // Dropping closes the stream mid-key
        });

        let result = X25519KeyExchange::new()
            .client_key_exchange(&mut client_io)
            .await;
        peer.await.unwrap();
        assert!(matches!(result, Err(CryptoError::Io(_))));
    }
}
