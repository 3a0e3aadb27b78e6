//! Handshake protocol for conduit connections.
//!
//! Immediately after the transport connects the dialing side writes the
//! greeting line `HELO`, then both sides hand the raw stream to the key
//! exchange. Once the exchange returns, the stream carries opcode units only
//! and the dialing side opens the session with `Connect`.

use crate::error::HandshakeError;
use conduit_crypto::{AsyncStream, CryptoSession, KeyExchange};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

/// Greeting line sent by the dialing side
pub const GREETING: &str = "HELO";

/// Longest greeting line the accepting side reads before giving up
pub const MAX_GREETING_LINE: usize = 64;

/// Write the greeting line and flush it
pub async fn send_greeting<W: AsyncWrite + Unpin + ?Sized>(
    writer: &mut W,
) -> Result<(), HandshakeError> {
    writer.write_all(GREETING.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    debug!("Sent {}", GREETING);
    Ok(())
}

/// Read one line and check that it is the greeting.
///
/// Reads byte by byte so nothing beyond the newline is consumed; the key
/// exchange starts right after it.
pub async fn read_greeting<R: AsyncRead + Unpin + ?Sized>(
    reader: &mut R,
) -> Result<(), HandshakeError> {
    let mut line = Vec::with_capacity(GREETING.len() + 2);
    loop {
        let byte = reader.read_u8().await?;
        if byte == b'\n' {
            break;
        }
        if line.len() == MAX_GREETING_LINE {
            return Err(HandshakeError::GreetingTooLong);
        }
        line.push(byte);
    }

    if line.last() == Some(&b'\r') {
        line.pop();
    }

    if line != GREETING.as_bytes() {
        return Err(HandshakeError::Greeting(
            String::from_utf8_lossy(&line).into_owned(),
        ));
    }
    Ok(())
}

/// Dialing side: greeting, then client key exchange
pub async fn client_handshake(
    stream: &mut dyn AsyncStream,
    key_exchange: &dyn KeyExchange,
) -> Result<Box<dyn CryptoSession>, HandshakeError> {
    send_greeting(stream).await?;

    info!("Enabling encryption");
    let session = key_exchange.client_key_exchange(stream).await?;
    info!("Connection is encrypted");

    Ok(session)
}

/// Accepting side: expect the greeting, then server key exchange
pub async fn server_handshake(
    stream: &mut dyn AsyncStream,
    key_exchange: &dyn KeyExchange,
) -> Result<Box<dyn CryptoSession>, HandshakeError> {
    read_greeting(stream).await?;
    debug!("Received {}, starting key exchange", GREETING);

    let session = key_exchange.server_key_exchange(stream).await?;
    info!("Inbound connection is encrypted");

    Ok(session)
}
