//! Server side: accepting transports and turning them into connections.

use crate::config::ConnectionConfig;
use crate::connection::Connection;
use crate::endpoint::Endpoint;
use crate::error::{ConfigError, HandshakeError};
use crate::event::{EventReceiver, Observers};
use crate::handshake::server_handshake;
use crate::transport::BoxedStream;
use conduit_crypto::{AsyncStream, KeyExchange};
use conduit_wire::{JsonCodec, PayloadCodec};
use std::fmt;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};
use tracing::{info, warn};

/// Accepts inbound transports and runs the server handshake on them.
///
/// Subscribers registered here receive the events of every connection this
/// acceptor produces, including the `Connected` event that may fire before
/// the caller gets the [`Connection`] handle.
pub struct Acceptor<C: PayloadCodec = JsonCodec> {
    config: ConnectionConfig,
    key_exchange: Arc<dyn KeyExchange>,
    codec: Arc<C>,
    observers: Arc<Observers<C::Message>>,
}

impl<C: PayloadCodec> Acceptor<C> {
    /// Create an acceptor; every accepted connection uses `config`
    pub fn new(
        config: ConnectionConfig,
        key_exchange: Arc<dyn KeyExchange>,
        codec: C,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            key_exchange,
            codec: Arc::new(codec),
            observers: Arc::new(Observers::new()),
        })
    }

    /// Configuration handed to accepted connections
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Subscribe to events from all connections accepted from now on
    pub fn subscribe(&self) -> EventReceiver<C::Message> {
        self.observers.subscribe()
    }

    /// Run the server handshake on `stream` and start a connection over it.
    ///
    /// A bad greeting, failed key exchange or handshake timeout drops the
    /// transport and produces no connection.
    pub async fn accept_incoming<S>(
        &self,
        stream: S,
        peer: Endpoint,
    ) -> Result<Connection<C>, HandshakeError>
    where
        S: AsyncStream + 'static,
    {
        let deadline = Instant::now() + self.config.handshake_timeout;
        let mut stream: BoxedStream = Box::new(stream);

        let crypto = match timeout_at(
            deadline,
            server_handshake(stream.as_mut(), self.key_exchange.as_ref()),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => return Err(HandshakeError::Timeout(self.config.handshake_timeout)),
        };

        Ok(Connection::accepted(
            self.config.clone(),
            self.key_exchange.clone(),
            self.codec.clone(),
            self.observers.clone(),
            stream,
            Arc::from(crypto),
            peer,
            deadline,
        ))
    }

    /// Accept a TCP stream; Nagle is disabled as on the dialing side
    pub async fn accept_tcp(&self, stream: TcpStream) -> Result<Connection<C>, HandshakeError> {
        stream.set_nodelay(true)?;
        let peer = Endpoint::from(stream.peer_addr()?);
        self.accept_incoming(stream, peer).await
    }

    /// Accept loop: each transport is handshaken on its own task and the
    /// resulting connections are delivered on `connections`.
    ///
    /// Returns when accepting fails or the receiver is gone.
    pub async fn serve(
        self: Arc<Self>,
        listener: TcpListener,
        connections: mpsc::Sender<Connection<C>>,
    ) -> std::io::Result<()> {
        if let Ok(addr) = listener.local_addr() {
            info!("Listening on {}", addr);
        }

        loop {
            let (tcp_stream, peer_addr) = tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!("Accept error: {}; stopping listener", e);
                        return Err(e);
                    }
                },
                _ = connections.closed() => {
                    info!("Connection receiver dropped; stopping listener");
                    return Ok(());
                }
            };
            info!("Accepted TCP connection from {}", peer_addr);

            let acceptor = self.clone();
            let connections = connections.clone();
            tokio::spawn(async move {
                match acceptor.accept_tcp(tcp_stream).await {
                    Ok(connection) => {
                        // A dropped receiver drops the connection, which stops it
                        let _ = connections.send(connection).await;
                    }
                    Err(e) => warn!("Inbound handshake with {} failed: {}", peer_addr, e),
                }
            });
        }
    }
}

impl<C: PayloadCodec> fmt::Debug for Acceptor<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Acceptor")
            .field("config", &self.config)
            .field("subscribers", &self.observers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionState;
    use crate::event::ConnectionEvent;
    use crate::handshake::client_handshake;
    use bytes::Bytes;
    use conduit_crypto::X25519KeyExchange;
    use conduit_wire::WireMessage;
    use serde_json::Value;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

    fn acceptor(config: ConnectionConfig) -> Arc<Acceptor<JsonCodec>> {
        Arc::new(Acceptor::new(config, Arc::new(X25519KeyExchange::new()), JsonCodec::new()).unwrap())
    }

    fn peer() -> Endpoint {
        Endpoint::new("192.0.2.10", 40000)
    }

    async fn next_event(rx: &mut EventReceiver<Value>) -> ConnectionEvent<Value> {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    /// Greeting, key exchange and Connect round trip done by hand
    async fn manual_client(
        acceptor: &Arc<Acceptor<JsonCodec>>,
    ) -> (DuplexStream, Box<dyn conduit_crypto::CryptoSession>, Connection<JsonCodec>) {
        let (mut client_io, server_io) = tokio::io::duplex(64 * 1024);
        let server = {
            let acceptor = acceptor.clone();
            tokio::spawn(async move { acceptor.accept_incoming(server_io, peer()).await })
        };

        let crypto = client_handshake(&mut client_io, &X25519KeyExchange::new())
            .await
            .unwrap();
        let connection = server.await.unwrap().unwrap();
        assert_eq!(connection.state(), ConnectionState::Handshaking);

        client_io.write_all(&[1]).await.unwrap();
        assert_eq!(client_io.read_u8().await.unwrap(), 2);

        (client_io, crypto, connection)
    }

    #[tokio::test]
    async fn test_bad_greeting_rejected() {
        let acceptor = acceptor(ConnectionConfig::default());
        let (mut client_io, server_io) = tokio::io::duplex(1024);
        client_io.write_all(b"HELLO\n").await.unwrap();

        let result = acceptor.accept_incoming(server_io, peer()).await;
        assert!(matches!(result, Err(HandshakeError::Greeting(_))));
    }

    #[tokio::test]
    async fn test_silent_peer_times_out() {
        let acceptor = acceptor(ConnectionConfig {
            handshake_timeout: Duration::from_millis(100),
            ..Default::default()
        });
        let (_client_io, server_io) = tokio::io::duplex(1024);

        let result = acceptor.accept_incoming(server_io, peer()).await;
        assert!(matches!(result, Err(HandshakeError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_garbage_is_skipped() {
        let acceptor = acceptor(ConnectionConfig::default());
        let mut events = acceptor.subscribe();
        let (mut client_io, crypto, connection) = manual_client(&acceptor).await;

        match next_event(&mut events).await {
            ConnectionEvent::Connected { id, peer: from } => {
                assert_eq!(id, connection.id());
                assert_eq!(from, peer());
            }
            other => panic!("unexpected event {:?}", other),
        }

        // Unknown opcode, then a RAW unit that fails authentication
        client_io.write_all(&[0x42]).await.unwrap();
        client_io
            .write_all(&[7, 0, 0, 0, 4, 0xde, 0xad, 0xbe, 0xef])
            .await
            .unwrap();

        let sealed = crypto.encrypt(b"still here").unwrap();
        client_io
            .write_all(&WireMessage::Raw(Bytes::from(sealed)).to_bytes().unwrap())
            .await
            .unwrap();

        match next_event(&mut events).await {
            ConnectionEvent::RawReceived { payload, .. } => {
                assert_eq!(payload.as_ref(), b"still here")
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(connection.state(), ConnectionState::Connected);

        connection.stop().await;
        assert!(matches!(
            next_event(&mut events).await,
            ConnectionEvent::Disconnected { .. }
        ));
    }

    #[tokio::test]
    async fn test_oversized_length_tears_down() {
        let acceptor = acceptor(ConnectionConfig {
            max_payload_size: 64,
            ..Default::default()
        });
        let mut events = acceptor.subscribe();
        let (mut client_io, _crypto, connection) = manual_client(&acceptor).await;
        assert!(matches!(
            next_event(&mut events).await,
            ConnectionEvent::Connected { .. }
        ));

        client_io.write_all(&[6, 0, 0, 4, 0]).await.unwrap();
        assert!(matches!(
            next_event(&mut events).await,
            ConnectionEvent::ConnectionLost { .. }
        ));
        assert_eq!(connection.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_peer_disconnect() {
        let acceptor = acceptor(ConnectionConfig::default());
        let mut events = acceptor.subscribe();
        let (mut client_io, _crypto, connection) = manual_client(&acceptor).await;
        assert!(matches!(
            next_event(&mut events).await,
            ConnectionEvent::Connected { .. }
        ));

        client_io.write_all(&[5]).await.unwrap();
        assert!(matches!(
            next_event(&mut events).await,
            ConnectionEvent::Disconnected { .. }
        ));
        assert_eq!(connection.state(), ConnectionState::Closed);

        // stop after the peer closed emits nothing more
        connection.stop().await;
        assert!(events.try_recv().is_err());
    }
}
