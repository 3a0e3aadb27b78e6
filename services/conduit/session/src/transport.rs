//! TCP transport for conduit connections.
//!
//! Connections run over any [`AsyncStream`]; TCP is the transport the
//! client dials and the acceptor listens on.

use crate::endpoint::Endpoint;
use crate::error::TransportError;
use conduit_crypto::AsyncStream;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tracing::debug;

/// Owned, type-erased byte stream a connection runs over
pub type BoxedStream = Box<dyn AsyncStream>;

/// Create a TCP listener bound to the given address
pub async fn listen_tcp(addr: SocketAddr) -> tokio::io::Result<TcpListener> {
    TcpListener::bind(addr).await
}

/// Resolve an endpoint and connect to it with Nagle disabled
pub async fn connect_tcp(endpoint: &Endpoint) -> Result<TcpStream, TransportError> {
    let addr = endpoint.resolve().await?;
    debug!("Dialing {} ({})", endpoint, addr);

    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    #[tokio::test]
    async fn test_tcp_listen_connect() {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);
        let listener = listen_tcp(addr).await.unwrap();
        let bound_addr = listener.local_addr().unwrap();

        let stream = connect_tcp(&Endpoint::from(bound_addr)).await.unwrap();
        assert!(stream.nodelay().unwrap());
        assert_eq!(stream.peer_addr().unwrap(), bound_addr);
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Bind then drop to get a port with no listener
        let listener = listen_tcp("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = connect_tcp(&Endpoint::from(addr)).await;
        assert!(matches!(result, Err(TransportError::Io(_))));
    }
}
