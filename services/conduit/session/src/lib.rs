//! TCP sessions, HELO/key-exchange handshake, heartbeat and reconnect for conduit.
//!
//! This crate provides the connection protocol engine: one background task
//! per connection that establishes an encrypted channel, dispatches inbound
//! opcode units, keeps the channel alive with PING/PING_OK heartbeats, and
//! (for clients) redials after failures.
//!
//! ## Features
//!
//! - **TCP Transport**: listener and dialer with `TCP_NODELAY`
//! - **Handshake Protocol**: `HELO` greeting, key exchange, Connect round trip
//! - **Heartbeat**: PING/PING_OK with RTT measurement and liveness timeout
//! - **Auto-reconnect**: client redials once per retry interval until stopped
//! - **Lifecycle Events**: per-subscriber channels, each event delivered once
//!
//! ## Example
//!
//! ```rust,no_run
//! use conduit_session::{Connection, ConnectionEvent, Endpoint};
//! use serde_json::json;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let connection = Connection::with_defaults();
//! let mut events = connection.subscribe();
//! connection.start(Endpoint::parse("127.0.0.1:9000")?)?;
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         ConnectionEvent::Connected { peer, .. } => {
//!             println!("Connected to {}", peer);
//!             connection.send_message(&json!({"hello": "world"})).await?;
//!         }
//!         ConnectionEvent::MessageReceived { message, .. } => {
//!             println!("Received {}", message);
//!         }
//!         ConnectionEvent::RawReceived { payload, .. } => {
//!             println!("Received {} raw bytes", payload.len());
//!         }
//!         ConnectionEvent::Disconnected { .. } => break,
//!         ConnectionEvent::ConnectionLost { peer, .. } => {
//!             println!("Lost {}, reconnecting", peer);
//!         }
//!     }
//! }
//!
//! connection.stop().await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod acceptor;
pub mod config;
pub mod connection;
pub mod endpoint;
pub mod error;
pub mod event;
pub mod handshake;
pub mod heartbeat;
pub mod reconnect;
pub mod transport;

// Re-export main types
pub use acceptor::Acceptor;
pub use config::ConnectionConfig;
pub use connection::{Connection, ConnectionState, ConnectionStats, Role};
pub use endpoint::Endpoint;
pub use error::{
    ConfigError, ConnectionError, EndpointError, HandshakeError, SendError, TransportError,
};
pub use event::{ConnectionEvent, ConnectionId, EventReceiver};
pub use handshake::{client_handshake, server_handshake, GREETING};
pub use heartbeat::Heartbeat;
pub use reconnect::ReconnectPolicy;
pub use transport::{connect_tcp, listen_tcp, BoxedStream};

// Collaborator crates, so applications need only this one
pub use conduit_crypto as crypto;
pub use conduit_wire as wire;
