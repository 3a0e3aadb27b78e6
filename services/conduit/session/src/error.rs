//! Session error types.

use conduit_crypto::CryptoError;
use conduit_wire::{CodecError, WireError};
use std::time::Duration;
use thiserror::Error;

/// Endpoint parsing and resolution errors
#[derive(Error, Debug)]
pub enum EndpointError {
    /// Empty or whitespace-only descriptor
    #[error("endpoint descriptor may not be empty")]
    Empty,

    /// Host part is neither an IP address nor a valid hostname
    #[error("invalid endpoint address '{0}'")]
    Address(String),

    /// Port is not a number in 0..=65535
    #[error("invalid endpoint port '{0}'")]
    Port(String),

    /// No port in the descriptor and no default given
    #[error("no port specified: '{0}'")]
    MissingPort(String),

    /// Hostname resolved to no addresses
    #[error("host not found: {0}")]
    HostNotFound(String),

    /// Resolver failure
    #[error("resolution failed: {0}")]
    Resolve(#[source] std::io::Error),
}

/// Dialing errors
#[derive(Error, Debug)]
pub enum TransportError {
    /// Endpoint could not be resolved
    #[error(transparent)]
    Endpoint(#[from] EndpointError),

    /// Socket-level failure
    #[error("transport i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that abort one handshake attempt
#[derive(Error, Debug)]
pub enum HandshakeError {
    /// Dial failed
    #[error("dial failed: {0}")]
    Dial(#[from] TransportError),

    /// Stream failed during the greeting
    #[error("handshake i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// First line was not the expected greeting
    #[error("unexpected greeting {0:?}")]
    Greeting(String),

    /// Greeting line exceeded the allowed length
    #[error("greeting line too long")]
    GreetingTooLong,

    /// Key exchange failed
    #[error("key exchange failed: {0}")]
    Crypto(#[from] CryptoError),

    /// Framing failed during the Connect round trip
    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    /// Handshake did not finish within the configured bound
    #[error("handshake timed out after {0:?}")]
    Timeout(Duration),
}

/// Errors returned to application send calls
#[derive(Error, Debug)]
pub enum SendError {
    /// No established session to write to
    #[error("connection is not connected")]
    NotConnected,

    /// Message could not be serialized
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Payload could not be sealed
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// Write to the transport failed or payload too large
    #[error(transparent)]
    Wire(#[from] WireError),
}

/// Connection lifecycle errors
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// `start` called twice
    #[error("connection already started")]
    AlreadyStarted,

    /// Client-only operation on a server-role connection
    #[error("operation requires a client-role connection")]
    ServerRole,

    /// Connection was stopped and cannot be started again
    #[error("connection is closed")]
    Closed,

    /// Configuration rejected
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Configuration validation errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// A duration setting is zero
    #[error("{0} must be positive")]
    NonPositive(&'static str),

    /// Payload limit is zero or beyond what the length prefix can carry
    #[error("max_payload_size must be between 1 and {max}, got {got}")]
    PayloadLimit {
        /// Configured value
        got: usize,
        /// Largest representable value
        max: usize,
    },
}
