//! Lifecycle events and subscriber fan-out.

use crate::endpoint::Endpoint;
use bytes::Bytes;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique connection identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate the next identifier
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Events emitted by connections
#[derive(Debug, Clone)]
pub enum ConnectionEvent<M> {
    /// Session established after the Connect round trip
    Connected {
        /// Connection that emitted the event
        id: ConnectionId,
        /// Remote endpoint
        peer: Endpoint,
    },
    /// Orderly close, local stop or peer Disconnect
    Disconnected {
        /// Connection that emitted the event
        id: ConnectionId,
        /// Remote endpoint
        peer: Endpoint,
    },
    /// Heartbeat timeout or unexpected transport failure
    ConnectionLost {
        /// Connection that emitted the event
        id: ConnectionId,
        /// Remote endpoint
        peer: Endpoint,
    },
    /// Decoded structured message
    MessageReceived {
        /// Connection that emitted the event
        id: ConnectionId,
        /// Remote endpoint
        peer: Endpoint,
        /// Decoded message
        message: M,
    },
    /// Decrypted raw payload
    RawReceived {
        /// Connection that emitted the event
        id: ConnectionId,
        /// Remote endpoint
        peer: Endpoint,
        /// Plaintext bytes
        payload: Bytes,
    },
}

impl<M> ConnectionEvent<M> {
    /// Connection that emitted the event
    pub fn id(&self) -> ConnectionId {
        match self {
            Self::Connected { id, .. }
            | Self::Disconnected { id, .. }
            | Self::ConnectionLost { id, .. }
            | Self::MessageReceived { id, .. }
            | Self::RawReceived { id, .. } => *id,
        }
    }

    /// Remote endpoint of the emitting connection
    pub fn peer(&self) -> &Endpoint {
        match self {
            Self::Connected { peer, .. }
            | Self::Disconnected { peer, .. }
            | Self::ConnectionLost { peer, .. }
            | Self::MessageReceived { peer, .. }
            | Self::RawReceived { peer, .. } => peer,
        }
    }
}

/// Receiving end of a subscription
pub type EventReceiver<M> = mpsc::UnboundedReceiver<ConnectionEvent<M>>;

/// Subscriber list; every live subscriber receives every event once
#[derive(Debug)]
pub struct Observers<M> {
    senders: Mutex<Vec<mpsc::UnboundedSender<ConnectionEvent<M>>>>,
}

impl<M> Default for Observers<M> {
    fn default() -> Self {
        Self {
            senders: Mutex::new(Vec::new()),
        }
    }
}

impl<M: Clone> Observers<M> {
    /// Create an empty subscriber list
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber
    pub fn subscribe(&self) -> EventReceiver<M> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.add(tx);
        rx
    }

    /// Register an existing sender
    pub fn add(&self, sender: mpsc::UnboundedSender<ConnectionEvent<M>>) {
        self.lock().push(sender);
    }

    /// Deliver an event to all subscribers, dropping those that went away
    pub fn emit(&self, event: ConnectionEvent<M>) {
        self.lock().retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Number of live subscribers
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nobody is subscribed
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<mpsc::UnboundedSender<ConnectionEvent<M>>>> {
        self.senders
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
