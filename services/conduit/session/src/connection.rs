//! Connection protocol engine.
//!
//! A [`Connection`] owns one background task that drives the handshake, the
//! opcode dispatch loop, the heartbeat monitor and (for clients) the reconnect
//! policy. Application sends write into the shared encrypted link from the
//! caller's task; inbound units are dispatched from the engine task and
//! surface as [`ConnectionEvent`]s.
//!
//! ```text
//! Idle -> Connecting -> Handshaking -> Connected -> Closing -> Closed
//!   ^          |              |             |
//!   +----------+--------------+-------------+  (client, on failure)
//! ```

use crate::config::ConnectionConfig;
use crate::endpoint::Endpoint;
use crate::error::{ConnectionError, HandshakeError, SendError};
use crate::event::{ConnectionEvent, ConnectionId, EventReceiver, Observers};
use crate::handshake::{client_handshake, GREETING};
use crate::heartbeat::Heartbeat;
use crate::reconnect::ReconnectPolicy;
use crate::transport::{connect_tcp, BoxedStream};
use bytes::Bytes;
use conduit_crypto::{CryptoSession, KeyExchange, X25519KeyExchange};
use conduit_wire::{JsonCodec, PayloadCodec, WireCodec, WireError, WireMessage};
use futures::{SinkExt, StreamExt};
use std::fmt;
use std::io;
use std::sync::{Arc, MutexGuard, OnceLock};
use std::time::Duration;
use tokio::io::{ReadHalf, WriteHalf};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout, timeout_at, Instant};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, error, info, warn};

/// Which side of the connection this endpoint is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Dials, reconnects
    Client,
    /// Accepted from a listener
    Server,
}

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No transport
    Idle,
    /// Dial in progress
    Connecting,
    /// Greeting, key exchange or Connect round trip in progress
    Handshaking,
    /// Session established
    Connected,
    /// Tearing down
    Closing,
    /// Stopped for good
    Closed,
}

/// Traffic statistics for a connection
#[derive(Clone, Debug, Default)]
pub struct ConnectionStats {
    /// Total bytes received
    pub bytes_in: u64,
    /// Total bytes sent
    pub bytes_out: u64,
    /// Number of units received
    pub frames_received: u64,
    /// Number of units sent
    pub frames_sent: u64,
    /// Timestamp of last received unit
    pub last_frame_in: Option<Instant>,
    /// Timestamp of last sent unit
    pub last_frame_out: Option<Instant>,
    /// Most recent RTT measurement, cleared on close
    pub last_rtt: Option<Duration>,
    /// Dial attempts made by a client
    pub connect_attempts: u64,
}

impl ConnectionStats {
    fn record_in(&mut self, len: usize, now: Instant) {
        self.bytes_in += len as u64;
        self.frames_received += 1;
        self.last_frame_in = Some(now);
    }

    fn record_out(&mut self, len: usize, now: Instant) {
        self.bytes_out += len as u64;
        self.frames_sent += 1;
        self.last_frame_out = Some(now);
    }
}

type Reader = FramedRead<ReadHalf<BoxedStream>, WireCodec>;

/// Write side of an established transport
struct Link {
    writer: FramedWrite<WriteHalf<BoxedStream>, WireCodec>,
    crypto: Arc<dyn CryptoSession>,
}

/// Read side of an established transport, owned by the engine task
struct Active {
    reader: Reader,
    crypto: Arc<dyn CryptoSession>,
    /// Present once the Connect round trip completed
    heartbeat: Option<Heartbeat>,
    handshake_deadline: Instant,
}

fn split_stream(
    stream: BoxedStream,
    crypto: Arc<dyn CryptoSession>,
    max_payload_size: usize,
) -> (Link, Reader) {
    let (read_half, write_half) = tokio::io::split(stream);
    let codec = WireCodec::with_max_payload_size(max_payload_size);
    let reader = FramedRead::new(read_half, codec.clone());
    let writer = FramedWrite::new(write_half, codec);
    (Link { writer, crypto }, reader)
}

struct Shared<C: PayloadCodec> {
    id: ConnectionId,
    role: Role,
    config: ConnectionConfig,
    codec: Arc<C>,
    key_exchange: Arc<dyn KeyExchange>,
    endpoint: OnceLock<Endpoint>,
    observers: Observers<C::Message>,
    upstream: Option<Arc<Observers<C::Message>>>,
    state: watch::Sender<ConnectionState>,
    link: Mutex<Option<Link>>,
    stats: std::sync::Mutex<ConnectionStats>,
}

impl<C: PayloadCodec> Shared<C> {
    fn new(
        role: Role,
        config: ConnectionConfig,
        key_exchange: Arc<dyn KeyExchange>,
        codec: Arc<C>,
        upstream: Option<Arc<Observers<C::Message>>>,
        link: Option<Link>,
        initial: ConnectionState,
    ) -> Self {
        let (state, _) = watch::channel(initial);
        Self {
            id: ConnectionId::next(),
            role,
            config,
            codec,
            key_exchange,
            endpoint: OnceLock::new(),
            observers: Observers::new(),
            upstream,
            state,
            link: Mutex::new(link),
            stats: std::sync::Mutex::new(ConnectionStats::default()),
        }
    }

    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!("{} state {:?} -> {:?}", self.id, previous, state);
        }
    }

    fn stats(&self) -> MutexGuard<'_, ConnectionStats> {
        self.stats
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, event: ConnectionEvent<C::Message>) {
        if let Some(upstream) = &self.upstream {
            upstream.emit(event.clone());
        }
        self.observers.emit(event);
    }

    async fn install(
        &self,
        stream: BoxedStream,
        crypto: Arc<dyn CryptoSession>,
        handshake_deadline: Instant,
    ) -> Active {
        let (link, reader) = split_stream(stream, crypto.clone(), self.config.max_payload_size);
        *self.link.lock().await = Some(link);
        Active {
            reader,
            crypto,
            heartbeat: None,
            handshake_deadline,
        }
    }

    /// Write an engine-originated unit under the writer lock.
    ///
    /// Waiting for the lock and the write together are bounded by `ping_timeout`.
    async fn write_control(&self, unit: WireMessage) -> Result<(), WireError> {
        let len = unit.encoded_len();
        let write = async {
            let mut guard = self.link.lock().await;
            let link = guard
                .as_mut()
                .ok_or_else(|| WireError::Io(io::ErrorKind::NotConnected.into()))?;
            link.writer.send(unit).await
        };

        match timeout(self.config.ping_timeout, write).await {
            Ok(result) => result?,
            Err(_) => return Err(WireError::Io(io::ErrorKind::TimedOut.into())),
        }

        self.stats().record_out(len, Instant::now());
        Ok(())
    }

    /// Release the write half and forget the last RTT
    async fn teardown(&self) {
        let link = match timeout(self.config.ping_timeout, self.link.lock()).await {
            Ok(mut guard) => guard.take(),
            Err(_) => {
                debug!("{} timed out waiting for the writer", self.id);
                None
            }
        };
        if let Some(mut link) = link {
            match timeout(self.config.ping_timeout, link.writer.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!("{} error closing transport: {}", self.id, e),
                Err(_) => debug!("{} timed out closing transport", self.id),
            }
        }
        self.stats().last_rtt = None;
    }
}

/// Dial and run the client side of the handshake
async fn open<C: PayloadCodec>(
    shared: &Shared<C>,
    endpoint: &Endpoint,
) -> Result<(BoxedStream, Arc<dyn CryptoSession>), HandshakeError> {
    shared.set_state(ConnectionState::Connecting);
    debug!("Attempting to connect to {}", endpoint);
    let tcp = connect_tcp(endpoint).await?;

    shared.set_state(ConnectionState::Handshaking);
    info!("Connect success to {}, sending {}", endpoint, GREETING);
    let mut stream: BoxedStream = Box::new(tcp);
    let crypto = client_handshake(stream.as_mut(), shared.key_exchange.as_ref()).await?;
    Ok((stream, Arc::from(crypto)))
}

enum Command {
    Stop,
    Restart,
}

enum Wake {
    Command(Option<Command>),
    PingDue,
    Deadline,
    Unit(Option<Result<WireMessage, WireError>>),
}

enum Outcome {
    Stop,
    Restart,
    PeerDisconnected,
    Lost(String),
}

struct Engine<C: PayloadCodec> {
    shared: Arc<Shared<C>>,
    commands: mpsc::UnboundedReceiver<Command>,
    peer: Endpoint,
    reconnect: ReconnectPolicy,
}

impl<C: PayloadCodec> Engine<C> {
    async fn run(mut self, mut active: Option<Active>) {
        loop {
            let mut current = match active.take() {
                Some(current) => current,
                None => match self.dial().await {
                    Some(current) => current,
                    None => {
                        self.shared.set_state(ConnectionState::Closed);
                        info!("{} to {} stopped", self.shared.id, self.peer);
                        return;
                    }
                },
            };

            let outcome = self.drive(&mut current).await;
            if !self.conclude(current, outcome).await {
                info!(
                    "{} with {} ended. Stats: {:?}",
                    self.shared.id,
                    self.peer,
                    *self.shared.stats()
                );
                return;
            }
        }
    }

    /// Dial until a transport is up; `None` once a stop is requested
    async fn dial(&mut self) -> Option<Active> {
        if self.shared.role == Role::Server {
            return None;
        }

        loop {
            if let Some(at) = self.reconnect.next_attempt_at() {
                tokio::select! {
                    biased;
                    command = self.commands.recv() => match command {
                        Some(Command::Restart) => continue,
                        Some(Command::Stop) | None => return None,
                    },
                    _ = sleep_until(at) => {}
                }
            }

            let started = Instant::now();
            self.reconnect.record_attempt(started);
            self.shared.stats().connect_attempts += 1;
            let deadline = started + self.shared.config.handshake_timeout;

            let attempt = tokio::select! {
                biased;
                command = self.commands.recv() => match command {
                    Some(Command::Restart) => {
                        self.shared.set_state(ConnectionState::Idle);
                        continue;
                    }
                    Some(Command::Stop) | None => return None,
                },
                result = timeout_at(deadline, open(&self.shared, &self.peer)) => result,
            };

            let (stream, crypto) = match attempt {
                Ok(Ok(session)) => session,
                Ok(Err(HandshakeError::Dial(e))) => {
                    debug!("Failed to connect to {}: {}", self.peer, e);
                    self.shared.set_state(ConnectionState::Idle);
                    continue;
                }
                Ok(Err(e)) => {
                    warn!("Handshake with {} failed: {}", self.peer, e);
                    self.shared.set_state(ConnectionState::Idle);
                    continue;
                }
                Err(_) => {
                    warn!(
                        "Handshake with {} timed out after {:?}",
                        self.peer, self.shared.config.handshake_timeout
                    );
                    self.shared.set_state(ConnectionState::Idle);
                    continue;
                }
            };

            let active = self.shared.install(stream, crypto, deadline).await;
            match self.shared.write_control(WireMessage::Connect).await {
                Ok(()) => {
                    debug!("Sent CONNECT to {}", self.peer);
                    return Some(active);
                }
                Err(e) => {
                    warn!("Failed to send CONNECT to {}: {}", self.peer, e);
                    self.shared.teardown().await;
                    self.shared.set_state(ConnectionState::Idle);
                }
            }
        }
    }

    /// Run the receive loop until something ends this transport
    async fn drive(&mut self, active: &mut Active) -> Outcome {
        loop {
            let ping_at = active.heartbeat.as_ref().map(Heartbeat::next_ping_at);
            let deadline = active
                .heartbeat
                .as_ref()
                .map_or(active.handshake_deadline, Heartbeat::deadline);

            let wake = tokio::select! {
                biased;
                command = self.commands.recv() => Wake::Command(command),
                _ = sleep_until(ping_at.unwrap_or(deadline)), if ping_at.is_some() => Wake::PingDue,
                _ = sleep_until(deadline) => Wake::Deadline,
                unit = active.reader.next() => Wake::Unit(unit),
            };

            match wake {
                Wake::Command(Some(Command::Restart)) => return Outcome::Restart,
                Wake::Command(Some(Command::Stop)) | Wake::Command(None) => return Outcome::Stop,
                Wake::PingDue => {
                    let Some(heartbeat) = active.heartbeat.as_mut() else {
                        continue;
                    };
                    let token = heartbeat.prepare_ping(Instant::now());
                    if let Err(e) = self.shared.write_control(WireMessage::Ping(token)).await {
                        error!("Failed to send PING to {}: {}", self.peer, e);
                        return Outcome::Lost(e.to_string());
                    }
                    debug!("Sent PING {} to {}", token, self.peer);
                }
                Wake::Deadline => {
                    if active.heartbeat.is_some() {
                        return Outcome::Lost(format!(
                            "no traffic for {:?}",
                            self.shared.config.ping_timeout
                        ));
                    }
                    return Outcome::Lost(format!(
                        "handshake did not complete within {:?}",
                        self.shared.config.handshake_timeout
                    ));
                }
                Wake::Unit(None) => return Outcome::Lost("connection closed by peer".to_string()),
                Wake::Unit(Some(Err(e))) => {
                    error!("Read error from {}: {}", self.peer, e);
                    return Outcome::Lost(e.to_string());
                }
                Wake::Unit(Some(Ok(unit))) => {
                    if let Some(outcome) = self.dispatch(active, unit).await {
                        return outcome;
                    }
                }
            }
        }
    }

    async fn dispatch(&mut self, active: &mut Active, unit: WireMessage) -> Option<Outcome> {
        let now = Instant::now();
        self.shared.stats().record_in(unit.encoded_len(), now);
        if !matches!(unit, WireMessage::Ping(_) | WireMessage::PingOk(_)) {
            if let Some(heartbeat) = active.heartbeat.as_mut() {
                heartbeat.on_traffic(now);
            }
        }

        match unit {
            WireMessage::Connect => {
                debug!("Received CONNECT from {}", self.peer);
                self.mark_connected(active, now);
                if let Err(e) = self.shared.write_control(WireMessage::ConnectOk).await {
                    return Some(Outcome::Lost(format!("failed to send CONNECT_OK: {}", e)));
                }
            }

            WireMessage::ConnectOk => {
                debug!("Received CONNECT_OK from {}", self.peer);
                self.mark_connected(active, now);
            }

            WireMessage::Ping(token) => {
                debug!("Received PING {} from {}", token, self.peer);
                if let Some(heartbeat) = active.heartbeat.as_mut() {
                    heartbeat.on_ping(now);
                }
                if let Err(e) = self.shared.write_control(WireMessage::PingOk(token)).await {
                    error!("Failed to send PING_OK to {}: {}", self.peer, e);
                    return Some(Outcome::Lost(e.to_string()));
                }
            }

            WireMessage::PingOk(token) => {
                if let Some(heartbeat) = active.heartbeat.as_mut() {
                    match heartbeat.on_ping_ok(token, now) {
                        Some(rtt) => {
                            self.shared.stats().last_rtt = Some(rtt);
                            debug!("RTT to {}: {:?}", self.peer, rtt);
                        }
                        None => debug!(
                            "Received PING_OK with stale token {} from {}",
                            token, self.peer
                        ),
                    }
                }
            }

            WireMessage::Disconnect => {
                info!("Received DISCONNECT from {}", self.peer);
                return Some(Outcome::PeerDisconnected);
            }

            WireMessage::Message(cipher) => {
                let plaintext = match active.crypto.decrypt(&cipher) {
                    Ok(plaintext) => plaintext,
                    Err(e) => {
                        warn!("Dropping MESSAGE from {}: {}", self.peer, e);
                        return None;
                    }
                };
                match self.shared.codec.decode(&plaintext) {
                    Ok(message) => self.shared.emit(ConnectionEvent::MessageReceived {
                        id: self.shared.id,
                        peer: self.peer.clone(),
                        message,
                    }),
                    Err(e) => warn!("Dropping undecodable MESSAGE from {}: {}", self.peer, e),
                }
            }

            WireMessage::Raw(cipher) => match active.crypto.decrypt(&cipher) {
                Ok(plaintext) => self.shared.emit(ConnectionEvent::RawReceived {
                    id: self.shared.id,
                    peer: self.peer.clone(),
                    payload: Bytes::from(plaintext),
                }),
                Err(e) => warn!("Dropping RAW from {}: {}", self.peer, e),
            },

            WireMessage::Unknown(byte) => {
                warn!("Skipping unknown opcode 0x{:02x} from {}", byte, self.peer);
            }
        }

        None
    }

    fn mark_connected(&mut self, active: &mut Active, now: Instant) {
        if active.heartbeat.is_some() {
            return;
        }

        let config = &self.shared.config;
        active.heartbeat = Some(Heartbeat::new(config.ping_interval, config.ping_timeout, now));
        self.shared.set_state(ConnectionState::Connected);
        info!("{} connected to {}", self.shared.id, self.peer);
        self.shared.emit(ConnectionEvent::Connected {
            id: self.shared.id,
            peer: self.peer.clone(),
        });
    }

    /// Tear the transport down. Returns whether the engine keeps running.
    async fn conclude(&mut self, active: Active, outcome: Outcome) -> bool {
        let was_connected = active.heartbeat.is_some();
        let id = self.shared.id;
        let peer = self.peer.clone();
        let reconnects = self.shared.role == Role::Client;
        let restart = matches!(outcome, Outcome::Restart) && reconnects;

        match outcome {
            Outcome::Stop | Outcome::Restart => {
                self.shared.set_state(ConnectionState::Closing);
                if was_connected {
                    match self.shared.write_control(WireMessage::Disconnect).await {
                        Ok(()) => debug!("Sent DISCONNECT to {}", peer),
                        Err(e) => debug!("Failed to send DISCONNECT to {}: {}", peer, e),
                    }
                }
                self.shared.teardown().await;
                drop(active);

                self.shared.set_state(if restart {
                    ConnectionState::Idle
                } else {
                    ConnectionState::Closed
                });
                if was_connected {
                    self.shared.emit(ConnectionEvent::Disconnected { id, peer });
                }
                restart
            }

            Outcome::PeerDisconnected => {
                self.shared.set_state(ConnectionState::Closing);
                self.shared.teardown().await;
                drop(active);

                self.shared.set_state(ConnectionState::Closed);
                if was_connected {
                    self.shared.emit(ConnectionEvent::Disconnected { id, peer });
                }
                false
            }

            Outcome::Lost(reason) => {
                if was_connected {
                    warn!("Connection to {} lost: {}", peer, reason);
                } else {
                    warn!("Handshake with {} failed: {}", peer, reason);
                }
                self.shared.teardown().await;
                drop(active);

                self.shared.set_state(if reconnects {
                    ConnectionState::Idle
                } else {
                    ConnectionState::Closed
                });
                if was_connected {
                    self.shared.emit(ConnectionEvent::ConnectionLost { id, peer });
                }
                reconnects
            }
        }
    }
}

struct Control {
    commands: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

/// Handle to one encrypted point-to-point connection.
///
/// Dropping the handle stops the engine task.
pub struct Connection<C: PayloadCodec = JsonCodec> {
    shared: Arc<Shared<C>>,
    control: std::sync::Mutex<Option<Control>>,
}

impl Connection<JsonCodec> {
    /// Client connection with default configuration, X25519 and JSON payloads
    pub fn with_defaults() -> Self {
        Self::from_shared(Shared::new(
            Role::Client,
            ConnectionConfig::default(),
            Arc::new(X25519KeyExchange::new()),
            Arc::new(JsonCodec::new()),
            None,
            None,
            ConnectionState::Idle,
        ))
    }
}

impl<C: PayloadCodec> Connection<C> {
    /// Create a client connection; nothing is dialed until [`start`](Self::start)
    pub fn new(
        config: ConnectionConfig,
        key_exchange: Arc<dyn KeyExchange>,
        codec: C,
    ) -> Result<Self, ConnectionError> {
        config.validate()?;
        Ok(Self::from_shared(Shared::new(
            Role::Client,
            config,
            key_exchange,
            Arc::new(codec),
            None,
            None,
            ConnectionState::Idle,
        )))
    }

    /// Server connection over a transport that already passed the greeting
    /// and key exchange; the engine completes the Connect round trip.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn accepted(
        config: ConnectionConfig,
        key_exchange: Arc<dyn KeyExchange>,
        codec: Arc<C>,
        upstream: Arc<Observers<C::Message>>,
        stream: BoxedStream,
        crypto: Arc<dyn CryptoSession>,
        peer: Endpoint,
        handshake_deadline: Instant,
    ) -> Self {
        let (link, reader) = split_stream(stream, crypto.clone(), config.max_payload_size);
        let connection = Self::from_shared(Shared::new(
            Role::Server,
            config,
            key_exchange,
            codec,
            Some(upstream),
            Some(link),
            ConnectionState::Handshaking,
        ));
        let _ = connection.shared.endpoint.set(peer.clone());

        let active = Active {
            reader,
            crypto,
            heartbeat: None,
            handshake_deadline,
        };
        connection.spawn(peer, Some(active));
        connection
    }

    fn from_shared(shared: Shared<C>) -> Self {
        Self {
            shared: Arc::new(shared),
            control: std::sync::Mutex::new(None),
        }
    }

    fn control(&self) -> MutexGuard<'_, Option<Control>> {
        self.control
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn spawn(&self, peer: Endpoint, active: Option<Active>) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let engine = Engine {
            shared: self.shared.clone(),
            commands: commands_rx,
            peer,
            reconnect: ReconnectPolicy::new(self.shared.config.connect_retry_interval),
        };
        let task = tokio::spawn(engine.run(active));
        *self.control() = Some(Control {
            commands: commands_tx,
            task,
        });
    }

    /// Subscribe to this connection's lifecycle events
    pub fn subscribe(&self) -> EventReceiver<C::Message> {
        self.shared.observers.subscribe()
    }

    /// Begin dialing `endpoint`, retrying until connected or stopped
    pub fn start(&self, endpoint: Endpoint) -> Result<(), ConnectionError> {
        if self.shared.role == Role::Server {
            return Err(ConnectionError::ServerRole);
        }
        if self.state() == ConnectionState::Closed {
            return Err(ConnectionError::Closed);
        }
        if self.shared.endpoint.set(endpoint.clone()).is_err() {
            return Err(ConnectionError::AlreadyStarted);
        }

        info!("Starting {} to {}", self.shared.id, endpoint);
        self.spawn(endpoint, None);
        Ok(())
    }

    /// Serialize `message` with the payload codec and send it encrypted
    pub async fn send_message(&self, message: &C::Message) -> Result<(), SendError> {
        let plaintext = self.shared.codec.encode(message)?;
        self.send_sealed(&plaintext, WireMessage::Message).await
    }

    /// Send raw bytes encrypted
    pub async fn send_raw(&self, payload: &[u8]) -> Result<(), SendError> {
        self.send_sealed(payload, WireMessage::Raw).await
    }

    async fn send_sealed(
        &self,
        plaintext: &[u8],
        wrap: fn(Bytes) -> WireMessage,
    ) -> Result<(), SendError> {
        if self.state() != ConnectionState::Connected {
            return Err(SendError::NotConnected);
        }

        let limit = self.shared.config.ping_timeout;
        let mut guard = match timeout(limit, self.shared.link.lock()).await {
            Ok(guard) => guard,
            Err(_) => return Err(WireError::Io(io::ErrorKind::TimedOut.into()).into()),
        };
        let link = guard.as_mut().ok_or(SendError::NotConnected)?;
        let cipher = link.crypto.encrypt(plaintext)?;
        let unit = wrap(Bytes::from(cipher));
        let len = unit.encoded_len();

        let written = match timeout(limit, link.writer.send(unit)).await {
            Ok(result) => result,
            Err(_) => Err(WireError::Io(io::ErrorKind::TimedOut.into())),
        };
        if let Err(e) = written {
            // After an i/o failure a partial unit may be on the wire; the engine
            // sees the missing writer on its next write and treats the transport
            // as lost. Size errors are raised before anything is written.
            if matches!(e, WireError::Io(_)) {
                warn!("{} dropping writer after failed send: {}", self.shared.id, e);
                *guard = None;
            }
            return Err(e.into());
        }
        drop(guard);

        self.shared.stats().record_out(len, Instant::now());
        Ok(())
    }

    /// Close the connection and wait for the engine task to exit.
    ///
    /// Sends `Disconnect` first if connected. Calling it again is a no-op.
    pub async fn stop(&self) {
        let control = self.control().take();
        match control {
            Some(Control { commands, task }) => {
                let _ = commands.send(Command::Stop);
                drop(commands);
                if let Err(e) = task.await {
                    error!("{} task failed: {}", self.shared.id, e);
                    self.shared.set_state(ConnectionState::Closed);
                }
            }
            None => {
                if self.shared.endpoint.get().is_none() {
                    self.shared.set_state(ConnectionState::Closed);
                }
            }
        }
    }

    /// Drop the current transport. Clients reconnect; servers stop.
    pub async fn restart(&self) {
        if self.shared.role == Role::Server {
            return self.stop().await;
        }
        if let Some(control) = self.control().as_ref() {
            let _ = control.commands.send(Command::Restart);
        }
    }

    /// Current state
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Watch state transitions
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Wait until the connection is in `target`
    pub async fn wait_for_state(&self, target: ConnectionState) {
        let mut changes = self.state_changes();
        let _ = changes.wait_for(|state| *state == target).await;
    }

    /// Last measured round trip, zero when unknown or disconnected
    pub fn round_trip_time(&self) -> Duration {
        self.shared.stats().last_rtt.unwrap_or_default()
    }

    /// Snapshot of the traffic statistics
    pub fn stats(&self) -> ConnectionStats {
        self.shared.stats().clone()
    }

    /// Remote endpoint, set once started or accepted
    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.shared.endpoint.get()
    }

    /// Client or server
    pub fn role(&self) -> Role {
        self.shared.role
    }

    /// Process-unique identifier
    pub fn id(&self) -> ConnectionId {
        self.shared.id
    }

    /// Configuration in effect
    pub fn config(&self) -> &ConnectionConfig {
        &self.shared.config
    }
}

impl<C: PayloadCodec> fmt::Debug for Connection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.shared.id)
            .field("role", &self.shared.role)
            .field("endpoint", &self.shared.endpoint.get())
            .field("state", &self.state())
            .finish()
    }
}
