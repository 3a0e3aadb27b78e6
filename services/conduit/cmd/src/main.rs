//! Conduit node binary.
//!
//! `conduit listen` runs an echo server that sends every received message and
//! raw payload back to its sender. `conduit connect` dials a server, sends each
//! line read from stdin, and prints whatever comes back.

use anyhow::Context;
use clap::{Parser, Subcommand};
use conduit_crypto::X25519KeyExchange;
use conduit_session::{
    listen_tcp, Acceptor, Connection, ConnectionConfig, ConnectionEvent, ConnectionId, Endpoint,
};
use conduit_wire::JsonCodec;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod logging;

use config::NodeConfig;
use logging::ConduitLogFormatter;

const DEFAULT_PORT: u16 = 7700;

/// Encrypted point-to-point sessions over TCP
#[derive(Parser, Debug)]
#[command(name = "conduit", version, about = "Encrypted point-to-point session node")]
struct Args {
    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Configuration file path (YAML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Minimum spacing between dial attempts, e.g. 1s
    #[arg(long, global = true)]
    retry_interval: Option<humantime::Duration>,

    /// Ping interval, e.g. 1s
    #[arg(long, global = true)]
    ping_interval: Option<humantime::Duration>,

    /// Silence after which a connection is lost, e.g. 5s
    #[arg(long, global = true)]
    ping_timeout: Option<humantime::Duration>,

    /// Bound on dial, greeting, key exchange and Connect round trip, e.g. 10s
    #[arg(long, global = true)]
    handshake_timeout: Option<humantime::Duration>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Accept connections and echo everything back
    Listen {
        /// Listen address, e.g. 0.0.0.0:7700
        #[arg(long)]
        listen: Option<SocketAddr>,
    },
    /// Dial a server and send stdin lines
    Connect {
        /// Server endpoint, e.g. 127.0.0.1:7700 or [::1]:7700
        #[arg(long)]
        endpoint: Option<String>,

        /// Send lines as raw bytes instead of JSON messages
        #[arg(long)]
        raw: bool,
    },
}

impl Args {
    /// Command-line flags win over file and environment
    fn apply_to(&self, config: &mut ConnectionConfig) {
        if let Some(value) = &self.retry_interval {
            config.connect_retry_interval = **value;
        }
        if let Some(value) = &self.ping_interval {
            config.ping_interval = **value;
        }
        if let Some(value) = &self.ping_timeout {
            config.ping_timeout = **value;
        }
        if let Some(value) = &self.handshake_timeout {
            config.handshake_timeout = **value;
        }
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::new("info")
            .add_directive(format!("conduit={}", args.log_level).parse()?)
            .add_directive(format!("conduit_session={}", args.log_level).parse()?)
            .add_directive(format!("conduit_wire={}", args.log_level).parse()?)
            .add_directive(format!("conduit_crypto={}", args.log_level).parse()?),
    };

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_ansi(true)
        .event_format(ConduitLogFormatter::new("conduit"))
        .init();

    info!("Starting conduit v{}", env!("CARGO_PKG_VERSION"));

    let mut node_config = match &args.config {
        Some(path) => NodeConfig::load_from_file(path)?,
        None => NodeConfig::from_environment(),
    };
    args.apply_to(&mut node_config.connection);
    node_config
        .connection
        .validate()
        .context("Invalid connection configuration")?;

    match &args.command {
        Command::Listen { listen } => {
            let addr = listen
                .or(node_config.listen)
                .context("No listen address: pass --listen or set `listen` in the config file")?;
            run_listener(addr, node_config.connection).await
        }
        Command::Connect { endpoint, raw } => {
            let descriptor = endpoint
                .clone()
                .or(node_config.connect)
                .context("No endpoint: pass --endpoint or set `connect` in the config file")?;
            let endpoint = Endpoint::parse_with_default_port(&descriptor, Some(DEFAULT_PORT))
                .with_context(|| format!("Invalid endpoint {:?}", descriptor))?;
            run_client(endpoint, node_config.connection, *raw).await
        }
    }
}

async fn run_listener(addr: SocketAddr, config: ConnectionConfig) -> anyhow::Result<()> {
    let acceptor = Arc::new(Acceptor::new(
        config,
        Arc::new(X25519KeyExchange::new()),
        JsonCodec::<Value>::new(),
    )?);
    let mut events = acceptor.subscribe();

    let listener = listen_tcp(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    let (tx, mut accepted) = mpsc::channel(64);
    let server = tokio::spawn(acceptor.clone().serve(listener, tx));

    let mut connections: HashMap<ConnectionId, Connection> = HashMap::new();

    loop {
        tokio::select! {
            Some(connection) = accepted.recv() => {
                debug!("Tracking {:?}", connection);
                connections.insert(connection.id(), connection);
            }
            Some(event) = events.recv() => match event {
                ConnectionEvent::Connected { id, peer } => info!("{} connected from {}", id, peer),
                ConnectionEvent::MessageReceived { id, peer, message } => {
                    info!("Message from {}: {}", peer, message);
                    if let Some(connection) = echo_target(&connections, id, &peer) {
                        if let Err(e) = connection.send_message(&message).await {
                            warn!("Echo to {} failed: {}", peer, e);
                        }
                    }
                }
                ConnectionEvent::RawReceived { id, peer, payload } => {
                    info!("{} raw bytes from {}", payload.len(), peer);
                    if let Some(connection) = echo_target(&connections, id, &peer) {
                        if let Err(e) = connection.send_raw(&payload).await {
                            warn!("Echo to {} failed: {}", peer, e);
                        }
                    }
                }
                ConnectionEvent::Disconnected { id, peer } => {
                    info!("{} from {} disconnected", id, peer);
                    connections.remove(&id);
                }
                ConnectionEvent::ConnectionLost { id, peer } => {
                    warn!("{} from {} lost", id, peer);
                    connections.remove(&id);
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT, shutting down");
                break;
            }
        }
    }

    server.abort();
    for (_, connection) in connections.drain() {
        connection.stop().await;
    }
    info!("Conduit listener shutdown complete");
    Ok(())
}

/// Accepted handle for `id`; the event can arrive before the handle does
fn echo_target<'a>(
    connections: &'a HashMap<ConnectionId, Connection>,
    id: ConnectionId,
    peer: &Endpoint,
) -> Option<&'a Connection> {
    let target = connections.get(&id);
    if target.is_none() {
        warn!("{} from {} not tracked yet, payload not echoed", id, peer);
    }
    target
}

async fn run_client(endpoint: Endpoint, config: ConnectionConfig, raw: bool) -> anyhow::Result<()> {
    let connection = Connection::new(
        config,
        Arc::new(X25519KeyExchange::new()),
        JsonCodec::<Value>::new(),
    )?;
    let mut events = connection.subscribe();
    connection.start(endpoint)?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            line = lines.next_line(), if stdin_open => match line.context("Failed to read stdin")? {
                Some(line) => {
                    let result = if raw {
                        connection.send_raw(line.as_bytes()).await
                    } else {
                        connection.send_message(&json!({ "text": line })).await
                    };
                    if let Err(e) = result {
                        warn!("Send failed: {}", e);
                    }
                }
                None => stdin_open = false,
            },
            Some(event) = events.recv() => match event {
                ConnectionEvent::Connected { peer, .. } => info!("Connected to {}", peer),
                ConnectionEvent::MessageReceived { message, .. } => println!("{}", message),
                ConnectionEvent::RawReceived { payload, .. } => {
                    println!("{}", String::from_utf8_lossy(&payload));
                }
                ConnectionEvent::ConnectionLost { peer, .. } => {
                    warn!("Connection to {} lost, reconnecting", peer);
                }
                ConnectionEvent::Disconnected { peer, .. } => {
                    info!("{} closed the connection", peer);
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT, shutting down");
                break;
            }
        }
    }

    connection.stop().await;
    info!(
        "Conduit client shutdown complete (rtt {:?}, stats {:?})",
        connection.round_trip_time(),
        connection.stats()
    );
    Ok(())
}
