//! Remote endpoint record and address parsing.
//!
//! Accepted forms: `host:port`, `a.b.c.d:port`, `[v6]:port`, and, when a
//! default port is supplied, `host`, `a.b.c.d`, `[v6]` and bare `v6`.

use crate::error::EndpointError;
use std::fmt;
use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::str::FromStr;

/// Immutable `(host, port)` pair a client dials or a server reports for a peer
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    /// Create an endpoint from parts; IP hosts are stored in canonical form
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let host = host.into();
        let host = match host.parse::<IpAddr>() {
            Ok(ip) => ip.to_string(),
            Err(_) => host,
        };
        Self { host, port }
    }

    /// Host name or IP literal (IPv6 without brackets)
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port number
    pub fn port(&self) -> u16 {
        self.port
    }

    /// IP address if the host is a literal
    pub fn ip(&self) -> Option<IpAddr> {
        self.host.parse().ok()
    }

    /// Parse a descriptor that must carry its own port
    pub fn parse(descriptor: &str) -> Result<Self, EndpointError> {
        Self::parse_with_default_port(descriptor, None)
    }

    /// Parse a descriptor, using `default_port` when it has none
    pub fn parse_with_default_port(
        descriptor: &str,
        default_port: Option<u16>,
    ) -> Result<Self, EndpointError> {
        let trimmed = descriptor.trim();
        if trimmed.is_empty() {
            return Err(EndpointError::Empty);
        }

        let colons = trimmed.matches(':').count();
        let (host, port) = if colons <= 1 {
            // IPv4 literal or hostname
            let (host, port) = match trimmed.split_once(':') {
                Some((host, port)) => (host, Some(parse_port(port)?)),
                None => (trimmed, None),
            };
            if host.parse::<IpAddr>().is_err() && !is_hostname(host) {
                return Err(EndpointError::Address(trimmed.to_string()));
            }
            (host.to_string(), port)
        } else if let Some(rest) = trimmed.strip_prefix('[') {
            // [v6]:port or [v6]
            let (addr, port) = match rest.rsplit_once("]:") {
                Some((addr, port)) => (addr, Some(parse_port(port)?)),
                None => match rest.strip_suffix(']') {
                    Some(addr) => (addr, None),
                    None => return Err(EndpointError::Address(trimmed.to_string())),
                },
            };
            (parse_v6(addr, trimmed)?, port)
        } else {
            // Bare v6, never carries a port
            (parse_v6(trimmed, trimmed)?, None)
        };

        let port = port
            .or(default_port)
            .ok_or_else(|| EndpointError::MissingPort(trimmed.to_string()))?;

        Ok(Self::new(host, port))
    }

    /// Resolve to a connectable socket address, preferring IPv4
    pub async fn resolve(&self) -> Result<SocketAddr, EndpointError> {
        if let Some(ip) = self.ip() {
            return Ok(SocketAddr::new(ip, self.port));
        }

        let addrs: Vec<SocketAddr> = tokio::net::lookup_host((self.host.as_str(), self.port))
            .await
            .map_err(EndpointError::Resolve)?
            .collect();

        addrs
            .iter()
            .find(|addr| addr.is_ipv4())
            .or_else(|| addrs.first())
            .copied()
            .ok_or_else(|| EndpointError::HostNotFound(self.host.clone()))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for Endpoint {
    type Err = EndpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Self {
            host: addr.ip().to_string(),
            port: addr.port(),
        }
    }
}

fn parse_port(port: &str) -> Result<u16, EndpointError> {
    if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
        return Err(EndpointError::Port(port.to_string()));
    }
    port.parse::<u16>()
        .map_err(|_| EndpointError::Port(port.to_string()))
}

fn parse_v6(addr: &str, descriptor: &str) -> Result<String, EndpointError> {
    addr.parse::<Ipv6Addr>()
        .map(|ip| ip.to_string())
        .map_err(|_| EndpointError::Address(descriptor.to_string()))
}

fn is_hostname(host: &str) -> bool {
    !host.is_empty()
        && host.len() <= 253
        && host.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
        })
}
