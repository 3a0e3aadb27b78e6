//! Configuration handling for the conduit node.
//!
//! Values come from an optional YAML file, then environment variables, then
//! command-line flags (applied in `main`).

use anyhow::{Context, Result};
use conduit_session::ConnectionConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Node configuration (matches the YAML structure)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Address the `listen` subcommand binds
    pub listen: Option<SocketAddr>,
    /// Endpoint descriptor the `connect` subcommand dials
    pub connect: Option<String>,
    /// Connection tunables
    pub connection: ConnectionConfig,
}

impl NodeConfig {
    /// Load configuration from file and environment variables
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let path = config_path.as_ref();
        let mut config = match std::fs::read_to_string(path) {
            Ok(content) => {
                let config: Self = serde_yaml::from_str(&content)
                    .with_context(|| format!("Failed to parse config file {:?}", path))?;
                info!("Loaded configuration from {:?}", path);
                config
            }
            Err(e) => {
                warn!("Config file {:?} not readable ({}), using defaults", path, e);
                Self::default()
            }
        };

        config.apply_environment_overrides();
        Ok(config)
    }

    /// Defaults plus environment variables, for runs without a config file
    pub fn from_environment() -> Self {
        let mut config = Self::default();
        config.apply_environment_overrides();
        config
    }

    /// Apply environment variable overrides
    pub fn apply_environment_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let connection = &mut self.connection;
        let overrides: [(&str, &mut Duration); 4] = [
            ("CONDUIT_RETRY_INTERVAL", &mut connection.connect_retry_interval),
            ("CONDUIT_PING_INTERVAL", &mut connection.ping_interval),
            ("CONDUIT_PING_TIMEOUT", &mut connection.ping_timeout),
            ("CONDUIT_HANDSHAKE_TIMEOUT", &mut connection.handshake_timeout),
        ];

        for (key, slot) in overrides {
            let Some(value) = lookup(key) else {
                continue;
            };
            match parse_duration(&value) {
                Some(duration) => {
                    *slot = duration;
                    info!("{} overridden by environment: {:?}", key, duration);
                }
                None => warn!("Ignoring {}={:?}: not a duration", key, value),
            }
        }
    }
}

/// Accepts humantime (`250ms`, `2s`) or plain seconds (`1.5`)
fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(duration) = humantime::parse_duration(value) {
        return Some(duration);
    }
    value
        .parse::<f64>()
        .ok()
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = NodeConfig::default();
        assert!(config.listen.is_none());
        assert!(config.connect.is_none());
        assert_eq!(config.connection, ConnectionConfig::default());
    }

    #[test]
    fn test_load_from_file() {
        let yaml_content = r#"
listen: 127.0.0.1:7700
connect: "[::1]:7700"
connection:
  connect_retry_interval: 0.5
  ping_interval: 2
  ping_timeout: 10
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(yaml_content.as_bytes()).unwrap();

        let config = NodeConfig::load_from_file(temp_file.path()).unwrap();

        assert_eq!(config.listen, Some("127.0.0.1:7700".parse().unwrap()));
        assert_eq!(config.connect.as_deref(), Some("[::1]:7700"));
        assert_eq!(config.connection.ping_interval, Duration::from_secs(2));
        assert_eq!(config.connection.ping_timeout, Duration::from_secs(10));
        assert_eq!(config.connection.handshake_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"connection: [not, a, map]").unwrap();
        assert!(NodeConfig::load_from_file(temp_file.path()).is_err());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = NodeConfig::load_from_file("/nonexistent/conduit.yaml").unwrap();
        assert!(config.listen.is_none());
    }

    #[test]
    fn test_environment_overrides() {
        let env: HashMap<&str, &str> = [
            ("CONDUIT_PING_INTERVAL", "250ms"),
            ("CONDUIT_PING_TIMEOUT", "3"),
            ("CONDUIT_RETRY_INTERVAL", "soon"),
        ]
        .into_iter()
        .collect();

        let mut config = NodeConfig::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.connection.ping_interval, Duration::from_millis(250));
        assert_eq!(config.connection.ping_timeout, Duration::from_secs(3));
        // Unparseable values leave the setting alone
        assert_eq!(config.connection.connect_retry_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("1.5"), Some(Duration::from_millis(1500)));
        assert_eq!(parse_duration(" 2s "), Some(Duration::from_secs(2)));
        assert_eq!(parse_duration("-1"), None);
        assert_eq!(parse_duration(""), None);
    }
}
