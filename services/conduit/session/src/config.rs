//! Connection tunables.

use crate::error::ConfigError;
use conduit_wire::DEFAULT_MAX_PAYLOAD_SIZE;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a connection, fixed once the connection starts.
///
/// Durations are expressed in (fractional) seconds when serialized.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Minimum spacing between client dial attempts
    #[serde(with = "secs")]
    pub connect_retry_interval: Duration,
    /// Interval between PING units
    #[serde(with = "secs")]
    pub ping_interval: Duration,
    /// Silence after which the connection is considered lost
    #[serde(with = "secs")]
    pub ping_timeout: Duration,
    /// Bound on dial + greeting + key exchange + Connect round trip
    #[serde(with = "secs")]
    pub handshake_timeout: Duration,
    /// Largest accepted application ciphertext
    pub max_payload_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_retry_interval: Duration::from_secs(1),
            ping_interval: Duration::from_secs(1),
            ping_timeout: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(10),
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
        }
    }
}

impl ConnectionConfig {
    /// Reject zero durations and unusable payload limits
    pub fn validate(&self) -> Result<(), ConfigError> {
        let durations = [
            ("connect_retry_interval", self.connect_retry_interval),
            ("ping_interval", self.ping_interval),
            ("ping_timeout", self.ping_timeout),
            ("handshake_timeout", self.handshake_timeout),
        ];
        for (name, value) in durations {
            if value.is_zero() {
                return Err(ConfigError::NonPositive(name));
            }
        }

        let max = u32::MAX as usize;
        if self.max_payload_size == 0 || self.max_payload_size > max {
            return Err(ConfigError::PayloadLimit {
                got: self.max_payload_size,
                max,
            });
        }

        if self.ping_timeout <= self.ping_interval {
            tracing::warn!(
                "ping_timeout {:?} is not above ping_interval {:?}; idle peers will be dropped",
                self.ping_timeout,
                self.ping_interval
            );
        }

        Ok(())
    }
}

mod secs {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(D::Error::custom(format!(
                "expected a non-negative number of seconds, got {}",
                secs
            )));
        }
        Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ConnectionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.ping_interval, Duration::from_secs(1));
        assert_eq!(config.max_payload_size, DEFAULT_MAX_PAYLOAD_SIZE);
    }

    #[test]
    fn test_zero_durations_rejected() {
        let config = ConnectionConfig {
            ping_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::NonPositive("ping_timeout"))
        );

        let config = ConnectionConfig {
            max_payload_size: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::PayloadLimit { got: 0, .. })
        ));
    }

    #[test]
    fn test_seconds_deserialization() {
        let config: ConnectionConfig = serde_json::from_str(
            r#"{"connect_retry_interval": 0.5, "ping_interval": 2, "ping_timeout": 7.25}"#,
        )
        .unwrap();

        assert_eq!(config.connect_retry_interval, Duration::from_millis(500));
        assert_eq!(config.ping_interval, Duration::from_secs(2));
        assert_eq!(config.ping_timeout, Duration::from_millis(7250));
        // Missing fields fall back to defaults
        assert_eq!(config.handshake_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_negative_seconds_rejected() {
        let result: Result<ConnectionConfig, _> =
            serde_json::from_str(r#"{"ping_interval": -1}"#);
        assert!(result.is_err());
    }
}
