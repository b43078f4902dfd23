//! Proxy Configuration Settings
//!
//! Configuration types for the quote proxy, loaded from environment variables.
//! Unparseable numeric values fall back to their defaults.

use std::net::SocketAddr;
use std::ops::RangeInclusive;
use std::time::Duration;

use crate::application::ports::MarketDataType;
use crate::application::services::ConnectorSettings;

/// Upstream gateway connection settings.
#[derive(Debug, Clone)]
pub struct UpstreamSettings {
    /// Gateway host.
    pub host: String,
    /// Gateway port.
    pub port: u16,
    /// Identity token for the first connect attempt.
    pub client_id: i32,
    /// Lowest randomized identity after a conflict.
    pub client_id_min: i32,
    /// Highest randomized identity after a conflict.
    pub client_id_max: i32,
    /// Delay before retrying after a connection failure.
    pub retry_delay: Duration,
    /// Delay before retrying after an identity conflict.
    pub conflict_delay: Duration,
    /// Bound on the gateway hello handshake.
    pub handshake_timeout: Duration,
    /// Market data mode requested after connecting.
    pub market_data_type: MarketDataType,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7496,
            client_id: 999,
            client_id_min: 1000,
            client_id_max: 9999,
            retry_delay: Duration::from_secs(5),
            conflict_delay: Duration::from_millis(100),
            handshake_timeout: Duration::from_secs(10),
            market_data_type: MarketDataType::Delayed,
        }
    }
}

impl UpstreamSettings {
    /// Gateway WebSocket URL.
    #[must_use]
    pub fn url(&self) -> String {
        format!("ws://{}", format_addr(&self.host, self.port))
    }

    /// Identity range used after a conflict.
    #[must_use]
    pub fn identity_range(&self) -> RangeInclusive<i32> {
        let (lo, hi) = if self.client_id_min <= self.client_id_max {
            (self.client_id_min, self.client_id_max)
        } else {
            (self.client_id_max, self.client_id_min)
        };
        lo..=hi
    }

    /// Settings for the session connector.
    #[must_use]
    pub fn connector_settings(&self) -> ConnectorSettings {
        ConnectorSettings {
            initial_identity: self.client_id,
            identity_range: self.identity_range(),
            retry_delay: self.retry_delay,
            conflict_delay: self.conflict_delay,
            market_data_type: self.market_data_type,
        }
    }
}

/// Client-facing and health server settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// WebSocket bind address.
    pub ws_addr: SocketAddr,
    /// Health check HTTP port (0 = disabled).
    pub health_port: u16,
    /// Per-client outbound queue capacity.
    pub outbound_queue_capacity: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            ws_addr: SocketAddr::from(([127, 0, 0, 1], 8765)),
            health_port: 8082,
            outbound_queue_capacity: 256,
        }
    }
}

/// Fan-out settings.
#[derive(Debug, Clone)]
pub struct FanoutSettings {
    /// Wait for the first snapshot in `sync_underlying`.
    pub sync_grace: Duration,
    /// Capacity of the upstream event channel.
    pub event_channel_capacity: usize,
}

impl Default for FanoutSettings {
    fn default() -> Self {
        Self {
            sync_grace: Duration::from_millis(500),
            event_channel_capacity: 4096,
        }
    }
}

/// Complete proxy configuration.
#[derive(Debug, Clone, Default)]
pub struct ProxyConfig {
    /// Upstream gateway settings.
    pub upstream: UpstreamSettings,
    /// Server settings.
    pub server: ServerSettings,
    /// Fan-out settings.
    pub fanout: FanoutSettings,
}

impl ProxyConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the WebSocket bind address is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if the WebSocket bind address is invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Lookup(lookup);
        let upstream_defaults = UpstreamSettings::default();
        let server_defaults = ServerSettings::default();
        let fanout_defaults = FanoutSettings::default();

        let market_data_type = match env.get("MARKET_DATA_TYPE") {
            Some(raw) => raw.parse().unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Invalid MARKET_DATA_TYPE, using default");
                upstream_defaults.market_data_type
            }),
            None => upstream_defaults.market_data_type,
        };

        let upstream = UpstreamSettings {
            host: env
                .get("UPSTREAM_HOST")
                .unwrap_or_else(|| upstream_defaults.host.clone()),
            port: env.parse("UPSTREAM_PORT", upstream_defaults.port),
            client_id: env.parse("UPSTREAM_CLIENT_ID", upstream_defaults.client_id),
            client_id_min: env.parse("UPSTREAM_CLIENT_ID_MIN", upstream_defaults.client_id_min),
            client_id_max: env.parse("UPSTREAM_CLIENT_ID_MAX", upstream_defaults.client_id_max),
            retry_delay: env.duration_secs(
                "UPSTREAM_RETRY_DELAY_SECS",
                upstream_defaults.retry_delay,
            ),
            conflict_delay: env.duration_millis(
                "UPSTREAM_CONFLICT_DELAY_MS",
                upstream_defaults.conflict_delay,
            ),
            handshake_timeout: env.duration_secs(
                "UPSTREAM_HANDSHAKE_TIMEOUT_SECS",
                upstream_defaults.handshake_timeout,
            ),
            market_data_type,
        };

        let ws_host = env
            .get("WS_HOST")
            .unwrap_or_else(|| server_defaults.ws_addr.ip().to_string());
        let ws_port = env.parse("WS_PORT", server_defaults.ws_addr.port());
        let ws_addr = format_addr(&ws_host, ws_port)
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidAddress {
                value: format!("{ws_host}:{ws_port}"),
                reason: e.to_string(),
            })?;

        let server = ServerSettings {
            ws_addr,
            health_port: env.parse("HEALTH_PORT", server_defaults.health_port),
            outbound_queue_capacity: env
                .parse("OUTBOUND_QUEUE_CAPACITY", server_defaults.outbound_queue_capacity)
                .max(1),
        };

        let fanout = FanoutSettings {
            sync_grace: env.duration_millis("SYNC_GRACE_MS", fanout_defaults.sync_grace),
            event_channel_capacity: env
                .parse("EVENT_CHANNEL_CAPACITY", fanout_defaults.event_channel_capacity)
                .max(1),
        };

        Ok(Self {
            upstream,
            server,
            fanout,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A bind address could not be parsed.
    #[error("invalid bind address {value}: {reason}")]
    InvalidAddress {
        /// The offending value.
        value: String,
        /// Parser message.
        reason: String,
    },
}

fn format_addr(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

struct Lookup<F>(F);

impl<F> Lookup<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.get(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn duration_secs(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_secs)
    }

    fn duration_millis(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }
}
