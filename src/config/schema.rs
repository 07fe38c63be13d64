//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address, handshake limits).
    pub listener: ListenerConfig,

    /// Admission controller (token limiter) settings.
    pub limiter: TokenLimiterConfig,

    /// permessage-deflate settings.
    pub compression: CompressionConfig,

    /// Token verification settings.
    pub jwt: JwtConfig,

    /// Per-link behaviour once a connection is established.
    pub link: LinkConfig,

    /// Where session records are stored.
    pub session: SessionConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:9002").
    pub bind_address: String,

    /// Maximum time a peer may take to complete the upgrade handshake.
    pub handshake_timeout_ms: u64,

    /// Largest single message (after decompression) a link will accept.
    pub max_message_size: usize,

    /// Time allowed for established links to finish after shutdown starts.
    pub drain_timeout_secs: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:9002".to_string(),
            handshake_timeout_ms: 5_000,
            max_message_size: 16 * 1024 * 1024,
            drain_timeout_secs: 10,
        }
    }
}

impl ListenerConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

/// Token limiter configuration.
///
/// Signed integers so that a negative value in a config file is reported by
/// validation instead of failing deserialization with an opaque error.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TokenLimiterConfig {
    /// Units available right after startup.
    pub initial_capacity: i64,

    /// Steady-state ceiling reached after warm-up.
    pub max_capacity: i64,

    /// Units added per ramp-up tick.
    pub increase_step: i64,

    /// Ramp-up tick period in milliseconds.
    pub increase_interval_ms: i64,
}

impl Default for TokenLimiterConfig {
    fn default() -> Self {
        Self {
            initial_capacity: 1_000,
            max_capacity: 10_000,
            increase_step: 1_000,
            increase_interval_ms: 30_000,
        }
    }
}

/// permessage-deflate configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// Offer compression during the handshake.
    pub enabled: bool,

    /// Largest LZ77 window exponent the server will compress with (8-15).
    pub server_max_window: u8,

    /// Largest LZ77 window exponent the client may compress with (8-15).
    pub client_max_window: u8,

    /// Server compresses every message with a fresh context.
    pub server_no_context: bool,

    /// Ask the client to compress every message with a fresh context.
    pub client_no_context: bool,

    /// Deflate level, 1 (fastest) to 9 (smallest).
    pub level: u32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            server_max_window: 15,
            client_max_window: 15,
            server_no_context: true,
            client_no_context: true,
            level: 6,
        }
    }
}

/// JWT verification configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct JwtConfig {
    /// HMAC secret shared with the token issuer.
    pub key: String,

    /// Issuer stamped into tokens minted by this process.
    pub issuer: String,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            // WARNING: This is a placeholder! Change this in production.
            key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            issuer: "ws-gateway".to_string(),
        }
    }
}

/// Established-link configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Idle period after which links that allow auto-close are closed.
    pub idle_timeout_secs: u64,

    /// Outbound queue depth per link.
    pub send_buffer: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 300,
            send_buffer: 256,
        }
    }
}

impl LinkConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

/// Session storage configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct SessionConfig {
    /// Which backend holds session records.
    pub backend: SessionBackendKind,

    /// Connection settings, used when `backend = "redis"`.
    pub redis: RedisConfig,
}

/// Session backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionBackendKind {
    /// Records live in this process only.
    #[default]
    Memory,
    /// Records live in a Redis server shared by every instance.
    Redis,
}

/// Redis connection settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Server address as `host:port`.
    pub addr: String,

    /// Optional AUTH password.
    pub password: Option<String>,

    /// Logical database index.
    pub db: i64,

    /// Number of multiplexed connections.
    pub pool_size: usize,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:6379".to_string(),
            password: None,
            db: 0,
            pool_size: 4,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format ("pretty" or "json").
    pub log_format: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let raw = r#"
            [limiter]
            initial_capacity = 2
            max_capacity = 5

            [compression]
            enabled = false
        "#;
        let config: GatewayConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.limiter.initial_capacity, 2);
        assert_eq!(config.limiter.max_capacity, 5);
        assert_eq!(config.limiter.increase_step, 1_000);
        assert!(!config.compression.enabled);
        assert_eq!(config.compression.level, 6);
        assert_eq!(config.listener.bind_address, "0.0.0.0:9002");
        assert_eq!(config.session.backend, SessionBackendKind::Memory);
    }

    #[test]
    fn redis_session_section() {
        let raw = r#"
            [session]
            backend = "redis"

            [session.redis]
            addr = "redis.internal:6380"
            password = "secret"
            db = 2
        "#;
        let config: GatewayConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.session.backend, SessionBackendKind::Redis);
        assert_eq!(config.session.redis.addr, "redis.internal:6380");
        assert_eq!(config.session.redis.password.as_deref(), Some("secret"));
        assert_eq!(config.session.redis.db, 2);
        assert_eq!(config.session.redis.pool_size, 4);

        assert!(toml::from_str::<GatewayConfig>("[session]\nbackend = \"etcd\"").is_err());
    }
}
