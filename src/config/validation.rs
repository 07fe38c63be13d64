//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (capacities, window bits, timeouts)
//! - Reject obviously unsafe values (empty signing key)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;
use thiserror::Error;

use crate::config::schema::{
    CompressionConfig, GatewayConfig, SessionBackendKind, SessionConfig, TokenLimiterConfig,
};

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Validate a full gateway configuration.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }
    if config.listener.handshake_timeout_ms == 0 {
        errors.push(ValidationError::new(
            "listener.handshake_timeout_ms",
            "must be positive",
        ));
    }
    if config.listener.max_message_size == 0 {
        errors.push(ValidationError::new(
            "listener.max_message_size",
            "must be positive",
        ));
    }

    errors.extend(validate_limiter(&config.limiter));
    errors.extend(validate_compression(&config.compression));

    if config.jwt.key.is_empty() {
        errors.push(ValidationError::new("jwt.key", "must not be empty"));
    }
    if config.link.send_buffer == 0 {
        errors.push(ValidationError::new("link.send_buffer", "must be positive"));
    }
    if config.link.idle_timeout_secs == 0 {
        errors.push(ValidationError::new(
            "link.idle_timeout_secs",
            "must be positive",
        ));
    }
    errors.extend(validate_session(&config.session));

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Limiter rules shared with `TokenLimiter::new`.
pub fn validate_limiter(limiter: &TokenLimiterConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    if limiter.max_capacity <= 0 {
        errors.push(ValidationError::new(
            "limiter.max_capacity",
            "must be positive",
        ));
    }
    if limiter.initial_capacity < 0 {
        errors.push(ValidationError::new(
            "limiter.initial_capacity",
            "must not be negative",
        ));
    }
    if limiter.initial_capacity > limiter.max_capacity {
        errors.push(ValidationError::new(
            "limiter.initial_capacity",
            format!(
                "({}) must not exceed max_capacity ({})",
                limiter.initial_capacity, limiter.max_capacity
            ),
        ));
    }
    if limiter.increase_step <= 0 {
        errors.push(ValidationError::new(
            "limiter.increase_step",
            "must be positive",
        ));
    }
    if limiter.increase_interval_ms <= 0 {
        errors.push(ValidationError::new(
            "limiter.increase_interval_ms",
            "must be positive",
        ));
    }
    errors
}

fn validate_compression(compression: &CompressionConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    if !(8..=15).contains(&compression.server_max_window) {
        errors.push(ValidationError::new(
            "compression.server_max_window",
            "must be within 8..=15",
        ));
    }
    if !(8..=15).contains(&compression.client_max_window) {
        errors.push(ValidationError::new(
            "compression.client_max_window",
            "must be within 8..=15",
        ));
    }
    if !(1..=9).contains(&compression.level) {
        errors.push(ValidationError::new(
            "compression.level",
            "must be within 1..=9",
        ));
    }
    errors
}

fn validate_session(session: &SessionConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    if session.backend != SessionBackendKind::Redis {
        return errors;
    }
    if session.redis.addr.trim().is_empty() {
        errors.push(ValidationError::new(
            "session.redis.addr",
            "must not be empty",
        ));
    }
    if session.redis.pool_size == 0 {
        errors.push(ValidationError::new(
            "session.redis.pool_size",
            "must be positive",
        ));
    }
    if session.redis.db < 0 {
        errors.push(ValidationError::new(
            "session.redis.db",
            "must not be negative",
        ));
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&GatewayConfig::default()).is_ok());
    }

    #[test]
    fn collects_every_error() {
        let mut config = GatewayConfig::default();
        config.limiter.max_capacity = 0;
        config.limiter.increase_step = 0;
        config.compression.server_max_window = 7;
        config.jwt.key.clear();

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert!(fields.contains(&"limiter.max_capacity"));
        assert!(fields.contains(&"limiter.increase_step"));
        assert!(fields.contains(&"compression.server_max_window"));
        assert!(fields.contains(&"jwt.key"));
    }

    #[test]
    fn initial_above_max_is_rejected() {
        let limiter = TokenLimiterConfig {
            initial_capacity: 10,
            max_capacity: 5,
            increase_step: 1,
            increase_interval_ms: 10,
        };
        let errors = validate_limiter(&limiter);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "limiter.initial_capacity");
    }

    #[test]
    fn redis_settings_checked_only_when_selected() {
        let mut config = GatewayConfig::default();
        config.session.redis.pool_size = 0;
        assert!(validate_config(&config).is_ok());

        config.session.backend = SessionBackendKind::Redis;
        config.session.redis.addr.clear();
        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(fields, ["session.redis.addr", "session.redis.pool_size"]);
    }
}
