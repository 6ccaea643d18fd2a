//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (thresholds > 0, ports valid, delay bounds)
//! - Detect duplicate device names
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ControlConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::fmt;

use crate::config::schema::ControlConfig;
use crate::resilience::backoff::BackoffStrategy;

/// One semantic problem, tied to the offending field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &ControlConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let retry = &config.retry;
    if retry.initial_delay_ms > retry.max_delay_ms {
        errors.push(ValidationError::new(
            "retry.initial_delay_ms",
            format!("must not exceed max_delay_ms ({})", retry.max_delay_ms),
        ));
    }
    if retry.strategy == BackoffStrategy::Exponential
        && (retry.multiplier < 1.0 || retry.multiplier.is_nan())
    {
        errors.push(ValidationError::new(
            "retry.multiplier",
            "must be at least 1.0 for exponential backoff",
        ));
    }

    let breaker = &config.circuit_breaker;
    if breaker.failure_threshold == 0 {
        errors.push(ValidationError::new(
            "circuit_breaker.failure_threshold",
            "must be greater than 0",
        ));
    }
    if breaker.half_open_max_calls == 0 {
        errors.push(ValidationError::new(
            "circuit_breaker.half_open_max_calls",
            "must be greater than 0",
        ));
    }

    let pool = &config.pool;
    if pool.max_connections == 0 {
        errors.push(ValidationError::new("pool.max_connections", "must be greater than 0"));
    }
    if pool.min_connections > pool.max_connections {
        errors.push(ValidationError::new(
            "pool.min_connections",
            format!("must not exceed max_connections ({})", pool.max_connections),
        ));
    }
    if pool.connection_timeout_ms == 0 {
        errors.push(ValidationError::new(
            "pool.connection_timeout_ms",
            "must be greater than 0",
        ));
    }

    if config.timeouts.connect_ms == 0 {
        errors.push(ValidationError::new("timeouts.connect_ms", "must be greater than 0"));
    }
    if config.timeouts.command_ms == 0 {
        errors.push(ValidationError::new("timeouts.command_ms", "must be greater than 0"));
    }

    let mut seen = HashSet::new();
    for (i, device) in config.devices.iter().enumerate() {
        let field = |name: &str| format!("devices[{i}].{name}");
        if device.name.trim().is_empty() {
            errors.push(ValidationError::new(field("name"), "must not be empty"));
        } else if !seen.insert(device.name.as_str()) {
            errors.push(ValidationError::new(
                field("name"),
                format!("duplicate device name {:?}", device.name),
            ));
        }
        if device.host.trim().is_empty() {
            errors.push(ValidationError::new(field("host"), "must not be empty"));
        }
        if device.port == 0 {
            errors.push(ValidationError::new(field("port"), "must be greater than 0"));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
