//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for display control.
//! All types derive Serde traits for deserialization from config files.

use secrecy::SecretString;
use serde::{Deserialize, Deserializer, Serialize};

use crate::net::endpoint::DEFAULT_PORT;
use crate::protocol::commands::DeviceFamily;
use crate::resilience::backoff::BackoffStrategy;

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ControlConfig {
    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Retry policy shared by all devices.
    pub retry: RetryConfig,

    /// Circuit breaker thresholds, applied per endpoint.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Connection pool sizing, applied per endpoint.
    pub pool: PoolConfig,

    /// Wire-level deadlines.
    pub timeouts: TimeoutConfig,

    /// Power transition timing.
    pub power: PowerConfig,

    /// Controlled displays.
    pub devices: Vec<DeviceConfig>,
}

impl ControlConfig {
    /// Find a device by name.
    pub fn device(&self, name: &str) -> Option<&DeviceConfig> {
        self.devices.iter().find(|d| d.name == name)
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,

    /// Delay before the first retry in milliseconds.
    pub initial_delay_ms: u64,

    /// Upper bound on any single delay in milliseconds.
    pub max_delay_ms: u64,

    /// Growth factor for exponential backoff.
    pub multiplier: f64,

    /// Backoff strategy (exponential, linear, constant).
    pub strategy: BackoffStrategy,

    /// Scale each delay by a random factor in [0.5, 1.5).
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 500,
            max_delay_ms: 5000,
            multiplier: 2.0,
            strategy: BackoffStrategy::Exponential,
            jitter: true,
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive network failures before the circuit opens.
    pub failure_threshold: u32,

    /// Seconds to stay open before admitting a trial call.
    pub recovery_timeout_secs: u64,

    /// Trial successes needed to close again.
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_secs: 30,
            half_open_max_calls: 1,
        }
    }
}

/// Connection pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Connections opened eagerly on first use.
    pub min_connections: usize,

    /// Maximum live connections per endpoint. Most displays accept very few.
    pub max_connections: usize,

    /// How long a caller waits for a free connection, in milliseconds.
    pub connection_timeout_ms: u64,

    /// Idle connections older than this are closed, in seconds.
    pub idle_timeout_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: 0,
            max_connections: 2,
            connection_timeout_ms: 5000,
            idle_timeout_secs: 20,
        }
    }
}

/// Timeout configuration for socket operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// TCP connect plus greeting, in milliseconds.
    pub connect_ms: u64,

    /// One command exchange, in milliseconds.
    pub command_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_ms: 5000,
            command_ms: 5000,
        }
    }
}

/// Power transition timing.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PowerConfig {
    /// Seconds a display needs to warm up after power-on.
    pub warmup_secs: u64,

    /// Seconds a display needs to cool down after power-off.
    pub cooldown_secs: u64,
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            warmup_secs: 30,
            cooldown_secs: 60,
        }
    }
}

/// Control protocol spoken by a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    #[default]
    Pjlink,
}

/// One controlled display.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeviceConfig {
    /// Unique device name used on the command line and in logs.
    pub name: String,

    /// Hostname or IP address.
    pub host: String,

    /// TCP port (default: 4352).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Device password, if authentication is enabled on the display.
    #[serde(default, skip_serializing, deserialize_with = "deserialize_secret")]
    pub password: Option<SecretString>,

    /// Protocol class implemented by the device.
    #[serde(default)]
    pub family: DeviceFamily,

    #[serde(default)]
    pub protocol: Protocol,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.map(SecretString::from))
}
