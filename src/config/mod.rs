//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ControlConfig (validated, immutable)
//!     → per-component settings built in constructors
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Passwords deserialize straight into a redacting secret type

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    CircuitBreakerConfig, ControlConfig, DeviceConfig, ObservabilityConfig, PoolConfig,
    PowerConfig, Protocol, RetryConfig, TimeoutConfig,
};
pub use validation::{validate_config, ValidationError};
