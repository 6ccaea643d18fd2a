//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Operation on a device:
//!     → retries.rs (attempt loop, backoff between transient failures)
//!     → circuit_breaker.rs (fail fast while the endpoint is Open)
//!     → timeouts.rs (deadline on every socket operation)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every socket operation has a deadline
//! - Retries only for network errors; the device's own answers are final
//! - Circuit breaker prevents hammering an unreachable display
//! - Delay computation is pure; sleeping goes through the Tokio timer

pub mod backoff;
pub mod circuit_breaker;
pub mod retries;
pub mod timeouts;

pub use backoff::BackoffStrategy;
pub use circuit_breaker::{BreakerRegistry, BreakerSettings, CircuitBreaker, CircuitState};
pub use retries::{AuditRecord, CommandOutcome, Reconnect, RetryExecutor, RetryPolicy};
pub use timeouts::Timeouts;
