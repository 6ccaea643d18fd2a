//! Network display control library.
//!
//! Drives projectors and flat panels over the PJLink line protocol with
//! pooled sessions, retries, per-endpoint circuit breakers and a power
//! lifecycle guard.

pub mod config;
pub mod device;
pub mod error;
pub mod health;
pub mod net;
pub mod observability;
pub mod protocol;
pub mod resilience;

pub use config::ControlConfig;
pub use device::{DeviceRegistry, DisplayController, Operation, OperationOutput};
pub use error::{ControlError, ControlResult};
pub use resilience::CommandOutcome;
