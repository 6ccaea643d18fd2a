//! Device control subsystem.
//!
//! # Data Flow
//! ```text
//! CLI / caller names a device and an operation
//!     → registry.rs (lazy controller, shared breaker + pool per endpoint)
//!     → controller.rs (power guard, then executor)
//!     → power.rs (accept, no-op or reject power requests)
//!     → resilience::retries → protocol::client
//! ```
//!
//! # Design Decisions
//! - Operations are a closed enum; unknown names fail before any I/O
//! - The power state machine is consulted before the network, never after

pub mod controller;
pub mod power;
pub mod registry;

pub use controller::{DeviceInfo, DisplayController, Operation, OperationOutput, ServiceInfo};
pub use power::{PowerDecision, PowerPhase, PowerState, PowerStateMachine, PowerTiming};
pub use registry::{create_controller, endpoint_for, DeviceRegistry};
