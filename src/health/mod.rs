//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Operator asks about one device
//!     → diagnostics.rs
//!     → address → reachability → port → handshake
//!     → DiagnosticReport (serializable)
//! ```
//!
//! # Design Decisions
//! - Runs outside the breaker and pool; diagnosis must work when they refuse traffic
//! - Steps after a failed prerequisite are reported as skipped, not failed

pub mod diagnostics;

pub use diagnostics::{diagnose, Check, DiagnosticReport, DiagnosticStep, StepStatus};
