//! Display control protocol.
//!
//! # Data Flow
//! ```text
//! Command (name + param)
//!     → commands.rs (allowlist lookup for the device family, encode)
//!     → client.rs (pooled session, one line out / one line back)
//!     → codec.rs (decode value, OK or ERRn)
//!     → types.rs (typed values)
//!
//! Session setup:
//!     auth.rs (greeting, nonce + secret digest on the first command)
//! ```
//!
//! # Design Decisions
//! - Commands outside the family's table never reach the wire
//! - ASCII only; every line ends with a carriage return

pub mod auth;
pub mod client;
pub mod codec;
pub mod commands;
pub mod types;

pub use client::ProtocolClient;
pub use codec::Reply;
pub use commands::{Command, CommandTable, DeviceFamily};
