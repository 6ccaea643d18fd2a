//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! ProtocolClient needs a session
//!     → pool.rs (reuse a validated idle session or open a new one)
//!     → connection.rs (TCP connect, greeting, auth digest, line exchange)
//!     → endpoint.rs (host/port identity and secret)
//!
//! Connection States:
//!     Active → Closed
//! ```
//!
//! # Design Decisions
//! - A session belongs to exactly one caller at a time
//! - Closed sessions are never returned to the idle queue
//! - The pool is generic over its connection manager so it can be tested without sockets

pub mod connection;
pub mod endpoint;
pub mod pool;

pub use connection::{Connection, ConnectionId, ConnectionState};
pub use endpoint::{Endpoint, EndpointKey, DEFAULT_PORT};
pub use pool::{
    ConnectionManager, ConnectionPool, DeviceConnector, PoolSettings, PoolStats, PooledConnection,
};
