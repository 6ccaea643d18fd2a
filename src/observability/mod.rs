//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events, one span per executed command)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout / stderr via tracing-subscriber
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Every command span carries a UUID v4 operation id
//! - Secrets never appear in events; endpoints are logged as `host:port`
//! - Metric updates are no-ops until an exporter is installed

pub mod logging;
pub mod metrics;
