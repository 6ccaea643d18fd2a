//! Timeout enforcement.
//!
//! # Responsibilities
//! - Wrap every socket operation with a deadline
//! - Turn an elapsed deadline into a transient network error
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - There is no mid-command cancellation; abandoning a call means waiting out its timeout

use std::future::Future;
use std::time::Duration;

use crate::config::TimeoutConfig;
use crate::error::ControlError;

/// Wire-level deadlines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// TCP connect plus greeting.
    pub connect: Duration,
    /// One command line out, one reply line back.
    pub command: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(5),
            command: Duration::from_secs(5),
        }
    }
}

impl From<&TimeoutConfig> for Timeouts {
    fn from(config: &TimeoutConfig) -> Self {
        Self {
            connect: Duration::from_millis(config.connect_ms),
            command: Duration::from_millis(config.command_ms),
        }
    }
}

/// Run an I/O future under a deadline, mapping failures to `ControlError::Network`.
pub async fn with_timeout<T, F>(
    limit: Duration,
    endpoint: &str,
    what: &str,
    fut: F,
) -> Result<T, ControlError>
where
    F: Future<Output = std::io::Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(ControlError::network(endpoint, &e)),
        Err(_) => Err(ControlError::timeout(endpoint, what, limit)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NetworkErrorKind;

    #[tokio::test(start_paused = true)]
    async fn elapsed_deadline_is_a_network_timeout() {
        let result: Result<(), _> = with_timeout(
            Duration::from_secs(5),
            "10.0.0.9:4352",
            "read",
            std::future::pending(),
        )
        .await;

        let err = result.unwrap_err();
        assert!(err.is_retryable());
        assert!(matches!(err, ControlError::Network { kind: NetworkErrorKind::Timeout, .. }));
    }

    #[tokio::test]
    async fn io_errors_keep_their_kind() {
        let result: Result<(), _> = with_timeout(Duration::from_secs(1), "x:1", "connect", async {
            Err(std::io::Error::from(std::io::ErrorKind::ConnectionRefused))
        })
        .await;
        assert!(matches!(
            result,
            Err(ControlError::Network { kind: NetworkErrorKind::Refused, .. })
        ));
    }
}
