//! Error taxonomy for device control.
//!
//! # Classes
//! - Transient: `Network` (timeout, refused, reset). Retried by the executor.
//! - Terminal: everything else. Surfaced to the caller on the first occurrence.
//!
//! # Design Decisions
//! - Authentication failures are never retried; devices lock out repeated bad digests
//! - `State` errors are referred to the power state machine instead of retried
//! - Only `Network` errors count against an endpoint's circuit breaker

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Error code carried in an `ERRn` reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceErrorCode {
    /// ERR1: undefined command.
    UndefinedCommand,
    /// ERR2: parameter out of range.
    OutOfParameter,
    /// ERR3: command unavailable at this time (warming, cooling, switching).
    UnavailableTime,
    /// ERR4: device failure.
    DeviceFailure,
}

impl DeviceErrorCode {
    /// Parse the value part of a reply (`ERR1`..`ERR4`).
    pub fn from_reply(value: &str) -> Option<Self> {
        match value {
            "ERR1" => Some(Self::UndefinedCommand),
            "ERR2" => Some(Self::OutOfParameter),
            "ERR3" => Some(Self::UnavailableTime),
            "ERR4" => Some(Self::DeviceFailure),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UndefinedCommand => "ERR1",
            Self::OutOfParameter => "ERR2",
            Self::UnavailableTime => "ERR3",
            Self::DeviceFailure => "ERR4",
        }
    }

    /// True for codes that mean "valid command, wrong device state".
    pub fn is_state_rejection(&self) -> bool {
        matches!(self, Self::UnavailableTime | Self::DeviceFailure)
    }

    fn description(&self) -> &'static str {
        match self {
            Self::UndefinedCommand => "undefined command",
            Self::OutOfParameter => "parameter out of range",
            Self::UnavailableTime => "unavailable at this time",
            Self::DeviceFailure => "device failure",
        }
    }
}

impl fmt::Display for DeviceErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.as_str(), self.description())
    }
}

/// What went wrong at the transport level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkErrorKind {
    Refused,
    Timeout,
    Reset,
    Closed,
    Unresolved,
    Other,
}

impl NetworkErrorKind {
    fn from_io(err: &std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::ConnectionRefused => Self::Refused,
            ErrorKind::TimedOut | ErrorKind::WouldBlock => Self::Timeout,
            ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::BrokenPipe => {
                Self::Reset
            }
            ErrorKind::UnexpectedEof => Self::Closed,
            _ => Self::Other,
        }
    }
}

/// Errors that can occur while controlling a display.
#[derive(Debug, Clone, Error)]
pub enum ControlError {
    /// Connection refused, timed out, reset or closed mid-exchange.
    #[error("network error talking to {endpoint}: {message}")]
    Network {
        endpoint: String,
        kind: NetworkErrorKind,
        message: String,
    },

    /// Malformed reply, unsupported command or out-of-range parameter.
    #[error("protocol error: {message}")]
    Protocol {
        code: Option<DeviceErrorCode>,
        message: String,
    },

    /// The device rejected the authentication digest or none was available.
    #[error("authentication rejected by {endpoint}: {message}")]
    Authentication { endpoint: String, message: String },

    /// Valid command rejected because of the device's current state.
    #[error("device rejected command in its current state: {code}")]
    State { code: DeviceErrorCode },

    /// Circuit breaker is open for this endpoint.
    #[error("circuit open for {endpoint}, retry in {}s", retry_after.as_secs())]
    CircuitOpen {
        endpoint: String,
        retry_after: Duration,
    },

    /// No pooled connection became available in time.
    #[error("connection pool for {endpoint} exhausted after {}ms", waited.as_millis())]
    PoolExhausted { endpoint: String, waited: Duration },

    /// Rejected locally by the power state machine; nothing was sent.
    #[error("{reason}")]
    PowerGuard {
        reason: String,
        retry_after: Option<Duration>,
    },

    /// No device with this name is configured.
    #[error("unknown device: {name}")]
    UnknownDevice { name: String },
}

impl ControlError {
    /// Build a `Network` error from an I/O failure.
    pub fn network(endpoint: impl Into<String>, err: &std::io::Error) -> Self {
        Self::Network {
            endpoint: endpoint.into(),
            kind: NetworkErrorKind::from_io(err),
            message: err.to_string(),
        }
    }

    /// Build a `Network` timeout error.
    pub fn timeout(endpoint: impl Into<String>, what: &str, after: Duration) -> Self {
        Self::Network {
            endpoint: endpoint.into(),
            kind: NetworkErrorKind::Timeout,
            message: format!("{what} timed out after {}ms", after.as_millis()),
        }
    }

    /// Build a `Protocol` error without a device error code.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            code: None,
            message: message.into(),
        }
    }

    /// Map an `ERRn` reply code to the matching error class.
    pub fn from_device_code(code: DeviceErrorCode, command: &str) -> Self {
        if code.is_state_rejection() {
            Self::State { code }
        } else {
            Self::Protocol {
                code: Some(code),
                message: format!("{command} rejected: {code}"),
            }
        }
    }

    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network { .. })
    }

    /// Returns `true` if this error says the endpoint itself is unhealthy.
    pub fn is_endpoint_failure(&self) -> bool {
        matches!(self, Self::Network { .. })
    }

    /// Returns `true` if the device answered (even if it said no).
    pub fn device_responded(&self) -> bool {
        matches!(
            self,
            Self::Protocol { .. } | Self::State { .. } | Self::Authentication { .. }
        )
    }

    /// The device error code, if the device sent one.
    pub fn device_code(&self) -> Option<DeviceErrorCode> {
        match self {
            Self::Protocol { code, .. } => *code,
            Self::State { code } => Some(*code),
            _ => None,
        }
    }

    /// Stable code for audit records.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Network { .. } => "network",
            Self::Protocol { .. } => "protocol",
            Self::Authentication { .. } => "authentication",
            Self::State { .. } => "state",
            Self::CircuitOpen { .. } => "circuit_open",
            Self::PoolExhausted { .. } => "pool_exhausted",
            Self::PowerGuard { .. } => "power_guard",
            Self::UnknownDevice { .. } => "unknown_device",
        }
    }
}

pub type ControlResult<T> = Result<T, ControlError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_codes_split_into_protocol_and_state() {
        let err = ControlError::from_device_code(DeviceErrorCode::OutOfParameter, "POWR");
        assert!(matches!(
            err,
            ControlError::Protocol { code: Some(DeviceErrorCode::OutOfParameter), .. }
        ));

        let err = ControlError::from_device_code(DeviceErrorCode::UnavailableTime, "POWR");
        assert!(matches!(err, ControlError::State { .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn only_network_errors_are_retryable() {
        let io = std::io::Error::from(std::io::ErrorKind::ConnectionRefused);
        let err = ControlError::network("10.0.0.5:4352", &io);
        assert!(err.is_retryable());
        assert!(err.is_endpoint_failure());
        assert!(matches!(err, ControlError::Network { kind: NetworkErrorKind::Refused, .. }));

        let auth = ControlError::Authentication {
            endpoint: "10.0.0.5:4352".into(),
            message: "ERRA".into(),
        };
        assert!(!auth.is_retryable());
        assert!(auth.device_responded());
        assert_eq!(auth.code(), "authentication");
    }
}
