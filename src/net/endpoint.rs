//! Endpoint identity.

use secrecy::{ExposeSecret, SecretString};
use std::fmt;

/// Default TCP port for the display control protocol.
pub const DEFAULT_PORT: u16 = 4352;

/// Key used to partition circuit breakers and pools.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EndpointKey {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for EndpointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// A network-attached display.
///
/// The secret is only read when computing an authentication digest.
#[derive(Debug, Clone)]
pub struct Endpoint {
    key: EndpointKey,
    auth_secret: Option<SecretString>,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            key: EndpointKey {
                host: host.into(),
                port,
            },
            auth_secret: None,
        }
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.auth_secret = Some(SecretString::from(secret.into()));
        self
    }

    pub fn with_auth_secret(mut self, secret: SecretString) -> Self {
        self.auth_secret = Some(secret);
        self
    }

    pub fn host(&self) -> &str {
        &self.key.host
    }

    pub fn port(&self) -> u16 {
        self.key.port
    }

    pub fn key(&self) -> &EndpointKey {
        &self.key
    }

    pub fn has_secret(&self) -> bool {
        self.auth_secret.is_some()
    }

    pub(crate) fn secret(&self) -> Option<&str> {
        self.auth_secret.as_ref().map(|s| s.expose_secret())
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.key.fmt(f)
    }
}
