//! One authenticated TCP session with a display.
//!
//! # Responsibilities
//! - Open the socket and consume the greeting
//! - Prepend the authentication digest to the first command
//! - Exchange exactly one command line for one reply line
//! - Answer a cheap liveness probe for the pool

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use uuid::Uuid;

use crate::error::{ControlError, NetworkErrorKind};
use crate::net::endpoint::Endpoint;
use crate::protocol::auth::{self, Greeting, DIGEST_LEN};
use crate::protocol::codec::{trim_line, MAX_LINE_LEN, TERMINATOR};
use crate::resilience::timeouts::{with_timeout, Timeouts};

/// Session identifier carried in log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let id = self.0.simple().to_string();
        write!(f, "conn-{}", &id[..8])
    }
}

/// Session state for lifecycle tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Greeting consumed, commands can be exchanged.
    Active,
    /// The device closed the session or the stream is out of sync.
    Closed,
}

/// An open session with one device.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    endpoint: String,
    stream: BufReader<TcpStream>,
    greeting: Greeting,
    pending_digest: Option<String>,
    timeouts: Timeouts,
    state: ConnectionState,
}

impl Connection {
    /// Connect, read the greeting and prepare authentication.
    pub async fn open(endpoint: &Endpoint, timeouts: Timeouts) -> Result<Self, ControlError> {
        let stream = with_timeout(
            timeouts.connect,
            &endpoint.to_string(),
            "connect",
            TcpStream::connect((endpoint.host(), endpoint.port())),
        )
        .await?;
        Self::handshake(stream, endpoint, timeouts).await
    }

    /// Read the greeting from an already connected stream.
    pub async fn handshake(
        stream: TcpStream,
        endpoint: &Endpoint,
        timeouts: Timeouts,
    ) -> Result<Self, ControlError> {
        let label = endpoint.to_string();
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(endpoint = %label, error = %e, "Could not disable Nagle on session");
        }

        let mut stream = BufReader::new(stream);
        let line = read_line(&mut stream, &label, timeouts.connect).await?;
        if auth::is_auth_failure(&line) {
            return Err(ControlError::Authentication {
                endpoint: label,
                message: "device refused the session".into(),
            });
        }

        let greeting = auth::parse_greeting(&line)?;
        let pending_digest = match &greeting {
            Greeting::Open => None,
            Greeting::Challenge { nonce } => match endpoint.secret() {
                Some(secret) => Some(auth::digest(nonce, secret)),
                None => {
                    return Err(ControlError::Authentication {
                        endpoint: label,
                        message: "device requires a password but none is configured".into(),
                    })
                }
            },
        };

        let id = ConnectionId(Uuid::new_v4());
        tracing::debug!(
            connection_id = %id,
            endpoint = %label,
            auth = greeting.requires_auth(),
            "Session opened"
        );

        Ok(Self {
            id,
            endpoint: label,
            stream,
            greeting,
            pending_digest,
            timeouts,
            state: ConnectionState::Active,
        })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn greeting(&self) -> &Greeting {
        &self.greeting
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Write one encoded command line and read one reply line.
    ///
    /// The returned line has its terminator stripped.
    pub async fn exchange(&mut self, line: &str) -> Result<String, ControlError> {
        let mut out = String::with_capacity(DIGEST_LEN + line.len());
        if let Some(digest) = self.pending_digest.take() {
            out.push_str(&digest);
        }
        out.push_str(line);

        let result = self.write_then_read(out.as_bytes()).await;
        match &result {
            Ok(reply) if auth::is_auth_failure(reply) => {
                self.state = ConnectionState::Closed;
                return Err(ControlError::Authentication {
                    endpoint: self.endpoint.clone(),
                    message: "digest rejected".into(),
                });
            }
            Err(_) => self.state = ConnectionState::Closed,
            Ok(_) => {}
        }
        result
    }

    async fn write_then_read(&mut self, bytes: &[u8]) -> Result<String, ControlError> {
        let timeouts = self.timeouts;
        let endpoint = self.endpoint.as_str();
        let stream = &mut self.stream;

        with_timeout(timeouts.command, endpoint, "write", async {
            stream.get_mut().write_all(bytes).await?;
            stream.get_mut().flush().await
        })
        .await?;

        read_line(stream, endpoint, timeouts.command).await
    }

    /// Non-blocking liveness probe.
    ///
    /// A healthy idle session has nothing to read. EOF means the device hung
    /// up; unsolicited bytes mean the stream is out of sync.
    pub fn is_alive(&self) -> bool {
        if self.state == ConnectionState::Closed || !self.stream.buffer().is_empty() {
            return false;
        }

        let mut probe = [0u8; 1];
        match self.stream.get_ref().try_read(&mut probe) {
            Err(e) => e.kind() == std::io::ErrorKind::WouldBlock,
            Ok(_) => false,
        }
    }
}

async fn read_line(
    stream: &mut BufReader<TcpStream>,
    endpoint: &str,
    limit: std::time::Duration,
) -> Result<String, ControlError> {
    let mut buf = Vec::with_capacity(64);
    let mut limited = (&mut *stream).take(MAX_LINE_LEN as u64);
    let read = with_timeout(
        limit,
        endpoint,
        "read",
        limited.read_until(TERMINATOR, &mut buf),
    )
    .await?;

    if buf.last() != Some(&TERMINATOR) {
        if read >= MAX_LINE_LEN {
            return Err(ControlError::protocol(format!(
                "reply from {endpoint} exceeds {MAX_LINE_LEN} bytes"
            )));
        }
        return Err(ControlError::Network {
            endpoint: endpoint.to_string(),
            kind: NetworkErrorKind::Closed,
            message: "connection closed by device".into(),
        });
    }

    let line = String::from_utf8(buf)
        .map_err(|_| ControlError::protocol(format!("non-ASCII reply from {endpoint}")))?;
    Ok(trim_line(&line).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn listener() -> (TcpListener, Endpoint) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, Endpoint::new("127.0.0.1", port))
    }

    #[test]
    fn connection_ids_render_short() {
        let id = ConnectionId(Uuid::new_v4());
        let shown = id.to_string();
        assert!(shown.starts_with("conn-"));
        assert_eq!(shown.len(), "conn-".len() + 8);
        assert_ne!(id, ConnectionId(Uuid::new_v4()));
    }

    #[tokio::test]
    async fn first_command_carries_reference_digest() {
        let (listener, endpoint) = listener().await;
        let device = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut socket = BufReader::new(socket);
            socket.get_mut().write_all(b"PJLINK 1 12345678\r").await.unwrap();

            let mut first = Vec::new();
            socket.read_until(b'\r', &mut first).await.unwrap();
            socket.get_mut().write_all(b"%1POWR=0\r").await.unwrap();

            let mut second = Vec::new();
            socket.read_until(b'\r', &mut second).await.unwrap();
            socket.get_mut().write_all(b"%1POWR=OK\r").await.unwrap();
            (String::from_utf8(first).unwrap(), String::from_utf8(second).unwrap())
        });

        let endpoint = endpoint.with_secret("LinkPass");
        let mut conn = Connection::open(&endpoint, Timeouts::default()).await.unwrap();
        assert!(conn.greeting().requires_auth());
        assert_eq!(conn.exchange("%1POWR ?\r").await.unwrap(), "%1POWR=0");
        assert_eq!(conn.exchange("%1POWR 1\r").await.unwrap(), "%1POWR=OK");

        let (first, second) = device.await.unwrap();
        assert_eq!(first, "e054930f7d3ffe715410981efaaa5455%1POWR ?\r");
        assert_eq!(second, "%1POWR 1\r");
    }

    #[tokio::test]
    async fn challenge_without_secret_is_an_auth_error() {
        let (listener, endpoint) = listener().await;
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"PJLINK 1 12345678\r").await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        });

        let err = Connection::open(&endpoint, Timeouts::default()).await.unwrap_err();
        assert!(matches!(err, ControlError::Authentication { .. }));
    }

    #[tokio::test]
    async fn rejected_digest_closes_the_session() {
        let (listener, endpoint) = listener().await;
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut socket = BufReader::new(socket);
            socket.get_mut().write_all(b"PJLINK 1 12345678\r").await.unwrap();
            let mut line = Vec::new();
            socket.read_until(b'\r', &mut line).await.unwrap();
            socket.get_mut().write_all(b"PJLINK ERRA\r").await.unwrap();
        });

        let endpoint = endpoint.with_secret("wrong");
        let mut conn = Connection::open(&endpoint, Timeouts::default()).await.unwrap();
        let err = conn.exchange("%1POWR ?\r").await.unwrap_err();
        assert!(matches!(err, ControlError::Authentication { .. }));
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(!conn.is_alive());
    }

    #[tokio::test]
    async fn liveness_probe_detects_hangup() {
        let (listener, endpoint) = listener().await;
        let (hangup_tx, hangup_rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"PJLINK 0\r").await.unwrap();
            let _ = hangup_rx.await;
            drop(socket);
        });

        let conn = Connection::open(&endpoint, Timeouts::default()).await.unwrap();
        assert!(conn.is_alive());

        hangup_tx.send(()).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert!(!conn.is_alive());
    }

    #[tokio::test]
    async fn refused_connection_is_transient() {
        let (listener, endpoint) = listener().await;
        drop(listener);
        let err = Connection::open(&endpoint, Timeouts::default()).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
