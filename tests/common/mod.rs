//! Shared utilities for integration testing: a scripted PJLink display.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use display_control::config::{parse_config, ControlConfig};

pub const NONCE: &str = "498e4a67";
pub const PASSWORD: &str = "JBMIAProjectorLink";
pub const DIGEST: &str = "5d8409bc1c3fa39749434aa3a5c38682";

/// Behaviour knobs for a mock display.
#[derive(Debug, Clone, Default)]
pub struct MockOptions {
    /// Require the digest of `PASSWORD` on the first command.
    pub authenticated: bool,
    /// Close this many connections before sending the greeting.
    pub drop_first: usize,
    /// Delay before every reply.
    pub reply_delay: Duration,
}

#[derive(Debug, Default)]
pub struct MockState {
    power: Mutex<String>,
    input: Mutex<String>,
    mute: Mutex<String>,
    freeze: Mutex<String>,
    overrides: Mutex<HashMap<String, String>>,
    commands: Mutex<Vec<String>>,
    connections: AtomicUsize,
    active: AtomicUsize,
    peak_active: AtomicUsize,
}

/// A display listening on an ephemeral localhost port.
pub struct MockDisplay {
    pub addr: SocketAddr,
    pub state: Arc<MockState>,
}

impl MockDisplay {
    pub async fn start(options: MockOptions) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(MockState {
            power: Mutex::new("0".into()),
            input: Mutex::new("11".into()),
            mute: Mutex::new("30".into()),
            freeze: Mutex::new("0".into()),
            ..Default::default()
        });

        let shared = state.clone();
        tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    break;
                };
                let index = shared.connections.fetch_add(1, Ordering::SeqCst);
                if index < options.drop_first {
                    drop(socket);
                    continue;
                }
                let state = shared.clone();
                let options = options.clone();
                tokio::spawn(async move {
                    let now = state.active.fetch_add(1, Ordering::SeqCst) + 1;
                    state.peak_active.fetch_max(now, Ordering::SeqCst);
                    let _ = serve(socket, &state, &options).await;
                    state.active.fetch_sub(1, Ordering::SeqCst);
                });
            }
        });

        Self { addr, state }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Every command line received, digest stripped.
    pub fn commands(&self) -> Vec<String> {
        self.state.commands.lock().unwrap().clone()
    }

    pub fn count(&self, line: &str) -> usize {
        self.commands().iter().filter(|c| c.as_str() == line).count()
    }

    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    pub fn peak_active(&self) -> usize {
        self.state.peak_active.load(Ordering::SeqCst)
    }

    pub fn set_power(&self, value: &str) {
        *self.state.power.lock().unwrap() = value.to_string();
    }

    /// Answer `line` (e.g. `"%1POWR 1"`) with `value` instead of the normal reply.
    pub fn answer(&self, line: &str, value: &str) {
        self.state
            .overrides
            .lock()
            .unwrap()
            .insert(line.to_string(), value.to_string());
    }
}

async fn serve(socket: TcpStream, state: &MockState, options: &MockOptions) -> std::io::Result<()> {
    let mut socket = BufReader::new(socket);
    if options.authenticated {
        socket
            .get_mut()
            .write_all(format!("PJLINK 1 {NONCE}\r").as_bytes())
            .await?;
    } else {
        socket.get_mut().write_all(b"PJLINK 0\r").await?;
    }

    let mut first = true;
    loop {
        let mut raw = Vec::new();
        if socket.read_until(b'\r', &mut raw).await? == 0 {
            return Ok(());
        }
        let mut line = String::from_utf8_lossy(&raw).trim_end_matches('\r').to_string();

        if first && options.authenticated {
            match line.strip_prefix(DIGEST) {
                Some(rest) => line = rest.to_string(),
                None => {
                    socket.get_mut().write_all(b"PJLINK ERRA\r").await?;
                    return Ok(());
                }
            }
        }
        first = false;

        state.commands.lock().unwrap().push(line.clone());
        let reply = respond(state, &line);
        if !options.reply_delay.is_zero() {
            tokio::time::sleep(options.reply_delay).await;
        }
        socket.get_mut().write_all(reply.as_bytes()).await?;
    }
}

fn respond(state: &MockState, line: &str) -> String {
    let Some((head, param)) = line.split_once(' ') else {
        return "%1ERR1\r".into();
    };
    let value = match state.overrides.lock().unwrap().get(line) {
        Some(v) => v.clone(),
        None => match (head, param) {
            ("%1POWR", "?") => state.power.lock().unwrap().clone(),
            ("%1POWR", p) => {
                *state.power.lock().unwrap() = p.to_string();
                "OK".into()
            }
            ("%1INPT", "?") => state.input.lock().unwrap().clone(),
            ("%1INPT", p) => {
                *state.input.lock().unwrap() = p.to_string();
                "OK".into()
            }
            ("%1AVMT", "?") => state.mute.lock().unwrap().clone(),
            ("%1AVMT", p) => {
                *state.mute.lock().unwrap() = p.to_string();
                "OK".into()
            }
            ("%1LAMP", "?") => "1200 1".into(),
            ("%1ERST", "?") => "000000".into(),
            ("%1INST", "?") => "11 31 32".into(),
            ("%1NAME", "?") => "Hall".into(),
            ("%1INF1", "?") => "Acme".into(),
            ("%1INF2", "?") => "PJ-100".into(),
            ("%1INFO", "?") => "lens 2".into(),
            ("%1CLSS", "?") => "2".into(),
            ("%2SNUM", "?") => "SN-0042".into(),
            ("%2SVER", "?") => "1.07".into(),
            ("%2RLMP", "?") => "LMP-9".into(),
            ("%2RFIL", "?") => "FLT-3".into(),
            ("%2FILT", "?") => "310".into(),
            ("%2FREZ", "?") => state.freeze.lock().unwrap().clone(),
            ("%2FREZ", p) => {
                *state.freeze.lock().unwrap() = p.to_string();
                "OK".into()
            }
            _ => "ERR1".into(),
        },
    };
    format!("{head}={value}\r")
}

/// Configuration with one device named `hall` on `port`, fast retries and no jitter.
pub fn config_for_port(port: u16) -> ControlConfig {
    let toml = format!(
        r#"
        [retry]
        max_retries = 3
        initial_delay_ms = 10
        max_delay_ms = 50
        jitter = false

        [timeouts]
        connect_ms = 1000
        command_ms = 1000

        [[devices]]
        name = "hall"
        host = "127.0.0.1"
        port = {port}
        "#
    );
    parse_config(&toml).unwrap()
}

pub fn config_for(display: &MockDisplay) -> ControlConfig {
    config_for_port(display.port())
}
