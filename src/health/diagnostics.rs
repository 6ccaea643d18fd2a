//! Connectivity diagnostics.
//!
//! # Responsibilities
//! - Check one endpoint step by step: address, reachability, port, handshake
//! - Report each step with pass/fail/skip and timing
//!
//! # Design Decisions
//! - Bypasses the breaker and the pool so it works while a circuit is open
//! - A failed prerequisite skips every later step

use serde::Serialize;
use std::net::SocketAddr;
use tokio::net::TcpStream;
use tokio::time::Instant;

use crate::error::{ControlError, NetworkErrorKind};
use crate::net::connection::Connection;
use crate::net::endpoint::Endpoint;
use crate::protocol::codec::{decode_reply, Reply};
use crate::protocol::commands::{Command, CommandTable, DeviceFamily, CLSS};
use crate::resilience::timeouts::{with_timeout, Timeouts};

/// The checks, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Check {
    Address,
    Reachability,
    Port,
    Handshake,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Passed,
    Failed,
    Skipped,
}

/// Outcome of one check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiagnosticStep {
    pub check: Check,
    pub status: StepStatus,
    pub detail: String,
    pub elapsed_ms: u64,
}

/// Full diagnostic run for one endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiagnosticReport {
    pub endpoint: String,
    pub passed: bool,
    pub steps: Vec<DiagnosticStep>,
}

impl DiagnosticReport {
    pub fn all_passed(&self) -> bool {
        self.passed
    }

    pub fn step(&self, check: Check) -> Option<&DiagnosticStep> {
        self.steps.iter().find(|s| s.check == check)
    }
}

struct Recorder {
    steps: Vec<DiagnosticStep>,
    started: Instant,
}

impl Recorder {
    fn record(&mut self, check: Check, status: StepStatus, detail: impl Into<String>) {
        let detail = detail.into();
        let elapsed_ms = self.started.elapsed().as_millis() as u64;
        tracing::debug!(?check, ?status, detail = %detail, "Diagnostic step");
        self.steps.push(DiagnosticStep {
            check,
            status,
            detail,
            elapsed_ms,
        });
        self.started = Instant::now();
    }

    fn skip_rest(&mut self, checks: &[Check]) {
        for check in checks {
            self.steps.push(DiagnosticStep {
                check: *check,
                status: StepStatus::Skipped,
                detail: "previous check failed".into(),
                elapsed_ms: 0,
            });
        }
    }
}

/// Run all checks against `endpoint`.
pub async fn diagnose(endpoint: &Endpoint, timeouts: Timeouts) -> DiagnosticReport {
    let label = endpoint.to_string();
    let mut rec = Recorder {
        steps: Vec::with_capacity(4),
        started: Instant::now(),
    };

    let addr = match resolve(endpoint, timeouts).await {
        Ok(addr) => {
            rec.record(Check::Address, StepStatus::Passed, format!("resolved to {addr}"));
            addr
        }
        Err(e) => {
            rec.record(Check::Address, StepStatus::Failed, e.to_string());
            rec.skip_rest(&[Check::Reachability, Check::Port, Check::Handshake]);
            return finish(label, rec);
        }
    };

    let connected = with_timeout(timeouts.connect, &label, "connect", TcpStream::connect(addr)).await;
    let stream = match connected {
        Ok(stream) => {
            rec.record(Check::Reachability, StepStatus::Passed, "host answered");
            rec.record(
                Check::Port,
                StepStatus::Passed,
                format!("port {} accepted the connection", addr.port()),
            );
            stream
        }
        Err(ControlError::Network {
            kind: NetworkErrorKind::Refused,
            ..
        }) => {
            rec.record(Check::Reachability, StepStatus::Passed, "host answered");
            rec.record(
                Check::Port,
                StepStatus::Failed,
                format!("connection to port {} refused", addr.port()),
            );
            rec.skip_rest(&[Check::Handshake]);
            return finish(label, rec);
        }
        Err(e) => {
            rec.record(Check::Reachability, StepStatus::Failed, e.to_string());
            rec.skip_rest(&[Check::Port, Check::Handshake]);
            return finish(label, rec);
        }
    };

    match handshake(stream, endpoint, timeouts).await {
        Ok(detail) => rec.record(Check::Handshake, StepStatus::Passed, detail),
        Err(e) => rec.record(Check::Handshake, StepStatus::Failed, e.to_string()),
    }
    finish(label, rec)
}

async fn resolve(endpoint: &Endpoint, timeouts: Timeouts) -> Result<SocketAddr, ControlError> {
    let label = endpoint.to_string();
    let mut addrs = with_timeout(
        timeouts.connect,
        &label,
        "resolve",
        tokio::net::lookup_host((endpoint.host(), endpoint.port())),
    )
    .await
    .map_err(|e| match e {
        ControlError::Network {
            kind: NetworkErrorKind::Timeout,
            ..
        } => e,
        ControlError::Network { message, .. } => ControlError::Network {
            endpoint: label.clone(),
            kind: NetworkErrorKind::Unresolved,
            message,
        },
        other => other,
    })?;

    addrs.next().ok_or_else(|| ControlError::Network {
        endpoint: label.clone(),
        kind: NetworkErrorKind::Unresolved,
        message: "no addresses found".into(),
    })
}

/// Greeting, authentication and one class query.
async fn handshake(
    stream: TcpStream,
    endpoint: &Endpoint,
    timeouts: Timeouts,
) -> Result<String, ControlError> {
    let mut conn = Connection::handshake(stream, endpoint, timeouts).await?;
    let encoded = CommandTable::for_family(DeviceFamily::Class1).encode(&Command::query(CLSS))?;
    let line = conn.exchange(&encoded.line).await?;

    let auth = if conn.greeting().requires_auth() {
        "authenticated"
    } else {
        "no authentication"
    };
    match decode_reply(encoded.class, encoded.name, &line) {
        Ok(Reply::Value(class)) => Ok(format!("{auth}, protocol class {class}")),
        Ok(Reply::Ok) => Ok(format!("{auth}, class query acknowledged")),
        Err(e) if e.device_code().is_some() => Ok(format!("{auth}, device answered {e}")),
        Err(e) => Err(e),
    }
}

fn finish(endpoint: String, rec: Recorder) -> DiagnosticReport {
    let passed = rec.steps.iter().all(|s| s.status == StepStatus::Passed);
    DiagnosticReport {
        endpoint,
        passed,
        steps: rec.steps,
    }
}
