//! Retry logic.
//!
//! # Responsibilities
//! - Run an operation through the endpoint's circuit breaker
//! - Retry transient (network) failures with backoff + jitter
//! - Drop the session's connection between attempts
//! - Report a structured outcome with attempt count and duration
//!
//! # Design Decisions
//! - Never retry protocol, state or authentication errors
//! - At most `max_retries + 1` attempts
//! - Each execution runs in a span carrying a UUID v4 operation id

use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::RetryConfig;
use crate::error::ControlError;
use crate::observability::metrics;
use crate::resilience::backoff::{calculate_backoff, jitter_sample, BackoffStrategy};
use crate::resilience::circuit_breaker::CircuitBreaker;

/// Retry policy. Immutable once built.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub strategy: BackoffStrategy,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_millis(5000),
            multiplier: 2.0,
            strategy: BackoffStrategy::Exponential,
            jitter: true,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            multiplier: config.multiplier,
            strategy: config.strategy,
            jitter: config.jitter,
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt` (attempt 0 never waits), with a fresh jitter sample.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let sample = if self.jitter { jitter_sample() } else { 0.0 };
        calculate_backoff(attempt, self, sample)
    }
}

/// A session that can drop its connection so the next attempt starts fresh.
pub trait Reconnect {
    fn reconnect(&self) -> impl Future<Output = ()> + Send;
}

/// Result of one executed operation.
#[derive(Debug)]
pub struct CommandOutcome<T> {
    pub operation: String,
    pub result: Result<T, ControlError>,
    pub attempts: u32,
    pub elapsed: Duration,
}

impl<T> CommandOutcome<T> {
    pub fn success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn value(&self) -> Option<&T> {
        self.result.as_ref().ok()
    }

    pub fn error(&self) -> Option<&ControlError> {
        self.result.as_ref().err()
    }

    /// `(success, result, error)`.
    pub fn into_tuple(self) -> (bool, Option<T>, Option<ControlError>) {
        match self.result {
            Ok(v) => (true, Some(v), None),
            Err(e) => (false, None, Some(e)),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> CommandOutcome<U> {
        CommandOutcome {
            operation: self.operation,
            result: self.result.map(f),
            attempts: self.attempts,
            elapsed: self.elapsed,
        }
    }

    /// User-facing failure message, `None` on success.
    pub fn error_message(&self) -> Option<String> {
        self.error().map(|e| {
            let noun = if self.attempts == 1 { "attempt" } else { "attempts" };
            format!(
                "`{}` failed after {} {}: {}",
                self.operation, self.attempts, noun, e
            )
        })
    }

    /// Structured record for an audit collaborator.
    pub fn audit_record(&self, device: Option<&str>) -> AuditRecord {
        AuditRecord {
            operation: self.operation.clone(),
            device: device.map(str::to_string),
            success: self.success(),
            duration_ms: self.elapsed.as_millis() as u64,
            attempts: self.attempts,
            error_code: self.error().map(ControlError::code),
            error: self.error_message(),
        }
    }
}

/// One audited operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditRecord {
    pub operation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    pub success: bool,
    pub duration_ms: u64,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Runs operations with retries through one endpoint's breaker.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    breaker: Arc<CircuitBreaker>,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy, breaker: Arc<CircuitBreaker>) -> Self {
        Self { policy, breaker }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Execute `operation`, retrying network failures.
    pub async fn execute_with_retry<T, S, F, Fut>(
        &self,
        name: &str,
        session: &S,
        mut operation: F,
    ) -> CommandOutcome<T>
    where
        S: Reconnect,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ControlError>>,
    {
        let op_id = Uuid::new_v4();
        let span = tracing::info_span!(
            "command",
            operation = name,
            op_id = %op_id,
            endpoint = %self.breaker.endpoint()
        );

        async {
            let started = Instant::now();
            let max_attempts = self.policy.max_retries.saturating_add(1);
            let mut attempts = 0;

            let result = loop {
                if attempts > 0 {
                    let delay = self.policy.delay_for(attempts);
                    tracing::debug!(
                        attempt = attempts + 1,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying after backoff"
                    );
                    metrics::record_retry(name);
                    tokio::time::sleep(delay).await;
                }
                attempts += 1;

                match self.breaker.call(&mut operation).await {
                    Ok(value) => break Ok(value),
                    Err(e) if e.is_retryable() => {
                        tracing::warn!(attempt = attempts, error = %e, "Transient failure");
                        session.reconnect().await;
                        if attempts >= max_attempts {
                            break Err(e);
                        }
                    }
                    Err(e) => {
                        tracing::debug!(attempt = attempts, error = %e, "Terminal failure");
                        break Err(e);
                    }
                }
            };

            let outcome = CommandOutcome {
                operation: name.to_string(),
                result,
                attempts,
                elapsed: started.elapsed(),
            };
            metrics::record_command(name, outcome.success(), outcome.elapsed);
            match outcome.error_message() {
                None => tracing::info!(
                    attempts,
                    elapsed_ms = outcome.elapsed.as_millis() as u64,
                    "Command succeeded"
                ),
                Some(message) => tracing::warn!(attempts, "{}", message),
            }
            outcome
        }
        .instrument(span)
        .await
    }
}
