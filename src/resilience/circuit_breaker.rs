//! Circuit breaker for endpoint protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: endpoint assumed down, calls fail fast
//! - Half-Open: testing if endpoint recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive failures >= failure_threshold
//! Open → Half-Open: recovery_timeout elapsed since last failure
//! Half-Open → Closed: half_open_max_calls consecutive trial successes
//! Half-Open → Open: trial fails
//! ```
//!
//! # Design Decisions
//! - Per-endpoint circuit breaker (not global)
//! - Fail fast in Open state (no waiting for timeout)
//! - Single trial in flight in Half-Open
//! - Only network failures count; a device that answers "no" is still up

use dashmap::DashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

use crate::config::CircuitBreakerConfig;
use crate::error::ControlError;
use crate::net::endpoint::EndpointKey;
use crate::observability::metrics;

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    fn gauge_value(&self) -> u8 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::HalfOpen => 1,
            CircuitState::Open => 2,
        }
    }
}

/// Thresholds for one breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
    pub half_open_max_calls: u32,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            half_open_max_calls: 1,
        }
    }
}

impl From<&CircuitBreakerConfig> for BreakerSettings {
    fn from(config: &CircuitBreakerConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold,
            recovery_timeout: Duration::from_secs(config.recovery_timeout_secs),
            half_open_max_calls: config.half_open_max_calls,
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    last_failure_time: Option<Instant>,
    half_open_calls: u32,
    trial_in_flight: bool,
}

/// How a finished call affects the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Success,
    Failure,
    Neutral,
}

fn classify<T>(result: &Result<T, ControlError>) -> Verdict {
    match result {
        Ok(_) => Verdict::Success,
        Err(e) if e.is_endpoint_failure() => Verdict::Failure,
        Err(e) if e.device_responded() => Verdict::Success,
        Err(_) => Verdict::Neutral,
    }
}

/// Per-endpoint circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    endpoint: String,
    settings: BreakerSettings,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(endpoint: impl Into<String>, settings: BreakerSettings) -> Self {
        Self {
            endpoint: endpoint.into(),
            settings: BreakerSettings {
                failure_threshold: settings.failure_threshold.max(1),
                half_open_max_calls: settings.half_open_max_calls.max(1),
                ..settings
            },
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure_time: None,
                half_open_calls: 0,
                trial_in_flight: false,
            }),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    /// Run `operation` through the breaker.
    ///
    /// The lock is released before the operation is awaited.
    pub async fn call<T, F, Fut>(&self, operation: F) -> Result<T, ControlError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ControlError>>,
    {
        let mut permit = self.try_acquire()?;
        let result = operation().await;
        permit.complete(classify(&result));
        result
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn try_acquire(&self) -> Result<CallPermit<'_>, ControlError> {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => Ok(CallPermit::new(self, false)),
            CircuitState::Open => {
                let elapsed = inner
                    .last_failure_time
                    .map(|t| t.elapsed())
                    .unwrap_or(self.settings.recovery_timeout);
                if elapsed >= self.settings.recovery_timeout {
                    self.transition(&mut inner, CircuitState::HalfOpen);
                    inner.trial_in_flight = true;
                    Ok(CallPermit::new(self, true))
                } else {
                    Err(ControlError::CircuitOpen {
                        endpoint: self.endpoint.clone(),
                        retry_after: self.settings.recovery_timeout - elapsed,
                    })
                }
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    Err(ControlError::CircuitOpen {
                        endpoint: self.endpoint.clone(),
                        retry_after: Duration::ZERO,
                    })
                } else {
                    inner.trial_in_flight = true;
                    Ok(CallPermit::new(self, true))
                }
            }
        }
    }

    fn on_success(&self, trial: bool) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => inner.failure_count = 0,
            CircuitState::HalfOpen if trial => {
                inner.trial_in_flight = false;
                inner.half_open_calls += 1;
                if inner.half_open_calls >= self.settings.half_open_max_calls {
                    self.transition(&mut inner, CircuitState::Closed);
                }
            }
            // A call admitted before the breaker opened finished late.
            _ => {}
        }
    }

    fn on_failure(&self, trial: bool) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                inner.last_failure_time = Some(Instant::now());
                tracing::debug!(
                    endpoint = %self.endpoint,
                    failures = inner.failure_count,
                    threshold = self.settings.failure_threshold,
                    "Endpoint failure recorded"
                );
                if inner.failure_count >= self.settings.failure_threshold {
                    self.transition(&mut inner, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen if trial => {
                inner.trial_in_flight = false;
                inner.last_failure_time = Some(Instant::now());
                self.transition(&mut inner, CircuitState::Open);
            }
            _ => {}
        }
    }

    fn on_abandon(&self, trial: bool) {
        if trial {
            let mut inner = self.lock();
            if inner.state == CircuitState::HalfOpen {
                inner.trial_in_flight = false;
            }
        }
    }

    fn transition(&self, inner: &mut BreakerState, to: CircuitState) {
        let from = inner.state;
        inner.state = to;
        match to {
            CircuitState::Closed => {
                inner.failure_count = 0;
                inner.half_open_calls = 0;
                tracing::info!(endpoint = %self.endpoint, ?from, "Circuit closed");
            }
            CircuitState::Open => {
                inner.half_open_calls = 0;
                tracing::warn!(
                    endpoint = %self.endpoint,
                    ?from,
                    failures = inner.failure_count,
                    recovery_secs = self.settings.recovery_timeout.as_secs(),
                    "Circuit opened"
                );
            }
            CircuitState::HalfOpen => {
                inner.half_open_calls = 0;
                tracing::info!(endpoint = %self.endpoint, "Circuit half-open, admitting trial call");
            }
        }
        metrics::record_breaker_state(&self.endpoint, to.gauge_value());
    }
}

/// Admission to one call. Dropping it uncompleted releases a half-open trial slot.
struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    done: bool,
}

impl<'a> CallPermit<'a> {
    fn new(breaker: &'a CircuitBreaker, trial: bool) -> Self {
        Self {
            breaker,
            trial,
            done: false,
        }
    }

    fn complete(&mut self, verdict: Verdict) {
        self.done = true;
        match verdict {
            Verdict::Success => self.breaker.on_success(self.trial),
            Verdict::Failure => self.breaker.on_failure(self.trial),
            Verdict::Neutral => self.breaker.on_abandon(self.trial),
        }
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.breaker.on_abandon(self.trial);
        }
    }
}

/// Lazily created breakers, one per endpoint key.
#[derive(Debug, Default)]
pub struct BreakerRegistry {
    settings: BreakerSettings,
    breakers: DashMap<EndpointKey, Arc<CircuitBreaker>>,
}

impl BreakerRegistry {
    pub fn new(settings: BreakerSettings) -> Self {
        Self {
            settings,
            breakers: DashMap::new(),
        }
    }

    pub fn get_or_create(&self, key: &EndpointKey) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(key) {
            return Arc::clone(existing.value());
        }
        let breaker = self
            .breakers
            .entry(key.clone())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(key.to_string(), self.settings)));
        Arc::clone(breaker.value())
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn refused() -> ControlError {
        ControlError::network(
            "10.0.0.5:4352",
            &std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
        )
    }

    fn breaker(threshold: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            "10.0.0.5:4352",
            BreakerSettings {
                failure_threshold: threshold,
                recovery_timeout: Duration::from_secs(30),
                half_open_max_calls: 1,
            },
        )
    }

    async fn fail(b: &CircuitBreaker) -> Result<(), ControlError> {
        b.call(|| async { Err::<(), _>(refused()) }).await
    }

    #[tokio::test(start_paused = true)]
    async fn opens_exactly_at_threshold() {
        let b = breaker(3);
        for expected in 1..3 {
            let _ = fail(&b).await;
            assert_eq!(b.state(), CircuitState::Closed);
            assert_eq!(b.failure_count(), expected);
        }
        let _ = fail(&b).await;
        assert_eq!(b.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn open_breaker_never_invokes_the_operation() {
        let b = breaker(1);
        let _ = fail(&b).await;

        let calls = AtomicUsize::new(0);
        tokio::time::advance(Duration::from_secs(10)).await;
        let err = b
            .call(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ControlError>(())
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        match err {
            ControlError::CircuitOpen { retry_after, .. } => {
                assert_eq!(retry_after, Duration::from_secs(20));
            }
            other => panic!("expected CircuitOpen, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn successful_trial_closes_the_circuit() {
        let b = breaker(1);
        let _ = fail(&b).await;
        tokio::time::advance(Duration::from_secs(30)).await;

        b.call(|| async { Ok::<_, ControlError>(()) }).await.unwrap();
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.failure_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn closing_needs_consecutive_trial_successes() {
        let b = CircuitBreaker::new(
            "10.0.0.5:4352",
            BreakerSettings {
                failure_threshold: 1,
                recovery_timeout: Duration::from_secs(30),
                half_open_max_calls: 2,
            },
        );
        let ok = || async { Ok::<_, ControlError>(()) };

        let _ = fail(&b).await;
        tokio::time::advance(Duration::from_secs(30)).await;
        b.call(ok).await.unwrap();
        assert_eq!(b.state(), CircuitState::HalfOpen);
        assert_eq!(b.lock().half_open_calls, 1);

        // A failure between trials throws away the progress.
        let _ = fail(&b).await;
        assert_eq!(b.state(), CircuitState::Open);
        assert_eq!(b.lock().half_open_calls, 0);

        tokio::time::advance(Duration::from_secs(30)).await;
        b.call(ok).await.unwrap();
        assert_eq!(b.state(), CircuitState::HalfOpen);
        b.call(ok).await.unwrap();
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.failure_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_trial_reopens_and_restarts_the_clock() {
        let b = breaker(1);
        let _ = fail(&b).await;
        tokio::time::advance(Duration::from_secs(31)).await;

        let _ = fail(&b).await;
        assert_eq!(b.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(matches!(fail(&b).await, Err(ControlError::CircuitOpen { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn only_one_trial_in_flight() {
        let b = Arc::new(breaker(1));
        let _ = fail(&b).await;
        tokio::time::advance(Duration::from_secs(30)).await;

        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let trial = {
            let b = Arc::clone(&b);
            tokio::spawn(async move {
                b.call(|| async {
                    let _ = release_rx.await;
                    Ok::<_, ControlError>(())
                })
                .await
            })
        };
        tokio::task::yield_now().await;
        assert_eq!(b.state(), CircuitState::HalfOpen);

        let second = b.call(|| async { Ok::<_, ControlError>(()) }).await;
        assert!(matches!(second, Err(ControlError::CircuitOpen { .. })));

        release_tx.send(()).unwrap();
        trial.await.unwrap().unwrap();
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_trial_releases_its_slot() {
        let b = breaker(1);
        let _ = fail(&b).await;
        tokio::time::advance(Duration::from_secs(30)).await;

        let abandoned = tokio::time::timeout(
            Duration::from_millis(10),
            b.call(|| std::future::pending::<Result<(), ControlError>>()),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(b.state(), CircuitState::HalfOpen);

        b.call(|| async { Ok::<_, ControlError>(()) }).await.unwrap();
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn device_rejections_do_not_trip_the_breaker() {
        let b = breaker(2);
        let _ = fail(&b).await;
        let _ = b
            .call(|| async {
                Err::<(), _>(ControlError::from_device_code(
                    crate::error::DeviceErrorCode::OutOfParameter,
                    "POWR",
                ))
            })
            .await;
        assert_eq!(b.failure_count(), 0);

        let _ = b
            .call(|| async {
                Err::<(), _>(ControlError::PoolExhausted {
                    endpoint: "10.0.0.5:4352".into(),
                    waited: Duration::from_secs(5),
                })
            })
            .await;
        let _ = fail(&b).await;
        assert_eq!(b.failure_count(), 1);
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[test]
    fn registry_shares_breakers_per_endpoint() {
        let registry = BreakerRegistry::new(BreakerSettings::default());
        let key = EndpointKey {
            host: "10.0.0.5".into(),
            port: 4352,
        };
        let a = registry.get_or_create(&key);
        let b = registry.get_or_create(&key);
        assert!(Arc::ptr_eq(&a, &b));

        let other = registry.get_or_create(&EndpointKey {
            host: "10.0.0.6".into(),
            port: 4352,
        });
        assert!(!Arc::ptr_eq(&a, &other));
        assert_eq!(registry.len(), 2);
    }
}
