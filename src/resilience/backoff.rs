//! Backoff delay calculation.
//!
//! The delay is a pure function of the attempt number, the policy and a jitter
//! sample, so tests can pin the sample instead of seeding a generator.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::resilience::retries::RetryPolicy;

/// How the delay grows between retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    #[default]
    Exponential,
    Linear,
    Constant,
}

/// Delay before attempt `attempt`.
///
/// Exponential waits `initial * multiplier^attempt`, linear
/// `initial * (attempt + 1)`, constant `initial`.
///
/// `jitter_sample` is a uniform value in `[0, 1)`; with jitter enabled the
/// capped delay is scaled by `0.5 + jitter_sample`.
pub fn calculate_backoff(attempt: u32, policy: &RetryPolicy, jitter_sample: f64) -> Duration {
    let initial = policy.initial_delay.as_secs_f64();
    let raw = match policy.strategy {
        BackoffStrategy::Exponential => {
            initial * policy.multiplier.powi(attempt.min(i32::MAX as u32) as i32)
        }
        BackoffStrategy::Linear => initial * (f64::from(attempt) + 1.0),
        BackoffStrategy::Constant => initial,
    };

    let capped = raw.min(policy.max_delay.as_secs_f64()).max(0.0);
    let scaled = if policy.jitter {
        capped * (0.5 + jitter_sample.clamp(0.0, 1.0))
    } else {
        capped
    };

    Duration::from_secs_f64(scaled)
}

/// Draw a jitter sample from the thread-local generator.
pub fn jitter_sample() -> f64 {
    rand::thread_rng().gen_range(0.0..1.0)
}
