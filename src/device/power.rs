//! Power lifecycle guard.
//!
//! # States
//! - Off, On: stable
//! - Warming, Cooling: predicted transitions with a deadline
//! - Error: unexpected disconnect or unparsable status
//! - Unknown: nothing observed yet
//!
//! # State Transitions
//! ```text
//! Off/Unknown/Error → Warming: power-on accepted
//! On/Unknown/Error  → Cooling: power-off accepted
//! Warming → On, Cooling → Off: deadline passed
//! any → observed phase: confirmed status query
//! ```
//!
//! # Design Decisions
//! - Unsafe requests are rejected before any network call
//! - Duplicate requests are a no-op success so no second hardware command is sent
//! - Time comes from the Tokio clock so tests can pause and advance it

use serde::Serialize;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

use crate::config::PowerConfig;
use crate::error::ControlError;
use crate::observability::metrics;
use crate::protocol::types::PowerStatus;

/// Lifecycle phase of a display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerPhase {
    Off,
    Warming,
    On,
    Cooling,
    Error,
    Unknown,
}

impl PowerPhase {
    fn gauge_value(&self) -> u8 {
        match self {
            PowerPhase::Off => 0,
            PowerPhase::Warming => 1,
            PowerPhase::On => 2,
            PowerPhase::Cooling => 3,
            PowerPhase::Error => 4,
            PowerPhase::Unknown => 5,
        }
    }
}

impl From<PowerStatus> for PowerPhase {
    fn from(status: PowerStatus) -> Self {
        match status {
            PowerStatus::Off => PowerPhase::Off,
            PowerStatus::On => PowerPhase::On,
            PowerStatus::Cooling => PowerPhase::Cooling,
            PowerStatus::Warming => PowerPhase::Warming,
        }
    }
}

/// Warm-up and cool-down durations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PowerTiming {
    pub warmup: Duration,
    pub cooldown: Duration,
}

impl Default for PowerTiming {
    fn default() -> Self {
        Self {
            warmup: Duration::from_secs(30),
            cooldown: Duration::from_secs(60),
        }
    }
}

impl From<&PowerConfig> for PowerTiming {
    fn from(config: &PowerConfig) -> Self {
        Self {
            warmup: Duration::from_secs(config.warmup_secs),
            cooldown: Duration::from_secs(config.cooldown_secs),
        }
    }
}

/// Snapshot of one device's power state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PowerState {
    pub phase: PowerPhase,
    pub entered_at: Instant,
    pub transition_deadline: Option<Instant>,
}

impl PowerState {
    /// Time left until the predicted transition completes.
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.transition_deadline
            .map(|deadline| deadline.saturating_duration_since(now))
    }
}

/// Outcome of a power request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PowerDecision {
    /// Send the hardware command.
    Proceed,
    /// Already there or on the way; nothing to send.
    AlreadyInProgress,
    /// Unsafe right now.
    Rejected {
        reason: String,
        retry_after: Option<Duration>,
    },
}

impl PowerDecision {
    pub fn accepted(&self) -> bool {
        !matches!(self, PowerDecision::Rejected { .. })
    }

    pub fn rejection_reason(&self) -> Option<&str> {
        match self {
            PowerDecision::Rejected { reason, .. } => Some(reason),
            _ => None,
        }
    }

    pub fn requires_command(&self) -> bool {
        matches!(self, PowerDecision::Proceed)
    }

    /// The local rejection as an error, if any.
    pub fn into_error(self) -> Option<ControlError> {
        match self {
            PowerDecision::Rejected {
                reason,
                retry_after,
            } => Some(ControlError::PowerGuard {
                reason,
                retry_after,
            }),
            _ => None,
        }
    }
}

fn ceil_secs(d: Duration) -> u64 {
    d.as_secs() + u64::from(d.subsec_nanos() > 0)
}

/// Tracks one device's power phase and guards power requests.
#[derive(Debug)]
pub struct PowerStateMachine {
    device: String,
    timing: PowerTiming,
    state: Mutex<PowerState>,
}

impl PowerStateMachine {
    pub fn new(device: impl Into<String>, timing: PowerTiming) -> Self {
        Self {
            device: device.into(),
            timing,
            state: Mutex::new(PowerState {
                phase: PowerPhase::Unknown,
                entered_at: Instant::now(),
                transition_deadline: None,
            }),
        }
    }

    /// Current state with any elapsed transition completed.
    pub fn snapshot(&self) -> PowerState {
        let mut state = self.lock();
        self.settle(&mut state, Instant::now());
        *state
    }

    pub fn phase(&self) -> PowerPhase {
        self.snapshot().phase
    }

    /// False while cooling or before a pending transition completes.
    pub fn can_power_on(&self) -> bool {
        let now = Instant::now();
        let mut state = self.lock();
        self.settle(&mut state, now);
        state.phase != PowerPhase::Cooling
            && state.transition_deadline.map_or(true, |deadline| now >= deadline)
    }

    pub fn request_power_on(&self) -> PowerDecision {
        let now = Instant::now();
        let mut state = self.lock();
        self.settle(&mut state, now);

        match state.phase {
            PowerPhase::Off | PowerPhase::Unknown | PowerPhase::Error => {
                self.enter(&mut state, PowerPhase::Warming, now);
                PowerDecision::Proceed
            }
            PowerPhase::Warming | PowerPhase::On => PowerDecision::AlreadyInProgress,
            PowerPhase::Cooling => {
                let remaining = state.remaining(now).unwrap_or(self.timing.cooldown);
                PowerDecision::Rejected {
                    reason: format!(
                        "{} is cooling down; power-on available in {}s",
                        self.device,
                        ceil_secs(remaining)
                    ),
                    retry_after: Some(remaining),
                }
            }
        }
    }

    pub fn request_power_off(&self) -> PowerDecision {
        let now = Instant::now();
        let mut state = self.lock();
        self.settle(&mut state, now);

        match state.phase {
            PowerPhase::On | PowerPhase::Unknown | PowerPhase::Error => {
                self.enter(&mut state, PowerPhase::Cooling, now);
                PowerDecision::Proceed
            }
            PowerPhase::Cooling | PowerPhase::Off => PowerDecision::AlreadyInProgress,
            PowerPhase::Warming => {
                let remaining = state.remaining(now).unwrap_or(self.timing.warmup);
                PowerDecision::Rejected {
                    reason: format!(
                        "{} is warming up; power-off available in {}s",
                        self.device,
                        ceil_secs(remaining)
                    ),
                    retry_after: Some(remaining),
                }
            }
        }
    }

    /// Apply a confirmed reading. Re-applying the current phase changes nothing.
    pub fn update_from_query(&self, observed: PowerStatus) {
        let now = Instant::now();
        let mut state = self.lock();
        self.settle(&mut state, now);

        let phase = PowerPhase::from(observed);
        if state.phase != phase {
            self.enter(&mut state, phase, now);
        }
    }

    pub fn mark_error(&self) {
        let now = Instant::now();
        let mut state = self.lock();
        if state.phase != PowerPhase::Error {
            self.enter(&mut state, PowerPhase::Error, now);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PowerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn settle(&self, state: &mut PowerState, now: Instant) {
        let Some(deadline) = state.transition_deadline else {
            return;
        };
        if now < deadline {
            return;
        }
        let done = match state.phase {
            PowerPhase::Warming => PowerPhase::On,
            PowerPhase::Cooling => PowerPhase::Off,
            _ => state.phase,
        };
        self.enter(state, done, deadline);
    }

    fn enter(&self, state: &mut PowerState, phase: PowerPhase, at: Instant) {
        let from = state.phase;
        state.phase = phase;
        state.entered_at = at;
        state.transition_deadline = match phase {
            PowerPhase::Warming => Some(at + self.timing.warmup),
            PowerPhase::Cooling => Some(at + self.timing.cooldown),
            _ => None,
        };
        tracing::info!(device = %self.device, ?from, to = ?phase, "Power phase changed");
        metrics::record_power_phase(&self.device, phase.gauge_value());
    }
}
