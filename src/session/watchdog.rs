//! Watchdog and recovery timing
//!
//! One periodic check restarts passive listening when recognition has died
//! silently. Restarts after errors use exponential backoff capped at the
//! watchdog interval, so nothing retries faster than the tick once backoff
//! has grown.

use std::time::Duration;

use super::state::{SessionState, Suspension};

/// Default watchdog interval
pub const DEFAULT_WATCHDOG_INTERVAL: Duration = Duration::from_secs(5);

/// Default first recovery delay
pub const DEFAULT_RESTART_DELAY: Duration = Duration::from_millis(500);

/// What a watchdog tick should do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickAction {
    /// Everything is as it should be
    Nothing,
    /// Listening should be running but is not
    RestartRecognition,
    /// Suspended by contention; check whether the microphone is free
    ProbeMicrophone,
}

/// Decide what a tick does
///
/// Pure: depends only on the session state, the suspension flags and the
/// lifecycle manager's active flag. Never touches a healthy state.
#[must_use]
pub const fn on_tick(state: SessionState, suspension: Suspension, recognition_active: bool) -> TickAction {
    match state {
        SessionState::Listening | SessionState::AwaitingWakeWord if !recognition_active => {
            TickAction::RestartRecognition
        }
        SessionState::Suspended if suspension.contended && !suspension.hidden => TickAction::ProbeMicrophone,
        _ => TickAction::Nothing,
    }
}

/// Exponential backoff for recognition restarts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    attempt: u32,
}

impl Backoff {
    /// Backoff starting at `base` and never exceeding `max`
    #[must_use]
    pub const fn new(base: Duration, max: Duration) -> Self {
        Self { base, max, attempt: 0 }
    }

    /// Delay for the next attempt; advances the attempt counter
    pub fn next_delay(&mut self) -> Duration {
        let delay = self
            .base
            .saturating_mul(2u32.saturating_pow(self.attempt))
            .min(self.max);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// Attempts since the last reset
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Recognition is healthy again
    pub const fn reset(&mut self) {
        self.attempt = 0;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_RESTART_DELAY, DEFAULT_WATCHDOG_INTERVAL)
    }
}
