//! Failure backoff and check scheduling.
//!
//! After a failed session the next attempt is held off: the first delay is
//! [`HoldoffPolicy::initial`], each further consecutive failure multiplies it
//! by [`HoldoffPolicy::growth_percent`] / 100, capped at
//! [`HoldoffPolicy::max`]. A successful or up-to-date check resets the
//! backoff and schedules the next check [`HoldoffPolicy::check_interval`]
//! later.

use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::config::HoldoffPolicy;

/// Backoff state plus the next scheduled check.
#[derive(Debug, Clone)]
pub struct CheckSchedule {
    policy: HoldoffPolicy,
    failures: u32,
    delay: Option<Duration>,
    holdoff_until: Option<Instant>,
    next_check: Option<Instant>,
}

impl CheckSchedule {
    /// A schedule with a check due immediately.
    pub fn new(policy: HoldoffPolicy) -> Self {
        Self {
            policy,
            failures: 0,
            delay: None,
            holdoff_until: None,
            next_check: None,
        }
    }

    /// Consecutive failures since the last reset.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Arm the holdoff after a failed session, returning its length.
    pub fn record_failure(&mut self, now: Instant) -> Duration {
        let delay = match self.delay {
            None => self.policy.initial,
            Some(previous) => previous
                .saturating_mul(self.policy.growth_percent)
                .checked_div(100)
                .unwrap_or(self.policy.max),
        }
        .min(self.policy.max);

        self.delay = Some(delay);
        self.failures = self.failures.saturating_add(1);
        let until = now.checked_add(delay).unwrap_or(now);
        self.holdoff_until = Some(until);
        self.next_check = Some(until);
        debug!(failures = self.failures, delay_secs = delay.as_secs(), "holdoff armed");
        delay
    }

    /// Clear the backoff after a successful or up-to-date check.
    pub fn record_success(&mut self, now: Instant) {
        self.failures = 0;
        self.delay = None;
        self.holdoff_until = None;
        self.next_check = now.checked_add(self.policy.check_interval);
    }

    /// Time left before another attempt is allowed, if any.
    pub fn holdoff_remaining(&self, now: Instant) -> Option<Duration> {
        self.holdoff_until
            .and_then(|until| until.checked_duration_since(now))
            .filter(|left| !left.is_zero())
    }

    /// Whether a scheduled check should start at `now`.
    pub fn is_due(&self, now: Instant) -> bool {
        self.next_check.is_none_or(|at| now >= at)
    }
}
