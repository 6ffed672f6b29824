//! Reconnection policy: exponential backoff with a floor, a ceiling and an attempt limit.

use std::time::Duration;

use crate::ws::ConnectOptions;

/// Floor for the backoff delay; smaller configured values are clamped up.
pub const MIN_DELAY: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 30;
/// Hard cap on `reconnect_max_attempts`.
pub const MAX_ATTEMPTS_CAP: u32 = 300;

/// What the session should do after a connection attempt failed or dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Wait `delay`, then open again.
    Retry { attempt: u32, delay: Duration },
    /// The attempt limit was just reached. Returned once per policy.
    Exhausted,
    /// Reconnection is disabled, was cancelled, or was already exhausted.
    Stopped,
}

#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    enabled: bool,
    max_attempts: u32,
    max_delay: Duration,
    attempt: u32,
    current_delay: Duration,
    stopped: bool,
    exhausted: bool,
}

impl ReconnectPolicy {
    pub fn new(enabled: bool, max_attempts: u32, max_delay: Duration) -> Self {
        Self {
            enabled,
            max_attempts: max_attempts.min(MAX_ATTEMPTS_CAP),
            max_delay: max_delay.max(MIN_DELAY),
            attempt: 0,
            current_delay: MIN_DELAY,
            stopped: false,
            exhausted: false,
        }
    }

    pub fn from_options(options: &ConnectOptions) -> Self {
        Self::new(
            options.reconnect,
            options.reconnect_max_attempts,
            options.reconnect_max_delay,
        )
    }

    /// Decide the next step after a failure. Grows the delay on every retry.
    pub fn next_attempt(&mut self) -> Decision {
        if !self.enabled || self.stopped || self.exhausted {
            return Decision::Stopped;
        }
        if self.attempt >= self.max_attempts {
            self.exhausted = true;
            return Decision::Exhausted;
        }

        self.attempt += 1;
        let delay = self.current_delay;
        self.current_delay = self.current_delay.saturating_mul(2).min(self.max_delay);
        Decision::Retry {
            attempt: self.attempt,
            delay,
        }
    }

    /// A connection opened: back to the first attempt at the floor delay.
    pub fn on_open(&mut self) {
        self.attempt = 0;
        self.current_delay = MIN_DELAY;
    }

    /// Cancel all further retries without reporting exhaustion.
    pub fn stop(&mut self) {
        self.stopped = true;
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
