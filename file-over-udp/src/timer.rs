//! Retry budgets and receive timeouts.
//!
//! Two disciplines are used on the client:
//! - The control handshake widens its wait linearly on every timeout:
//!   `timeout = min(base × (retries + 1), cap)`.
//! - The chunk pull loop uses one fixed (longer) timeout per attempt.
//!
//! Both are bounded by an attempt count; exhausting it is the only
//! cancellation mechanism.

use std::time::Duration;

/// Adjustable timeout parameters for the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerConfig {
    /// Control wait before the first retry.
    pub control_base: Duration,
    /// Upper bound on the widened control wait.
    pub control_cap: Duration,
    /// Total control attempts (first send included).
    pub control_attempts: u32,
    /// Wait per chunk attempt.
    pub data_timeout: Duration,
    /// Total attempts per chunk (first send included).
    pub data_attempts: u32,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            control_base: Duration::from_secs(5),
            control_cap: Duration::from_secs(30),
            control_attempts: 5,
            data_timeout: Duration::from_secs(10),
            data_attempts: 5,
        }
    }
}

/// Escalating timeout for one control exchange.
///
/// Each control session owns its own `Backoff`; it is never shared between
/// concurrent workers.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    max_attempts: u32,
    retries: u32,
    current: Duration,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            cap,
            max_attempts,
            retries: 0,
            current: base.min(cap),
        }
    }

    /// Control-channel backoff from `config`.
    pub fn control(config: &TimerConfig) -> Self {
        Self::new(
            config.control_base,
            config.control_cap,
            config.control_attempts,
        )
    }

    /// Timeout for the attempt about to be made.
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Timeouts seen so far.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Record a timeout and widen the wait.
    ///
    /// Returns the new timeout, or `None` once the attempt budget is spent.
    pub fn on_timeout(&mut self) -> Option<Duration> {
        self.retries += 1;
        let widened = self.base.saturating_mul(self.retries + 1).min(self.cap);
        // Never shrink, even with an odd base/cap combination.
        self.current = self.current.max(widened);
        if self.retries >= self.max_attempts {
            None
        } else {
            Some(self.current)
        }
    }
}
