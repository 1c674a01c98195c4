//! Retry policy: attempt budget, exponential backoff and jitter.
//!
//! [`RetryPolicy`] controls how transient upstream failures (429, 5xx,
//! connection errors, attempt timeouts) are retried by the
//! [`RetryController`](crate::retry::RetryController).

use std::time::Duration;

/// Process-wide retry configuration, immutable after load.
///
/// # Example
///
/// ```
/// use content_relay::backend::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::standard();
/// assert_eq!(policy.max_attempts, 3);
/// assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(2));
/// ```
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total upstream calls allowed per request, first attempt included. At least 1.
    pub max_attempts: u32,

    /// Delay before the first retry. Default: 1 second.
    pub base_delay: Duration,

    /// Multiplier applied per retry. Default: 2.0.
    /// Delay grows: base, base * multiplier, base * multiplier^2, ...
    pub multiplier: f64,

    /// Ceiling for a single backoff delay. Default: 30 seconds.
    pub max_delay: Duration,

    /// Jitter strategy. Default: None, so delays follow the formula exactly.
    pub jitter: JitterStrategy,

    /// Bound on a single upstream attempt. Expiry counts as a transient failure.
    pub attempt_timeout: Duration,

    /// Retry hint reported for rate-limit failures when upstream gave none.
    pub default_retry_after: Duration,
}

/// Jitter strategy to spread retries from many clients hitting the same quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JitterStrategy {
    /// No jitter. Delay is exactly the calculated value.
    None,

    /// Full jitter: random value in `[0, calculated_delay]`.
    Full,

    /// Equal jitter: `calculated_delay/2 + random in [0, calculated_delay/2]`.
    Equal,
}

impl RetryPolicy {
    /// Three attempts, 1s base, 2x multiplier, 30s ceiling, no jitter.
    pub fn standard() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            jitter: JitterStrategy::None,
            attempt_timeout: Duration::from_secs(30),
            default_retry_after: Duration::from_secs(60),
        }
    }

    /// A single attempt, never retried.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::standard()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Values below 1.0 (and NaN) are raised to 1.0.
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier.max(1.0);
        self
    }

    pub fn with_jitter(mut self, jitter: JitterStrategy) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Calculate the delay after failed attempt N (0-indexed).
    ///
    /// The base delay is `base_delay * multiplier^attempt`, capped at
    /// `max_delay`. Jitter is then applied according to the configured strategy.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let base = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = base.min(self.max_delay.as_secs_f64());

        let jittered = match self.jitter {
            JitterStrategy::None => capped,
            JitterStrategy::Full => fastrand::f64() * capped,
            JitterStrategy::Equal => capped / 2.0 + fastrand::f64() * (capped / 2.0),
        };

        Duration::try_from_secs_f64(jittered).unwrap_or(self.max_delay)
    }

    /// Upper bound on how long one request can spend in the retry loop.
    pub fn worst_case_latency(&self) -> Duration {
        let sleeps: Duration = (0..self.max_attempts.saturating_sub(1))
            .map(|n| {
                let base = self.base_delay.as_secs_f64() * self.multiplier.powi(n as i32);
                Duration::from_secs_f64(base.min(self.max_delay.as_secs_f64()))
            })
            .sum();
        sleeps + self.attempt_timeout * self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::standard()
    }
}
