//! Fixed-window rate limiting keyed by client identity.
//!
//! Each client key owns a window `{ window_start, count }`. A request is
//! admitted while `count < max_requests`; once the window has elapsed the
//! count resets. State lives in a `DashMap`, and the entry lock is held for
//! the whole read-modify-write so concurrent admissions for one key are
//! serialized.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::backend::ceil_secs;

/// Quota configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Requests admitted per key per window.
    pub max_requests: u32,
    /// Window length.
    pub window: Duration,
}

impl RateLimitConfig {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
        }
    }
}

impl Default for RateLimitConfig {
    /// 15 requests per minute.
    fn default() -> Self {
        Self::new(15, Duration::from_secs(60))
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Request may proceed; `remaining` more fit in the current window.
    Admitted { remaining: u32 },
    /// Quota exhausted; the window resets in `retry_after_seconds` (at least 1).
    Rejected { retry_after_seconds: u64 },
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted { .. })
    }
}

/// Per-key window state. Only the limiter touches it.
#[derive(Debug, Clone, Copy)]
struct RateLimitWindow {
    window_start: Instant,
    count: u32,
}

/// Process-wide fixed-window rate limiter.
///
/// Cloning is cheap and clones share state.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: Arc<DashMap<String, RateLimitWindow>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: Arc::new(DashMap::new()),
        }
    }

    /// Check and count a request for `key` at the current time.
    pub fn admit(&self, key: &str) -> Admission {
        self.admit_at(key, Instant::now())
    }

    /// Check and count a request for `key` at `now`.
    pub fn admit_at(&self, key: &str, now: Instant) -> Admission {
        let window_len = self.config.window;
        let mut entry = self
            .windows
            .entry(key.to_string())
            .or_insert_with(|| RateLimitWindow {
                window_start: now,
                count: 0,
            });
        let window = entry.value_mut();

        let mut elapsed = now.saturating_duration_since(window.window_start);
        if elapsed >= window_len {
            window.window_start = now;
            window.count = 0;
            elapsed = Duration::ZERO;
        }

        if window.count >= self.config.max_requests {
            let retry_after_seconds = ceil_secs(window_len - elapsed).max(1);
            tracing::debug!(key, retry_after_seconds, "rate limit exceeded");
            return Admission::Rejected {
                retry_after_seconds,
            };
        }

        window.count += 1;
        Admission::Admitted {
            remaining: self.config.max_requests - window.count,
        }
    }

    /// Drop windows that have fully elapsed. Returns how many were removed.
    pub fn purge_expired_at(&self, now: Instant) -> usize {
        let before = self.windows.len();
        let window_len = self.config.window;
        self.windows
            .retain(|_, w| now.saturating_duration_since(w.window_start) < window_len);
        before.saturating_sub(self.windows.len())
    }

    /// Start a background task that purges expired windows every `every`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn_cleanup(&self, every: Duration) -> JoinHandle<()> {
        let limiter = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                let removed = limiter.purge_expired_at(Instant::now());
                tracing::debug!(
                    removed,
                    active = limiter.active_windows(),
                    "rate limiter cleanup"
                );
            }
        })
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Number of tracked client keys.
    pub fn active_windows(&self) -> usize {
        self.windows.len()
    }
}
