//! Upstream client trait and normalized outcome types.
//!
//! The [`Backend`] trait abstracts over the content-generation provider.
//! A backend performs exactly one upstream attempt per call and classifies
//! what came back into an [`UpstreamOutcome`]. It never retries and holds
//! no per-request state; retrying is the job of
//! [`RetryController`](crate::retry::RetryController).
//!
//! ## Architecture
//!
//! ```text
//! RetryController ──► Backend::send() ──► UpstreamOutcome
//!                            │
//!                 ┌──────────┴──────────┐
//!            GeminiBackend          MockBackend
//!     :generateContent (HTTP)    scripted outcomes
//! ```

pub mod backoff;
pub mod gemini;
pub mod mock;

pub use backoff::{JitterStrategy, RetryPolicy};
pub use gemini::{GeminiBackend, GenerationParams};
pub use mock::MockBackend;

use crate::error::{ErrorKind, GenerationError};
use crate::prompt::AugmentedPrompt;
use async_trait::async_trait;
use std::time::Duration;

/// Why a single upstream attempt failed.
///
/// `reason` is diagnostic text for logs; it is never shown to callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamFailure {
    /// Local classification of the failure.
    pub kind: ErrorKind,
    /// Diagnostic description (status, truncated body, transport error).
    pub reason: String,
    /// Server-provided retry hint, if any.
    pub retry_after: Option<Duration>,
}

impl UpstreamFailure {
    pub fn new(kind: ErrorKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
            retry_after: None,
        }
    }

    pub fn with_retry_after(mut self, retry_after: Option<Duration>) -> Self {
        self.retry_after = retry_after;
        self
    }
}

impl From<UpstreamFailure> for GenerationError {
    fn from(failure: UpstreamFailure) -> Self {
        GenerationError::new(failure.kind)
            .with_retry_after(failure.retry_after.map(ceil_secs))
    }
}

/// Result of one upstream attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamOutcome {
    /// Well-formed payload with non-empty content.
    Success(String),
    /// May succeed if retried unchanged (rate limit, 5xx, network, timeout).
    TransientFailure(UpstreamFailure),
    /// Will fail again with the same input.
    FatalFailure(UpstreamFailure),
}

impl UpstreamOutcome {
    /// Wrap a failure, choosing transient or fatal from its kind.
    pub fn failure(failure: UpstreamFailure) -> Self {
        if failure.kind.is_transient() {
            UpstreamOutcome::TransientFailure(failure)
        } else {
            UpstreamOutcome::FatalFailure(failure)
        }
    }

    /// Shorthand for [`failure`](Self::failure) without a retry hint.
    pub fn fail(kind: ErrorKind, reason: impl Into<String>) -> Self {
        Self::failure(UpstreamFailure::new(kind, reason))
    }

    pub fn is_success(&self) -> bool {
        matches!(self, UpstreamOutcome::Success(_))
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, UpstreamOutcome::TransientFailure(_))
    }

    /// Error kind of a failed outcome.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            UpstreamOutcome::Success(_) => None,
            UpstreamOutcome::TransientFailure(f) | UpstreamOutcome::FatalFailure(f) => Some(f.kind),
        }
    }
}

/// Abstraction over the content-generation provider.
///
/// # Object Safety
///
/// This trait is object-safe and designed to be used as `Arc<dyn Backend>`.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Perform one upstream attempt and classify the result.
    ///
    /// Implementations must not panic on bad upstream data and must not
    /// retry internally.
    async fn send(&self, prompt: &AugmentedPrompt) -> UpstreamOutcome;

    /// Human-readable name for logging and diagnostics.
    fn name(&self) -> &'static str;
}

/// Map an HTTP status to an error kind using the local taxonomy.
///
/// Returns `None` for 2xx, whose meaning depends on the payload.
pub fn classify_status(status: u16) -> Option<ErrorKind> {
    match status {
        200..=299 => None,
        429 => Some(ErrorKind::RateLimited),
        401 | 403 => Some(ErrorKind::AccessDenied),
        400..=499 => Some(ErrorKind::InvalidRequest),
        500..=599 => Some(ErrorKind::UpstreamUnavailable),
        _ => Some(ErrorKind::MalformedUpstreamResponse),
    }
}

/// Parse a `Retry-After` header value given as integer seconds.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

/// Round a duration up to whole seconds.
pub fn ceil_secs(d: Duration) -> u64 {
    let secs = d.as_secs();
    if d.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}
