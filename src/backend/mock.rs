//! Mock backend for testing without a live upstream.
//!
//! [`MockBackend`] returns pre-configured outcomes in order and counts the
//! calls it receives, so retry and handler behavior can be asserted
//! deterministically.
//!
//! # Example
//!
//! ```
//! use content_relay::backend::{MockBackend, UpstreamOutcome};
//! use content_relay::error::ErrorKind;
//!
//! let mock = MockBackend::new(vec![
//!     UpstreamOutcome::fail(ErrorKind::RateLimited, "429"),
//!     UpstreamOutcome::Success("Hello".into()),
//! ]);
//! assert_eq!(mock.calls(), 0);
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::{Backend, UpstreamOutcome};
use crate::prompt::AugmentedPrompt;

/// A test backend that returns scripted outcomes in order.
///
/// Once the script is exhausted the last outcome repeats.
#[derive(Debug)]
pub struct MockBackend {
    outcomes: Vec<UpstreamOutcome>,
    index: AtomicUsize,
    latency: Option<Duration>,
}

impl MockBackend {
    /// Create a mock backend with the given scripted outcomes.
    pub fn new(outcomes: Vec<UpstreamOutcome>) -> Self {
        assert!(!outcomes.is_empty(), "MockBackend requires at least one outcome");
        Self {
            outcomes,
            index: AtomicUsize::new(0),
            latency: None,
        }
    }

    /// Create a mock that always succeeds with the same content.
    pub fn fixed(content: impl Into<String>) -> Self {
        Self::new(vec![UpstreamOutcome::Success(content.into())])
    }

    /// Create a mock that always returns the same outcome.
    pub fn always(outcome: UpstreamOutcome) -> Self {
        Self::new(vec![outcome])
    }

    /// Sleep this long before answering each call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Number of calls received so far.
    pub fn calls(&self) -> usize {
        self.index.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn send(&self, _prompt: &AugmentedPrompt) -> UpstreamOutcome {
        let idx = self.index.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.outcomes[idx.min(self.outcomes.len() - 1)].clone()
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
