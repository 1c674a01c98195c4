//! Event hooks for the retry loop.
//!
//! Provides an optional, non-intrusive way to observe upstream attempts.
//! The [`RetryController`](crate::retry::RetryController) emits an event
//! after every attempt, before every backoff sleep and once at the end.
//! Implement [`EventHandler`] to receive them for metrics, auditing or tests.

use crate::error::ErrorKind;
use crate::retry::UpstreamAttempt;
use std::sync::Arc;
use std::time::Duration;

/// Events emitted during one `RetryController::execute` invocation.
#[derive(Debug, Clone)]
pub enum Event {
    /// An upstream attempt has finished (successfully or not).
    AttemptFinished(UpstreamAttempt),
    /// A transient failure will be retried after `delay`.
    RetryScheduled {
        /// Number of the attempt about to be made (0-indexed).
        next_attempt: u32,
        /// Backoff delay before that attempt.
        delay: Duration,
        /// Kind of the failure that triggered the retry.
        kind: ErrorKind,
    },
    /// The retry loop has terminated.
    Completed {
        /// Upstream calls made.
        attempts: u32,
        /// Error kind if the request failed.
        error: Option<ErrorKind>,
    },
}

/// Handler for retry-loop events.
///
/// # Example
///
/// ```
/// use content_relay::events::{Event, EventHandler};
///
/// struct PrintHandler;
///
/// impl EventHandler for PrintHandler {
///     fn on_event(&self, event: Event) {
///         if let Event::RetryScheduled { next_attempt, delay, .. } = event {
///             println!("retry #{} in {:?}", next_attempt, delay);
///         }
///     }
/// }
/// ```
pub trait EventHandler: Send + Sync {
    /// Called when the retry loop emits an event.
    fn on_event(&self, event: Event);
}

/// Emit an event if a handler is present. No-op otherwise.
pub(crate) fn emit(handler: &Option<Arc<dyn EventHandler>>, event: Event) {
    if let Some(ref h) = handler {
        h.on_event(event);
    }
}

/// An [`EventHandler`] backed by a closure.
pub struct FnEventHandler<F: Fn(Event) + Send + Sync>(pub F);

impl<F: Fn(Event) + Send + Sync> EventHandler for FnEventHandler<F> {
    fn on_event(&self, event: Event) {
        (self.0)(event);
    }
}
