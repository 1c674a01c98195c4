//! Retry controller: bounded, sequential retries with exponential backoff.
//!
//! [`RetryController`] wraps a [`Backend`] and turns a sequence of
//! [`UpstreamOutcome`]s into exactly one `GenerationResult` or
//! `GenerationError`.
//!
//! ```text
//!            ┌──────── transient, budget left: sleep(backoff) ───────┐
//!            ▼                                                       │
//!   ──► Attempting ──send()──► Success ──────────────► Ok(result)    │
//!            │                                                       │
//!            ├── fatal ─────────────────────────────► Err(kind)      │
//!            ├── transient, budget spent ───────────► Err(kind)      │
//!            └───────────────────────────────────────────────────────┘
//! ```
//!
//! Attempts never overlap, fatal failures are never retried, and at most
//! `max_attempts` upstream calls are made.

use crate::backend::{Backend, RetryPolicy, UpstreamFailure, UpstreamOutcome};
use crate::error::{ErrorKind, GenerationError, Result};
use crate::events::{emit, Event, EventHandler};
use crate::prompt::AugmentedPrompt;
use crate::types::GenerationResult;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Model name reported to callers unless configured otherwise.
pub const DEFAULT_DISPLAY_MODEL: &str = "gemini-pro";

/// Record of one upstream attempt. Lives only for one `execute` call.
#[derive(Debug, Clone)]
pub struct UpstreamAttempt {
    /// 0-indexed attempt number.
    pub attempt_number: u32,
    /// When the attempt started.
    pub started_at: DateTime<Utc>,
    /// What the backend reported.
    pub outcome: UpstreamOutcome,
}

/// Wraps a backend with retry, backoff and per-attempt timeouts.
pub struct RetryController {
    backend: Arc<dyn Backend>,
    policy: RetryPolicy,
    display_model: String,
    event_handler: Option<Arc<dyn EventHandler>>,
}

impl RetryController {
    pub fn new(backend: Arc<dyn Backend>, policy: RetryPolicy) -> Self {
        Self {
            backend,
            policy,
            display_model: DEFAULT_DISPLAY_MODEL.to_string(),
            event_handler: None,
        }
    }

    /// Set the model name reported in successful results.
    pub fn with_display_model(mut self, model: impl Into<String>) -> Self {
        self.display_model = model.into();
        self
    }

    /// Set the event handler.
    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.event_handler = Some(handler);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn display_model(&self) -> &str {
        &self.display_model
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Run the retry loop for one augmented prompt.
    pub async fn execute(&self, prompt: &AugmentedPrompt) -> Result<GenerationResult> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt: u32 = 0;

        loop {
            tracing::debug!(
                attempt = attempt + 1,
                max_attempts,
                backend = self.backend.name(),
                "upstream attempt"
            );

            let started_at = Utc::now();
            let outcome = self.attempt_once(prompt).await;

            emit(
                &self.event_handler,
                Event::AttemptFinished(UpstreamAttempt {
                    attempt_number: attempt,
                    started_at,
                    outcome: outcome.clone(),
                }),
            );

            match outcome {
                UpstreamOutcome::Success(content) => {
                    tracing::info!(attempts = attempt + 1, "upstream call succeeded");
                    self.complete(attempt + 1, None);
                    return Ok(GenerationResult {
                        content,
                        model: self.display_model.clone(),
                        generated_at: Utc::now(),
                    });
                }
                UpstreamOutcome::FatalFailure(failure) => {
                    tracing::warn!(
                        attempts = attempt + 1,
                        kind = %failure.kind,
                        "upstream call failed, not retrying"
                    );
                    self.complete(attempt + 1, Some(failure.kind));
                    return Err(failure.into());
                }
                UpstreamOutcome::TransientFailure(failure) => {
                    if attempt + 1 >= max_attempts {
                        tracing::warn!(
                            attempts = attempt + 1,
                            kind = %failure.kind,
                            "upstream retries exhausted"
                        );
                        self.complete(attempt + 1, Some(failure.kind));
                        return Err(self.exhausted(failure));
                    }

                    let delay = self.policy.delay_for_attempt(attempt);
                    tracing::info!(
                        attempt = attempt + 1,
                        kind = %failure.kind,
                        delay_ms = delay.as_millis() as u64,
                        "transient upstream failure, backing off"
                    );
                    emit(
                        &self.event_handler,
                        Event::RetryScheduled {
                            next_attempt: attempt + 1,
                            delay,
                            kind: failure.kind,
                        },
                    );

                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// One backend call bounded by the per-attempt timeout.
    async fn attempt_once(&self, prompt: &AugmentedPrompt) -> UpstreamOutcome {
        let timeout = self.policy.attempt_timeout;
        match tokio::time::timeout(timeout, self.backend.send(prompt)).await {
            Ok(outcome) => outcome,
            Err(_) => UpstreamOutcome::fail(
                ErrorKind::UpstreamUnavailable,
                format!("attempt timed out after {:?}", timeout),
            ),
        }
    }

    /// Map the last transient failure, filling in a default hint for rate limits.
    fn exhausted(&self, failure: UpstreamFailure) -> GenerationError {
        let kind = failure.kind;
        let mut err: GenerationError = failure.into();
        if kind == ErrorKind::RateLimited && err.retry_after_seconds.is_none() {
            err.retry_after_seconds = Some(self.policy.default_retry_after.as_secs().max(1));
        }
        err
    }

    fn complete(&self, attempts: u32, error: Option<ErrorKind>) {
        emit(&self.event_handler, Event::Completed { attempts, error });
    }
}

impl std::fmt::Debug for RetryController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryController")
            .field("backend", &self.backend.name())
            .field("policy", &self.policy)
            .field("display_model", &self.display_model)
            .field("has_event_handler", &self.event_handler.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;
    use crate::events::FnEventHandler;
    use std::sync::Mutex;
    use std::time::Duration;

    fn prompt() -> AugmentedPrompt {
        AugmentedPrompt::from_raw("Write a haiku")
    }

    fn rate_limited() -> UpstreamOutcome {
        UpstreamOutcome::fail(ErrorKind::RateLimited, "HTTP 429")
    }

    fn controller(mock: &Arc<MockBackend>, max_attempts: u32) -> RetryController {
        let backend: Arc<dyn Backend> = mock.clone();
        RetryController::new(
            backend,
            RetryPolicy::standard().with_max_attempts(max_attempts),
        )
    }

    /// Collects backoff delays and attempt numbers.
    fn recorder() -> (Arc<Mutex<Vec<Event>>>, Arc<dyn EventHandler>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let handler: Arc<dyn EventHandler> = Arc::new(FnEventHandler(move |e: Event| {
            sink.lock().unwrap().push(e);
        }));
        (events, handler)
    }

    fn delays(events: &[Event]) -> Vec<Duration> {
        events
            .iter()
            .filter_map(|e| match e {
                Event::RetryScheduled { delay, .. } => Some(*delay),
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_first_attempt() {
        let mock = Arc::new(MockBackend::fixed("Hello"));
        let result = controller(&mock, 3).execute(&prompt()).await.unwrap();
        assert_eq!(result.content, "Hello");
        assert_eq!(result.model, "gemini-pro");
        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_failure_is_not_retried() {
        for kind in [
            ErrorKind::InvalidRequest,
            ErrorKind::AccessDenied,
            ErrorKind::MalformedUpstreamResponse,
        ] {
            let mock = Arc::new(MockBackend::always(UpstreamOutcome::fail(kind, "nope")));
            let err = controller(&mock, 5).execute(&prompt()).await.unwrap_err();
            assert_eq!(err.kind, kind);
            assert_eq!(mock.calls(), 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_transient_makes_max_attempts_calls() {
        let mock = Arc::new(MockBackend::always(UpstreamOutcome::fail(
            ErrorKind::UpstreamUnavailable,
            "HTTP 503",
        )));
        let (events, handler) = recorder();
        let controller = controller(&mock, 4).with_event_handler(handler);

        let started = tokio::time::Instant::now();
        let err = controller.execute(&prompt()).await.unwrap_err();

        assert_eq!(err.kind, ErrorKind::UpstreamUnavailable);
        assert_eq!(err.retry_after_seconds, None);
        assert_eq!(mock.calls(), 4);

        let delays = delays(&events.lock().unwrap());
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4)
            ]
        );
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        assert!(started.elapsed() >= Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_twice_then_success() {
        let mock = Arc::new(MockBackend::new(vec![
            rate_limited(),
            rate_limited(),
            UpstreamOutcome::Success("third time".into()),
        ]));
        let (events, handler) = recorder();
        let result = controller(&mock, 3)
            .with_event_handler(handler)
            .execute(&prompt())
            .await
            .unwrap();

        assert_eq!(result.content, "third time");
        assert_eq!(mock.calls(), 3);
        assert_eq!(delays(&events.lock().unwrap()).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_rate_limit_gets_default_hint() {
        let mock = Arc::new(MockBackend::always(rate_limited()));
        let err = controller(&mock, 3).execute(&prompt()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::RateLimited);
        assert_eq!(err.retry_after_seconds, Some(60));
        assert_eq!(mock.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_rate_limit_keeps_upstream_hint() {
        let failure = UpstreamFailure::new(ErrorKind::RateLimited, "HTTP 429")
            .with_retry_after(Some(Duration::from_secs(17)));
        let mock = Arc::new(MockBackend::always(UpstreamOutcome::failure(failure)));
        let err = controller(&mock, 2).execute(&prompt()).await.unwrap_err();
        assert_eq!(err.retry_after_seconds, Some(17));
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout_is_transient() {
        let mock = Arc::new(MockBackend::fixed("late").with_latency(Duration::from_secs(10)));
        let backend: Arc<dyn Backend> = mock.clone();
        let policy = RetryPolicy::standard()
            .with_max_attempts(2)
            .with_attempt_timeout(Duration::from_secs(1));

        let err = RetryController::new(backend, policy)
            .execute(&prompt())
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::UpstreamUnavailable);
        assert_eq!(mock.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_number_attempts_sequentially() {
        let mock = Arc::new(MockBackend::new(vec![
            rate_limited(),
            UpstreamOutcome::Success("ok".into()),
        ]));
        let (events, handler) = recorder();
        controller(&mock, 3)
            .with_event_handler(handler)
            .execute(&prompt())
            .await
            .unwrap();

        let events = events.lock().unwrap();
        let numbers: Vec<u32> = events
            .iter()
            .filter_map(|e| match e {
                Event::AttemptFinished(a) => Some(a.attempt_number),
                _ => None,
            })
            .collect();
        assert_eq!(numbers, vec![0, 1]);
        assert!(matches!(
            events.last(),
            Some(Event::Completed {
                attempts: 2,
                error: None
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_attempt_policy_never_sleeps() {
        let mock = Arc::new(MockBackend::always(rate_limited()));
        let backend: Arc<dyn Backend> = mock.clone();
        let started = tokio::time::Instant::now();
        let err = RetryController::new(backend, RetryPolicy::no_retry())
            .execute(&prompt())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::RateLimited);
        assert_eq!(mock.calls(), 1);
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
