//! Request handler: admission, validation, prompt augmentation, retry.
//!
//! [`RequestHandler::handle`] is the boundary between the HTTP layer and
//! the orchestration core. It always produces exactly one
//! `GenerationResult` or `GenerationError`; panics inside the generation
//! path are caught and reported as `Internal`.

use crate::error::{ErrorKind, GenerationError, Result};
use crate::prompt::augment;
use crate::rate_limit::{Admission, RateLimiter};
use crate::retry::RetryController;
use crate::types::{GenerationRequest, GenerationResult};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;

const PROMPT_REQUIRED: &str = "Prompt is required";
const LOCAL_RATE_LIMIT: &str = "Too many requests. Please wait a minute and try again.";

/// Handles `POST /api/generate` requests independently of the HTTP framework.
#[derive(Debug)]
pub struct RequestHandler {
    limiter: RateLimiter,
    controller: RetryController,
}

impl RequestHandler {
    pub fn new(limiter: RateLimiter, controller: RetryController) -> Self {
        Self {
            limiter,
            controller,
        }
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn controller(&self) -> &RetryController {
        &self.controller
    }

    /// Handle one raw JSON body from the client identified by `client_key`.
    pub async fn handle(&self, client_key: &str, body: &[u8]) -> Result<GenerationResult> {
        match AssertUnwindSafe(self.handle_inner(client_key, body))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => {
                tracing::error!(
                    panic = panic_message(panic.as_ref()),
                    "generation request panicked"
                );
                Err(GenerationError::internal())
            }
        }
    }

    async fn handle_inner(&self, client_key: &str, body: &[u8]) -> Result<GenerationResult> {
        if let Admission::Rejected {
            retry_after_seconds,
        } = self.limiter.admit(client_key)
        {
            tracing::info!(client = client_key, retry_after_seconds, "request rejected by rate limiter");
            return Err(GenerationError::new(ErrorKind::RateLimited)
                .with_message(LOCAL_RATE_LIMIT)
                .with_retry_after(Some(retry_after_seconds)));
        }

        let prompt = parse_prompt(body)?;
        tracing::info!(prompt_len = prompt.len(), "processing generation request");

        let augmented = augment(&prompt);
        self.controller.execute(&augmented).await
    }
}

/// Extract a non-blank prompt from a JSON body.
fn parse_prompt(body: &[u8]) -> Result<String> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(GenerationError::invalid_request(PROMPT_REQUIRED));
    }

    let request: GenerationRequest = serde_json::from_slice(body).map_err(|e| {
        tracing::debug!(error = %e, "unparsable generation request");
        GenerationError::new(ErrorKind::InvalidRequest)
    })?;

    match request.prompt {
        Some(prompt) if !prompt.trim().is_empty() => Ok(prompt),
        _ => Err(GenerationError::invalid_request(PROMPT_REQUIRED)),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
