//! # Content Relay
//!
//! A small web backend that relays content-generation prompts to Google's
//! Gemini `generateContent` API and serves a static single-page front-end.
//!
//! The interesting part is the outbound orchestration around the upstream
//! call:
//!
//! - **[`Backend`]** performs one upstream attempt and classifies the raw
//!   response into an [`UpstreamOutcome`] using the local [`ErrorKind`]
//!   taxonomy. [`GeminiBackend`] talks HTTP, [`MockBackend`] replays a
//!   script for tests.
//! - **[`RetryController`]** retries transient failures with exponential
//!   backoff under a [`RetryPolicy`], never retries fatal ones, and always
//!   terminates after at most `max_attempts` calls.
//! - **[`RateLimiter`]** admits or rejects requests per client key with a
//!   fixed window, before any upstream work happens.
//! - **[`RequestHandler`]** validates the body, wraps the prompt in a fixed
//!   preamble and returns exactly one result or error.
//! - **[`server`]** exposes it all over axum.
//!
//! ## Quick Start
//!
//! ```no_run
//! use content_relay::{
//!     GeminiBackend, RateLimitConfig, RateLimiter, RequestHandler, RetryController, RetryPolicy,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let backend = GeminiBackend::new(std::env::var("GEMINI_API_KEY").ok());
//!     let controller = RetryController::new(Arc::new(backend), RetryPolicy::standard());
//!     let handler = RequestHandler::new(RateLimiter::new(RateLimitConfig::default()), controller);
//!
//!     match handler.handle("127.0.0.1", br#"{"prompt": "Draft a status email"}"#).await {
//!         Ok(result) => println!("{}", result.content),
//!         Err(err) => eprintln!("{} ({})", err.message, err.kind),
//!     }
//! }
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod events;
pub mod handler;
pub mod prompt;
pub mod rate_limit;
pub mod retry;
pub mod server;
pub mod types;

pub use backend::{
    Backend, GeminiBackend, GenerationParams, JitterStrategy, MockBackend, RetryPolicy,
    UpstreamFailure, UpstreamOutcome,
};
pub use config::Config;
pub use error::{ErrorKind, GenerationError, Result};
pub use events::{Event, EventHandler, FnEventHandler};
pub use handler::RequestHandler;
pub use prompt::AugmentedPrompt;
pub use rate_limit::{Admission, RateLimitConfig, RateLimiter};
pub use retry::{RetryController, UpstreamAttempt};
pub use types::{GenerationRequest, GenerationResult};
