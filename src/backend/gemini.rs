//! Backend for Google's generative-language `generateContent` API.
//!
//! [`GeminiBackend`] sends one non-streaming request per call to
//! `{base_url}/v1beta/models/{model}:generateContent` and classifies the
//! response. The API key travels in the `x-goog-api-key` header, never in
//! the URL, so transport errors can be logged as-is.

use super::{classify_status, parse_retry_after, Backend, UpstreamFailure, UpstreamOutcome};
use crate::error::ErrorKind;
use crate::prompt::AugmentedPrompt;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

/// Default API host.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
/// Default upstream model.
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";
/// Largest augmented prompt sent upstream, in bytes.
pub const DEFAULT_MAX_PROMPT_BYTES: usize = 100_000;

const API_KEY_HEADER: &str = "x-goog-api-key";
const MAX_LOGGED_BODY_CHARS: usize = 200;

/// Fixed generation parameters. Static configuration, never user-controlled.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    pub temperature: f64,
    pub top_k: u32,
    pub top_p: f64,
    pub max_output_tokens: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_k: 40,
            top_p: 0.95,
            max_output_tokens: 1024,
        }
    }
}

/// Backend for the Gemini `generateContent` endpoint.
#[derive(Clone)]
pub struct GeminiBackend {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    params: GenerationParams,
    max_prompt_bytes: usize,
}

impl GeminiBackend {
    /// Create a backend with default host, model and parameters.
    ///
    /// Without an API key every call fails with `AccessDenied` and no
    /// request is sent.
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            params: GenerationParams::default(),
            max_prompt_bytes: DEFAULT_MAX_PROMPT_BYTES,
        }
    }

    /// Use a preconfigured HTTP client (timeouts, proxies).
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_max_prompt_bytes(mut self, limit: usize) -> Self {
        self.max_prompt_bytes = limit;
        self
    }

    /// Whether a credential is configured.
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Full `generateContent` URL for the configured model.
    pub fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        )
    }

    /// Build the JSON request body.
    fn build_body(&self, prompt: &AugmentedPrompt) -> Value {
        json!({
            "contents": [{
                "parts": [{ "text": prompt.as_str() }]
            }],
            "generationConfig": {
                "temperature": self.params.temperature,
                "topK": self.params.top_k,
                "topP": self.params.top_p,
                "maxOutputTokens": self.params.max_output_tokens,
            }
        })
    }

    /// Pull `candidates[0].content.parts[0].text` out of a success body.
    ///
    /// Returns `None` for unparsable bodies, missing fields and empty text.
    pub fn extract_text(body: &str) -> Option<String> {
        let json_resp: Value = serde_json::from_str(body).ok()?;
        json_resp
            .get("candidates")?
            .get(0)?
            .get("content")?
            .get("parts")?
            .get(0)?
            .get("text")?
            .as_str()
            .filter(|t| !t.is_empty())
            .map(str::to_string)
    }

    /// Read Gemini's `RetryInfo.retryDelay` (e.g. `"23s"`) from an error body.
    fn body_retry_delay(body: &Value) -> Option<Duration> {
        body.get("error")?
            .get("details")?
            .as_array()?
            .iter()
            .filter_map(|d| d.get("retryDelay").and_then(|v| v.as_str()))
            .find_map(|raw| {
                let secs: f64 = raw.trim().strip_suffix('s')?.parse().ok()?;
                Duration::try_from_secs_f64(secs).ok()
            })
    }

    /// Classify a raw upstream response.
    ///
    /// Pure: the same status, header and body always give the same outcome.
    pub fn classify(status: u16, retry_after_header: Option<&str>, body: &str) -> UpstreamOutcome {
        let Some(kind) = classify_status(status) else {
            return match Self::extract_text(body) {
                Some(text) => UpstreamOutcome::Success(text),
                None => UpstreamOutcome::fail(
                    ErrorKind::MalformedUpstreamResponse,
                    format!("HTTP {status} without candidate text: {}", truncate(body)),
                ),
            };
        };

        let parsed: Option<Value> = serde_json::from_str(body).ok();
        let upstream_message = parsed
            .as_ref()
            .and_then(|v| v.get("error"))
            .and_then(|e| e.get("message"))
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| truncate(body));

        let retry_after = if kind == ErrorKind::RateLimited {
            retry_after_header
                .and_then(parse_retry_after)
                .or_else(|| parsed.as_ref().and_then(Self::body_retry_delay))
        } else {
            None
        };

        UpstreamOutcome::failure(
            UpstreamFailure::new(kind, format!("HTTP {status}: {upstream_message}"))
                .with_retry_after(retry_after),
        )
    }
}

impl std::fmt::Debug for GeminiBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiBackend")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("has_api_key", &self.api_key.is_some())
            .field("params", &self.params)
            .field("max_prompt_bytes", &self.max_prompt_bytes)
            .finish()
    }
}

#[async_trait]
impl Backend for GeminiBackend {
    async fn send(&self, prompt: &AugmentedPrompt) -> UpstreamOutcome {
        if prompt.len() > self.max_prompt_bytes {
            return UpstreamOutcome::fail(
                ErrorKind::InvalidRequest,
                format!(
                    "prompt of {} bytes exceeds limit of {}",
                    prompt.len(),
                    self.max_prompt_bytes
                ),
            );
        }

        let Some(api_key) = self.api_key.as_deref() else {
            return UpstreamOutcome::fail(ErrorKind::AccessDenied, "no API credential configured");
        };

        let resp = match self
            .client
            .post(self.endpoint())
            .header(API_KEY_HEADER, api_key)
            .json(&self.build_body(prompt))
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                return UpstreamOutcome::fail(
                    ErrorKind::UpstreamUnavailable,
                    format!("failed to reach Gemini: {}", e.without_url()),
                )
            }
        };

        let status = resp.status().as_u16();
        let retry_after = resp
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = match resp.text().await {
            Ok(body) => body,
            Err(e) => {
                return UpstreamOutcome::fail(
                    ErrorKind::UpstreamUnavailable,
                    format!("failed to read Gemini response: {}", e.without_url()),
                )
            }
        };

        let outcome = Self::classify(status, retry_after.as_deref(), &body);
        if let UpstreamOutcome::TransientFailure(f) | UpstreamOutcome::FatalFailure(f) = &outcome {
            tracing::warn!(status, kind = %f.kind, reason = %f.reason, "Gemini call failed");
        }
        outcome
    }

    fn name(&self) -> &'static str {
        "gemini"
    }
}

fn truncate(body: &str) -> String {
    body.chars().take(MAX_LOGGED_BODY_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn success_body(text: &str) -> String {
        json!({
            "candidates": [{
                "content": { "parts": [{ "text": text }], "role": "model" },
                "finishReason": "STOP"
            }]
        })
        .to_string()
    }

    #[test]
    fn test_gemini_request_payload() {
        let backend = GeminiBackend::new(Some("k".into()));
        let body = backend.build_body(&AugmentedPrompt::from_raw("Why is the sky blue?"));

        assert_eq!(body["contents"][0]["parts"][0]["text"], "Why is the sky blue?");
        assert_eq!(body["generationConfig"]["temperature"], 0.7);
        assert_eq!(body["generationConfig"]["topK"], 40);
        assert_eq!(body["generationConfig"]["topP"], 0.95);
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 1024);
    }

    #[test]
    fn test_endpoint_includes_model_not_key() {
        let backend = GeminiBackend::new(Some("secret".into()))
            .with_base_url("http://localhost:9000/")
            .with_model("gemini-pro");
        assert_eq!(
            backend.endpoint(),
            "http://localhost:9000/v1beta/models/gemini-pro:generateContent"
        );
        assert!(!backend.endpoint().contains("secret"));
        assert!(!format!("{:?}", backend).contains("secret"));
    }

    #[test]
    fn test_blank_api_key_counts_as_missing() {
        assert!(!GeminiBackend::new(Some("  ".into())).has_api_key());
        assert!(!GeminiBackend::new(None).has_api_key());
        assert!(GeminiBackend::new(Some("k".into())).has_api_key());
    }

    #[test]
    fn test_classify_success() {
        let outcome = GeminiBackend::classify(200, None, &success_body("Hello"));
        assert_eq!(outcome, UpstreamOutcome::Success("Hello".into()));
    }

    #[test]
    fn test_classify_malformed_success_payloads() {
        for body in [
            "not json".to_string(),
            "{}".to_string(),
            json!({"candidates": []}).to_string(),
            json!({"candidates": [{"finishReason": "SAFETY"}]}).to_string(),
            json!({"candidates": [{"content": {"parts": []}}]}).to_string(),
            success_body(""),
        ] {
            let outcome = GeminiBackend::classify(200, None, &body);
            assert_eq!(
                outcome.kind(),
                Some(ErrorKind::MalformedUpstreamResponse),
                "body: {body}"
            );
            assert!(!outcome.is_transient());
        }
    }

    #[test]
    fn test_classify_rate_limit_header_hint() {
        let outcome = GeminiBackend::classify(429, Some("17"), "{}");
        match outcome {
            UpstreamOutcome::TransientFailure(f) => {
                assert_eq!(f.kind, ErrorKind::RateLimited);
                assert_eq!(f.retry_after, Some(Duration::from_secs(17)));
            }
            other => panic!("expected transient, got {:?}", other),
        }
    }

    #[test]
    fn test_classify_rate_limit_body_hint() {
        let body = json!({
            "error": {
                "code": 429,
                "message": "Resource has been exhausted",
                "status": "RESOURCE_EXHAUSTED",
                "details": [
                    { "@type": "type.googleapis.com/google.rpc.QuotaFailure" },
                    { "@type": "type.googleapis.com/google.rpc.RetryInfo", "retryDelay": "23s" }
                ]
            }
        })
        .to_string();
        match GeminiBackend::classify(429, None, &body) {
            UpstreamOutcome::TransientFailure(f) => {
                assert_eq!(f.retry_after, Some(Duration::from_secs(23)));
                assert!(f.reason.contains("Resource has been exhausted"));
            }
            other => panic!("expected transient, got {:?}", other),
        }
    }

    #[test]
    fn test_classify_error_statuses() {
        assert_eq!(
            GeminiBackend::classify(400, None, "bad").kind(),
            Some(ErrorKind::InvalidRequest)
        );
        assert_eq!(
            GeminiBackend::classify(403, None, "").kind(),
            Some(ErrorKind::AccessDenied)
        );
        let unavailable = GeminiBackend::classify(503, Some("5"), "");
        assert_eq!(unavailable.kind(), Some(ErrorKind::UpstreamUnavailable));
        assert!(unavailable.is_transient());
        // retry hints are only kept for rate limiting
        if let UpstreamOutcome::TransientFailure(f) = unavailable {
            assert_eq!(f.retry_after, None);
        }
    }

    #[test]
    fn test_classify_is_idempotent() {
        let cases: Vec<(u16, Option<&str>, String)> = vec![
            (200, None, success_body("x")),
            (200, None, "{}".into()),
            (429, Some("3"), "{}".into()),
            (403, None, r#"{"error":{"message":"denied"}}"#.into()),
            (500, None, "oops".into()),
        ];
        for (status, header, body) in &cases {
            let first = GeminiBackend::classify(*status, *header, body);
            let second = GeminiBackend::classify(*status, *header, body);
            assert_eq!(first, second);
        }
    }

    #[tokio::test]
    async fn test_oversized_prompt_is_fatal_without_network() {
        let backend = GeminiBackend::new(Some("k".into()))
            .with_base_url("http://127.0.0.1:9")
            .with_max_prompt_bytes(10);
        let outcome = backend.send(&AugmentedPrompt::from_raw("x".repeat(11))).await;
        assert_eq!(outcome.kind(), Some(ErrorKind::InvalidRequest));
        assert!(!outcome.is_transient());
    }

    #[tokio::test]
    async fn test_missing_key_is_access_denied() {
        let backend = GeminiBackend::new(None).with_base_url("http://127.0.0.1:9");
        let outcome = backend.send(&AugmentedPrompt::from_raw("hi")).await;
        assert_eq!(outcome.kind(), Some(ErrorKind::AccessDenied));
    }
}
