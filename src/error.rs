use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Stable local error taxonomy.
///
/// Every failure the relay can report is one of these kinds. The upstream
/// client assigns the kind; later layers only format it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed or missing input. Fatal.
    InvalidRequest,
    /// Upstream credential or permission problem. Fatal.
    AccessDenied,
    /// Local or upstream quota exceeded. Transient.
    RateLimited,
    /// Network failure, timeout or upstream 5xx. Transient.
    UpstreamUnavailable,
    /// Upstream answered 2xx with a payload we cannot use. Fatal.
    MalformedUpstreamResponse,
    /// Anything unclassified. Fatal.
    Internal,
}

impl ErrorKind {
    /// Whether a failure of this kind may succeed if retried unchanged.
    pub fn is_transient(self) -> bool {
        matches!(self, ErrorKind::RateLimited | ErrorKind::UpstreamUnavailable)
    }

    /// HTTP status used when this kind crosses the boundary.
    pub fn status_code(self) -> StatusCode {
        match self {
            ErrorKind::InvalidRequest | ErrorKind::MalformedUpstreamResponse => {
                StatusCode::BAD_REQUEST
            }
            ErrorKind::AccessDenied => StatusCode::FORBIDDEN,
            ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::UpstreamUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Human-readable message shown to callers when nothing more specific applies.
    pub fn default_message(self) -> &'static str {
        match self {
            ErrorKind::InvalidRequest => "Invalid request format",
            ErrorKind::AccessDenied => "API access denied. Please contact support.",
            ErrorKind::RateLimited => "Rate limit exceeded. Please wait a moment and try again.",
            ErrorKind::UpstreamUnavailable => {
                "Unable to connect to Gemini API. Please try again later."
            }
            ErrorKind::MalformedUpstreamResponse => "Unexpected response format from Gemini API",
            ErrorKind::Internal => "Internal server error. Please try again.",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::AccessDenied => "access_denied",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::UpstreamUnavailable => "upstream_unavailable",
            ErrorKind::MalformedUpstreamResponse => "malformed_upstream_response",
            ErrorKind::Internal => "internal",
        };
        f.write_str(name)
    }
}

/// The single error type produced for a failed generation request.
///
/// `message` is safe to show to end users; upstream bodies and internal
/// diagnostics never end up in it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct GenerationError {
    /// Classification of the failure.
    pub kind: ErrorKind,
    /// Human-readable description.
    pub message: String,
    /// Seconds the caller should wait before retrying, when known.
    pub retry_after_seconds: Option<u64>,
}

impl GenerationError {
    /// Create an error with the kind's default message.
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: kind.default_message().to_string(),
            retry_after_seconds: None,
        }
    }

    /// Replace the message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Attach a retry hint.
    pub fn with_retry_after(mut self, seconds: Option<u64>) -> Self {
        self.retry_after_seconds = seconds;
        self
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidRequest).with_message(message)
    }

    pub fn internal() -> Self {
        Self::new(ErrorKind::Internal)
    }
}

/// Error envelope: `{ "error": "...", "retryAfter": 42 }`.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(rename = "retryAfter", skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl IntoResponse for GenerationError {
    fn into_response(self) -> Response {
        let status = self.kind.status_code();
        let body = ErrorBody {
            error: self.message,
            retry_after: self.retry_after_seconds,
        };
        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = self.retry_after_seconds {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

pub type Result<T> = std::result::Result<T, GenerationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_per_kind() {
        assert_eq!(ErrorKind::InvalidRequest.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ErrorKind::MalformedUpstreamResponse.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ErrorKind::AccessDenied.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(ErrorKind::RateLimited.status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            ErrorKind::UpstreamUnavailable.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(ErrorKind::Internal.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_only_rate_limit_and_unavailable_are_transient() {
        assert!(ErrorKind::RateLimited.is_transient());
        assert!(ErrorKind::UpstreamUnavailable.is_transient());
        assert!(!ErrorKind::InvalidRequest.is_transient());
        assert!(!ErrorKind::AccessDenied.is_transient());
        assert!(!ErrorKind::MalformedUpstreamResponse.is_transient());
        assert!(!ErrorKind::Internal.is_transient());
    }

    #[test]
    fn test_error_body_omits_missing_retry_after() {
        let body = ErrorBody {
            error: "nope".into(),
            retry_after: None,
        };
        assert_eq!(serde_json::to_value(&body).unwrap(), serde_json::json!({"error": "nope"}));
    }

    #[test]
    fn test_rate_limited_response_sets_header() {
        let resp = GenerationError::new(ErrorKind::RateLimited)
            .with_retry_after(Some(42))
            .into_response();
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(resp.headers().get(header::RETRY_AFTER).unwrap(), "42");
    }
}
