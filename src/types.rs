use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Inbound body of `POST /api/generate`.
///
/// `prompt` is optional at the serde level so that a missing field is
/// reported as "Prompt is required" rather than a parse error.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerationRequest {
    #[serde(default)]
    pub prompt: Option<String>,
}

/// Successful generation.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationResult {
    /// Generated text.
    pub content: String,
    /// Model name reported to callers.
    pub model: String,
    /// When the upstream call completed.
    pub generated_at: DateTime<Utc>,
}

/// Success envelope: `{ content, model, timestamp }`.
#[derive(Debug, Serialize)]
pub struct GenerationBody {
    pub content: String,
    pub model: String,
    pub timestamp: String,
}

impl From<GenerationResult> for GenerationBody {
    fn from(result: GenerationResult) -> Self {
        Self {
            content: result.content,
            model: result.model,
            timestamp: iso_timestamp(result.generated_at),
        }
    }
}

/// Body of `GET /api/health`.
#[derive(Debug, Serialize)]
pub struct HealthBody {
    pub status: &'static str,
    pub timestamp: String,
    pub version: &'static str,
    pub model: String,
    pub features: Vec<&'static str>,
    pub environment: String,
}

/// Body of `GET /api/test`.
#[derive(Debug, Serialize)]
pub struct DiagnosticBody {
    pub message: &'static str,
    pub timestamp: String,
    pub secure: bool,
    pub environment: String,
}

/// RFC 3339 UTC timestamp with millisecond precision (`2024-01-01T00:00:00.000Z`).
pub fn iso_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}
