//! Layered configuration.
//!
//! Sources, lowest priority first: built-in defaults, `config/default.*`,
//! `config/local.*`, `RELAY__SECTION__KEY` environment variables, and the
//! plain deployment variables `GEMINI_API_KEY`, `PORT` and `VERCEL`.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{ensure, Result};
use config::{Config as ConfigLoader, Environment, File};
use reqwest::Client;
use serde::Deserialize;

use crate::backend::{gemini, GeminiBackend, GenerationParams, JitterStrategy, RetryPolicy};
use crate::rate_limit::RateLimitConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub retry: RetrySettings,
    pub rate_limit: RateLimitSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Root of the static front-end.
    pub static_dir: PathBuf,
    pub environment: Deployment,
    pub log_format: LogFormat,
}

#[derive(Clone, Deserialize)]
pub struct UpstreamConfig {
    pub base_url: String,
    /// Model id used in the upstream URL.
    pub model: String,
    /// Model name reported to callers.
    pub display_model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    pub temperature: f64,
    pub top_k: u32,
    pub top_p: f64,
    pub max_output_tokens: u32,
    pub max_prompt_bytes: usize,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
    pub default_retry_after_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitSettings {
    pub max_requests: u32,
    pub window_secs: u64,
}

/// Where the server runs; reported by the health endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Deployment {
    Local,
    Vercel,
}

impl fmt::Display for Deployment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Deployment::Local => f.write_str("local"),
            Deployment::Vercel => f.write_str("vercel"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Plain deployment variables read outside the `RELAY__` namespace.
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    pub gemini_api_key: Option<String>,
    pub port: Option<String>,
    pub vercel: bool,
}

impl EnvOverrides {
    pub fn from_env() -> Self {
        Self {
            gemini_api_key: std::env::var("GEMINI_API_KEY").ok(),
            port: std::env::var("PORT").ok(),
            vercel: std::env::var_os("VERCEL").is_some(),
        }
    }
}

impl Config {
    /// Load from files and the process environment.
    pub fn load() -> Result<Self> {
        Self::from_overrides(EnvOverrides::from_env())
    }

    /// Load from files and `RELAY__*` variables, with explicit deployment overrides.
    pub fn from_overrides(overrides: EnvOverrides) -> Result<Self> {
        let config = ConfigLoader::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 3000)?
            .set_default("server.static_dir", "public")?
            .set_default("server.environment", "local")?
            .set_default("server.log_format", "pretty")?
            .set_default("upstream.base_url", gemini::DEFAULT_BASE_URL)?
            .set_default("upstream.model", gemini::DEFAULT_MODEL)?
            .set_default("upstream.display_model", crate::retry::DEFAULT_DISPLAY_MODEL)?
            .set_default("upstream.temperature", 0.7)?
            .set_default("upstream.top_k", 40)?
            .set_default("upstream.top_p", 0.95)?
            .set_default("upstream.max_output_tokens", 1024)?
            .set_default("upstream.max_prompt_bytes", gemini::DEFAULT_MAX_PROMPT_BYTES as u64)?
            .set_default("upstream.timeout_secs", 30)?
            .set_default("retry.max_attempts", 3)?
            .set_default("retry.base_delay_ms", 1000)?
            .set_default("retry.multiplier", 2.0)?
            .set_default("retry.max_delay_ms", 30_000)?
            .set_default("retry.default_retry_after_secs", 60)?
            .set_default("rate_limit.max_requests", 15)?
            .set_default("rate_limit.window_secs", 60)?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(
                Environment::with_prefix("RELAY")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("upstream.api_key", overrides.gemini_api_key)?
            .set_override_option("server.port", overrides.port)?
            .set_override_option("server.environment", overrides.vercel.then_some("vercel"))?
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would break the retry or admission invariants.
    pub fn validate(&self) -> Result<()> {
        ensure!(self.retry.max_attempts >= 1, "retry.max_attempts must be at least 1");
        ensure!(
            self.retry.multiplier >= 1.0 && self.retry.multiplier.is_finite(),
            "retry.multiplier must be a finite number >= 1"
        );
        ensure!(
            self.rate_limit.max_requests >= 1,
            "rate_limit.max_requests must be at least 1"
        );
        ensure!(self.rate_limit.window_secs >= 1, "rate_limit.window_secs must be at least 1");
        ensure!(self.upstream.timeout_secs >= 1, "upstream.timeout_secs must be at least 1");
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            multiplier: self.retry.multiplier,
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
            jitter: JitterStrategy::None,
            attempt_timeout: Duration::from_secs(self.upstream.timeout_secs),
            default_retry_after: Duration::from_secs(self.retry.default_retry_after_secs),
        }
    }

    pub fn rate_limit_config(&self) -> RateLimitConfig {
        RateLimitConfig::new(
            self.rate_limit.max_requests,
            Duration::from_secs(self.rate_limit.window_secs),
        )
    }

    pub fn generation_params(&self) -> GenerationParams {
        GenerationParams {
            temperature: self.upstream.temperature,
            top_k: self.upstream.top_k,
            top_p: self.upstream.top_p,
            max_output_tokens: self.upstream.max_output_tokens,
        }
    }

    /// Build the Gemini backend with a transport timeout matching the attempt timeout.
    pub fn gemini_backend(&self) -> Result<GeminiBackend> {
        let client = Client::builder()
            .timeout(Duration::from_secs(self.upstream.timeout_secs))
            .build()?;
        Ok(GeminiBackend::new(self.upstream.api_key.clone())
            .with_client(client)
            .with_base_url(self.upstream.base_url.clone())
            .with_model(self.upstream.model.clone())
            .with_params(self.generation_params())
            .with_max_prompt_bytes(self.upstream.max_prompt_bytes))
    }
}

impl fmt::Debug for UpstreamConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamConfig")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("display_model", &self.display_model)
            .field("has_api_key", &self.api_key.is_some())
            .field("temperature", &self.temperature)
            .field("top_k", &self.top_k)
            .field("top_p", &self.top_p)
            .field("max_output_tokens", &self.max_output_tokens)
            .field("max_prompt_bytes", &self.max_prompt_bytes)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}
