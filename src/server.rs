//! HTTP surface: JSON API, health endpoints and the static front-end.
//!
//! ```text
//! POST /api/generate  ──► RequestHandler (rate limit → validate → retry)
//! GET  /api/health    ──► status, version, features
//! GET  /api/test      ──► liveness payload
//!      /api/*         ──► 404 { error: "API endpoint not found" }, wrong methods included
//!      anything else  ──► static_dir, falling back to index.html
//! ```

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, ConnectInfo, DefaultBodyLimit, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use tower_http::{
    cors::CorsLayer,
    services::{ServeDir, ServeFile},
    trace::TraceLayer,
};

use crate::backend::Backend;
use crate::config::{Config, Deployment};
use crate::error::{ErrorBody, GenerationError};
use crate::handler::RequestHandler;
use crate::rate_limit::RateLimiter;
use crate::retry::RetryController;
use crate::types::{iso_timestamp, DiagnosticBody, GenerationBody, HealthBody};

/// Largest accepted request body.
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Feature flags advertised by `/api/health`.
pub const FEATURES: [&str; 3] = ["secure-api-key", "rate-limiting", "retry-logic"];

const UNKNOWN_CLIENT: &str = "unknown";
const BODY_REJECTED: &str = "Request body is too large or unreadable";

/// Shared state for all routes.
#[derive(Clone)]
pub struct AppState {
    pub handler: Arc<RequestHandler>,
    pub environment: Deployment,
}

impl AppState {
    pub fn new(handler: RequestHandler, environment: Deployment) -> Self {
        Self {
            handler: Arc::new(handler),
            environment,
        }
    }

    /// Wire backend, retry controller and rate limiter from configuration.
    pub fn from_config(config: &Config, backend: Arc<dyn Backend>) -> Self {
        let controller = RetryController::new(backend, config.retry_policy())
            .with_display_model(config.upstream.display_model.clone());
        let limiter = RateLimiter::new(config.rate_limit_config());
        Self::new(
            RequestHandler::new(limiter, controller),
            config.server.environment,
        )
    }

    fn display_model(&self) -> &str {
        self.handler.controller().display_model()
    }
}

/// Routes under `/api`.
pub fn api_routes(state: AppState) -> Router {
    Router::new()
        .route("/generate", post(generate).fallback(api_not_found))
        .route("/health", get(health).fallback(api_not_found))
        .route("/test", get(diagnostic).fallback(api_not_found))
        .fallback(api_not_found)
        .with_state(state)
}

/// Full application router.
pub fn router(state: AppState, static_dir: &Path) -> Router {
    let spa = ServeDir::new(static_dir).fallback(ServeFile::new(static_dir.join("index.html")));

    Router::new()
        .nest("/api", api_routes(state))
        .fallback_service(spa)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn generate(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let body = match body {
        Ok(body) => body,
        Err(rejection) => {
            tracing::info!(
                status = %rejection.status(),
                reason = %rejection.body_text(),
                "request body rejected"
            );
            return GenerationError::invalid_request(BODY_REJECTED).into_response();
        }
    };

    let client_key = connect_info
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string());

    match state.handler.handle(&client_key, &body).await {
        Ok(result) => Json(GenerationBody::from(result)).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn health(State(state): State<AppState>) -> Json<HealthBody> {
    Json(HealthBody {
        status: "OK",
        timestamp: iso_timestamp(Utc::now()),
        version: env!("CARGO_PKG_VERSION"),
        model: state.display_model().to_string(),
        features: FEATURES.to_vec(),
        environment: state.environment.to_string(),
    })
}

async fn diagnostic(State(state): State<AppState>) -> Json<DiagnosticBody> {
    Json(DiagnosticBody {
        message: "Gemini API server is running!",
        timestamp: iso_timestamp(Utc::now()),
        secure: true,
        environment: state.environment.to_string(),
    })
}

async fn api_not_found() -> (StatusCode, Json<ErrorBody>) {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorBody {
            error: "API endpoint not found".to_string(),
            retry_after: None,
        }),
    )
}

/// Bind, serve until Ctrl-C/SIGTERM, then drain in-flight requests.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let backend = config.gemini_backend()?;
    if !backend.has_api_key() {
        tracing::warn!("GEMINI_API_KEY is not set; generation requests will be denied");
    }

    let state = AppState::from_config(&config, Arc::new(backend));
    let cleanup = state
        .handler
        .limiter()
        .spawn_cleanup(Duration::from_secs(config.rate_limit.window_secs));
    let app = router(state, &config.server.static_dir);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!(%addr, environment = %config.server.environment, "content relay listening");
    tracing::info!(
        model = %config.upstream.model,
        max_requests = config.rate_limit.max_requests,
        window_secs = config.rate_limit.window_secs,
        max_attempts = config.retry.max_attempts,
        "upstream and rate limit configured"
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    cleanup.abort();
    tracing::info!("content relay stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
