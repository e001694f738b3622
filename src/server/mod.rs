use crate::batch::BatchProcessor;
use crate::cleanup::start_cleanup_task;
use crate::config::Config;
use crate::convert::ImageConverter;
use crate::storage::Storage;
use crate::{Error, Result};
use axum::{
    extract::DefaultBodyLimit,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

pub mod routes;

/// Shared application context
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub batch: Arc<BatchProcessor>,
}

impl AppContext {
    /// Wire storage, converter and orchestrator from a config.
    pub fn from_config(config: Config) -> Result<Self> {
        let storage = Arc::new(Storage::new(&config.upload_dir, &config.converted_dir)?);
        let converter = Arc::new(ImageConverter::new(config.conversion.clone()));
        Ok(Self {
            batch: Arc::new(BatchProcessor::new(converter, storage)),
            config: Arc::new(config),
        })
    }
}

/// Create the Axum router with all routes
pub fn create_router(ctx: AppContext) -> Router {
    let body_limit = ctx.config.max_upload_bytes;

    Router::new()
        .route("/health", get(health_check))
        .route("/api/formats", get(routes::list_formats))
        .route("/upload", post(routes::upload))
        .route("/download/{*path}", get(routes::download))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

async fn health_check() -> impl IntoResponse {
    StatusCode::OK
}

/// JSON error body with the given status.
pub(crate) fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({ "error": message.into() })),
    )
        .into_response()
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::InvalidRequest(_) | Error::UnsupportedFormat(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        }
        error_response(status, self.to_string())
    }
}

/// Start the HTTP server and the cleanup sweep; both stop on Ctrl+C / SIGTERM.
pub async fn start_server(config: Config) -> anyhow::Result<()> {
    let addr = config.bind_address();
    let sweep_dirs = vec![config.upload_dir.clone(), config.converted_dir.clone()];
    let cleanup_age = config.cleanup_age;
    let cleanup_interval = config.cleanup_interval;

    let ctx = AppContext::from_config(config)?;
    let app = create_router(ctx);

    let token = CancellationToken::new();
    let cleanup = start_cleanup_task(sweep_dirs, cleanup_age, cleanup_interval, token.clone());

    tracing::info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    token.cancel();
    if let Err(e) = cleanup.await {
        tracing::warn!("Cleanup task ended abnormally: {}", e);
    }
    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM. A handler that cannot be installed never fires.
async fn shutdown_signal() {
    let reason = tokio::select! {
        _ = interrupt() => "Ctrl+C",
        _ = terminate() => "SIGTERM",
    };
    tracing::info!("{} received, shutting down", reason);
}

async fn interrupt() {
    if let Err(e) = signal::ctrl_c().await {
        tracing::error!("Ctrl+C handler unavailable: {}", e);
        std::future::pending::<()>().await;
    }
}

#[cfg(unix)]
async fn terminate() {
    use signal::unix::{signal as unix_signal, SignalKind};

    match unix_signal(SignalKind::terminate()) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(e) => {
            tracing::error!("SIGTERM handler unavailable: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await
}
