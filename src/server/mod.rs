//! HTTP gateway around the background removal processor
//!
//! # Endpoints
//!
//! - `GET  /health`    liveness probe
//! - `POST /remove-bg` multipart upload in, transparent PNG out
//!
//! The processor is shared between handlers and driven from blocking worker
//! threads. Only the model run itself is serialized; uploads, decoding,
//! letterboxing, mask mapping and PNG encoding proceed concurrently.

pub mod cors;
pub mod error;
pub mod routes;

use crate::config::ServerConfig;
use crate::error::{BgRemovalError, Result};
use crate::processor::BackgroundRemovalProcessor;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub use cors::build_cors_layer;
pub use error::ApiError;

/// The removal routine the HTTP layer depends on
///
/// Implementations block; the handlers call them from `spawn_blocking`.
pub trait BackgroundRemover: Send + Sync {
    /// Turn encoded image bytes into PNG bytes
    ///
    /// Returns the RGBA cutout, or the grayscale mask when `only_mask` is set.
    ///
    /// # Errors
    /// - Undecodable input (`BgRemovalError::Image`)
    /// - Model or inference failures
    fn remove_background(&self, image_bytes: &[u8], only_mask: bool) -> Result<Vec<u8>>;
}

impl BackgroundRemover for BackgroundRemovalProcessor {
    fn remove_background(&self, image_bytes: &[u8], only_mask: bool) -> Result<Vec<u8>> {
        if only_mask {
            self.segment_bytes(image_bytes)?.to_png_bytes()
        } else {
            BackgroundRemovalProcessor::remove_background(self, image_bytes)
        }
    }
}

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub remover: Arc<dyn BackgroundRemover>,
}

impl AppState {
    #[must_use]
    pub fn new(remover: Arc<dyn BackgroundRemover>) -> Self {
        Self { remover }
    }

    /// Wrap an initialized processor
    #[must_use]
    pub fn from_processor(processor: BackgroundRemovalProcessor) -> Self {
        Self::new(Arc::new(processor))
    }
}

/// Build the router with routes, body limit, request tracing and CORS
///
/// # Errors
/// - Invalid CORS policy
pub fn router(state: AppState, config: &ServerConfig) -> Result<Router> {
    let cors = build_cors_layer(&config.cors)?;

    Ok(Router::new()
        .route("/health", get(routes::health))
        .route("/remove-bg", post(routes::remove_bg))
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state))
}

/// Bind the configured address and serve until Ctrl+C
///
/// # Errors
/// - Invalid server configuration
/// - Bind or accept failures
pub async fn serve(state: AppState, config: &ServerConfig) -> Result<()> {
    config.validate()?;
    let app = router(state, config)?;

    let bind_address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .map_err(|e| BgRemovalError::file_io_error("bind", &bind_address, &e))?;

    let local_addr = listener.local_addr()?;
    tracing::info!(%local_addr, "Background removal gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Shutdown signal received, draining connections"),
        Err(e) => tracing::error!("Failed to listen for shutdown signal: {e}"),
    }
}
