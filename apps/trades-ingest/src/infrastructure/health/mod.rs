//! Status, Health and Metrics Endpoint
//!
//! HTTP surface for the hosting environment.
//!
//! # Endpoints
//!
//! - `GET /trades/status` - Pipeline status, `{"status":"running"}` while running
//! - `GET /healthz` - Liveness probe (simple OK)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::{PipelineState, PipelineStatus};
use crate::infrastructure::metrics::get_metrics_handle;

/// Body of `/trades/status`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    /// Pipeline state name.
    pub status: &'static str,
}

/// Build the router. Exposed for in-process testing.
pub fn router(status: PipelineStatus) -> Router {
    Router::new()
        .route("/trades/status", get(status_handler))
        .route("/healthz", get(liveness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(status)
}

// =============================================================================
// Health Server
// =============================================================================

/// Status HTTP server.
pub struct HealthServer {
    port: u16,
    status: PipelineStatus,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new server.
    #[must_use]
    pub const fn new(port: u16, status: PipelineStatus, cancel: CancellationToken) -> Self {
        Self {
            port,
            status,
            cancel,
        }
    }

    /// Run the server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let app = router(self.status);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Status server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Status server stopped");
        Ok(())
    }
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn status_handler(State(status): State<PipelineStatus>) -> impl IntoResponse {
    let state = status.state();
    let code = if state == PipelineState::Running {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        code,
        Json(StatusResponse {
            status: state.as_str(),
        }),
    )
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

// =============================================================================
// Errors
// =============================================================================

/// Errors from the status server.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to the configured port.
    #[error("failed to bind status server to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server encountered a fatal error while running.
    #[error("status server failed: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================
