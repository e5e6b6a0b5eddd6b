//! HTTP interface
//!
//! Thin axum layer over a [`Gateway`]: handlers translate requests into
//! gateway calls and [`ApiError`] turns failures into status codes with a
//! JSON `{"error": ...}` body.

pub mod error;
pub mod handlers;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::app::coordinator::{wait_for_shutdown, Gateway};

pub use error::{ApiError, ErrorBody};

/// All gateway routes, sharing one [`Gateway`]
pub fn router(gateway: Arc<Gateway>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/stream/:channel/:message", get(handlers::stream))
        .route("/api/download/:channel/:message", get(handlers::download))
        .route("/api/preload/:channel/:message", post(handlers::preload))
        .route("/api/tasks", get(handlers::list_tasks))
        .route("/api/tasks/:id", get(handlers::get_task))
        .route("/api/tasks/:id/cancel", post(handlers::cancel_task))
        .route("/api/tasks/:id/retry", post(handlers::retry_task))
        .route("/api/tasks/:id/start", post(handlers::start_task))
        .route("/api/queue/pause", post(handlers::pause_queue))
        .route("/api/queue/resume", post(handlers::resume_queue))
        .route("/api/queue/stats", get(handlers::queue_stats))
        .route("/api/queue/history", get(handlers::speed_history))
        .route("/api/uploads", post(handlers::submit_upload))
        .layer(TraceLayer::new_for_http())
        .with_state(gateway)
}

/// Serve the router until the shutdown broadcast fires
pub async fn serve(
    gateway: Arc<Gateway>,
    listener: TcpListener,
    shutdown: broadcast::Receiver<()>,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("Listening on http://{}", addr);
    }
    axum::serve(listener, router(gateway))
        .with_graceful_shutdown(wait_for_shutdown(shutdown))
        .await
}
