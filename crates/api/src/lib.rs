//! `api` crate: HTTP REST layer over the run orchestrator.
//!
//! Exposes:
//!   POST   /api/v1/pipelines/:id/runs
//!   POST   /api/v1/webhook/:pipeline_id
//!   GET    /api/v1/runs/:id
//!   POST   /api/v1/runs/:id/stop

pub mod error;
pub mod handlers;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

pub use error::ApiError;
pub use handlers::AppState;

/// Build the application router.
pub fn router(state: AppState) -> Router {
    handlers::routes()
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind `bind` and serve until the process is stopped.
pub async fn serve(bind: &str, state: AppState) -> Result<(), ApiError> {
    let listener = TcpListener::bind(bind).await?;
    info!("API listening on {}", listener.local_addr()?);
    axum::serve(listener, router(state)).await?;
    Ok(())
}
