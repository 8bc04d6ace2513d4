//! HTTP server for the Olav orchestration core (axum).
//!
//! Exposes session registration, the streamed workflow endpoint, resume,
//! threads, inspection jobs, and report retrieval. Stream responses are
//! newline-delimited JSON; client disconnect cancels the thread cooperatively.
//!
//! **Public API**: [`run_serve`], [`run_serve_on_listener`].

mod app;
mod auth;
mod error;
mod inspections;
mod stream;
mod threads;

use std::sync::Arc;

use olav::bootstrap::Orchestrator;
use tokio::net::TcpListener;
use tracing::info;

pub use app::AppState;

/// Runs the server on an existing listener. Used by tests (bind to
/// 127.0.0.1:0, then pass the listener).
pub async fn run_serve_on_listener(
    listener: TcpListener,
    orchestrator: Arc<Orchestrator>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = listener.local_addr()?;
    info!("olav listening on http://{}", addr);
    let state = AppState { orchestrator };
    axum::serve(listener, app::router(state)).await?;
    Ok(())
}

/// Binds the configured address and serves until the process exits.
pub async fn run_serve(
    orchestrator: Arc<Orchestrator>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(&orchestrator.settings.listen_addr).await?;
    run_serve_on_listener(listener, orchestrator).await
}
