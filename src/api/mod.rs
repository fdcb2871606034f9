//! HTTP surface of the gateway

pub mod error;
pub mod handlers;

use axum::{
    routing::{get, post},
    Router,
};
use handlers::{create_topic, health_check, list_topics, publish_message, AppState};
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/messages", post(publish_message))
        .route("/topics", get(list_topics).post(create_topic))
        .route("/health", get(health_check))
        .route("/ping", get(ping))
        .with_state(state)
}

async fn ping() -> &'static str {
    "pong"
}

/// Serves until `shutdown` is cancelled, then lets in-flight requests finish.
pub async fn serve(
    bind: SocketAddr,
    state: AppState,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!(addr = %listener.local_addr()?, "http api listening");

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
}
