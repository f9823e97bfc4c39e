//! HTTP API.

mod handlers;

pub use handlers::*;

use crate::config::ServerConfig;
use crate::engine::Engine;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: ServerConfig,
    pub engine: Arc<Engine>,
}

pub struct Server {
    state: AppState,
}

impl Server {
    pub fn new(config: ServerConfig, engine: Arc<Engine>) -> Self {
        Self {
            state: AppState { config, engine },
        }
    }

    /// Build the router with all routes.
    pub fn routes(&self) -> Router {
        let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any);

        Router::new()
            .route("/api/events", post(handlers::handle_post_event))
            .route("/api/events", get(handlers::handle_get_event))
            .route("/api/events/log", get(handlers::handle_get_log))
            .route("/api/status", get(handlers::handle_get_status))
            .route("/api/ack", post(handlers::handle_ack))
            .route("/api/ack/remove", post(handlers::handle_remove_ack))
            .route("/api/cancel", post(handlers::handle_cancel))
            .route("/api/uncancel", post(handlers::handle_uncancel))
            .route("/api/beat", post(handlers::handle_beat))
            .layer(TraceLayer::new_for_http())
            .layer(cors)
            .layer(DefaultBodyLimit::max(1024 * 1024)) // 1MB
            .with_state(self.state.clone())
    }

    /// Start the server on the configured port.
    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.state.config.http_port));
        let router = self.routes();

        tracing::info!("Web server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router).await?;

        Ok(())
    }
}
