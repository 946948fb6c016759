//! API module - Axum HTTP server and routes

mod handlers;
mod websocket;

use crate::AppState;
use axum::{
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the main application router with all endpoints
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health
        .route("/api/health", get(handlers::health_check))
        // HFT bot control surface
        .route("/api/v1/hft/start", post(handlers::start_bot))
        .route("/api/v1/hft/stop", post(handlers::stop_bot))
        .route("/api/v1/hft/status", get(handlers::get_bot_status))
        .route("/api/v1/hft/settings", get(handlers::get_bot_settings))
        .route("/api/v1/hft/settings", put(handlers::update_bot_settings))
        .route("/api/v1/hft/trades", get(handlers::get_bot_trades))
        .route("/api/v1/hft/positions", get(handlers::get_positions))
        // WebSockets
        .route("/ws", get(websocket::ws_handler))
        .route("/ws/analysis/:symbol", get(websocket::analysis_ws_handler))
        // Middleware
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
