//! HTTP handlers for the bot control surface

use crate::types::SettingsUpdate;
use crate::AppState;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

// ==========================================
// Response Helpers
// ==========================================

pub fn error_response(error: &str) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({
            "success": false,
            "error": error
        })),
    )
        .into_response()
}

// ==========================================
// Request Types
// ==========================================

#[derive(Debug, Deserialize)]
pub struct TradesQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    10
}

// ==========================================
// Handlers
// ==========================================

pub async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "dashboard_backend",
        "version": "1.0.0"
    }))
}

pub async fn start_bot(
    State(state): State<Arc<AppState>>,
    settings: Option<Json<SettingsUpdate>>,
) -> impl IntoResponse {
    if let Some(Json(update)) = settings {
        state.bot.update_settings(&update).await;
    }

    if state.bot.clone().start() {
        Json(serde_json::json!({"status": "Bot started successfully"}))
    } else {
        Json(serde_json::json!({"status": "Bot already running"}))
    }
}

pub async fn stop_bot(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.bot.stop();
    Json(serde_json::json!({"status": "Bot stopped successfully"}))
}

pub async fn get_bot_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.bot.status().await)
}

pub async fn get_bot_trades(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TradesQuery>,
) -> Response {
    match state.store.trades(query.limit, query.offset).await {
        Ok(trades) => Json(trades).into_response(),
        Err(e) => error_response(&e.to_string()),
    }
}

pub async fn get_positions(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.bot.positions().await)
}

pub async fn get_bot_settings(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.bot.settings().await)
}

pub async fn update_bot_settings(
    State(state): State<Arc<AppState>>,
    Json(update): Json<SettingsUpdate>,
) -> impl IntoResponse {
    state.bot.update_settings(&update).await;
    let settings = state.bot.settings().await;
    info!("Settings updated via API");
    Json(serde_json::json!({
        "status": "Settings updated successfully",
        "data": settings
    }))
}
