//! Trading dashboard backend
//!
//! Real-time broadcast core plus HFT bot orchestration: a connection
//! registry fanning events out to dashboard clients, per-symbol analysis
//! sessions, and a start/stoppable multi-loop trading bot.

mod analysis;
mod api;
mod hft;
mod registry;
mod store;
mod strategy;
mod types;

use crate::analysis::AnalysisSessionManager;
use crate::api::create_router;
use crate::hft::HftBot;
use crate::registry::ConnectionRegistry;
use crate::store::{MemoryStore, RecordStore};
use crate::strategy::{NullClosePolicy, NullEvaluator, NullExecutor, StaticProvider};
use crate::types::BotSettings;

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Application state shared across all handlers
pub struct AppState {
    pub registry: Arc<ConnectionRegistry>,
    pub analysis: Arc<AnalysisSessionManager>,
    pub bot: Arc<HftBot>,
    pub store: Arc<dyn RecordStore>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting trading dashboard backend");

    let port: u16 = std::env::var("PORT")
        .unwrap_or_else(|_| "8000".to_string())
        .parse()
        .unwrap_or(8000);

    let registry = Arc::new(ConnectionRegistry::new());
    let analysis = Arc::new(AnalysisSessionManager::new());
    let store: Arc<dyn RecordStore> = Arc::new(MemoryStore::new());

    // Null strategies: the bot runs its loops but never trades until real
    // decision logic is injected here.
    let bot = Arc::new(HftBot::new(
        BotSettings::default(),
        Arc::new(StaticProvider::default()),
        Arc::new(NullEvaluator),
        Arc::new(NullClosePolicy),
        Arc::new(NullExecutor),
        Arc::clone(&registry),
        Arc::clone(&store),
    ));

    let state = Arc::new(AppState {
        registry,
        analysis,
        bot,
        store,
    });

    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting API server on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown...");
}
