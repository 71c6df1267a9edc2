//! # confab-server
//!
//! HTTP gateway for the chat and call coordination core.
//!
//! This binary provides:
//! - **REST API** (axum) for rooms, messages, read receipts, and reactions
//! - **Call signaling** endpoints backed by the in-memory coordinator,
//!   including the ring-timeout timer that marks unanswered calls missed
//! - **SQLite persistence** for rooms, messages, reactions, and the call log

mod api;
mod config;
mod error;

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;
use tracing_subscriber::EnvFilter;

use confab_call::CallCoordinator;
use confab_chat::ChatService;
use confab_store::Database;

use crate::api::AppState;
use crate::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,confab_server=debug")),
        )
        .init();

    info!("Starting Confab server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------
    let database = match &config.db_path {
        Some(path) => Database::open_at(path)?,
        None => Database::new()?,
    };
    if let Some(path) = database.path() {
        info!(path = %path.display(), "Database ready");
    }

    let app_state = AppState {
        chat: Arc::new(Mutex::new(ChatService::new(database))),
        calls: Arc::new(CallCoordinator::new()),
        config: Arc::new(config.clone()),
    };

    // -----------------------------------------------------------------------
    // 4. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, config.http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
