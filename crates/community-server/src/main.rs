//! # community-server
//!
//! Backend for the 42 community.
//!
//! This binary provides:
//! - **Rank engine** that turns activity points into tiered, gendered ranks
//!   and lets admins pin custom ranks
//! - **Realtime chat router** over WebSocket (`/ws`) with read-state tracking
//! - **REST API** (axum) for users, ranks, chats and admin operations
//! - **Rate limiting** per client IP and per chatting user

mod api;
mod config;
mod error;
mod rank_engine;
mod rate_limit;
mod realtime;
mod registry;

use std::time::Duration;

use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use community_shared::constants::APP_NAME;
use community_store::Database;

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::rank_engine::RankEngine;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,community_server=debug")),
        )
        .init();

    info!("Starting {} server v{}", APP_NAME, env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(
        http_addr = %config.http_addr,
        admin_enabled = config.admin_token.is_some(),
        max_message_length = config.max_message_length,
        "Loaded configuration"
    );

    // -----------------------------------------------------------------------
    // 3. Open the store and load the rank table
    // -----------------------------------------------------------------------
    let db = match &config.database_path {
        Some(path) => Database::open_at(path)?,
        None => Database::new()?,
    };
    let rank_engine = RankEngine::load(&db)?;

    let http_addr = config.http_addr;
    let app_state = AppState::new(db, rank_engine, config);

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    spawn_limiter_purge(&app_state);

    // -----------------------------------------------------------------------
    // 5. Run the HTTP + WebSocket server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
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

/// Forget rate limit buckets idle for more than ten minutes, every five.
fn spawn_limiter_purge(state: &AppState) {
    let http = state.rate_limiter.clone();
    let messages = state.message_limiter.clone();
    let max_idle = Duration::from_secs(600);

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            interval.tick().await;
            http.purge_stale(max_idle).await;
            messages.purge_stale(max_idle).await;
            debug!("Purged idle rate limit buckets");
        }
    });
}
