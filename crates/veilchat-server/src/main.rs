//! # veilchat-server
//!
//! HTTP front for the VeilChat conversation store.
//!
//! This binary provides:
//! - **REST API** (axum) over every store operation, authenticated with
//!   bearer session tokens
//! - **Admin API** guarded by `ADMIN_TOKEN` that mints sessions for wallets
//!   verified by the upstream auth service
//! - **Per-IP rate limiting**

mod api;
mod config;
mod error;
mod rate_limit;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::info;
use tracing_subscriber::EnvFilter;
use veilchat_store::Database;

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::rate_limit::{Quota, RateLimiter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,veilchat_server=debug")),
        )
        .init();

    info!("Starting VeilChat server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");
    if config.admin_token.is_none() {
        tracing::warn!("ADMIN_TOKEN is not set; sessions cannot be issued");
    }

    // -----------------------------------------------------------------------
    // 3. Open the store (runs migrations)
    // -----------------------------------------------------------------------
    let db = match &config.database_path {
        Some(path) => Database::open_with(path, config.busy_timeout)?,
        None => Database::new()?,
    };
    info!(path = ?db.path(), "Database ready");

    let rate_limiter = RateLimiter::new(Quota {
        per_sec: config.rate_per_sec,
        burst: config.rate_burst,
    });

    let http_addr = config.http_addr;
    let app_state = AppState {
        db: Arc::new(Mutex::new(db)),
        config: Arc::new(config),
        rate_limiter: rate_limiter.clone(),
    };

    // -----------------------------------------------------------------------
    // 4. Background housekeeping
    // -----------------------------------------------------------------------

    // Evict rate-limit buckets idle for 10 minutes, every 5 minutes.
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            interval.tick().await;
            rate_limiter.forget_idle(Duration::from_secs(600)).await;
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the HTTP API server until it fails or Ctrl+C arrives
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
