// =============================================================================
// Reversion Desk — Main Entry Point
// =============================================================================
//
// Serves mean-reversion annotated candle tables to a browser chart renderer.
// Each display session refreshes on its own scheduled task; the HTTP layer
// only creates, reads, updates and tears down sessions.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod broker;
mod error;
mod indicators;
mod market_data;
mod pipeline;
mod runtime_config;
mod session;
mod signals;
mod types;

use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::broker::BrokerClient;
use crate::runtime_config::RuntimeConfig;

const CONFIG_PATH: &str = "runtime_config.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Reversion Desk starting up");

    let mut config = RuntimeConfig::load(CONFIG_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        let defaults = RuntimeConfig::default();
        if !std::path::Path::new(CONFIG_PATH).exists() {
            match defaults.save(CONFIG_PATH) {
                Ok(()) => info!(path = CONFIG_PATH, "Wrote default config"),
                Err(e) => warn!(error = %e, "Failed to write default config"),
            }
        }
        defaults
    });
    config.apply_env_overrides();

    if let Err(e) = types::find_instrument(&config.default_instrument) {
        warn!(error = %e, "configured default instrument is not in the catalogue; falling back to EUR_USD");
        config.default_instrument = "EUR_USD".to_string();
    }

    info!(
        instrument = %config.default_instrument,
        granularity = %config.default_granularity,
        refresh_secs = config.refresh_interval_secs,
        z_thresh = config.pipeline.z_thresh,
        cooldown = config.pipeline.cooldown,
        "Session defaults"
    );
    if config.pipeline.zscore_window.is_none() {
        info!("z-scores use whole-series standardisation (look-ahead); output is for offline review");
    }

    // ── 2. Upstream client ───────────────────────────────────────────────
    let api_token = std::env::var("BROKER_API_TOKEN").unwrap_or_default();
    let broker = BrokerClient::new(api_token, config.broker_base_url.clone())
        .context("failed to build broker client")?;

    // ── 3. Shared state ──────────────────────────────────────────────────
    let bind_addr = config.bind_addr.clone();
    let state = Arc::new(AppState::new(config, Arc::new(broker)));

    // ── 4. API server ────────────────────────────────────────────────────
    let app = api::rest::router(state.clone());
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind API server on {bind_addr}"))?;
    info!(addr = %bind_addr, "API server listening");

    // ── 5. Graceful shutdown ─────────────────────────────────────────────
    let server = axum::serve(listener, app).with_graceful_shutdown(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for shutdown signal");
        }
        warn!("Shutdown signal received — stopping gracefully");
    });

    if let Err(e) = server.await {
        error!(error = %e, "API server failed");
    }

    state.shutdown_sessions();
    info!("Reversion Desk shut down complete.");
    Ok(())
}
