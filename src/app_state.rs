// =============================================================================
// Central Application State — Reversion Desk
// =============================================================================
//
// Ties together the runtime configuration, the upstream candle source and the
// registry of live display sessions. Shared across Axum handlers via
// `Arc<AppState>`.
//
// Thread safety:
//   - Atomic counter for lock-free version tracking.
//   - parking_lot::RwLock for the config and the session registry.
//   - Each session publishes through its own single-writer watch channel.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::info;

use crate::broker::CandleSource;
use crate::error::PipelineError;
use crate::runtime_config::RuntimeConfig;
use crate::session::{SessionConfig, SessionHandle, SessionParams, SessionParamsUpdate, SessionSnapshot};
use crate::types::find_instrument;

/// Reasons a session cannot be created or addressed.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionError {
    NotFound,
    LimitReached(usize),
    InvalidParams(PipelineError),
    /// Request body is not a valid parameter update.
    MalformedBody(String),
}

/// Central application state shared across all async tasks via `Arc<AppState>`.
pub struct AppState {
    /// Monotonically increasing version counter. Bumped by every session
    /// publish and by session create/delete. Reported by `/health`; push
    /// consumers follow the per-session watch channels instead.
    pub state_version: Arc<AtomicU64>,

    pub runtime_config: Arc<RwLock<RuntimeConfig>>,

    pub candle_source: Arc<dyn CandleSource>,

    sessions: RwLock<HashMap<String, SessionHandle>>,

    /// Instant when the service was started. Used for uptime calculations.
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(config: RuntimeConfig, candle_source: Arc<dyn CandleSource>) -> Self {
        Self {
            state_version: Arc::new(AtomicU64::new(1)),
            runtime_config: Arc::new(RwLock::new(config)),
            candle_source,
            sessions: RwLock::new(HashMap::new()),
            start_time: std::time::Instant::now(),
        }
    }

    // ── Version Management ──────────────────────────────────────────────

    pub fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::SeqCst)
    }

    pub fn current_state_version(&self) -> u64 {
        self.state_version.load(Ordering::SeqCst)
    }

    // ── Sessions ────────────────────────────────────────────────────────

    fn session_config(config: &RuntimeConfig) -> SessionConfig {
        SessionConfig {
            candle_count: config.candle_count,
            refresh_interval: config.refresh_interval(),
            pipeline: config.pipeline.clone(),
        }
    }

    /// Start a new display session seeded from the configured defaults.
    pub fn create_session(&self, update: SessionParamsUpdate) -> Result<SessionSnapshot, SessionError> {
        let (session_config, mut params, max_sessions) = {
            let config = self.runtime_config.read();
            (
                Self::session_config(&config),
                SessionParams::new(
                    config.default_instrument.clone(),
                    config.default_granularity,
                    config.default_theme,
                ),
                config.max_sessions,
            )
        };

        params.apply(update).map_err(SessionError::InvalidParams)?;
        find_instrument(&params.instrument).map_err(SessionError::InvalidParams)?;

        let mut sessions = self.sessions.write();
        if sessions.len() >= max_sessions {
            return Err(SessionError::LimitReached(max_sessions));
        }

        let handle = SessionHandle::spawn(
            self.candle_source.clone(),
            session_config,
            params,
            self.state_version.clone(),
        );
        let snapshot = handle.snapshot();
        sessions.insert(handle.id().to_string(), handle);
        drop(sessions);

        self.increment_version();
        Ok(snapshot)
    }

    pub fn session_snapshot(&self, id: &str) -> Result<SessionSnapshot, SessionError> {
        self.sessions
            .read()
            .get(id)
            .map(SessionHandle::snapshot)
            .ok_or(SessionError::NotFound)
    }

    pub fn subscribe_session(
        &self,
        id: &str,
    ) -> Result<tokio::sync::watch::Receiver<SessionSnapshot>, SessionError> {
        self.sessions
            .read()
            .get(id)
            .map(SessionHandle::subscribe)
            .ok_or(SessionError::NotFound)
    }

    pub fn update_session(
        &self,
        id: &str,
        update: SessionParamsUpdate,
    ) -> Result<SessionParams, SessionError> {
        let sessions = self.sessions.read();
        let handle = sessions.get(id).ok_or(SessionError::NotFound)?;
        let params = handle
            .update_params(update)
            .map_err(SessionError::InvalidParams)?;
        info!(session_id = %id, instrument = %params.instrument, granularity = %params.granularity, "session parameters updated");
        Ok(params)
    }

    /// Tear a session down; its task is cancelled when the handle drops.
    pub fn remove_session(&self, id: &str) -> Result<(), SessionError> {
        let removed = self.sessions.write().remove(id);
        match removed {
            Some(handle) => {
                drop(handle);
                self.increment_version();
                Ok(())
            }
            None => Err(SessionError::NotFound),
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Drop every session, cancelling all refresh tasks.
    pub fn shutdown_sessions(&self) {
        let drained: Vec<SessionHandle> = self.sessions.write().drain().map(|(_, h)| h).collect();
        info!(count = drained.len(), "tearing down sessions");
        drop(drained);
    }

    pub fn health(&self) -> HealthSnapshot {
        HealthSnapshot {
            status: "ok",
            state_version: self.current_state_version(),
            server_time: chrono::Utc::now().timestamp_millis(),
            uptime_secs: self.start_time.elapsed().as_secs(),
            sessions: self.session_count(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthSnapshot {
    pub status: &'static str,
    pub state_version: u64,
    pub server_time: i64,
    pub uptime_secs: u64,
    pub sessions: usize,
}
