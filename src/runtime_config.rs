// =============================================================================
// Runtime Configuration — Service settings with atomic save
// =============================================================================
//
// Central configuration for the Reversion Desk service: upstream source,
// refresh cadence, session defaults and pipeline parameters.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash. All fields carry `#[serde(default)]` so that adding new fields
// never breaks loading an older config file.
//
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::broker::client::DEFAULT_BASE_URL;
use crate::pipeline::PipelineConfig;
use crate::types::{Granularity, Theme};

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_broker_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_bind_addr() -> String {
    "0.0.0.0:8050".to_string()
}

fn default_instrument() -> String {
    "EUR_USD".to_string()
}

fn default_candle_count() -> u32 {
    1000
}

fn default_refresh_interval_secs() -> u64 {
    60
}

fn default_max_sessions() -> usize {
    64
}

// =============================================================================
// RuntimeConfig
// =============================================================================

/// Top-level runtime configuration.
///
/// Every field has a serde default so that older JSON files missing new fields
/// will still deserialise correctly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    // --- Upstream -----------------------------------------------------------

    /// REST root of the candle provider.
    #[serde(default = "default_broker_base_url")]
    pub broker_base_url: String,

    /// Candles requested per refresh.
    #[serde(default = "default_candle_count")]
    pub candle_count: u32,

    // --- Server -------------------------------------------------------------

    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Fixed tick between recomputations of a session.
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,

    /// Upper bound on concurrently open display sessions.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    // --- Session defaults ---------------------------------------------------

    #[serde(default = "default_instrument")]
    pub default_instrument: String,

    #[serde(default)]
    pub default_granularity: Granularity,

    #[serde(default)]
    pub default_theme: Theme,

    // --- Pipeline -----------------------------------------------------------

    #[serde(default)]
    pub pipeline: PipelineConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            broker_base_url: default_broker_base_url(),
            candle_count: default_candle_count(),
            bind_addr: default_bind_addr(),
            refresh_interval_secs: default_refresh_interval_secs(),
            max_sessions: default_max_sessions(),
            default_instrument: default_instrument(),
            default_granularity: Granularity::default(),
            default_theme: Theme::default(),
            pipeline: PipelineConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;

        info!(
            path = %path.display(),
            instrument = %config.default_instrument,
            granularity = %config.default_granularity,
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise runtime config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }

    /// Apply `REVERSION_*` / `BROKER_*` environment overrides.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(addr) = lookup("REVERSION_BIND_ADDR").filter(|s| !s.is_empty()) {
            self.bind_addr = addr;
        }
        if let Some(url) = lookup("BROKER_BASE_URL").filter(|s| !s.is_empty()) {
            self.broker_base_url = url;
        }
        if let Some(secs) = lookup("REVERSION_REFRESH_SECS").and_then(|s| s.trim().parse().ok()) {
            self.refresh_interval_secs = secs;
        }
    }

    /// Refresh tick as a `Duration`, never shorter than one second.
    pub fn refresh_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.refresh_interval_secs.max(1))
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.default_instrument, "EUR_USD");
        assert_eq!(cfg.default_granularity, Granularity::M5);
        assert_eq!(cfg.refresh_interval_secs, 60);
        assert!((cfg.pipeline.z_thresh - 1.2).abs() < f64::EPSILON);
        assert_eq!(cfg.pipeline.cooldown, 15);
        assert_eq!(cfg.pipeline.bollinger_period, 20);
        assert_eq!(cfg.pipeline.extrema_order, 300);
        assert!(cfg.pipeline.zscore_window.is_none());
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: RuntimeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.candle_count, 1000);
        assert_eq!(cfg.bind_addr, "0.0.0.0:8050");
        assert_eq!(cfg.pipeline, PipelineConfig::default());
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "default_granularity": "H1", "pipeline": { "z_thresh": 2.0 } }"#;
        let cfg: RuntimeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.default_granularity, Granularity::H1);
        assert!((cfg.pipeline.z_thresh - 2.0).abs() < f64::EPSILON);
        assert_eq!(cfg.pipeline.cooldown, 15);
        assert_eq!(cfg.default_theme, Theme::Dark);
    }

    #[test]
    fn save_then_load() {
        let dir = std::env::temp_dir().join(format!("reversion-desk-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("runtime_config.json");

        let mut cfg = RuntimeConfig::default();
        cfg.candle_count = 250;
        cfg.save(&path).unwrap();

        let loaded = RuntimeConfig::load(&path).unwrap();
        assert_eq!(loaded.candle_count, 250);
        assert!(!path.with_extension("json.tmp").exists());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn env_overrides_apply() {
        let mut cfg = RuntimeConfig::default();
        cfg.apply_overrides(|key| match key {
            "REVERSION_BIND_ADDR" => Some("127.0.0.1:9000".to_string()),
            "REVERSION_REFRESH_SECS" => Some("5".to_string()),
            "BROKER_BASE_URL" => Some(String::new()),
            _ => None,
        });
        assert_eq!(cfg.bind_addr, "127.0.0.1:9000");
        assert_eq!(cfg.refresh_interval_secs, 5);
        assert_eq!(cfg.broker_base_url, DEFAULT_BASE_URL);
    }
}
