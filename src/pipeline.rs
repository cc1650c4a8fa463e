// =============================================================================
// Signal Pipeline — candles in, annotated series out
// =============================================================================
//
// A pure, synchronous batch pass over an ordered candle series:
//
//   1. log-price and its one-step lag
//   2. AR(1) fit, residuals, z-scores
//   3. momentum over `momentum_lag` rows
//   4. cooldown-gated buy/sell/hold fold
//   5. rolling Bollinger bands and support/resistance markers
//
// Nothing is carried between calls; the full series is recomputed on every
// refresh. Insufficient data and a degenerate regression both degrade to
// undefined columns (and an all-hold signal column) instead of failing.
// =============================================================================

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::PipelineError;
use crate::indicators::{calculate_momentum, local_extrema, rolling_bollinger};
use crate::market_data::candle::closes;
use crate::market_data::Candle;
use crate::signals::{ou, Ar1Fit, ResidualStats};
use crate::types::Signal;

// =============================================================================
// Configuration
// =============================================================================

fn default_z_thresh() -> f64 {
    1.2
}

fn default_cooldown() -> usize {
    15
}

fn default_momentum_lag() -> usize {
    3
}

fn default_bollinger_period() -> usize {
    20
}

fn default_bollinger_k() -> f64 {
    2.0
}

fn default_extrema_order() -> usize {
    300
}

/// Tunable parameters for one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// |z| beyond which a reversion signal may fire.
    #[serde(default = "default_z_thresh")]
    pub z_thresh: f64,

    /// Minimum row distance between consecutive non-hold signals.
    #[serde(default = "default_cooldown")]
    pub cooldown: usize,

    #[serde(default = "default_momentum_lag")]
    pub momentum_lag: usize,

    #[serde(default = "default_bollinger_period")]
    pub bollinger_period: usize,

    #[serde(default = "default_bollinger_k")]
    pub bollinger_k: f64,

    /// Rows on each side considered for support/resistance.
    #[serde(default = "default_extrema_order")]
    pub extrema_order: usize,

    /// `None` standardises residuals over the whole series (look-ahead);
    /// `Some(w)` uses the trailing `w` residuals only.
    #[serde(default)]
    pub zscore_window: Option<usize>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            z_thresh: default_z_thresh(),
            cooldown: default_cooldown(),
            momentum_lag: default_momentum_lag(),
            bollinger_period: default_bollinger_period(),
            bollinger_k: default_bollinger_k(),
            extrema_order: default_extrema_order(),
            zscore_window: None,
        }
    }
}

impl PipelineConfig {
    /// Rows needed before every windowed column can be defined.
    pub fn required_rows(&self) -> usize {
        let zscore_rows = self.zscore_window.map_or(2, |w| w + 1);
        self.bollinger_period
            .max(self.momentum_lag + 1)
            .max(zscore_rows)
    }
}

// =============================================================================
// Output
// =============================================================================

/// One candle plus every derived column. `None` means undefined.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnnotatedRow {
    #[serde(flatten)]
    pub candle: Candle,
    pub log_close: Option<f64>,
    pub lag_log_close: Option<f64>,
    pub residual: Option<f64>,
    pub zscore: Option<f64>,
    pub momentum: Option<f64>,
    pub sma: Option<f64>,
    pub std_dev: Option<f64>,
    pub upper_band: Option<f64>,
    pub lower_band: Option<f64>,
    pub support: bool,
    pub resistance: bool,
    pub signal: Signal,
}

/// The annotated table handed to the chart consumer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnnotatedSeries {
    pub rows: Vec<AnnotatedRow>,
    pub fit: Option<Ar1Fit>,
    /// Whole-series residual statistics; `None` in trailing mode or when the
    /// residuals have no variance.
    pub residual_stats: Option<ResidualStats>,
    pub config: PipelineConfig,
    /// Soft failures absorbed during the run.
    pub warnings: Vec<PipelineError>,
}

impl AnnotatedSeries {
    /// Indices of rows carrying a buy or sell.
    pub fn action_indices(&self) -> Vec<usize> {
        self.rows
            .iter()
            .enumerate()
            .filter(|(_, r)| r.signal.is_action())
            .map(|(i, _)| i)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

// =============================================================================
// Pipeline
// =============================================================================

/// Annotate `candles` (time-ordered, complete) with indicators and signals.
pub fn run(candles: &[Candle], config: &PipelineConfig) -> AnnotatedSeries {
    let mut warnings = Vec::new();

    let required = config.required_rows();
    if candles.len() < required {
        debug!(available = candles.len(), required, "series shorter than longest window");
        warnings.push(PipelineError::InsufficientData {
            required,
            available: candles.len(),
        });
    }

    let closes = closes(candles);
    let log_close = ou::log_prices(&closes);
    let lag_log_close = ou::lagged(&log_close);

    let (fit, residual, zscore, residual_stats) = match ou::fit_ar1(&log_close, &lag_log_close) {
        Ok(fit) => {
            let residual = ou::residuals(&log_close, &lag_log_close, &fit);
            let (zscore, stats) = match config.zscore_window {
                Some(window) => (ou::zscores_trailing(&residual, window), None),
                None => ou::zscores_full_sample(&residual),
            };
            (Some(fit), residual, zscore, stats)
        }
        Err(e) => {
            warn!(error = %e, rows = candles.len(), "regression degenerate; emitting hold-only series");
            warnings.push(e);
            let undefined = vec![None; candles.len()];
            (None, undefined.clone(), undefined, None)
        }
    };

    let momentum = calculate_momentum(&closes, config.momentum_lag);
    let signals = ou::assign_signals(&zscore, &momentum, config.z_thresh, config.cooldown);
    let bands = rolling_bollinger(&closes, config.bollinger_period, config.bollinger_k);
    let extrema = local_extrema(&closes, config.extrema_order);

    let rows: Vec<AnnotatedRow> = candles
        .iter()
        .enumerate()
        .map(|(i, candle)| AnnotatedRow {
            candle: candle.clone(),
            log_close: log_close[i],
            lag_log_close: lag_log_close[i],
            residual: residual[i],
            zscore: zscore[i],
            momentum: momentum[i],
            sma: bands[i].map(|b| b.middle),
            std_dev: bands[i].map(|b| b.std_dev),
            upper_band: bands[i].map(|b| b.upper),
            lower_band: bands[i].map(|b| b.lower),
            support: extrema[i].support,
            resistance: extrema[i].resistance,
            signal: signals[i],
        })
        .collect();

    let series = AnnotatedSeries {
        rows,
        fit,
        residual_stats,
        config: config.clone(),
        warnings,
    };

    debug!(
        rows = series.len(),
        actions = series.action_indices().len(),
        "pipeline run complete"
    );

    series
}
