// =============================================================================
// Display Sessions — scheduled fetch → recompute → publish
// =============================================================================
//
// Each display session owns one background Tokio task. The task:
//   1. Recomputes immediately on start.
//   2. Recomputes on every refresh tick.
//   3. Recomputes immediately when the session parameters change, cancelling
//      any in-flight fetch for the old parameters (latest wins).
//   4. Publishes into a single-writer `watch` slot. A superseded computation
//      never publishes, so consumers cannot observe stale results.
//
// Dropping the `SessionHandle` aborts the task (session teardown).
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::broker::CandleSource;
use crate::error::PipelineError;
use crate::pipeline::{self, AnnotatedSeries, PipelineConfig};
use crate::types::{find_instrument, Granularity, Indicator, Signal, Theme};

// =============================================================================
// Parameters
// =============================================================================

/// User-selectable inputs that parameterise each recomputation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionParams {
    pub instrument: String,
    pub granularity: Granularity,
    pub indicators: Vec<Indicator>,
    pub theme: Theme,
}

impl SessionParams {
    pub fn new(instrument: impl Into<String>, granularity: Granularity, theme: Theme) -> Self {
        Self {
            instrument: instrument.into(),
            granularity,
            indicators: Indicator::ALL.to_vec(),
            theme,
        }
    }

    pub fn shows(&self, indicator: Indicator) -> bool {
        self.indicators.contains(&indicator)
    }

    /// Validate a partial update and merge it. Returns whether anything changed.
    pub fn apply(&mut self, update: SessionParamsUpdate) -> Result<bool, PipelineError> {
        Ok(self.merge(update.validate()?))
    }

    fn merge(&mut self, change: ParamsChange) -> bool {
        let before = self.clone();
        if let Some(instrument) = change.instrument {
            self.instrument = instrument;
        }
        if let Some(granularity) = change.granularity {
            self.granularity = granularity;
        }
        if let Some(indicators) = change.indicators {
            self.indicators.clear();
            for indicator in indicators {
                if !self.indicators.contains(&indicator) {
                    self.indicators.push(indicator);
                }
            }
        }
        if let Some(theme) = change.theme {
            self.theme = theme;
        }
        *self != before
    }
}

/// Partial parameter update as received from a client; absent fields keep
/// their current value. Codes stay raw until [`SessionParamsUpdate::validate`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionParamsUpdate {
    #[serde(default)]
    pub instrument: Option<String>,
    #[serde(default)]
    pub granularity: Option<String>,
    #[serde(default)]
    pub indicators: Option<Vec<Indicator>>,
    #[serde(default)]
    pub theme: Option<Theme>,
}

impl SessionParamsUpdate {
    /// Check instrument and granularity against the catalogues.
    pub fn validate(self) -> Result<ParamsChange, PipelineError> {
        if let Some(instrument) = &self.instrument {
            find_instrument(instrument)?;
        }
        let granularity = self
            .granularity
            .as_deref()
            .map(str::parse::<Granularity>)
            .transpose()?;
        Ok(ParamsChange {
            instrument: self.instrument,
            granularity,
            indicators: self.indicators,
            theme: self.theme,
        })
    }
}

/// A validated update, ready to merge without failing.
#[derive(Debug, Clone)]
pub struct ParamsChange {
    instrument: Option<String>,
    granularity: Option<Granularity>,
    indicators: Option<Vec<Indicator>>,
    theme: Option<Theme>,
}

/// Service-wide settings shared by every session task.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub candle_count: u32,
    pub refresh_interval: Duration,
    pub pipeline: PipelineConfig,
}

// =============================================================================
// Snapshot
// =============================================================================

/// Latest published result for a session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    /// Number of completed recomputations; 0 until the first one lands.
    pub generation: u64,
    pub params: SessionParams,
    pub computed_at: Option<DateTime<Utc>>,
    /// Last successful series. Kept across a failed cycle.
    pub series: Option<AnnotatedSeries>,
    /// Error from the most recent cycle, cleared on success.
    pub error: Option<PipelineError>,
}

impl SessionSnapshot {
    fn pending(session_id: &str, params: SessionParams) -> Self {
        Self {
            session_id: session_id.to_string(),
            generation: 0,
            params,
            computed_at: None,
            series: None,
            error: None,
        }
    }
}

/// Blank the column groups the session has deselected.
fn apply_indicator_selection(series: &mut AnnotatedSeries, params: &SessionParams) {
    let bollinger = params.shows(Indicator::Bollinger);
    let extrema = params.shows(Indicator::SupportResistance);
    let signals = params.shows(Indicator::Signals);

    for row in &mut series.rows {
        if !bollinger {
            row.sma = None;
            row.std_dev = None;
            row.upper_band = None;
            row.lower_band = None;
        }
        if !extrema {
            row.support = false;
            row.resistance = false;
        }
        if !signals {
            row.signal = Signal::Hold;
        }
    }
}

// =============================================================================
// Handle
// =============================================================================

/// Owner of a running session task. Dropping it tears the session down.
pub struct SessionHandle {
    id: String,
    params_tx: watch::Sender<SessionParams>,
    snapshot_rx: watch::Receiver<SessionSnapshot>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    /// Spawn the session task. Must be called from within a Tokio runtime.
    pub fn spawn(
        source: Arc<dyn CandleSource>,
        config: SessionConfig,
        params: SessionParams,
        version: Arc<AtomicU64>,
    ) -> Self {
        let id = uuid::Uuid::new_v4().to_string();
        let (params_tx, params_rx) = watch::channel(params.clone());
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::pending(&id, params));

        let task = tokio::spawn(run_session(
            id.clone(),
            source,
            config,
            params_rx,
            snapshot_tx,
            version,
        ));

        info!(session_id = %id, "session started");

        Self {
            id,
            params_tx,
            snapshot_rx,
            task,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn params(&self) -> SessionParams {
        self.params_tx.borrow().clone()
    }

    /// Apply a partial update and trigger an immediate recompute.
    ///
    /// The merge happens under the channel lock, so concurrent updates to
    /// different fields all land. An update that changes nothing does not
    /// wake the task.
    pub fn update_params(&self, update: SessionParamsUpdate) -> Result<SessionParams, PipelineError> {
        let change = update.validate()?;
        let mut merged = None;
        self.params_tx.send_if_modified(|params| {
            let changed = params.merge(change);
            merged = Some(params.clone());
            changed
        });
        Ok(merged.unwrap_or_else(|| self.params()))
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    /// A fresh receiver for push consumers.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot_rx.clone()
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.task.abort();
        info!(session_id = %self.id, "session torn down");
    }
}

// =============================================================================
// Task
// =============================================================================

async fn refresh(
    source: &dyn CandleSource,
    params: &SessionParams,
    config: &SessionConfig,
) -> Result<AnnotatedSeries, PipelineError> {
    let candles = source
        .fetch_candles(&params.instrument, params.granularity, config.candle_count)
        .await?;
    let mut series = pipeline::run(&candles, &config.pipeline);
    apply_indicator_selection(&mut series, params);
    Ok(series)
}

async fn run_session(
    id: String,
    source: Arc<dyn CandleSource>,
    config: SessionConfig,
    mut params_rx: watch::Receiver<SessionParams>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    version: Arc<AtomicU64>,
) {
    let period = config.refresh_interval;
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut generation: u64 = 0;
    let mut recompute_now = true;

    loop {
        if !recompute_now {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = params_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    ticker.reset();
                }
            }
        }
        recompute_now = false;

        let params = params_rx.borrow_and_update().clone();

        let result = tokio::select! {
            res = refresh(source.as_ref(), &params, &config) => res,
            changed = params_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                debug!(session_id = %id, instrument = %params.instrument, "refresh superseded by new parameters");
                ticker.reset();
                recompute_now = true;
                continue;
            }
        };

        generation += 1;
        match &result {
            Ok(series) => debug!(
                session_id = %id,
                generation,
                instrument = %params.instrument,
                granularity = %params.granularity,
                rows = series.len(),
                "session series published"
            ),
            Err(e) => warn!(
                session_id = %id,
                generation,
                instrument = %params.instrument,
                error = %e,
                "refresh failed; retrying on next tick"
            ),
        }

        snapshot_tx.send_modify(|snap| {
            snap.generation = generation;
            snap.params = params;
            snap.computed_at = Some(Utc::now());
            match result {
                Ok(series) => {
                    snap.series = Some(series);
                    snap.error = None;
                }
                Err(e) => snap.error = Some(e),
            }
        });
        version.fetch_add(1, Ordering::SeqCst);
    }

    debug!(session_id = %id, "session task exiting");
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::Candle;
    use chrono::TimeZone;
    use futures_util::future::BoxFuture;
    use futures_util::FutureExt;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;

    /// Candle source with per-instrument row counts, latency and failures.
    #[derive(Default)]
    struct FakeSource {
        calls: AtomicUsize,
        delay: Mutex<Option<(String, Duration)>>,
        fail: Mutex<bool>,
    }

    fn rows_for(instrument: &str) -> usize {
        match instrument {
            "EUR_USD" => 40,
            "XAU_USD" => 70,
            _ => 25,
        }
    }

    impl CandleSource for FakeSource {
        fn fetch_candles<'a>(
            &'a self,
            instrument: &'a str,
            _granularity: Granularity,
            _count: u32,
        ) -> BoxFuture<'a, Result<Vec<Candle>, PipelineError>> {
            async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                let delay = self.delay.lock().clone();
                if let Some((slow, d)) = delay {
                    if slow == instrument {
                        tokio::time::sleep(d).await;
                    }
                }
                if *self.fail.lock() {
                    return Err(PipelineError::DataFetch("upstream 503".into()));
                }
                Ok((0..rows_for(instrument))
                    .map(|i| {
                        let t = Utc.timestamp_opt(1_700_000_000 + i as i64 * 60, 0).unwrap();
                        let c = 1.0 + (i as f64 * 0.3).sin() * 0.01;
                        Candle::new(t, c, c, c, c, 1, true)
                    })
                    .collect())
            }
            .boxed()
        }
    }

    fn config() -> SessionConfig {
        SessionConfig {
            candle_count: 100,
            refresh_interval: Duration::from_secs(60),
            pipeline: PipelineConfig::default(),
        }
    }

    fn spawn(source: Arc<FakeSource>) -> SessionHandle {
        SessionHandle::spawn(
            source,
            config(),
            SessionParams::new("EUR_USD", Granularity::M5, Theme::Dark),
            Arc::new(AtomicU64::new(0)),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn publishes_initial_series() {
        let source = Arc::new(FakeSource::default());
        let handle = spawn(source.clone());
        let mut rx = handle.subscribe();

        let snap = rx.wait_for(|s| s.generation >= 1).await.unwrap().clone();
        assert_eq!(snap.series.as_ref().map(AnnotatedSeries::len), Some(40));
        assert!(snap.error.is_none());
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_trigger_recompute() {
        let source = Arc::new(FakeSource::default());
        let handle = spawn(source.clone());
        let mut rx = handle.subscribe();

        rx.wait_for(|s| s.generation >= 1).await.unwrap();
        tokio::time::sleep(Duration::from_secs(61)).await;
        rx.wait_for(|s| s.generation >= 2).await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn param_change_supersedes_in_flight_refresh() {
        let source = Arc::new(FakeSource::default());
        *source.delay.lock() = Some(("EUR_USD".into(), Duration::from_secs(30)));
        let handle = spawn(source.clone());
        let mut rx = handle.subscribe();

        // Let the slow EUR_USD fetch start, then switch instrument.
        tokio::time::sleep(Duration::from_secs(1)).await;
        handle
            .update_params(SessionParamsUpdate {
                instrument: Some("XAU_USD".into()),
                ..Default::default()
            })
            .unwrap();

        let snap = rx.wait_for(|s| s.generation >= 1).await.unwrap().clone();
        assert_eq!(snap.params.instrument, "XAU_USD");
        assert_eq!(snap.series.as_ref().map(AnnotatedSeries::len), Some(70));

        // The stale EUR_USD result never lands.
        tokio::time::sleep(Duration::from_secs(40)).await;
        let snap = handle.snapshot();
        assert_eq!(snap.generation, 1);
        assert_eq!(snap.params.instrument, "XAU_USD");
    }

    #[tokio::test(start_paused = true)]
    async fn failed_cycle_keeps_last_series() {
        let source = Arc::new(FakeSource::default());
        let handle = spawn(source.clone());
        let mut rx = handle.subscribe();
        rx.wait_for(|s| s.generation >= 1).await.unwrap();

        *source.fail.lock() = true;
        tokio::time::sleep(Duration::from_secs(61)).await;
        let snap = rx.wait_for(|s| s.generation >= 2).await.unwrap().clone();
        assert!(matches!(snap.error, Some(PipelineError::DataFetch(_))));
        assert_eq!(snap.series.as_ref().map(AnnotatedSeries::len), Some(40));

        *source.fail.lock() = false;
        tokio::time::sleep(Duration::from_secs(60)).await;
        let snap = rx.wait_for(|s| s.generation >= 3).await.unwrap().clone();
        assert!(snap.error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_instrument_rejected_without_recompute() {
        let source = Arc::new(FakeSource::default());
        let handle = spawn(source.clone());
        let err = handle
            .update_params(SessionParamsUpdate {
                instrument: Some("NOPE".into()),
                ..Default::default()
            })
            .unwrap_err();
        assert!(err.is_invalid_param());
        assert_eq!(handle.params().instrument, "EUR_USD");
    }

    #[test]
    fn unknown_granularity_code_is_rejected() {
        let update = SessionParamsUpdate {
            granularity: Some("M3".into()),
            ..Default::default()
        };
        assert_eq!(
            update.validate().unwrap_err(),
            PipelineError::UnknownGranularity("M3".into())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unchanged_params_do_not_refetch() {
        let source = Arc::new(FakeSource::default());
        let handle = spawn(source.clone());
        let mut rx = handle.subscribe();
        rx.wait_for(|s| s.generation >= 1).await.unwrap();

        let params = handle
            .update_params(SessionParamsUpdate {
                instrument: Some("EUR_USD".into()),
                theme: Some(Theme::Dark),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(params.instrument, "EUR_USD");

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(handle.snapshot().generation, 1);
    }

    #[tokio::test]
    async fn concurrent_updates_to_different_fields_all_land() {
        let source = Arc::new(FakeSource::default());
        let handle = spawn(source);

        for round in 0..50 {
            let even = round % 2 == 0;
            let theme = if even { Theme::Light } else { Theme::Dark };
            let instrument = if even { "XAU_USD" } else { "GBP_USD" };
            let granularity = if even { Granularity::H1 } else { Granularity::D };
            let barrier = std::sync::Barrier::new(3);

            std::thread::scope(|s| {
                s.spawn(|| {
                    barrier.wait();
                    handle
                        .update_params(SessionParamsUpdate {
                            theme: Some(theme),
                            ..Default::default()
                        })
                        .unwrap();
                });
                s.spawn(|| {
                    barrier.wait();
                    handle
                        .update_params(SessionParamsUpdate {
                            instrument: Some(instrument.into()),
                            ..Default::default()
                        })
                        .unwrap();
                });
                s.spawn(|| {
                    barrier.wait();
                    handle
                        .update_params(SessionParamsUpdate {
                            granularity: Some(granularity.code().into()),
                            ..Default::default()
                        })
                        .unwrap();
                });
            });

            let params = handle.params();
            assert_eq!(params.theme, theme, "round {round}");
            assert_eq!(params.instrument, instrument, "round {round}");
            assert_eq!(params.granularity, granularity, "round {round}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn deselected_indicators_are_blanked() {
        let source = Arc::new(FakeSource::default());
        let handle = spawn(source.clone());
        handle
            .update_params(SessionParamsUpdate {
                indicators: Some(vec![Indicator::Signals]),
                ..Default::default()
            })
            .unwrap();
        let mut rx = handle.subscribe();
        let snap = rx
            .wait_for(|s| s.generation >= 1 && s.params.indicators == vec![Indicator::Signals])
            .await
            .unwrap()
            .clone();
        let series = snap.series.unwrap();
        assert!(series.rows.iter().all(|r| r.sma.is_none() && !r.support && !r.resistance));
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_handle_stops_refreshes() {
        let source = Arc::new(FakeSource::default());
        let handle = spawn(source.clone());
        let mut rx = handle.subscribe();
        rx.wait_for(|s| s.generation >= 1).await.unwrap();

        drop(handle);
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }
}
