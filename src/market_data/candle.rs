use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

/// A single mid-price OHLCV candle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
    /// `false` while the bucket is still forming.
    pub complete: bool,
}

impl Candle {
    pub fn new(
        time: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: u64,
        complete: bool,
    ) -> Self {
        Self {
            time,
            open,
            high,
            low,
            close,
            volume,
            complete,
        }
    }
}

/// Drop forming candles, keeping the order of the rest.
pub fn retain_complete(candles: Vec<Candle>) -> Vec<Candle> {
    candles.into_iter().filter(|c| c.complete).collect()
}

/// Enforce strictly increasing timestamps.
///
/// Out-of-order or duplicate rows are discarded (first occurrence wins) so the
/// pipeline always sees a valid time series.
pub fn enforce_time_order(candles: Vec<Candle>) -> Vec<Candle> {
    let mut out: Vec<Candle> = Vec::with_capacity(candles.len());
    for candle in candles {
        if let Some(last) = out.last() {
            if candle.time <= last.time {
                warn!(
                    time = %candle.time,
                    previous = %last.time,
                    "dropping non-increasing candle"
                );
                continue;
            }
        }
        out.push(candle);
    }
    out
}

/// Close prices in series order.
pub fn closes(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(|c| c.close).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_candle(minute: i64, close: f64, complete: bool) -> Candle {
        let time = Utc.timestamp_opt(1_700_000_000 + minute * 60, 0).unwrap();
        Candle::new(time, close, close + 1.0, close - 1.0, close, 100, complete)
    }

    #[test]
    fn retain_complete_filters_forming_candle() {
        let candles = vec![
            sample_candle(0, 1.0, true),
            sample_candle(1, 2.0, true),
            sample_candle(2, 3.0, false),
        ];
        let kept = retain_complete(candles);
        assert_eq!(kept.len(), 2);
        assert!(kept.iter().all(|c| c.complete));
    }

    #[test]
    fn enforce_time_order_drops_duplicates_and_regressions() {
        let candles = vec![
            sample_candle(0, 1.0, true),
            sample_candle(1, 2.0, true),
            sample_candle(1, 2.5, true),
            sample_candle(0, 0.5, true),
            sample_candle(2, 3.0, true),
        ];
        let ordered = enforce_time_order(candles);
        assert_eq!(closes(&ordered), vec![1.0, 2.0, 3.0]);
    }
}
