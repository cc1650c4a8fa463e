// =============================================================================
// Bollinger Bands
// =============================================================================
//
// Bollinger Bands consist of a middle band (SMA), an upper band (SMA + k*σ),
// and a lower band (SMA - k*σ), evaluated over a trailing window ending at
// every row.
//
// σ is the sample standard deviation (n - 1 denominator), so a window of
// length 1 has no defined band.

use serde::Serialize;

/// Bands for one row.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BollingerResult {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
    pub std_dev: f64,
}

/// Calculate Bollinger Bands over the whole of `window`.
///
/// Returns `None` when the window holds fewer than 2 points or the result is
/// not finite.
pub fn calculate_bollinger(window: &[f64], num_std: f64) -> Option<BollingerResult> {
    let n = window.len();
    if n < 2 {
        return None;
    }

    let middle = window.iter().sum::<f64>() / n as f64;
    let variance = window.iter().map(|x| (x - middle).powi(2)).sum::<f64>() / (n - 1) as f64;
    let std_dev = variance.sqrt();

    let upper = middle + num_std * std_dev;
    let lower = middle - num_std * std_dev;

    if upper.is_finite() && lower.is_finite() {
        Some(BollingerResult {
            upper,
            middle,
            lower,
            std_dev,
        })
    } else {
        None
    }
}

/// Rolling Bollinger Bands, one entry per close.
///
/// Entry `i` covers `closes[i + 1 - period ..= i]`; the first `period - 1`
/// entries are `None`.
pub fn rolling_bollinger(closes: &[f64], period: usize, num_std: f64) -> Vec<Option<BollingerResult>> {
    if period == 0 {
        return vec![None; closes.len()];
    }

    (0..closes.len())
        .map(|i| {
            if i + 1 < period {
                None
            } else {
                calculate_bollinger(&closes[i + 1 - period..=i], num_std)
            }
        })
        .collect()
}
