// =============================================================================
// Ornstein–Uhlenbeck Mean-Reversion Signal
// =============================================================================
//
// The OU process is approximated by a first-order autoregression of log-price:
//
//   ln(close[t]) = alpha + beta * ln(close[t-1]) + e[t]
//
// Algorithm:
//   1. Fit alpha/beta by ordinary least squares over every row where both the
//      log-price and its lag are defined.
//   2. Residual e[t] = ln(close[t]) - (alpha + beta * ln(close[t-1])).
//   3. Standardise residuals into z-scores. The default standardisation uses
//      the mean and sample std of the WHOLE residual set, so early rows are
//      scored with information from later rows (look-ahead). This makes the
//      generator a batch/offline tool. A trailing window gives a causal score.
//   4. Fold over rows in time order, emitting buy/sell when |z| exceeds the
//      threshold with confirming momentum and the previous non-hold signal is
//      more than `cooldown` rows back.

use serde::Serialize;
use tracing::trace;

use crate::error::PipelineError;
use crate::types::Signal;

/// Coefficients of the AR(1) fit on log-price.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Ar1Fit {
    pub alpha: f64,
    pub beta: f64,
    /// Rows used for the fit.
    pub observations: usize,
}

/// Mean and sample standard deviation used to standardise residuals.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ResidualStats {
    pub mean: f64,
    pub std_dev: f64,
}

/// Natural log of each close. Non-positive or non-finite closes are undefined.
pub fn log_prices(closes: &[f64]) -> Vec<Option<f64>> {
    closes
        .iter()
        .map(|&c| {
            if c > 0.0 && c.is_finite() {
                Some(c.ln())
            } else {
                None
            }
        })
        .collect()
}

/// One-step lag: entry `i` holds `values[i - 1]`, entry 0 is undefined.
pub fn lagged(values: &[Option<f64>]) -> Vec<Option<f64>> {
    std::iter::once(None)
        .chain(values.iter().copied())
        .take(values.len())
        .collect()
}

/// Ordinary least-squares fit of `y` on `x` over rows where both are defined.
///
/// Fails with [`PipelineError::RegressionDegenerate`] when fewer than 2 rows
/// are usable or the regressor has no variance.
pub fn fit_ar1(y: &[Option<f64>], x: &[Option<f64>]) -> Result<Ar1Fit, PipelineError> {
    let pairs: Vec<(f64, f64)> = x
        .iter()
        .zip(y.iter())
        .filter_map(|(&x, &y)| Some((x?, y?)))
        .collect();

    let n = pairs.len();
    if n < 2 {
        return Err(PipelineError::RegressionDegenerate { valid_rows: n });
    }

    let x_mean = pairs.iter().map(|p| p.0).sum::<f64>() / n as f64;
    let y_mean = pairs.iter().map(|p| p.1).sum::<f64>() / n as f64;

    let mut sxy = 0.0_f64;
    let mut sxx = 0.0_f64;
    for &(x, y) in &pairs {
        let dx = x - x_mean;
        sxy += dx * (y - y_mean);
        sxx += dx * dx;
    }

    if sxx.abs() < f64::EPSILON || !sxx.is_finite() {
        trace!(observations = n, "AR(1): zero variance in lagged log-price");
        return Err(PipelineError::RegressionDegenerate { valid_rows: n });
    }

    let beta = sxy / sxx;
    let alpha = y_mean - beta * x_mean;

    trace!(alpha, beta, observations = n, "AR(1) fit computed");

    Ok(Ar1Fit {
        alpha,
        beta,
        observations: n,
    })
}

/// Per-row residual of the fit; undefined where either input is undefined.
pub fn residuals(y: &[Option<f64>], x: &[Option<f64>], fit: &Ar1Fit) -> Vec<Option<f64>> {
    y.iter()
        .zip(x.iter())
        .map(|(&y, &x)| Some(y? - (fit.alpha + fit.beta * x?)))
        .collect()
}

/// Sample mean/std of a set of values. `None` if fewer than 2 values or the
/// spread is zero.
fn sample_stats(values: impl Iterator<Item = f64> + Clone) -> Option<ResidualStats> {
    let n = values.clone().count();
    if n < 2 {
        return None;
    }
    let mean = values.clone().sum::<f64>() / n as f64;
    let variance = values.map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
    let std_dev = variance.sqrt();

    if std_dev.is_finite() && std_dev > f64::EPSILON {
        Some(ResidualStats { mean, std_dev })
    } else {
        None
    }
}

/// Standardise against the whole residual set (look-ahead).
///
/// Returns the z-scores and the statistics used; every score is undefined when
/// the residuals have zero variance.
pub fn zscores_full_sample(residuals: &[Option<f64>]) -> (Vec<Option<f64>>, Option<ResidualStats>) {
    let stats = sample_stats(residuals.iter().flatten().copied());
    let scores = residuals
        .iter()
        .map(|&r| {
            let s = stats?;
            Some((r? - s.mean) / s.std_dev)
        })
        .collect();
    (scores, stats)
}

/// Standardise each residual against the `window` residuals ending at its row.
///
/// A score is defined only when every residual in the window is defined.
pub fn zscores_trailing(residuals: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    (0..residuals.len())
        .map(|i| {
            if window < 2 || i + 1 < window {
                return None;
            }
            let slice = &residuals[i + 1 - window..=i];
            if slice.iter().any(Option::is_none) {
                return None;
            }
            let stats = sample_stats(slice.iter().flatten().copied())?;
            Some((residuals[i]? - stats.mean) / stats.std_dev)
        })
        .collect()
}

/// Assign buy/sell/hold per row.
///
/// `last_signal_idx` starts at `-cooldown` and is carried through the scan as
/// the fold accumulator; it only moves forward when a non-hold signal fires.
pub fn assign_signals(
    zscores: &[Option<f64>],
    momentum: &[Option<f64>],
    z_thresh: f64,
    cooldown: usize,
) -> Vec<Signal> {
    let cooldown = cooldown as i64;

    zscores
        .iter()
        .zip(momentum.iter())
        .enumerate()
        .scan(-cooldown, |last_signal_idx, (i, (&z, &m))| {
            let i = i as i64;
            let signal = match (z, m) {
                (Some(z), Some(m)) if i - *last_signal_idx > cooldown => {
                    if z < -z_thresh && m > 0.0 {
                        Signal::Buy
                    } else if z > z_thresh && m < 0.0 {
                        Signal::Sell
                    } else {
                        Signal::Hold
                    }
                }
                _ => Signal::Hold,
            };
            if signal.is_action() {
                *last_signal_idx = i;
            }
            Some(signal)
        })
        .collect()
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lag_shifts_by_one() {
        let v = vec![Some(1.0), Some(2.0), None, Some(4.0)];
        assert_eq!(lagged(&v), vec![None, Some(1.0), Some(2.0), None]);
        assert!(lagged(&[]).is_empty());
    }

    #[test]
    fn log_prices_reject_non_positive() {
        let logs = log_prices(&[1.0, 0.0, -3.0, std::f64::consts::E]);
        assert_eq!(logs[0], Some(0.0));
        assert_eq!(logs[1], None);
        assert_eq!(logs[2], None);
        assert!((logs[3].unwrap() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn fit_recovers_exact_linear_relation() {
        // y = 0.5 + 0.8 x exactly.
        let x: Vec<Option<f64>> = (0..10).map(|i| Some(i as f64)).collect();
        let y: Vec<Option<f64>> = x.iter().map(|v| v.map(|v| 0.5 + 0.8 * v)).collect();
        let fit = fit_ar1(&y, &x).unwrap();
        assert!((fit.alpha - 0.5).abs() < 1e-12);
        assert!((fit.beta - 0.8).abs() < 1e-12);
        assert_eq!(fit.observations, 10);
        assert!(residuals(&y, &x, &fit)
            .iter()
            .all(|r| r.unwrap().abs() < 1e-12));
    }

    #[test]
    fn fit_degenerate_on_too_few_rows() {
        let y = vec![Some(1.0), None];
        let x = vec![None, Some(1.0)];
        assert_eq!(
            fit_ar1(&y, &x),
            Err(PipelineError::RegressionDegenerate { valid_rows: 0 })
        );
    }

    #[test]
    fn fit_degenerate_on_constant_regressor() {
        let x = vec![Some(2.0); 5];
        let y = vec![Some(1.0), Some(2.0), Some(3.0), Some(4.0), Some(5.0)];
        assert!(matches!(
            fit_ar1(&y, &x),
            Err(PipelineError::RegressionDegenerate { valid_rows: 5 })
        ));
    }

    #[test]
    fn full_sample_zscores_are_standardised() {
        let r = vec![None, Some(1.0), Some(2.0), Some(3.0)];
        let (z, stats) = zscores_full_sample(&r);
        let stats = stats.unwrap();
        assert!((stats.mean - 2.0).abs() < 1e-12);
        assert!((stats.std_dev - 1.0).abs() < 1e-12);
        assert_eq!(z, vec![None, Some(-1.0), Some(0.0), Some(1.0)]);
    }

    #[test]
    fn zero_variance_residuals_leave_scores_undefined() {
        let r = vec![Some(0.25); 6];
        let (z, stats) = zscores_full_sample(&r);
        assert!(stats.is_none());
        assert!(z.iter().all(Option::is_none));
    }

    #[test]
    fn trailing_zscores_only_use_past_rows() {
        let r: Vec<Option<f64>> = vec![None, Some(1.0), Some(2.0), Some(3.0), Some(100.0)];
        let z = zscores_trailing(&r, 3);
        assert_eq!(z[..3], [None, None, None]);
        // Window [1, 2, 3]: mean 2, std 1.
        assert!((z[3].unwrap() - 1.0).abs() < 1e-12);
        // Changing a later row cannot change an earlier score.
        let mut r2 = r.clone();
        r2[4] = Some(-50.0);
        assert_eq!(zscores_trailing(&r2, 3)[3], z[3]);
    }

    #[test]
    fn cooldown_blocks_signals_within_window() {
        let z = vec![Some(-2.0); 40];
        let m = vec![Some(1.0); 40];
        let signals = assign_signals(&z, &m, 1.2, 15);
        let fired: Vec<usize> = signals
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_action())
            .map(|(i, _)| i)
            .collect();
        // Initial last index is -15, so row 0 is exactly at the cooldown edge.
        assert_eq!(fired, vec![1, 17, 33]);
        assert!(fired.windows(2).all(|w| w[1] - w[0] > 15));
    }

    #[test]
    fn sell_requires_negative_momentum() {
        let z = vec![None, Some(2.0), Some(2.0), Some(0.5)];
        let m = vec![None, Some(1.0), Some(-1.0), Some(-1.0)];
        let signals = assign_signals(&z, &m, 1.2, 0);
        assert_eq!(
            signals,
            vec![Signal::Hold, Signal::Hold, Signal::Sell, Signal::Hold]
        );
    }

    #[test]
    fn threshold_is_honoured() {
        let z = vec![Some(-1.5)];
        let m = vec![Some(1.0)];
        // With no cooldown the initial last index is 0, so row 0 never fires.
        assert_eq!(assign_signals(&z, &m, 1.2, 0), vec![Signal::Hold]);

        let z = vec![None, Some(-1.5)];
        let m = vec![None, Some(1.0)];
        assert_eq!(assign_signals(&z, &m, 1.2, 0)[1], Signal::Buy);
        assert_eq!(assign_signals(&z, &m, 2.0, 0)[1], Signal::Hold);
    }
}
