// =============================================================================
// Price Momentum
// =============================================================================
//
// Absolute price change over a look-back of `lag` rows:
//   momentum[i] = close[i] - close[i - lag]
//
// Positive momentum indicates upward movement; negative indicates downward.

/// Calculate momentum for every close, aligned with the input.
///
/// The first `lag` entries are `None`.
pub fn calculate_momentum(closes: &[f64], lag: usize) -> Vec<Option<f64>> {
    (0..closes.len())
        .map(|i| {
            if lag == 0 || i < lag {
                None
            } else {
                Some(closes[i] - closes[i - lag])
            }
        })
        .collect()
}
