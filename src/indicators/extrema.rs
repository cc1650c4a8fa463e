// =============================================================================
// Local Extrema — Support / Resistance markers
// =============================================================================
//
// A row is support when its close is <= every close within `order` rows on
// either side, and resistance when it is >= every such close. The window is
// clipped at the series edges, so edge rows compare against the rows that do
// exist. Plateaus mark every tied index; a flat stretch is both.
//
// Sliding minima/maxima are maintained with a monotonic deque, so the scan is
// O(n) regardless of `order`.

use std::collections::VecDeque;

/// Support/resistance flags for one row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtremaFlags {
    pub support: bool,
    pub resistance: bool,
}

/// Mark local minima (support) and maxima (resistance) over `±order` rows.
pub fn local_extrema(closes: &[f64], order: usize) -> Vec<ExtremaFlags> {
    let minima = centred_window_extreme(closes, order, |kept, new| kept < new);
    let maxima = centred_window_extreme(closes, order, |kept, new| kept > new);

    closes
        .iter()
        .zip(minima.iter().zip(maxima.iter()))
        .map(|(&c, (&lo, &hi))| ExtremaFlags {
            support: c <= lo,
            resistance: c >= hi,
        })
        .collect()
}

/// Extreme value of `values[i - order ..= i + order]` (clipped) for every `i`.
///
/// `dominates(kept, new)` returns true when an older candidate still beats a
/// newer one and must stay in the deque.
fn centred_window_extreme(
    values: &[f64],
    order: usize,
    dominates: fn(f64, f64) -> bool,
) -> Vec<f64> {
    let n = values.len();
    let mut out = Vec::with_capacity(n);
    let mut deque: VecDeque<usize> = VecDeque::new();
    let mut next = 0;

    for i in 0..n {
        let hi = (i + order).min(n - 1);
        while next <= hi {
            while let Some(&back) = deque.back() {
                if dominates(values[back], values[next]) {
                    break;
                }
                deque.pop_back();
            }
            deque.push_back(next);
            next += 1;
        }

        let lo = i.saturating_sub(order);
        while let Some(&front) = deque.front() {
            if front >= lo {
                break;
            }
            deque.pop_front();
        }

        match deque.front() {
            Some(&idx) => out.push(values[idx]),
            None => out.push(values[i]),
        }
    }

    out
}
