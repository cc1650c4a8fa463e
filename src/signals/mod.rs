// =============================================================================
// Signals Module
// =============================================================================
//
// Mean-reversion signal generation:
// - AR(1) fit of log-price (Ornstein–Uhlenbeck approximation)
// - Residual standardisation (whole-series or trailing)
// - Cooldown-gated buy/sell/hold assignment

pub mod ou;

pub use ou::{Ar1Fit, ResidualStats};
