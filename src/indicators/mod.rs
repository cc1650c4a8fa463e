// =============================================================================
// Technical Indicators Module
// =============================================================================
//
// Pure, side-effect-free rolling indicators over a close-price series. Every
// function returns one entry per input row, with `None` (or unset flags) where
// the trailing window is not yet full.

pub mod bollinger;
pub mod extrema;
pub mod momentum;

pub use bollinger::rolling_bollinger;
pub use extrema::local_extrema;
pub use momentum::calculate_momentum;
