// =============================================================================
// Pipeline error taxonomy
// =============================================================================
//
// Every failure is local to a single recomputation cycle. Only `DataFetch`
// reaches the consumer; the windowed and regression variants are absorbed by
// the pipeline and surface as undefined values or an all-hold series.

use serde::Serialize;
use thiserror::Error;

/// All errors generated while fetching and annotating a candle series.
#[derive(Debug, Clone, PartialEq, Serialize, Error)]
pub enum PipelineError {
    #[error("candle fetch failed: {0}")]
    DataFetch(String),

    #[error("insufficient data: {available} rows available, {required} required")]
    InsufficientData { required: usize, available: usize },

    #[error("autoregression fit is degenerate with {valid_rows} valid rows")]
    RegressionDegenerate { valid_rows: usize },

    #[error("unknown instrument: {0}")]
    UnknownInstrument(String),

    #[error("unknown granularity: {0}")]
    UnknownGranularity(String),
}

impl PipelineError {
    /// Errors that stem from caller-supplied parameters rather than data.
    pub fn is_invalid_param(&self) -> bool {
        matches!(
            self,
            Self::UnknownInstrument(_) | Self::UnknownGranularity(_)
        )
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(value: reqwest::Error) -> Self {
        Self::DataFetch(value.to_string())
    }
}
