// =============================================================================
// Broker Module
// =============================================================================
//
// Upstream candle source. Read-only; no order routing.

pub mod client;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use crate::error::PipelineError;
use crate::market_data::Candle;
use crate::types::Granularity;

pub use client::BrokerClient;

/// Anything that can supply complete, time-ordered candles for an instrument.
pub trait CandleSource: Send + Sync {
    fn fetch_candles<'a>(
        &'a self,
        instrument: &'a str,
        granularity: Granularity,
        count: u32,
    ) -> BoxFuture<'a, Result<Vec<Candle>, PipelineError>>;
}

impl CandleSource for BrokerClient {
    fn fetch_candles<'a>(
        &'a self,
        instrument: &'a str,
        granularity: Granularity,
        count: u32,
    ) -> BoxFuture<'a, Result<Vec<Candle>, PipelineError>> {
        self.get_candles(instrument, granularity, count).boxed()
    }
}
