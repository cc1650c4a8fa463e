// =============================================================================
// Broker REST Client — read-only candle retrieval
// =============================================================================
//
// SECURITY: The API token is never logged or serialized. It is sent as a
// Bearer header on every request.
// =============================================================================

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use crate::error::PipelineError;
use crate::market_data::candle::{enforce_time_order, retain_complete};
use crate::market_data::Candle;
use crate::types::Granularity;

/// Practice (paper) endpoint used when no base URL is configured.
pub const DEFAULT_BASE_URL: &str = "https://api-fxpractice.oanda.com";

/// Upper bound the provider accepts for `count`.
pub const MAX_CANDLE_COUNT: u32 = 5000;

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CandlesResponse {
    #[serde(default)]
    candles: Vec<RawCandle>,
}

#[derive(Debug, Deserialize)]
struct RawCandle {
    time: DateTime<Utc>,
    complete: bool,
    #[serde(default)]
    volume: u64,
    mid: Option<MidQuote>,
}

/// Mid-price quote; the provider encodes prices as decimal strings.
#[derive(Debug, Deserialize)]
struct MidQuote {
    o: String,
    h: String,
    l: String,
    c: String,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Broker REST API client for historical candles.
#[derive(Clone)]
pub struct BrokerClient {
    base_url: String,
    client: reqwest::Client,
}

impl BrokerClient {
    /// Create a new `BrokerClient`.
    ///
    /// # Arguments
    /// * `api_token` — Bearer token (sent as a header, never in query params).
    /// * `base_url`  — REST root, e.g. [`DEFAULT_BASE_URL`].
    pub fn new(api_token: impl AsRef<str>, base_url: impl Into<String>) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();

        let mut default_headers = HeaderMap::new();
        if !api_token.as_ref().is_empty() {
            let mut val = HeaderValue::from_str(&format!("Bearer {}", api_token.as_ref()))
                .context("broker API token contains invalid header characters")?;
            val.set_sensitive(true);
            default_headers.insert(AUTHORIZATION, val);
        } else {
            warn!("broker API token is empty; candle requests will likely be rejected");
        }

        let client = reqwest::Client::builder()
            .default_headers(default_headers)
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("failed to build reqwest client")?;

        debug!(base_url = %base_url, "BrokerClient initialised");

        Ok(Self { base_url, client })
    }

    fn candles_url(&self, instrument: &str, granularity: Granularity, count: u32) -> String {
        format!(
            "{}/v3/instruments/{}/candles?granularity={}&count={}&price=M",
            self.base_url,
            instrument,
            granularity.code(),
            count.clamp(1, MAX_CANDLE_COUNT)
        )
    }

    /// GET /v3/instruments/{instrument}/candles (mid prices).
    ///
    /// Only complete candles are returned, oldest first.
    #[instrument(skip(self), name = "broker::get_candles")]
    pub async fn get_candles(
        &self,
        instrument: &str,
        granularity: Granularity,
        count: u32,
    ) -> Result<Vec<Candle>, PipelineError> {
        let url = self.candles_url(instrument, granularity, count);

        let resp = self.client.get(&url).send().await?;

        let status = resp.status();
        let body = resp.text().await?;

        if !status.is_success() {
            return Err(PipelineError::DataFetch(format!(
                "GET candles for {instrument} returned {status}: {body}"
            )));
        }

        let candles = parse_candles(&body)?;
        debug!(instrument, granularity = %granularity, count = candles.len(), "candles fetched");
        Ok(candles)
    }
}

/// Parse a candles response body into complete, time-ordered candles.
fn parse_candles(body: &str) -> Result<Vec<Candle>, PipelineError> {
    let parsed: CandlesResponse = serde_json::from_str(body)
        .map_err(|e| PipelineError::DataFetch(format!("malformed candles response: {e}")))?;

    let mut candles = Vec::with_capacity(parsed.candles.len());
    for raw in parsed.candles {
        let Some(mid) = raw.mid else {
            warn!(time = %raw.time, "skipping candle without mid quote");
            continue;
        };
        candles.push(Candle::new(
            raw.time,
            parse_price(&mid.o, "mid.o")?,
            parse_price(&mid.h, "mid.h")?,
            parse_price(&mid.l, "mid.l")?,
            parse_price(&mid.c, "mid.c")?,
            raw.volume,
            raw.complete,
        ));
    }

    Ok(enforce_time_order(retain_complete(candles)))
}

fn parse_price(val: &str, name: &str) -> Result<f64, PipelineError> {
    let price = val
        .parse::<f64>()
        .map_err(|_| PipelineError::DataFetch(format!("failed to parse {name} as f64: {val}")))?;
    if !price.is_finite() {
        return Err(PipelineError::DataFetch(format!("non-finite {name}: {val}")));
    }
    Ok(price)
}

impl std::fmt::Debug for BrokerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerClient")
            .field("api_token", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "instrument": "EUR_USD",
        "granularity": "M5",
        "candles": [
            { "complete": true, "volume": 120, "time": "2024-03-01T10:00:00.000000000Z",
              "mid": { "o": "1.08010", "h": "1.08050", "l": "1.07990", "c": "1.08040" } },
            { "complete": true, "volume": 98, "time": "2024-03-01T10:05:00.000000000Z",
              "mid": { "o": "1.08040", "h": "1.08060", "l": "1.08000", "c": "1.08020" } },
            { "complete": false, "volume": 12, "time": "2024-03-01T10:10:00.000000000Z",
              "mid": { "o": "1.08020", "h": "1.08030", "l": "1.08015", "c": "1.08025" } }
        ]
    }"#;

    #[test]
    fn parse_keeps_only_complete_candles() {
        let candles = parse_candles(SAMPLE).expect("should parse");
        assert_eq!(candles.len(), 2);
        assert!((candles[0].close - 1.0804).abs() < 1e-12);
        assert_eq!(candles[1].volume, 98);
        assert!(candles[0].time < candles[1].time);
    }

    #[test]
    fn parse_rejects_bad_price() {
        let body = r#"{ "candles": [ { "complete": true, "volume": 1,
            "time": "2024-03-01T10:00:00Z", "mid": { "o": "x", "h": "1", "l": "1", "c": "1" } } ] }"#;
        assert!(matches!(parse_candles(body), Err(PipelineError::DataFetch(_))));
    }

    #[test]
    fn parse_rejects_non_finite_prices() {
        for bad in ["NaN", "inf", "-infinity"] {
            let body = format!(
                r#"{{ "candles": [ {{ "complete": true, "volume": 1,
                "time": "2024-03-01T10:00:00Z", "mid": {{ "o": "1", "h": "1", "l": "1", "c": "{bad}" }} }} ] }}"#
            );
            assert!(
                matches!(parse_candles(&body), Err(PipelineError::DataFetch(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn parse_rejects_non_json() {
        assert!(matches!(
            parse_candles("<html>bad gateway</html>"),
            Err(PipelineError::DataFetch(_))
        ));
    }

    #[test]
    fn url_clamps_count_and_uses_mid_prices() {
        let client = BrokerClient::new("token", "https://example.test/").unwrap();
        let url = client.candles_url("EUR_USD", Granularity::H1, 10_000);
        assert_eq!(
            url,
            "https://example.test/v3/instruments/EUR_USD/candles?granularity=H1&count=5000&price=M"
        );
    }

    #[test]
    fn debug_redacts_token() {
        let client = BrokerClient::new("super-secret", DEFAULT_BASE_URL).unwrap();
        let dbg = format!("{client:?}");
        assert!(!dbg.contains("super-secret"));
    }
}
