//! Market discovery via the metadata (Gamma-style) API.
//!
//! Fetches active markets and resolves the loose upstream schema into
//! [`MarketMeta`]. Eligibility scoring and watchlist ranking live in the
//! engine's selector; this module only produces clean metadata.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::types::RawMarket;

/// Default tick size when the API does not supply one. Most binary markets
/// trade in mills.
pub fn default_tick_size() -> Decimal {
    Decimal::new(1, 3) // 0.001
}

/// Default minimum order size when the API does not supply one.
pub fn default_min_size() -> Decimal {
    Decimal::from(5)
}

/// Errors that can occur during market discovery.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("metadata API returned status {0}")]
    Status(reqwest::StatusCode),

    #[error("unexpected response schema: {0}")]
    Schema(String),
}

/// Resolved market metadata.
///
/// Immutable once observed; the selector re-fetches rather than mutating.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketMeta {
    pub market_id: String,
    /// Event grouping ID for aggregate exposure; falls back to a synthetic
    /// `event:<market_id>` when the API omits it.
    pub event_id: String,
    pub question: String,
    pub active: bool,
    pub end_ts: Option<DateTime<Utc>>,
    pub tick_size: Decimal,
    pub min_size: Decimal,
    pub volume_24h_usd: Decimal,
    pub liquidity_usd: Decimal,
}

/// Configuration for the metadata client.
#[derive(Debug, Clone)]
pub struct MetadataClientConfig {
    pub base_url: String,
    pub request_timeout: Duration,
    /// Page size for the markets listing.
    pub fetch_limit: usize,
}

impl Default for MetadataClientConfig {
    fn default() -> Self {
        Self {
            base_url: "https://gamma-api.polymarket.com".to_string(),
            request_timeout: Duration::from_secs(10),
            fetch_limit: 500,
        }
    }
}

/// HTTP client for the metadata API.
pub struct MetadataClient {
    http: Client,
    config: MetadataClientConfig,
}

impl MetadataClient {
    pub fn new(config: MetadataClientConfig) -> Self {
        let http = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { http, config }
    }

    /// Fetch active, open markets.
    pub async fn fetch_markets(&self) -> Result<Vec<MarketMeta>, DiscoveryError> {
        let url = format!("{}/markets", self.config.base_url.trim_end_matches('/'));
        let response = self
            .http
            .get(&url)
            .query(&[
                ("active", "true"),
                ("closed", "false"),
                ("limit", &self.config.fetch_limit.to_string()),
                ("offset", "0"),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(DiscoveryError::Status(response.status()));
        }

        let raw: Vec<RawMarket> = response
            .json()
            .await
            .map_err(|e| DiscoveryError::Schema(e.to_string()))?;

        let mut markets = Vec::with_capacity(raw.len());
        for m in raw {
            match resolve_market(m) {
                Some(meta) => markets.push(meta),
                None => continue,
            }
        }

        info!(count = markets.len(), "market discovery fetched");
        Ok(markets)
    }
}

/// Resolve a raw API row into `MarketMeta`. Rows without a usable ID are
/// skipped (the upstream list routinely contains placeholder entries).
pub fn resolve_market(m: RawMarket) -> Option<MarketMeta> {
    let market_id = m
        .id
        .or(m.condition_id)
        .filter(|s| !s.trim().is_empty())?;

    let event_id = m
        .events
        .as_ref()
        .and_then(|evs| evs.first())
        .and_then(|e| e.id.clone())
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| format!("event:{}", market_id));

    let closed = m.closed.unwrap_or(false);
    let active = m.active.unwrap_or(true) && !closed;

    let end_ts = m
        .end_date
        .as_deref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc));

    let volume_24h_usd = m
        .volume24hr
        .as_ref()
        .and_then(value_to_decimal)
        .or_else(|| m.volume.as_ref().and_then(value_to_decimal))
        .unwrap_or(Decimal::ZERO);

    let liquidity_usd = m
        .liquidity
        .as_ref()
        .and_then(value_to_decimal)
        .or_else(|| m.liquidity_num.as_ref().and_then(value_to_decimal))
        .unwrap_or(Decimal::ZERO);

    let tick_size = m
        .order_price_min_tick_size
        .as_ref()
        .and_then(value_to_decimal)
        .filter(|t| *t > Decimal::ZERO)
        .unwrap_or_else(default_tick_size);

    let min_size = m
        .order_min_size
        .as_ref()
        .and_then(value_to_decimal)
        .filter(|s| *s > Decimal::ZERO)
        .unwrap_or_else(default_min_size);

    Some(MarketMeta {
        market_id,
        event_id,
        question: m.question.unwrap_or_default(),
        active,
        end_ts,
        tick_size,
        min_size,
        volume_24h_usd,
        liquidity_usd,
    })
}

/// The API ships numerics as numbers or strings depending on endpoint age.
fn value_to_decimal(v: &Value) -> Option<Decimal> {
    match v {
        Value::Number(n) => n.to_string().parse().ok(),
        Value::String(s) if !s.trim().is_empty() => s.trim().parse().ok(),
        _ => {
            if !v.is_null() {
                warn!(value = %v, "unparseable numeric in market metadata");
            }
            None
        }
    }
}
