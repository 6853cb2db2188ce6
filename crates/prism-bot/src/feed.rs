//! Feed abstraction for live, mock, and replay market data.
//!
//! Every implementation yields the same linearized stream of [`TapeEvent`]s:
//! book snapshots, book deltas, and trade prints, each stamped with both the
//! source timestamp and the local arrival timestamp. The same downstream
//! pipeline (scheduler -> strategies -> risk -> broker) runs against any of
//! them.
//!
//! Ordering is preserved per market; there is no cross-market guarantee.

pub mod live;
pub mod mock;
pub mod replay;

use std::collections::VecDeque;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use prism_common::{PriceLevel, Side};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during feed operations.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Stream ended")]
    StreamEnded,

    #[error("Shutdown requested")]
    Shutdown,
}

/// A single price-level change within a delta.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LevelChange {
    pub side: Side,
    pub price: Decimal,
    /// New size at this price; zero removes the level.
    pub size: Decimal,
}

/// Payload of a tape event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TapeBody {
    BookSnapshot {
        bids: Vec<PriceLevel>,
        asks: Vec<PriceLevel>,
    },
    BookDelta {
        changes: Vec<LevelChange>,
    },
    Trade {
        price: Decimal,
        size: Decimal,
        side: Side,
    },
}

impl TapeBody {
    /// Storage kind tag for the tape table.
    pub fn kind(&self) -> &'static str {
        match self {
            TapeBody::BookSnapshot { .. } => "snapshot",
            TapeBody::BookDelta { .. } => "delta",
            TapeBody::Trade { .. } => "trade",
        }
    }
}

/// A normalized market-data event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TapeEvent {
    pub market_id: String,
    /// Timestamp reported by the source.
    pub source_ts: DateTime<Utc>,
    /// Local arrival timestamp, stamped once at ingest.
    pub local_ts: DateTime<Utc>,
    /// Source sequence number, when the feed supplies one.
    pub seq: Option<u64>,
    pub body: TapeBody,
}

impl TapeEvent {
    /// Feed lag for this event in milliseconds (clamped at zero).
    pub fn lag_ms(&self) -> u64 {
        (self.local_ts - self.source_ts).num_milliseconds().max(0) as u64
    }

    pub fn is_trade(&self) -> bool {
        matches!(self.body, TapeBody::Trade { .. })
    }

    pub fn is_delta(&self) -> bool {
        matches!(self.body, TapeBody::BookDelta { .. })
    }
}

impl std::fmt::Display for TapeEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.body {
            TapeBody::BookSnapshot { bids, asks } => write!(
                f,
                "Snapshot({} {}x{})",
                self.market_id,
                bids.len(),
                asks.len()
            ),
            TapeBody::BookDelta { changes } => {
                write!(f, "Delta({} {} changes)", self.market_id, changes.len())
            }
            TapeBody::Trade { price, size, side } => {
                write!(f, "Trade({} {} {} @ {})", self.market_id, side, size, price)
            }
        }
    }
}

/// Feed trait: a restartable, lazily-consumed stream of tape events.
#[async_trait]
pub trait Feed: Send {
    /// Receive the next event. Returns `None` when the source is exhausted
    /// (replay completed) or shutdown was requested.
    async fn next_event(&mut self) -> Result<Option<TapeEvent>, FeedError>;

    /// Returns true if the feed may still produce events.
    fn has_more(&self) -> bool;

    /// Update the subscription set. Live feeds (re)subscribe; replay and
    /// mock feeds use it to scope generation.
    async fn set_watchlist(&mut self, market_ids: Vec<String>);

    /// Shut the feed down gracefully.
    async fn shutdown(&mut self);
}

#[async_trait]
impl Feed for Box<dyn Feed + Send> {
    async fn next_event(&mut self) -> Result<Option<TapeEvent>, FeedError> {
        (**self).next_event().await
    }

    fn has_more(&self) -> bool {
        (**self).has_more()
    }

    async fn set_watchlist(&mut self, market_ids: Vec<String>) {
        (**self).set_watchlist(market_ids).await
    }

    async fn shutdown(&mut self) {
        (**self).shutdown().await
    }
}

/// Rolling feed-lag window; p99 over the last 100 events per market.
#[derive(Debug, Clone, Default)]
pub struct LagWindow {
    samples: VecDeque<u64>,
}

impl LagWindow {
    const CAPACITY: usize = 100;

    pub fn record(&mut self, lag_ms: u64) {
        if self.samples.len() == Self::CAPACITY {
            self.samples.pop_front();
        }
        self.samples.push_back(lag_ms);
    }

    /// p99 over the current window; zero until any sample arrives.
    pub fn p99_ms(&self) -> u64 {
        if self.samples.is_empty() {
            return 0;
        }
        let mut sorted: Vec<u64> = self.samples.iter().copied().collect();
        sorted.sort_unstable();
        let idx = ((sorted.len() as f64) * 0.99).ceil() as usize;
        sorted[idx.saturating_sub(1).min(sorted.len() - 1)]
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_tape_event_lag() {
        let source = Utc::now();
        let ev = TapeEvent {
            market_id: "m1".to_string(),
            source_ts: source,
            local_ts: source + chrono::Duration::milliseconds(42),
            seq: None,
            body: TapeBody::Trade {
                price: dec!(0.5),
                size: dec!(10),
                side: Side::Buy,
            },
        };
        assert_eq!(ev.lag_ms(), 42);
        assert!(ev.is_trade());
    }

    #[test]
    fn test_tape_event_lag_never_negative() {
        let source = Utc::now();
        let ev = TapeEvent {
            market_id: "m1".to_string(),
            source_ts: source,
            local_ts: source - chrono::Duration::milliseconds(5),
            seq: None,
            body: TapeBody::BookDelta { changes: vec![] },
        };
        assert_eq!(ev.lag_ms(), 0);
    }

    #[test]
    fn test_tape_body_round_trip() {
        let body = TapeBody::BookSnapshot {
            bids: vec![PriceLevel::new(dec!(0.49), dec!(100))],
            asks: vec![PriceLevel::new(dec!(0.51), dec!(100))],
        };
        let json = serde_json::to_string(&body).unwrap();
        let back: TapeBody = serde_json::from_str(&json).unwrap();
        assert_eq!(body, back);
        assert_eq!(body.kind(), "snapshot");
    }

    #[test]
    fn test_trade_body_round_trip() {
        let body = TapeBody::Trade {
            price: dec!(0.485),
            size: dec!(20),
            side: Side::Sell,
        };
        let json = serde_json::to_string(&body).unwrap();
        assert!(json.contains("\"kind\":\"trade\""));
        let back: TapeBody = serde_json::from_str(&json).unwrap();
        assert_eq!(body, back);
    }

    #[test]
    fn test_lag_window_p99() {
        let mut w = LagWindow::default();
        assert_eq!(w.p99_ms(), 0);

        for i in 1..=100u64 {
            w.record(i);
        }
        assert_eq!(w.len(), 100);
        assert_eq!(w.p99_ms(), 99);

        // Window slides: the next 100 large samples displace all small ones.
        for _ in 0..100 {
            w.record(500);
        }
        assert_eq!(w.p99_ms(), 500);
    }

    #[test]
    fn test_lag_window_single_sample() {
        let mut w = LagWindow::default();
        w.record(150);
        assert_eq!(w.p99_ms(), 150);
    }
}
