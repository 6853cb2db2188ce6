//! Offline synthetic feed.
//!
//! Produces a seeded random walk of book snapshots plus occasional trade
//! prints for the current watchlist. Lets the whole paper pipeline run
//! end-to-end without live connectivity, and keeps integration tests
//! deterministic.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use prism_common::PriceLevel;
use prism_common::Side;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;

use super::{Feed, FeedError, TapeBody, TapeEvent};

/// Configuration for the synthetic feed.
#[derive(Debug, Clone)]
pub struct MockFeedConfig {
    /// Events per second across the watchlist.
    pub tick_hz: f64,
    pub seed: u64,
    /// Probability of a trade print following a book update.
    pub trade_prob: f64,
    /// Stop after this many events; `None` runs forever.
    pub max_events: Option<u64>,
}

impl Default for MockFeedConfig {
    fn default() -> Self {
        Self {
            tick_hz: 5.0,
            seed: 11,
            trade_prob: 0.3,
            max_events: None,
        }
    }
}

/// Seeded synthetic feed over the current watchlist.
pub struct MockFeed {
    config: MockFeedConfig,
    rng: StdRng,
    watchlist: Vec<String>,
    mids: HashMap<String, f64>,
    /// Trade queued behind the snapshot that produced it.
    pending: Option<TapeEvent>,
    emitted: u64,
    cursor: usize,
    shutdown: bool,
}

impl MockFeed {
    pub fn new(config: MockFeedConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            config,
            rng,
            watchlist: Vec::new(),
            mids: HashMap::new(),
            pending: None,
            emitted: 0,
            cursor: 0,
            shutdown: false,
        }
    }

    fn dec(v: f64) -> Decimal {
        Decimal::from_f64((v * 1000.0).round() / 1000.0).unwrap_or(Decimal::ZERO)
    }

    fn next_snapshot(&mut self, market_id: String) -> TapeEvent {
        let mid = *self
            .mids
            .entry(market_id.clone())
            .or_insert_with(|| 0.5 + self.rng.gen_range(-0.15..0.15));
        let mid = (mid + self.rng.gen_range(-0.01..0.01)).clamp(0.02, 0.98);
        self.mids.insert(market_id.clone(), mid);

        let spread = self.rng.gen_range(0.005..0.06);
        let best_bid = (mid - spread / 2.0).clamp(0.01, 0.99);
        let best_ask = (mid + spread / 2.0).clamp(0.01, 0.99);
        let bid_size = self.rng.gen_range(50.0f64..300.0).round();
        let ask_size = self.rng.gen_range(50.0f64..300.0).round();

        let now = Utc::now();
        let snapshot = TapeEvent {
            market_id: market_id.clone(),
            source_ts: now,
            local_ts: now,
            seq: None,
            body: TapeBody::BookSnapshot {
                bids: vec![
                    PriceLevel::new(Self::dec(best_bid), Self::dec(bid_size)),
                    PriceLevel::new(Self::dec(best_bid - 0.01), Self::dec(bid_size * 2.0)),
                ],
                asks: vec![
                    PriceLevel::new(Self::dec(best_ask), Self::dec(ask_size)),
                    PriceLevel::new(Self::dec(best_ask + 0.01), Self::dec(ask_size * 2.0)),
                ],
            },
        };

        if self.rng.gen_bool(self.config.trade_prob) {
            let side = if self.rng.gen_bool(0.5) { Side::Buy } else { Side::Sell };
            let px = if side == Side::Buy { best_ask } else { best_bid };
            let trade_ts = Utc::now();
            self.pending = Some(TapeEvent {
                market_id,
                source_ts: trade_ts,
                local_ts: trade_ts,
                seq: None,
                body: TapeBody::Trade {
                    price: Self::dec(px),
                    size: Self::dec(self.rng.gen_range(5.0f64..50.0).round()),
                    side,
                },
            });
        }

        snapshot
    }
}

#[async_trait]
impl Feed for MockFeed {
    async fn next_event(&mut self) -> Result<Option<TapeEvent>, FeedError> {
        if self.shutdown {
            return Ok(None);
        }
        if let Some(max) = self.config.max_events {
            if self.emitted >= max {
                return Ok(None);
            }
        }
        if let Some(trade) = self.pending.take() {
            self.emitted += 1;
            return Ok(Some(trade));
        }

        loop {
            if self.watchlist.is_empty() {
                tokio::time::sleep(Duration::from_millis(50)).await;
                if self.shutdown {
                    return Ok(None);
                }
                continue;
            }
            tokio::time::sleep(Duration::from_secs_f64(
                1.0 / self.config.tick_hz.max(1e-6),
            ))
            .await;

            let market_id = self.watchlist[self.cursor % self.watchlist.len()].clone();
            self.cursor = self.cursor.wrapping_add(1);
            let ev = self.next_snapshot(market_id);
            self.emitted += 1;
            return Ok(Some(ev));
        }
    }

    fn has_more(&self) -> bool {
        !self.shutdown && self.config.max_events.map_or(true, |m| self.emitted < m)
    }

    async fn set_watchlist(&mut self, market_ids: Vec<String>) {
        self.watchlist = market_ids;
        self.cursor = 0;
    }

    async fn shutdown(&mut self) {
        self.shutdown = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config(max_events: u64) -> MockFeedConfig {
        MockFeedConfig {
            tick_hz: 10_000.0,
            seed: 7,
            trade_prob: 0.5,
            max_events: Some(max_events),
        }
    }

    #[tokio::test]
    async fn test_mock_feed_produces_valid_books() {
        let mut feed = MockFeed::new(fast_config(50));
        feed.set_watchlist(vec!["m1".to_string(), "m2".to_string()]).await;

        let mut snapshots = 0;
        let mut trades = 0;
        while let Some(ev) = feed.next_event().await.unwrap() {
            match ev.body {
                TapeBody::BookSnapshot { ref bids, ref asks } => {
                    snapshots += 1;
                    assert!(bids[0].price < asks[0].price, "book must not cross");
                    assert!(bids[0].price > Decimal::ZERO);
                    assert!(asks[0].price < Decimal::ONE);
                }
                TapeBody::Trade { price, size, .. } => {
                    trades += 1;
                    assert!(price > Decimal::ZERO && price < Decimal::ONE);
                    assert!(size > Decimal::ZERO);
                }
                TapeBody::BookDelta { .. } => unreachable!("mock feed emits snapshots only"),
            }
        }
        assert!(snapshots > 0);
        assert!(trades > 0);
        assert_eq!(snapshots + trades, 50);
    }

    #[tokio::test]
    async fn test_mock_feed_is_deterministic_per_seed() {
        let run = |seed| async move {
            let mut config = fast_config(20);
            config.seed = seed;
            let mut feed = MockFeed::new(config);
            feed.set_watchlist(vec!["m1".to_string()]).await;
            let mut prices = Vec::new();
            while let Some(ev) = feed.next_event().await.unwrap() {
                if let TapeBody::BookSnapshot { bids, .. } = ev.body {
                    prices.push(bids[0].price);
                }
            }
            prices
        };
        let a = run(3).await;
        let b = run(3).await;
        let c = run(4).await;
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn test_mock_feed_shutdown_stops_stream() {
        let mut feed = MockFeed::new(fast_config(1_000));
        feed.set_watchlist(vec!["m1".to_string()]).await;
        feed.next_event().await.unwrap().unwrap();
        feed.shutdown().await;
        assert!(feed.next_event().await.unwrap().is_none());
        assert!(!feed.has_more());
    }
}
