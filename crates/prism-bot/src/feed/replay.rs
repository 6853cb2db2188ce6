//! Tape replay feed for backtesting.
//!
//! Reads persisted tape rows in `local_ts` order and re-emits them, paced at
//! `BACKTEST_SPEED` times wall-clock (0 = as fast as possible), optionally
//! bounded to a timestamp window. Downstream components see exactly the
//! stream a live run saw.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::storage::{SqliteStore, TapeRow};

use super::{Feed, FeedError, TapeBody, TapeEvent};

pub struct TapeReplayFeed {
    events: Vec<TapeEvent>,
    position: usize,
    speed: f64,
    shutdown: bool,
}

impl TapeReplayFeed {
    /// Load the tape (bounded by `[start_ts, end_ts]` epoch seconds) from
    /// storage.
    pub async fn load(
        store: Arc<SqliteStore>,
        start_ts: Option<f64>,
        end_ts: Option<f64>,
        speed: f64,
    ) -> Result<Self, FeedError> {
        let rows = store
            .load_tape(start_ts, end_ts)
            .await
            .map_err(|e| FeedError::Storage(e.to_string()))?;

        let mut events = Vec::with_capacity(rows.len());
        let mut malformed = 0usize;
        for row in rows {
            match Self::row_to_event(&row) {
                Some(ev) => events.push(ev),
                None => malformed += 1,
            }
        }
        if malformed > 0 {
            warn!(malformed, "skipped malformed tape rows");
        }
        info!(events = events.len(), speed, "tape loaded for replay");

        Ok(Self {
            events,
            position: 0,
            speed,
            shutdown: false,
        })
    }

    /// Build directly from events (tests).
    pub fn from_events(events: Vec<TapeEvent>, speed: f64) -> Self {
        Self {
            events,
            position: 0,
            speed,
            shutdown: false,
        }
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    fn row_to_event(row: &TapeRow) -> Option<TapeEvent> {
        let body: TapeBody = serde_json::from_str(&row.payload).ok()?;
        Some(TapeEvent {
            market_id: row.market_id.clone(),
            source_ts: row.source_ts,
            local_ts: row.local_ts,
            seq: None,
            body,
        })
    }
}

#[async_trait]
impl Feed for TapeReplayFeed {
    async fn next_event(&mut self) -> Result<Option<TapeEvent>, FeedError> {
        if self.shutdown || self.position >= self.events.len() {
            return Ok(None);
        }

        let event = self.events[self.position].clone();

        // Pace by the recorded inter-event gap.
        if self.speed > 0.0 && self.position > 0 {
            let prev = &self.events[self.position - 1];
            let gap_ms = (event.local_ts - prev.local_ts).num_milliseconds();
            if gap_ms > 0 {
                let sleep_ms = (gap_ms as f64 / self.speed) as u64;
                if sleep_ms > 0 {
                    tokio::time::sleep(std::time::Duration::from_millis(sleep_ms)).await;
                }
            }
        }

        self.position += 1;
        Ok(Some(event))
    }

    fn has_more(&self) -> bool {
        !self.shutdown && self.position < self.events.len()
    }

    async fn set_watchlist(&mut self, _market_ids: Vec<String>) {
        // Replay trades whatever appears on the tape.
    }

    async fn shutdown(&mut self) {
        self.shutdown = true;
        self.position = self.events.len();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use prism_common::{PriceLevel, Side};
    use rust_decimal_macros::dec;

    fn event(market_id: &str, offset_ms: i64) -> TapeEvent {
        let ts = Utc::now() + chrono::Duration::milliseconds(offset_ms);
        TapeEvent {
            market_id: market_id.to_string(),
            source_ts: ts,
            local_ts: ts,
            seq: None,
            body: TapeBody::Trade {
                price: dec!(0.5),
                size: dec!(10),
                side: Side::Buy,
            },
        }
    }

    #[tokio::test]
    async fn test_replay_in_order_then_eof() {
        let mut feed =
            TapeReplayFeed::from_events(vec![event("m1", 0), event("m2", 10), event("m1", 20)], 0.0);
        assert_eq!(feed.event_count(), 3);

        let a = feed.next_event().await.unwrap().unwrap();
        let b = feed.next_event().await.unwrap().unwrap();
        let c = feed.next_event().await.unwrap().unwrap();
        assert_eq!(a.market_id, "m1");
        assert_eq!(b.market_id, "m2");
        assert_eq!(c.market_id, "m1");
        assert!(a.local_ts <= b.local_ts && b.local_ts <= c.local_ts);

        assert!(feed.next_event().await.unwrap().is_none());
        assert!(!feed.has_more());
    }

    #[tokio::test]
    async fn test_replay_round_trip_through_store() {
        let store = Arc::new(SqliteStore::open(":memory:").await.unwrap());
        let original = vec![event("m1", 0), event("m1", 50)];
        for ev in &original {
            store.insert_tape(ev).await.unwrap();
        }

        let mut feed = TapeReplayFeed::load(store, None, None, 0.0).await.unwrap();
        let mut replayed = Vec::new();
        while let Some(ev) = feed.next_event().await.unwrap() {
            replayed.push(ev);
        }
        assert_eq!(replayed.len(), 2);
        assert_eq!(replayed[0].body, original[0].body);
        assert_eq!(replayed[1].body, original[1].body);
    }

    #[tokio::test]
    async fn test_replay_window_bounds() {
        let store = Arc::new(SqliteStore::open(":memory:").await.unwrap());
        let base = Utc::now();
        for i in 0..5 {
            let mut ev = event("m1", 0);
            ev.local_ts = base + chrono::Duration::seconds(i);
            ev.source_ts = ev.local_ts;
            store.insert_tape(&ev).await.unwrap();
        }
        let start = (base + chrono::Duration::seconds(1)).timestamp_micros() as f64 / 1e6;
        let end = (base + chrono::Duration::seconds(3)).timestamp_micros() as f64 / 1e6;

        let feed = TapeReplayFeed::load(store, Some(start), Some(end), 0.0)
            .await
            .unwrap();
        assert_eq!(feed.event_count(), 3);
    }

    #[tokio::test]
    async fn test_shutdown_mid_replay() {
        let mut feed = TapeReplayFeed::from_events(vec![event("m1", 0), event("m1", 10)], 0.0);
        feed.next_event().await.unwrap().unwrap();
        feed.shutdown().await;
        assert!(feed.next_event().await.unwrap().is_none());
    }
}
