//! Order book state management.
//!
//! Maintains in-memory book state from snapshot and delta updates. Levels are
//! kept in `BTreeMap`s so best bid/ask lookups never need a sort.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone, Utc};
use prism_common::{pricing, PriceLevel, Side, TopOfBook};
use rust_decimal::Decimal;

/// Result of applying an update to the book.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookApply {
    /// Update applied cleanly.
    Applied,
    /// Delta ignored: its sequence number does not follow the last applied
    /// one. The caller must force a snapshot resync.
    SequenceGap { expected: u64, got: u64 },
    /// Update applied but left the book crossed; quoting must stop until a
    /// fresh snapshot repairs it.
    Crossed,
}

/// In-memory order book for a single market.
#[derive(Debug, Clone, Default)]
pub struct BookState {
    /// Market ID this book belongs to.
    pub market_id: String,
    /// Bid levels (price -> size); iterate in reverse for best-first.
    bids: BTreeMap<Decimal, Decimal>,
    /// Ask levels (price -> size); iterate forward for best-first.
    asks: BTreeMap<Decimal, Decimal>,
    /// Last trade seen on this market.
    pub last_trade: Option<(Decimal, Decimal, Side, DateTime<Utc>)>,
    /// Source timestamp of the last update.
    pub last_update_ts: Option<DateTime<Utc>>,
    /// Sequence number of the last applied update, when the feed supplies one.
    pub seq: Option<u64>,
    /// Set when an update left the book crossed; cleared by the next snapshot.
    pub crossed: bool,
    /// True until the first snapshot arrives (deltas are refused before it,
    /// and again after a reconnect until the feed re-seeds the book).
    pub awaiting_snapshot: bool,
    /// Updates applied since the counter was last drained by the selector.
    pub updates_since_poll: u64,
}

impl BookState {
    pub fn new(market_id: String) -> Self {
        Self {
            market_id,
            awaiting_snapshot: true,
            ..Default::default()
        }
    }

    /// Replace the whole book from a snapshot. Always re-enables the market:
    /// a snapshot supersedes any gap or crossed state.
    pub fn apply_snapshot(
        &mut self,
        bids: &[PriceLevel],
        asks: &[PriceLevel],
        source_ts: DateTime<Utc>,
        seq: Option<u64>,
    ) -> BookApply {
        self.bids.clear();
        self.asks.clear();
        for l in bids {
            if l.size > Decimal::ZERO {
                self.bids.insert(l.price, l.size);
            }
        }
        for l in asks {
            if l.size > Decimal::ZERO {
                self.asks.insert(l.price, l.size);
            }
        }
        self.last_update_ts = Some(source_ts);
        self.seq = seq;
        self.awaiting_snapshot = false;
        self.updates_since_poll += 1;
        self.crossed = self.is_crossed();
        if self.crossed {
            BookApply::Crossed
        } else {
            BookApply::Applied
        }
    }

    /// Apply a delta (size 0 removes the level).
    ///
    /// Deltas are refused while waiting for a snapshot, and when the feed
    /// supplies sequence numbers that do not advance by exactly one.
    pub fn apply_delta(
        &mut self,
        side: Side,
        price: Decimal,
        size: Decimal,
        source_ts: DateTime<Utc>,
        seq: Option<u64>,
    ) -> BookApply {
        if self.awaiting_snapshot {
            return BookApply::SequenceGap {
                expected: self.seq.map(|s| s + 1).unwrap_or(0),
                got: seq.unwrap_or(0),
            };
        }
        if let (Some(last), Some(got)) = (self.seq, seq) {
            if got != last + 1 {
                self.awaiting_snapshot = true;
                return BookApply::SequenceGap {
                    expected: last + 1,
                    got,
                };
            }
        }

        let levels = match side {
            Side::Buy => &mut self.bids,
            Side::Sell => &mut self.asks,
        };
        if size <= Decimal::ZERO {
            levels.remove(&price);
        } else {
            levels.insert(price, size);
        }

        self.last_update_ts = Some(source_ts);
        if seq.is_some() {
            self.seq = seq;
        }
        self.updates_since_poll += 1;
        self.crossed = self.is_crossed();
        if self.crossed {
            BookApply::Crossed
        } else {
            BookApply::Applied
        }
    }

    /// Record a trade print.
    pub fn apply_trade(&mut self, price: Decimal, size: Decimal, side: Side, ts: DateTime<Utc>) {
        self.last_trade = Some((price, size, side, ts));
        self.last_update_ts = Some(ts);
        self.updates_since_poll += 1;
    }

    /// Best bid level, if any.
    pub fn best_bid(&self) -> Option<PriceLevel> {
        self.bids
            .iter()
            .next_back()
            .map(|(p, s)| PriceLevel::new(*p, *s))
    }

    /// Best ask level, if any.
    pub fn best_ask(&self) -> Option<PriceLevel> {
        self.asks.iter().next().map(|(p, s)| PriceLevel::new(*p, *s))
    }

    /// Top-of-book view stamped with the last source timestamp.
    pub fn top_of_book(&self) -> TopOfBook {
        TopOfBook {
            best_bid: self.best_bid(),
            best_ask: self.best_ask(),
            source_ts: self
                .last_update_ts
                .unwrap_or_else(|| Utc.timestamp_opt(0, 0).unwrap()),
        }
    }

    /// Mid price.
    pub fn mid(&self) -> Option<Decimal> {
        self.top_of_book().mid()
    }

    /// Spread in basis points of mid, zero when one-sided.
    pub fn spread_bps(&self) -> Decimal {
        match (self.best_bid(), self.best_ask()) {
            (Some(b), Some(a)) => pricing::spread_bps(b.price, a.price),
            _ => Decimal::ZERO,
        }
    }

    /// True when best bid >= best ask.
    pub fn is_crossed(&self) -> bool {
        matches!(
            (self.best_bid(), self.best_ask()),
            (Some(b), Some(a)) if b.price >= a.price
        )
    }

    /// A market is quotable once it has a clean two-sided book.
    pub fn is_quotable(&self) -> bool {
        !self.awaiting_snapshot
            && !self.crossed
            && self.best_bid().is_some()
            && self.best_ask().is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }

    /// Total size over the top `levels` bid levels.
    pub fn bid_depth(&self, levels: usize) -> Decimal {
        self.bids.iter().rev().take(levels).map(|(_, s)| *s).sum()
    }

    /// Total size over the top `levels` ask levels.
    pub fn ask_depth(&self, levels: usize) -> Decimal {
        self.asks.iter().take(levels).map(|(_, s)| *s).sum()
    }

    /// Drain the update counter; the selector reads this once per tick to
    /// derive updates-per-minute.
    pub fn take_update_count(&mut self) -> u64 {
        std::mem::take(&mut self.updates_since_poll)
    }

    /// Mark the book as needing a snapshot (reconnect or forced resync).
    /// Deltas are discarded until the next snapshot applies.
    pub fn invalidate(&mut self) {
        self.awaiting_snapshot = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn snap(book: &mut BookState, bid: Decimal, ask: Decimal) -> BookApply {
        book.apply_snapshot(
            &[PriceLevel::new(bid, dec!(100))],
            &[PriceLevel::new(ask, dec!(100))],
            Utc::now(),
            Some(1),
        )
    }

    #[test]
    fn test_snapshot_then_best_levels() {
        let mut book = BookState::new("m1".to_string());
        assert!(book.awaiting_snapshot);

        let r = book.apply_snapshot(
            &[
                PriceLevel::new(dec!(0.45), dec!(100)),
                PriceLevel::new(dec!(0.44), dec!(200)),
            ],
            &[
                PriceLevel::new(dec!(0.55), dec!(150)),
                PriceLevel::new(dec!(0.56), dec!(250)),
            ],
            Utc::now(),
            Some(1),
        );
        assert_eq!(r, BookApply::Applied);
        assert!(book.is_quotable());

        let bid = book.best_bid().unwrap();
        assert_eq!(bid.price, dec!(0.45));
        assert_eq!(bid.size, dec!(100));
        let ask = book.best_ask().unwrap();
        assert_eq!(ask.price, dec!(0.55));
        assert_eq!(ask.size, dec!(150));
        assert_eq!(book.mid(), Some(dec!(0.50)));
    }

    #[test]
    fn test_delta_before_snapshot_is_refused() {
        let mut book = BookState::new("m1".to_string());
        let r = book.apply_delta(Side::Buy, dec!(0.45), dec!(10), Utc::now(), Some(2));
        assert!(matches!(r, BookApply::SequenceGap { .. }));
        assert!(book.is_empty());
    }

    #[test]
    fn test_delta_updates_and_removes_levels() {
        let mut book = BookState::new("m1".to_string());
        snap(&mut book, dec!(0.45), dec!(0.55));

        let r = book.apply_delta(Side::Buy, dec!(0.45), dec!(150), Utc::now(), Some(2));
        assert_eq!(r, BookApply::Applied);
        assert_eq!(book.best_bid().unwrap().size, dec!(150));

        let r = book.apply_delta(Side::Buy, dec!(0.45), dec!(0), Utc::now(), Some(3));
        assert_eq!(r, BookApply::Applied);
        assert!(book.best_bid().is_none());
    }

    #[test]
    fn test_sequence_gap_forces_resync() {
        let mut book = BookState::new("m1".to_string());
        snap(&mut book, dec!(0.45), dec!(0.55));

        let r = book.apply_delta(Side::Buy, dec!(0.46), dec!(10), Utc::now(), Some(5));
        assert_eq!(r, BookApply::SequenceGap { expected: 2, got: 5 });
        assert!(book.awaiting_snapshot);
        assert!(!book.is_quotable());

        // A later delta is still refused until a snapshot lands.
        let r = book.apply_delta(Side::Buy, dec!(0.46), dec!(10), Utc::now(), Some(6));
        assert!(matches!(r, BookApply::SequenceGap { .. }));

        // Snapshot repairs everything.
        let r = snap(&mut book, dec!(0.46), dec!(0.54));
        assert_eq!(r, BookApply::Applied);
        assert!(book.is_quotable());
    }

    #[test]
    fn test_unsequenced_deltas_are_accepted() {
        let mut book = BookState::new("m1".to_string());
        book.apply_snapshot(
            &[PriceLevel::new(dec!(0.45), dec!(100))],
            &[PriceLevel::new(dec!(0.55), dec!(100))],
            Utc::now(),
            None,
        );
        let r = book.apply_delta(Side::Sell, dec!(0.54), dec!(20), Utc::now(), None);
        assert_eq!(r, BookApply::Applied);
        assert_eq!(book.best_ask().unwrap().price, dec!(0.54));
    }

    #[test]
    fn test_crossed_book_detected_and_repaired() {
        let mut book = BookState::new("m1".to_string());
        snap(&mut book, dec!(0.45), dec!(0.55));

        let r = book.apply_delta(Side::Buy, dec!(0.56), dec!(10), Utc::now(), Some(2));
        assert_eq!(r, BookApply::Crossed);
        assert!(book.crossed);
        assert!(!book.is_quotable());

        let r = snap(&mut book, dec!(0.45), dec!(0.55));
        assert_eq!(r, BookApply::Applied);
        assert!(!book.crossed);
        assert!(book.is_quotable());
    }

    #[test]
    fn test_spread_bps_and_depth() {
        let mut book = BookState::new("m1".to_string());
        book.apply_snapshot(
            &[
                PriceLevel::new(dec!(0.48), dec!(100)),
                PriceLevel::new(dec!(0.47), dec!(200)),
            ],
            &[
                PriceLevel::new(dec!(0.52), dec!(150)),
                PriceLevel::new(dec!(0.53), dec!(250)),
            ],
            Utc::now(),
            None,
        );
        assert_eq!(book.spread_bps(), dec!(800));
        assert_eq!(book.bid_depth(1), dec!(100));
        assert_eq!(book.bid_depth(2), dec!(300));
        assert_eq!(book.ask_depth(2), dec!(400));
    }

    #[test]
    fn test_update_counter_drain() {
        let mut book = BookState::new("m1".to_string());
        snap(&mut book, dec!(0.45), dec!(0.55));
        book.apply_trade(dec!(0.50), dec!(5), Side::Buy, Utc::now());
        assert_eq!(book.take_update_count(), 2);
        assert_eq!(book.take_update_count(), 0);
    }
}
