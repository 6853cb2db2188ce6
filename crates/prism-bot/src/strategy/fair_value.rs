//! Cross-venue fair value.
//!
//! Trades the gap between an external fair value and the book mid. Entries
//! are marketable limits at the opposing touch, taken only when the touch has
//! enough depth to absorb the clip; exits fire when the edge has converged or
//! the position has outlived its time stop. A stale fair value means no
//! trading at all.

use chrono::Duration;
use prism_common::{bps_to_decimal, clamp_price, Side};
use rust_decimal::Decimal;

use crate::broker::TimeInForce;
use crate::config::FvConfig;

use super::{MarketView, QuoteIntent, TAG_FAIR_VALUE};

pub struct FairValueStrategy {
    config: FvConfig,
    target_size: Decimal,
}

impl FairValueStrategy {
    pub fn new(config: FvConfig, target_size: Decimal) -> Self {
        Self {
            config,
            target_size,
        }
    }

    /// Conservative fair after fee/slippage/latency buffers: buys justify
    /// less, sells justify more.
    fn buffered_fair(&self, fair: Decimal, side: Side) -> Decimal {
        let buf = bps_to_decimal(
            self.config.fees_bps + self.config.slippage_bps + self.config.latency_bps,
        );
        let shifted = match side {
            Side::Buy => fair - buf,
            Side::Sell => fair + buf,
        };
        clamp_price(shifted, Decimal::ZERO, Decimal::ONE)
    }

    pub fn evaluate(&self, view: &MarketView<'_>) -> Vec<QuoteIntent> {
        if !view.feed_healthy || !view.book.is_quotable() {
            return Vec::new();
        }
        let tob = view.book.top_of_book();
        let (bid, ask) = match (tob.best_bid, tob.best_ask) {
            (Some(b), Some(a)) => (b, a),
            _ => return Vec::new(),
        };
        let mid = (bid.price + ask.price) / Decimal::TWO;
        let net = view.position.net_size;

        // Time stop applies whether or not the fair value is fresh.
        if !net.is_zero() && view.position.opened_age_secs >= self.config.time_stop_secs as i64 {
            return vec![self.flatten_intent(net, bid.price, ask.price)];
        }

        let sample = match view.fv {
            Some(s) => s,
            None => return Vec::new(),
        };
        let age = view.now - sample.ts;
        if age > Duration::from_std(self.config.max_staleness).unwrap_or(Duration::seconds(2)) {
            return Vec::new();
        }

        // Exit when the edge against our mark has converged.
        if !net.is_zero() {
            let mark = mid;
            if (sample.fair - mark).abs() < self.config.exit_edge {
                return vec![self.flatten_intent(net, bid.price, ask.price)];
            }
        }

        let required_depth = self.target_size * self.config.depth_mult;

        // Cheap vs fair: lift the ask.
        let buy_edge = self.buffered_fair(sample.fair, Side::Buy) - mid;
        if buy_edge > self.config.entry_edge
            && ask.size >= required_depth
            && net < self.target_size
        {
            return vec![QuoteIntent::Place {
                side: Side::Buy,
                price: ask.price,
                size: self.target_size,
                tif: TimeInForce::Ioc,
                reason: TAG_FAIR_VALUE,
            }];
        }

        // Rich vs fair: hit the bid.
        let sell_edge = mid - self.buffered_fair(sample.fair, Side::Sell);
        if sell_edge > self.config.entry_edge
            && bid.size >= required_depth
            && net > -self.target_size
        {
            return vec![QuoteIntent::Place {
                side: Side::Sell,
                price: bid.price,
                size: self.target_size,
                tif: TimeInForce::Ioc,
                reason: TAG_FAIR_VALUE,
            }];
        }

        Vec::new()
    }

    fn flatten_intent(&self, net: Decimal, best_bid: Decimal, best_ask: Decimal) -> QuoteIntent {
        if net > Decimal::ZERO {
            QuoteIntent::Place {
                side: Side::Sell,
                price: best_bid,
                size: net,
                tif: TimeInForce::Ioc,
                reason: TAG_FAIR_VALUE,
            }
        } else {
            QuoteIntent::Place {
                side: Side::Buy,
                price: best_ask,
                size: net.abs(),
                tif: TimeInForce::Ioc,
                reason: TAG_FAIR_VALUE,
            }
        }
    }
}
