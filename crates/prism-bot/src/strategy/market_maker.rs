//! Inventory-aware market making.
//!
//! Maintains at most one bid and one ask per market. Quotes straddle the mid
//! with a half-spread floored by config, skewed away from current inventory
//! so fills mean-revert the position. Sizes shrink as the position approaches
//! the per-market cap; a side with no headroom is pulled (reduce-only in that
//! direction).

use prism_common::{clamp_price, round_down_to_tick, round_up_to_tick, Side};
use rust_decimal::Decimal;

use crate::broker::{OpenOrderView, TimeInForce};
use crate::config::MmConfig;

use super::{MarketView, QuoteIntent, TAG_MARKET_MAKER};

/// Desired one-sided quote.
#[derive(Debug, Clone, Copy, PartialEq)]
struct DesiredQuote {
    price: Decimal,
    size: Decimal,
}

pub struct MarketMakerStrategy {
    config: MmConfig,
    target_size: Decimal,
    max_position: Decimal,
}

impl MarketMakerStrategy {
    pub fn new(config: MmConfig, target_size: Decimal, max_position: Decimal) -> Self {
        Self {
            config,
            target_size,
            max_position: max_position.max(Decimal::ONE),
        }
    }

    pub fn evaluate(&self, view: &MarketView<'_>) -> Vec<QuoteIntent> {
        let mine: Vec<&OpenOrderView> = view
            .open_orders
            .iter()
            .filter(|o| o.reason.as_deref() == Some(TAG_MARKET_MAKER))
            .collect();

        // Crossed book, wide spread, or unhealthy feed: pull both sides.
        let pull_all = !view.feed_healthy
            || !view.book.is_quotable()
            || view
                .book
                .top_of_book()
                .spread()
                .map(|s| s > self.config.max_spread)
                .unwrap_or(true);
        if pull_all {
            return mine
                .iter()
                .map(|o| QuoteIntent::Cancel {
                    order_id: o.order_id.clone(),
                })
                .collect();
        }

        let tob = view.book.top_of_book();
        let (bid_touch, ask_touch) = match (tob.best_bid, tob.best_ask) {
            (Some(b), Some(a)) => (b.price, a.price),
            _ => unreachable!("quotable book has both sides"),
        };
        let mid = (bid_touch + ask_touch) / Decimal::TWO;
        let spread = ask_touch - bid_touch;
        let tick = view.tick_size;

        let half_spread = self
            .config
            .min_half_spread
            .max(spread / Decimal::TWO + self.config.edge_ticks * tick);
        let inv_frac = clamp_price(
            view.position.net_size / self.max_position,
            Decimal::NEGATIVE_ONE,
            Decimal::ONE,
        );
        let skew = -self.config.skew_k * inv_frac;

        let mut bid_px = round_down_to_tick(mid - half_spread + skew * tick, tick);
        let mut ask_px = round_up_to_tick(mid + half_spread + skew * tick, tick);
        bid_px = clamp_price(bid_px, tick, Decimal::ONE - tick);
        ask_px = clamp_price(ask_px, tick, Decimal::ONE - tick);

        let desired_bid = self.desired_for_side(Side::Buy, bid_px, view);
        let desired_ask = self.desired_for_side(Side::Sell, ask_px, view);

        // Degenerate grid (quotes met in the middle): stand down.
        if let (Some(b), Some(a)) = (&desired_bid, &desired_ask) {
            if b.price >= a.price {
                return mine
                    .iter()
                    .map(|o| QuoteIntent::Cancel {
                        order_id: o.order_id.clone(),
                    })
                    .collect();
            }
        }

        let mut intents = Vec::new();
        self.reconcile_side(Side::Buy, desired_bid, &mine, view, &mut intents);
        self.reconcile_side(Side::Sell, desired_ask, &mine, view, &mut intents);
        intents
    }

    /// Quote size for a side given position headroom; `None` means the side
    /// is reduce-only and must be cancelled.
    fn desired_for_side(
        &self,
        side: Side,
        price: Decimal,
        view: &MarketView<'_>,
    ) -> Option<DesiredQuote> {
        let net = view.position.net_size;
        let headroom = match side {
            Side::Buy => self.max_position - net,
            Side::Sell => self.max_position + net,
        };
        let size = self.target_size.min(headroom);
        if size < view.min_size || size <= Decimal::ZERO {
            return None;
        }
        Some(DesiredQuote { price, size })
    }

    /// Diff one side's desired quote against the existing order.
    fn reconcile_side(
        &self,
        side: Side,
        desired: Option<DesiredQuote>,
        mine: &[&OpenOrderView],
        view: &MarketView<'_>,
        intents: &mut Vec<QuoteIntent>,
    ) {
        let mut existing: Vec<&&OpenOrderView> =
            mine.iter().filter(|o| o.side == side).collect();
        // One quote per side: anything beyond the first is stale state.
        for extra in existing.iter().skip(1) {
            intents.push(QuoteIntent::Cancel {
                order_id: extra.order_id.clone(),
            });
        }
        let current = existing.drain(..).next();

        match (current, desired) {
            (None, Some(want)) => intents.push(QuoteIntent::Place {
                side,
                price: want.price,
                size: want.size,
                tif: TimeInForce::Gtc,
                reason: TAG_MARKET_MAKER,
            }),
            (Some(order), Some(want)) => {
                let drift = (order.price - want.price).abs();
                let drift_ticks = if view.tick_size > Decimal::ZERO {
                    drift / view.tick_size
                } else {
                    drift
                };
                let lived_min_life = order.rested_secs >= self.config.min_quote_life_secs;
                // Keep quotes inside the drift threshold, and never churn a
                // quote that has not lived its minimum life.
                if drift_ticks >= self.config.reprice_threshold && lived_min_life {
                    intents.push(QuoteIntent::Replace {
                        order_id: order.order_id.clone(),
                        price: want.price,
                        size: want.size,
                    });
                }
            }
            (Some(order), None) => intents.push(QuoteIntent::Cancel {
                order_id: order.order_id.clone(),
            }),
            (None, None) => {}
        }
    }
}
