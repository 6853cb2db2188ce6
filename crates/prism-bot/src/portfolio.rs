//! Portfolio: the single authoritative position state.
//!
//! Only the scheduler mutates this, via [`Portfolio::apply_fill`]. Strategies
//! read a cheap [`PositionView`] snapshot. Realized PnL is booked when a fill
//! reduces an existing position; fees are booked against realized on every
//! fill.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;

use crate::broker::Fill;

/// Position in a single market.
#[derive(Debug, Clone)]
pub struct Position {
    pub market_id: String,
    pub event_id: String,
    /// Signed net size; negative = short.
    pub net_size: Decimal,
    /// Size-weighted average price of the currently-held lot; zero when flat.
    pub avg_price: Decimal,
    pub realized_pnl: Decimal,
    /// Last mark used for unrealized PnL; zero until first marked.
    pub last_mark: Decimal,
    /// When the current lot was opened; cleared on flat, reset on flip.
    pub opened_ts: Option<DateTime<Utc>>,
}

impl Position {
    fn new(market_id: String, event_id: String) -> Self {
        Self {
            market_id,
            event_id,
            net_size: Decimal::ZERO,
            avg_price: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            last_mark: Decimal::ZERO,
            opened_ts: None,
        }
    }

    pub fn is_open(&self) -> bool {
        !self.net_size.is_zero()
    }

    /// Unrealized PnL against a mark price; also records the mark.
    pub fn mark_to_market(&mut self, mark: Decimal) -> Decimal {
        self.last_mark = mark;
        (mark - self.avg_price) * self.net_size
    }

    /// Unrealized PnL against the last recorded mark (avg price until marked).
    pub fn unrealized(&self) -> Decimal {
        let mark = if self.last_mark > Decimal::ZERO {
            self.last_mark
        } else {
            self.avg_price
        };
        (mark - self.avg_price) * self.net_size
    }

    /// Age of the current lot in seconds.
    pub fn age_secs(&self, now: DateTime<Utc>) -> i64 {
        match self.opened_ts {
            Some(ts) => (now - ts).num_seconds().max(0),
            None => 0,
        }
    }
}

/// Cheap read-only snapshot handed to strategies.
#[derive(Debug, Clone, Copy, Default)]
pub struct PositionView {
    pub net_size: Decimal,
    pub avg_price: Decimal,
    pub opened_age_secs: i64,
}

/// All positions plus daily loss accumulators.
#[derive(Debug)]
pub struct Portfolio {
    pub positions: HashMap<String, Position>,
    /// UTC day the daily accumulators cover.
    day: NaiveDate,
    realized_today: Decimal,
}

impl Portfolio {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            positions: HashMap::new(),
            day: now.date_naive(),
            realized_today: Decimal::ZERO,
        }
    }

    /// Restore a position from storage (restart rehydration).
    pub fn restore(&mut self, position: Position) {
        self.positions.insert(position.market_id.clone(), position);
    }

    /// Apply a fill and return the realized-PnL delta it booked
    /// (fees included, so the delta is negative for a pure open).
    pub fn apply_fill(&mut self, fill: &Fill, event_id: &str) -> Decimal {
        self.roll_day(fill.ts);

        let p = self
            .positions
            .entry(fill.market_id.clone())
            .or_insert_with(|| Position::new(fill.market_id.clone(), event_id.to_string()));
        // Keep event_id fresh in case the market was discovered late.
        p.event_id = event_id.to_string();

        let signed = fill.size * fill.side.sign();
        let old_size = p.net_size;
        let new_size = old_size + signed;
        let mut realized_delta = -fill.fees;

        let same_direction = old_size.is_zero()
            || (old_size > Decimal::ZERO && signed > Decimal::ZERO)
            || (old_size < Decimal::ZERO && signed < Decimal::ZERO);

        if same_direction {
            // Opening or adding: size-weighted average.
            let notional = old_size.abs() * p.avg_price + signed.abs() * fill.price;
            p.net_size = new_size;
            p.avg_price = if new_size.is_zero() {
                Decimal::ZERO
            } else {
                notional / new_size.abs()
            };
            if old_size.is_zero() && !new_size.is_zero() {
                p.opened_ts = Some(fill.ts);
            }
        } else {
            // Reducing or flipping: realize on the closed portion.
            let closed = old_size.abs().min(signed.abs());
            let per_unit = if old_size > Decimal::ZERO {
                fill.price - p.avg_price
            } else {
                p.avg_price - fill.price
            };
            realized_delta += per_unit * closed;

            p.net_size = new_size;
            if new_size.is_zero() {
                p.avg_price = Decimal::ZERO;
                p.opened_ts = None;
            } else if (old_size > Decimal::ZERO) != (new_size > Decimal::ZERO) {
                // Crossed through zero: remaining portion is a new lot.
                p.avg_price = fill.price;
                p.opened_ts = Some(fill.ts);
            }
        }

        p.realized_pnl += realized_delta;
        self.realized_today += realized_delta;
        realized_delta
    }

    /// Reset daily accumulators when the UTC day rolls over.
    pub fn roll_day(&mut self, now: DateTime<Utc>) {
        let today = now.date_naive();
        if today != self.day {
            self.day = today;
            self.realized_today = Decimal::ZERO;
        }
    }

    pub fn get(&self, market_id: &str) -> Option<&Position> {
        self.positions.get(market_id)
    }

    pub fn view(&self, market_id: &str, now: DateTime<Utc>) -> PositionView {
        match self.positions.get(market_id) {
            Some(p) => PositionView {
                net_size: p.net_size,
                avg_price: p.avg_price,
                opened_age_secs: p.age_secs(now),
            },
            None => PositionView::default(),
        }
    }

    pub fn total_realized(&self) -> Decimal {
        self.positions.values().map(|p| p.realized_pnl).sum()
    }

    pub fn realized_today(&self) -> Decimal {
        self.realized_today
    }

    pub fn total_unrealized(&self) -> Decimal {
        self.positions.values().map(|p| p.unrealized()).sum()
    }

    pub fn open_positions_count(&self) -> usize {
        self.positions.values().filter(|p| p.is_open()).count()
    }

    /// Sum of |net_size * mark| over markets sharing this event.
    pub fn event_exposure(&self, event_id: &str) -> Decimal {
        self.positions
            .values()
            .filter(|p| p.event_id == event_id)
            .map(|p| {
                let mark = if p.last_mark > Decimal::ZERO {
                    p.last_mark
                } else {
                    p.avg_price
                };
                p.net_size.abs() * mark.min(Decimal::ONE).max(Decimal::ZERO)
            })
            .sum()
    }

    /// Open positions ordered oldest-first, for the unwind pass.
    pub fn open_positions_by_age(&self) -> Vec<&Position> {
        let mut open: Vec<&Position> = self.positions.values().filter(|p| p.is_open()).collect();
        open.sort_by_key(|p| p.opened_ts);
        open
    }
}
