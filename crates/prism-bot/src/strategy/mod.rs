//! Quoting strategies.
//!
//! Strategies are pure functions of a [`MarketView`] (book, portfolio
//! snapshot, open orders, fair value, clock): no strategy mutates anything,
//! they only emit [`QuoteIntent`]s. The scheduler throttles evaluation and
//! feeds every intent through the risk engine before the broker sees it.
//!
//! Dispatch is a closed tagged variant, not a trait object: there are exactly
//! two strategies and the scheduler matches on them.

pub mod fair_value;
pub mod fv;
pub mod market_maker;

use chrono::{DateTime, Utc};
use prism_common::Side;
use prism_market::BookState;
use rust_decimal::Decimal;

use crate::broker::{OpenOrderView, TimeInForce};
use crate::portfolio::PositionView;

pub use fair_value::FairValueStrategy;
pub use fv::{FvProvider, FvSample, MockFv};
pub use market_maker::MarketMakerStrategy;

/// Strategy tags recorded on orders.
pub const TAG_FAIR_VALUE: &str = "cross_venue_fv";
pub const TAG_MARKET_MAKER: &str = "market_making";
pub const TAG_UNWIND: &str = "risk_unwind";
pub const TAG_FLATTEN: &str = "risk_flatten";

/// An action a strategy wants taken on a market.
#[derive(Debug, Clone, PartialEq)]
pub enum QuoteIntent {
    Place {
        side: Side,
        price: Decimal,
        size: Decimal,
        tif: TimeInForce,
        reason: &'static str,
    },
    Cancel {
        order_id: String,
    },
    Replace {
        order_id: String,
        price: Decimal,
        size: Decimal,
    },
}

/// Everything a strategy may look at for one market, for one evaluation.
pub struct MarketView<'a> {
    pub market_id: &'a str,
    pub event_id: &'a str,
    pub tick_size: Decimal,
    pub min_size: Decimal,
    pub book: &'a BookState,
    pub position: PositionView,
    pub open_orders: &'a [OpenOrderView],
    pub fv: Option<FvSample>,
    /// False when the feed is lagging or the market is suspended; strategies
    /// must pull quotes rather than refresh them.
    pub feed_healthy: bool,
    pub now: DateTime<Utc>,
}

/// The closed set of strategies.
pub enum Strategy {
    FairValue(FairValueStrategy),
    MarketMaker(MarketMakerStrategy),
}

impl Strategy {
    pub fn name(&self) -> &'static str {
        match self {
            Strategy::FairValue(_) => TAG_FAIR_VALUE,
            Strategy::MarketMaker(_) => TAG_MARKET_MAKER,
        }
    }

    /// Evaluate one market. Pure: same view, same intents.
    pub fn evaluate(&self, view: &MarketView<'_>) -> Vec<QuoteIntent> {
        match self {
            Strategy::FairValue(s) => s.evaluate(view),
            Strategy::MarketMaker(s) => s.evaluate(view),
        }
    }

    /// The order tag this strategy owns; used to scope cancel/replace to its
    /// own quotes.
    pub fn owns_order(&self, order: &OpenOrderView) -> bool {
        order.reason.as_deref() == Some(self.name())
    }
}
