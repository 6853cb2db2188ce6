//! Paper broker: simulated order placement and fills against the live tape.
//!
//! Two fill models, selected by config:
//!
//! - **maker_touch** (default): a resting limit fills when the opposing best
//!   touch reaches it. Per-tick fill size is capped by the opposing top size
//!   times `PAPER_PARTICIPATION`.
//! - **trade_through** (stricter): a resting limit fills only when a trade
//!   print crosses its price; fill size is capped by the print size times
//!   `PAPER_PARTICIPATION`.
//!
//! Common rules: orders crossing the touch at placement fill immediately at
//! the touch (up to available top size, remainder rests for GTC or cancels
//! for IOC); fills pay `FEES_BPS`; resting fills wait out
//! `PAPER_MIN_REST_SECS`; cancellation is immediate and idempotent.
//!
//! In shadow mode the broker accepts intents and emits structured
//! would-place / would-cancel records, but never fills.
//!
//! Order and fill IDs are sequential so a backtest over the same tape
//! reproduces identical rows.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use prism_common::{bps_to_decimal, clamp_price, OrderStatus, Side, TopOfBook};
use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::config::{ExecutionMode, FillModel, PaperConfig};
use crate::storage::{StoreHandle, StoreMsg};

/// Time-in-force for the unfilled remainder of a marketable order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeInForce {
    /// Remainder rests on the book.
    Gtc,
    /// Remainder is cancelled.
    Ioc,
}

/// Request to place a simulated limit order.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub market_id: String,
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
    pub tif: TimeInForce,
    /// Strategy tag carried into the orders table.
    pub reason: Option<String>,
}

/// A simulated order.
#[derive(Debug, Clone)]
pub struct Order {
    pub order_id: String,
    pub market_id: String,
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
    pub status: OrderStatus,
    pub created_ts: DateTime<Utc>,
    pub rested_since_ts: DateTime<Utc>,
    pub filled_size: Decimal,
    pub avg_fill_price: Decimal,
    pub reason: Option<String>,
}

impl Order {
    pub fn remaining(&self) -> Decimal {
        self.size - self.filled_size
    }
}

/// A simulated fill. Append-only.
#[derive(Debug, Clone)]
pub struct Fill {
    pub fill_id: String,
    pub order_id: String,
    pub market_id: String,
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
    pub ts: DateTime<Utc>,
    pub fees: Decimal,
}

/// Read-only view of an open order, handed to strategies.
#[derive(Debug, Clone)]
pub struct OpenOrderView {
    pub order_id: String,
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
    pub rested_secs: f64,
    pub reason: Option<String>,
}

/// Paper broker. Owns the simulated open-order book; the scheduler is its
/// only caller.
pub struct PaperBroker {
    config: PaperConfig,
    shadow: bool,
    store: StoreHandle,
    /// market_id -> order_id -> order
    orders: HashMap<String, HashMap<String, Order>>,
    next_order_id: u64,
    next_fill_id: u64,
}

impl PaperBroker {
    pub fn new(config: PaperConfig, execution_mode: ExecutionMode, store: StoreHandle) -> Self {
        Self {
            config,
            shadow: execution_mode == ExecutionMode::Shadow,
            store,
            orders: HashMap::new(),
            next_order_id: 1,
            next_fill_id: 1,
        }
    }

    /// Restore open orders persisted by a previous run.
    pub fn restore_orders(&mut self, orders: Vec<Order>) {
        for order in orders {
            if order.status.is_live() {
                self.orders
                    .entry(order.market_id.clone())
                    .or_default()
                    .insert(order.order_id.clone(), order);
            }
        }
        // Keep ids ahead of anything restored.
        let max_seen = self
            .orders
            .values()
            .flat_map(|m| m.keys())
            .filter_map(|id| id.strip_prefix("paper-").and_then(|n| n.parse::<u64>().ok()))
            .max()
            .unwrap_or(0);
        self.next_order_id = self.next_order_id.max(max_seen + 1);
    }

    fn generate_order_id(&mut self) -> String {
        let id = format!("paper-{}", self.next_order_id);
        self.next_order_id += 1;
        id
    }

    fn generate_fill_id(&mut self) -> String {
        let id = format!("fill-{}", self.next_fill_id);
        self.next_fill_id += 1;
        id
    }

    /// Execution price with the slippage friction applied: buys pay more,
    /// sells receive less. Clamped to [0, 1].
    fn exec_price(&self, price: Decimal, side: Side) -> Decimal {
        let slip = price * bps_to_decimal(self.config.slippage_bps);
        let px = match side {
            Side::Buy => price + slip,
            Side::Sell => price - slip,
        };
        clamp_price(px, Decimal::ZERO, Decimal::ONE)
    }

    fn fees_for(&self, price: Decimal, size: Decimal) -> Decimal {
        price * size * bps_to_decimal(self.config.fees_bps)
    }

    fn rested_long_enough(&self, order: &Order, now: DateTime<Utc>) -> bool {
        let rest_ms = (now - order.rested_since_ts).num_milliseconds();
        rest_ms as f64 >= self.config.min_rest_secs * 1000.0
    }

    /// Book a fill against an order and persist both sides of the change.
    async fn book_fill(
        &mut self,
        market_id: &str,
        order_id: &str,
        price: Decimal,
        size: Decimal,
        now: DateTime<Utc>,
    ) -> Option<Fill> {
        if size <= Decimal::ZERO {
            return None;
        }
        let fill_id = self.generate_fill_id();
        let fees = self.fees_for(price, size);
        let order = self.orders.get_mut(market_id)?.get_mut(order_id)?;

        let filled_before = order.filled_size;
        order.avg_fill_price = if filled_before.is_zero() {
            price
        } else {
            (order.avg_fill_price * filled_before + price * size) / (filled_before + size)
        };
        order.filled_size += size;
        order.status = if order.filled_size >= order.size {
            OrderStatus::Filled
        } else {
            OrderStatus::Partial
        };

        let fill = Fill {
            fill_id,
            order_id: order.order_id.clone(),
            market_id: order.market_id.clone(),
            side: order.side,
            price,
            size,
            ts: now,
            fees,
        };

        info!(
            fill_id = %fill.fill_id,
            order_id = %fill.order_id,
            market_id = %fill.market_id,
            side = %fill.side,
            price = %fill.price,
            size = %fill.size,
            fees = %fill.fees,
            "paper fill"
        );

        let status = order.status;
        let filled_size = order.filled_size;
        let avg_fill_price = order.avg_fill_price;
        self.store.record(StoreMsg::Fill(fill.clone())).await;
        self.store
            .record(StoreMsg::OrderStatus {
                order_id: order_id.to_string(),
                status,
                filled_size,
                avg_fill_price,
            })
            .await;
        Some(fill)
    }

    /// Place a limit order. Marketable orders fill immediately at the touch;
    /// the remainder rests (GTC) or cancels (IOC).
    pub async fn place_limit(
        &mut self,
        req: OrderRequest,
        tob: Option<&TopOfBook>,
        now: DateTime<Utc>,
    ) -> (Order, Vec<Fill>) {
        let order_id = self.generate_order_id();
        let mut order = Order {
            order_id: order_id.clone(),
            market_id: req.market_id.clone(),
            side: req.side,
            price: req.price,
            size: req.size,
            status: OrderStatus::Open,
            created_ts: now,
            rested_since_ts: now,
            filled_size: Decimal::ZERO,
            avg_fill_price: Decimal::ZERO,
            reason: req.reason.clone(),
        };

        if self.shadow {
            info!(
                order_id = %order_id,
                market_id = %req.market_id,
                side = %req.side,
                price = %req.price,
                size = %req.size,
                reason = req.reason.as_deref().unwrap_or(""),
                "shadow: would place"
            );
            self.store.record(StoreMsg::Order(order.clone())).await;
            return (order, Vec::new());
        }

        info!(
            order_id = %order_id,
            market_id = %req.market_id,
            side = %req.side,
            price = %req.price,
            size = %req.size,
            reason = req.reason.as_deref().unwrap_or(""),
            "paper order placed"
        );

        self.orders
            .entry(req.market_id.clone())
            .or_default()
            .insert(order_id.clone(), order.clone());
        self.store.record(StoreMsg::Order(order.clone())).await;

        // Marketable at placement: take the touch immediately.
        let mut fills = Vec::new();
        if let Some(tob) = tob {
            let touch = match req.side {
                Side::Buy => tob.best_ask.filter(|a| req.price >= a.price),
                Side::Sell => tob.best_bid.filter(|b| req.price <= b.price),
            };
            if let Some(level) = touch {
                let size = req.size.min(level.size);
                let price = self.exec_price(level.price, req.side);
                if let Some(fill) = self
                    .book_fill(&req.market_id, &order_id, price, size, now)
                    .await
                {
                    fills.push(fill);
                }
                // IOC: cancel whatever the touch could not absorb.
                let still_live = self
                    .get_order(&req.market_id, &order_id)
                    .map(|o| o.status.is_live())
                    .unwrap_or(false);
                if req.tif == TimeInForce::Ioc && still_live {
                    self.cancel(&order_id).await;
                }
            } else if req.tif == TimeInForce::Ioc {
                self.cancel(&order_id).await;
            }
        }

        let order_now = self
            .get_order(&req.market_id, &order_id)
            .cloned()
            .unwrap_or(order.clone());
        order = order_now;
        (order, fills)
    }

    /// Cancel an order. Immediate and idempotent; double-cancel is a no-op.
    pub async fn cancel(&mut self, order_id: &str) {
        if self.shadow {
            info!(order_id = %order_id, "shadow: would cancel");
            return;
        }
        for orders in self.orders.values_mut() {
            if let Some(order) = orders.get_mut(order_id) {
                if !order.status.is_live() {
                    return;
                }
                order.status = OrderStatus::Cancelled;
                let (filled_size, avg_fill_price) = (order.filled_size, order.avg_fill_price);
                info!(order_id = %order_id, "paper order cancelled");
                self.store
                    .record(StoreMsg::OrderStatus {
                        order_id: order_id.to_string(),
                        status: OrderStatus::Cancelled,
                        filled_size,
                        avg_fill_price,
                    })
                    .await;
                return;
            }
        }
        debug!(order_id = %order_id, "cancel for unknown order ignored");
    }

    /// Cancel every live order in a market.
    pub async fn cancel_all_market(&mut self, market_id: &str) {
        let ids: Vec<String> = self
            .orders
            .get(market_id)
            .map(|m| {
                m.values()
                    .filter(|o| o.status.is_live())
                    .map(|o| o.order_id.clone())
                    .collect()
            })
            .unwrap_or_default();
        for id in ids {
            self.cancel(&id).await;
        }
    }

    /// Cancel + place, preserving the strategy tag.
    pub async fn replace(
        &mut self,
        order_id: &str,
        new_price: Decimal,
        new_size: Decimal,
        tob: Option<&TopOfBook>,
        now: DateTime<Utc>,
    ) -> Option<(Order, Vec<Fill>)> {
        let existing = self
            .orders
            .values()
            .find_map(|m| m.get(order_id))
            .cloned()?;
        if !existing.status.is_live() {
            return None;
        }
        self.cancel(order_id).await;
        let req = OrderRequest {
            market_id: existing.market_id,
            side: existing.side,
            price: new_price,
            size: new_size,
            tif: TimeInForce::Gtc,
            reason: existing.reason,
        };
        Some(self.place_limit(req, tob, now).await)
    }

    /// Match resting orders against a new top-of-book (maker-touch model).
    /// Trade-through mode ignores book updates for resting fills.
    pub async fn on_book(
        &mut self,
        market_id: &str,
        tob: &TopOfBook,
        now: DateTime<Utc>,
    ) -> Vec<Fill> {
        if self.shadow || self.config.fill_model != FillModel::MakerTouch {
            return Vec::new();
        }

        let candidates: Vec<(String, Side, Decimal, Decimal)> = self
            .orders
            .get(market_id)
            .map(|orders| {
                orders
                    .values()
                    .filter(|o| o.status.is_live())
                    .filter(|o| self.rested_long_enough(o, now))
                    .filter_map(|o| {
                        let touch = match o.side {
                            Side::Buy => tob.best_ask.filter(|a| a.price <= o.price),
                            Side::Sell => tob.best_bid.filter(|b| b.price >= o.price),
                        }?;
                        let size = o
                            .remaining()
                            .min(touch.size * self.config.participation);
                        Some((o.order_id.clone(), o.side, o.price, size))
                    })
                    .collect()
            })
            .unwrap_or_default();

        let mut fills = Vec::new();
        for (order_id, side, limit_price, size) in candidates {
            // Resting maker assumption: we were sitting at our limit and got hit.
            let price = self.exec_price(limit_price, side);
            if let Some(fill) = self.book_fill(market_id, &order_id, price, size, now).await {
                fills.push(fill);
            }
        }
        fills
    }

    /// Match resting orders against a trade print (trade-through model).
    pub async fn on_trade(
        &mut self,
        market_id: &str,
        trade_price: Decimal,
        trade_size: Decimal,
        now: DateTime<Utc>,
    ) -> Vec<Fill> {
        if self.shadow || self.config.fill_model != FillModel::TradeThrough {
            return Vec::new();
        }

        let candidates: Vec<(String, Side, Decimal, Decimal)> = self
            .orders
            .get(market_id)
            .map(|orders| {
                orders
                    .values()
                    .filter(|o| o.status.is_live())
                    .filter(|o| self.rested_long_enough(o, now))
                    .filter(|o| match o.side {
                        Side::Buy => trade_price <= o.price,
                        Side::Sell => trade_price >= o.price,
                    })
                    .map(|o| {
                        let size = o
                            .remaining()
                            .min(trade_size * self.config.participation);
                        (o.order_id.clone(), o.side, o.price, size)
                    })
                    .collect()
            })
            .unwrap_or_default();

        let mut fills = Vec::new();
        for (order_id, side, limit_price, size) in candidates {
            let price = self.exec_price(limit_price, side);
            if let Some(fill) = self.book_fill(market_id, &order_id, price, size, now).await {
                fills.push(fill);
            }
        }
        fills
    }

    pub fn get_order(&self, market_id: &str, order_id: &str) -> Option<&Order> {
        self.orders.get(market_id)?.get(order_id)
    }

    /// Live orders for one market, oldest first.
    pub fn open_orders(&self, market_id: &str, now: DateTime<Utc>) -> Vec<OpenOrderView> {
        let mut views: Vec<OpenOrderView> = self
            .orders
            .get(market_id)
            .map(|orders| {
                orders
                    .values()
                    .filter(|o| o.status.is_live())
                    .map(|o| OpenOrderView {
                        order_id: o.order_id.clone(),
                        side: o.side,
                        price: o.price,
                        size: o.size,
                        rested_secs: (now - o.rested_since_ts).num_milliseconds() as f64 / 1000.0,
                        reason: o.reason.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        views.sort_by(|a, b| a.order_id.cmp(&b.order_id));
        views
    }

    pub fn open_order_count(&self) -> usize {
        self.orders
            .values()
            .flat_map(|m| m.values())
            .filter(|o| o.status.is_live())
            .count()
    }

    /// Markets that currently have live orders.
    pub fn markets_with_orders(&self) -> Vec<String> {
        self.orders
            .iter()
            .filter(|(_, m)| m.values().any(|o| o.status.is_live()))
            .map(|(k, _)| k.clone())
            .collect()
    }
}
