//! The core loop.
//!
//! A single cooperative scheduler consumes feed events and drives, in order:
//! book update -> tape persistence -> broker match -> throttled strategy
//! evaluation -> risk gate -> broker submit/cancel -> periodic snapshots.
//! It is the single writer for `Portfolio`, `PaperBroker`, and the per-market
//! `BookState` caches, so the hot path needs no locks.
//!
//! Selector refreshes run in a background task (they do network I/O) and
//! arrive over a channel; the scheduler only swaps the watchlist. The clock
//! is the wall in live mode and the tape's `local_ts` in backtest mode, so a
//! replay makes identical decisions.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use prism_common::{PriceLevel, Side};
use prism_market::{BookApply, BookState, MarketMeta};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::broker::{OrderRequest, PaperBroker, TimeInForce};
use crate::config::BotConfig;
use crate::feed::{Feed, LagWindow, TapeBody, TapeEvent};
use crate::portfolio::Portfolio;
use crate::risk::{MarketHealth, Proposal, RiskEngine};
use crate::selector::{FeedStats, SelectorUpdate, Watchlist};
use crate::storage::{StoreHandle, StoreMsg};
use crate::strategy::{FvProvider, MarketView, QuoteIntent, Strategy, TAG_FLATTEN, TAG_UNWIND};

/// A book with no update for this long is stale regardless of lag p99.
const STALE_BOOK_SECS: i64 = 5;

/// Message from the background selector task.
#[derive(Debug)]
pub enum SelectorMsg {
    Update(SelectorUpdate),
    /// Metadata has been unavailable long enough that trading must pause.
    Paused,
}

/// Small mutable operational state; everything else is config.
#[derive(Debug, Clone, Copy)]
pub struct OperationalState {
    pub kill_switch: bool,
    pub paused: bool,
}

/// Per-market state owned by the scheduler.
struct MarketRuntime {
    meta: MarketMeta,
    book: BookState,
    lag: LagWindow,
    last_eval: Option<DateTime<Utc>>,
    /// Touch at the last evaluation, for the early-reprice trigger.
    eval_touch: Option<(Decimal, Decimal)>,
    /// Set by a fail-closed invariant violation; cleared never (session).
    disabled: bool,
    last_unwind: Option<DateTime<Utc>>,
    on_watchlist: bool,
}

impl MarketRuntime {
    fn new(meta: MarketMeta) -> Self {
        let market_id = meta.market_id.clone();
        Self {
            meta,
            book: BookState::new(market_id),
            lag: LagWindow::default(),
            last_eval: None,
            eval_touch: None,
            disabled: false,
            last_unwind: None,
            on_watchlist: false,
        }
    }

    fn health(&self) -> MarketHealth {
        MarketHealth {
            tick_size: self.meta.tick_size,
            spread_bps: self.book.spread_bps(),
            crossed: self.book.crossed,
            feed_lag_p99_ms: self.lag.p99_ms(),
            mid: self.book.mid(),
        }
    }

    fn feed_healthy(&self, now: DateTime<Utc>, reject_lag_ms: u64) -> bool {
        if self.lag.p99_ms() > reject_lag_ms {
            return false;
        }
        match self.book.last_update_ts {
            Some(ts) => (now - ts).num_seconds() <= STALE_BOOK_SECS,
            None => false,
        }
    }
}

/// Counters reported at shutdown.
#[derive(Debug, Default, Clone, Copy)]
pub struct SchedulerReport {
    pub events_processed: u64,
    pub fills_applied: u64,
    pub intents_submitted: u64,
    pub intents_rejected: u64,
    pub markets_disabled: u64,
    pub protocol_errors: u64,
}

pub struct Scheduler<F: Feed> {
    config: BotConfig,
    feed: F,
    broker: PaperBroker,
    portfolio: Portfolio,
    risk: RiskEngine,
    strategies: Vec<Strategy>,
    fv: FvProvider,
    store: StoreHandle,
    markets: HashMap<String, MarketRuntime>,
    watchlist: Watchlist,
    ops: OperationalState,
    /// Wall clock in live mode, tape clock in backtest mode.
    simulated_time: bool,
    now: DateTime<Utc>,
    persist_tape: bool,
    run_strategies: bool,
    last_snapshot: Option<DateTime<Utc>>,
    last_unwind_pass: Option<DateTime<Utc>>,
    selector_rx: Option<mpsc::Receiver<SelectorMsg>>,
    stats_tx: Option<watch::Sender<HashMap<String, FeedStats>>>,
    shutdown_rx: broadcast::Receiver<()>,
    report: SchedulerReport,
}

impl<F: Feed> Scheduler<F> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: BotConfig,
        feed: F,
        broker: PaperBroker,
        portfolio: Portfolio,
        strategies: Vec<Strategy>,
        fv: FvProvider,
        store: StoreHandle,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        let risk = RiskEngine::new(config.risk.clone());
        let kill_switch = config.risk.kill_switch;
        Self {
            config,
            feed,
            broker,
            portfolio,
            risk,
            strategies,
            fv,
            store,
            markets: HashMap::new(),
            watchlist: Watchlist::default(),
            ops: OperationalState {
                kill_switch,
                paused: false,
            },
            simulated_time: false,
            now: Utc::now(),
            persist_tape: true,
            run_strategies: true,
            last_snapshot: None,
            last_unwind_pass: None,
            selector_rx: None,
            stats_tx: None,
            shutdown_rx,
            report: SchedulerReport::default(),
        }
    }

    /// Scanner mode: ingest and persist, never quote.
    pub fn without_strategies(mut self) -> Self {
        self.run_strategies = false;
        self
    }

    /// Backtest mode: clock follows the tape and the tape is not re-written.
    pub fn with_simulated_time(mut self) -> Self {
        self.simulated_time = true;
        self.persist_tape = false;
        self
    }

    /// Wire the background selector task.
    pub fn with_selector_channel(
        mut self,
        rx: mpsc::Receiver<SelectorMsg>,
        stats_tx: watch::Sender<HashMap<String, FeedStats>>,
    ) -> Self {
        self.selector_rx = Some(rx);
        self.stats_tx = Some(stats_tx);
        self
    }

    pub fn operational_state(&self) -> OperationalState {
        self.ops
    }

    pub fn portfolio(&self) -> &Portfolio {
        &self.portfolio
    }

    pub fn broker(&self) -> &PaperBroker {
        &self.broker
    }

    pub fn report(&self) -> SchedulerReport {
        self.report
    }

    fn tick_now(&self) -> DateTime<Utc> {
        if self.simulated_time {
            self.now
        } else {
            Utc::now()
        }
    }

    /// Run until shutdown or feed exhaustion. Returns the final report.
    pub async fn run(&mut self) -> SchedulerReport {
        info!(
            strategies = self.strategies.len(),
            kill_switch = self.ops.kill_switch,
            "scheduler starting"
        );
        let mut idle = tokio::time::interval(self.config.feed.idle_tick);
        idle.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown_rx.recv() => {
                    info!("scheduler: shutdown requested");
                    break;
                }

                msg = recv_selector(&mut self.selector_rx) => {
                    match msg {
                        Some(SelectorMsg::Update(update)) => self.apply_selector_update(update).await,
                        Some(SelectorMsg::Paused) => {
                            if !self.ops.paused {
                                warn!("selector lost metadata; scheduler paused");
                                self.ops.paused = true;
                            }
                        }
                        None => self.selector_rx = None,
                    }
                }

                event = self.feed.next_event() => {
                    match event {
                        Ok(Some(event)) => {
                            self.process_event(event).await;
                        }
                        Ok(None) => {
                            info!("feed exhausted");
                            break;
                        }
                        Err(e) => {
                            warn!(error = %e, "feed error");
                            continue;
                        }
                    }
                }

                _ = idle.tick() => {
                    let now = self.tick_now();
                    self.periodic(now).await;
                }
            }
        }

        // Final snapshot on the way out.
        let now = self.tick_now();
        self.write_snapshots(now).await;
        info!(
            events = self.report.events_processed,
            fills = self.report.fills_applied,
            submitted = self.report.intents_submitted,
            rejected = self.report.intents_rejected,
            realized = %self.portfolio.total_realized(),
            unrealized = %self.portfolio.total_unrealized(),
            "scheduler stopped"
        );
        self.report
    }

    /// Swap in a new watchlist: (un)subscribe the feed, seed runtimes, and
    /// pull quotes from delisted markets.
    pub async fn apply_selector_update(&mut self, update: SelectorUpdate) {
        self.ops.paused = false;

        for market_id in &update.diff.removed {
            if let Some(rt) = self.markets.get_mut(market_id) {
                rt.on_watchlist = false;
            }
            self.broker.cancel_all_market(market_id).await;
        }
        for (market_id, meta) in &update.metas {
            let rt = self
                .markets
                .entry(market_id.clone())
                .or_insert_with(|| MarketRuntime::new(meta.clone()));
            rt.meta = meta.clone();
            rt.on_watchlist = true;
        }

        self.watchlist = update.watchlist;
        self.feed.set_watchlist(self.watchlist.market_ids()).await;
        self.publish_feed_stats();
    }

    /// Publish per-market feed stats for the next selector tick.
    fn publish_feed_stats(&mut self) {
        let Some(tx) = &self.stats_tx else { return };
        let elapsed_min = self.config.selector.interval.as_secs_f64() / 60.0;
        let stats: HashMap<String, FeedStats> = self
            .markets
            .iter_mut()
            .map(|(id, rt)| {
                let updates = rt.book.take_update_count();
                (
                    id.clone(),
                    FeedStats {
                        spread_bps: rt.book.spread_bps(),
                        updates_per_min: Decimal::from_f64(updates as f64 / elapsed_min.max(1e-9))
                            .unwrap_or(Decimal::ZERO),
                    },
                )
            })
            .collect();
        let _ = tx.send(stats);
    }

    /// Process one feed event end to end.
    pub async fn process_event(&mut self, event: TapeEvent) {
        self.report.events_processed += 1;
        if self.simulated_time && event.local_ts > self.now {
            self.now = event.local_ts;
        }
        let now = if self.simulated_time {
            self.now
        } else {
            Utc::now()
        };

        if !validate_event(&event) {
            self.fail_close(&event.market_id, "invariant violation in feed event")
                .await;
            return;
        }

        if self.persist_tape {
            self.store.record_tape(&event);
        }

        let market_id = event.market_id.clone();
        let rt = self
            .markets
            .entry(market_id.clone())
            .or_insert_with(|| MarketRuntime::new(synthetic_meta(&market_id)));
        if rt.disabled {
            return;
        }
        rt.lag.record(event.lag_ms());

        // 1. Apply to the book.
        let mut is_trade = None;
        let apply = match &event.body {
            TapeBody::BookSnapshot { bids, asks } => {
                rt.book
                    .apply_snapshot(bids, asks, event.source_ts, event.seq)
            }
            TapeBody::BookDelta { changes } => {
                let mut last = BookApply::Applied;
                for c in changes {
                    last = rt
                        .book
                        .apply_delta(c.side, c.price, c.size, event.source_ts, event.seq);
                    if matches!(last, BookApply::SequenceGap { .. }) {
                        break;
                    }
                }
                last
            }
            TapeBody::Trade { price, size, side } => {
                rt.book.apply_trade(*price, *size, *side, event.source_ts);
                is_trade = Some((*price, *size));
                BookApply::Applied
            }
        };

        match apply {
            BookApply::SequenceGap { expected, got } => {
                self.report.protocol_errors += 1;
                warn!(
                    market_id = %market_id,
                    expected,
                    got,
                    "sequence gap; awaiting snapshot resync"
                );
                return;
            }
            BookApply::Crossed => {
                warn!(market_id = %market_id, "crossed book; quoting suspended");
            }
            BookApply::Applied => {}
        }

        // 2. Broker match against the updated tape.
        let tob = self.markets.get(&market_id).map(|rt| rt.book.top_of_book());
        let fills = match (is_trade, tob) {
            (Some((price, size)), _) => self.broker.on_trade(&market_id, price, size, now).await,
            (None, Some(tob)) => self.broker.on_book(&market_id, &tob, now).await,
            (None, None) => Vec::new(),
        };
        for fill in fills {
            self.apply_fill(&fill).await;
        }

        // 3. Throttled strategy evaluation.
        if self.should_evaluate(&market_id, now) {
            self.evaluate_market(&market_id, now).await;
        }

        // 4. Periodic work rides the event clock in backtest mode.
        if self.simulated_time {
            self.periodic(now).await;
        }
    }

    /// Evaluate strategies when the throttle has elapsed or the touch moved
    /// by at least the reprice threshold.
    fn should_evaluate(&mut self, market_id: &str, now: DateTime<Utc>) -> bool {
        if !self.run_strategies || self.ops.paused {
            return false;
        }
        let Some(rt) = self.markets.get(market_id) else {
            return false;
        };
        if rt.disabled || (!rt.on_watchlist && !self.simulated_time) {
            return false;
        }

        let throttle_elapsed = match rt.last_eval {
            Some(ts) => {
                (now - ts).num_milliseconds()
                    >= self.config.feed.strategy_min_interval.as_millis() as i64
            }
            None => true,
        };
        if throttle_elapsed {
            return true;
        }

        // Early reprice: the touch moved materially since the last eval.
        let tob = rt.book.top_of_book();
        if let (Some((old_bid, old_ask)), Some(bid), Some(ask)) =
            (rt.eval_touch, tob.best_bid, tob.best_ask)
        {
            let threshold = self.config.mm.reprice_threshold * rt.meta.tick_size;
            if (bid.price - old_bid).abs() >= threshold || (ask.price - old_ask).abs() >= threshold
            {
                return true;
            }
        }
        false
    }

    async fn evaluate_market(&mut self, market_id: &str, now: DateTime<Utc>) {
        let Some(rt) = self.markets.get_mut(market_id) else {
            return;
        };
        rt.last_eval = Some(now);
        let tob = rt.book.top_of_book();
        rt.eval_touch = match (tob.best_bid, tob.best_ask) {
            (Some(b), Some(a)) => Some((b.price, a.price)),
            _ => rt.eval_touch,
        };

        let fv_sample = self.fv.latest(market_id, now);
        let feed_healthy = rt.feed_healthy(now, self.config.risk.reject_feed_lag_ms);
        let open_orders = self.broker.open_orders(market_id, now);
        let position = self.portfolio.view(market_id, now);
        let meta = rt.meta.clone();
        let event_id = meta.event_id.clone();

        let mut all_intents: Vec<QuoteIntent> = Vec::new();
        {
            let rt = self.markets.get(market_id).expect("checked above");
            let view = MarketView {
                market_id,
                event_id: &event_id,
                tick_size: meta.tick_size,
                min_size: meta.min_size,
                book: &rt.book,
                position,
                open_orders: &open_orders,
                fv: fv_sample,
                feed_healthy,
                now,
            };
            for strategy in &self.strategies {
                all_intents.extend(strategy.evaluate(&view));
            }
        }

        for intent in all_intents {
            self.apply_intent(market_id, &event_id, intent, now).await;
        }
    }

    /// Gate one intent through risk and forward survivors to the broker.
    async fn apply_intent(
        &mut self,
        market_id: &str,
        event_id: &str,
        intent: QuoteIntent,
        now: DateTime<Utc>,
    ) {
        let Some(rt) = self.markets.get(market_id) else {
            return;
        };
        let health = rt.health();
        let tob = rt.book.top_of_book();

        match intent {
            QuoteIntent::Cancel { order_id } => {
                // Cancels bypass risk entirely.
                self.broker.cancel(&order_id).await;
            }
            QuoteIntent::Place {
                side,
                price,
                size,
                tif,
                reason,
            } => {
                let proposal = Proposal {
                    market_id,
                    event_id,
                    side,
                    price,
                    size,
                };
                match self
                    .risk
                    .check(&proposal, &health, &self.portfolio, self.ops.kill_switch)
                {
                    Ok(()) => {
                        self.report.intents_submitted += 1;
                        let req = OrderRequest {
                            market_id: market_id.to_string(),
                            side,
                            price,
                            size,
                            tif,
                            reason: Some(reason.to_string()),
                        };
                        let (_, fills) = self.broker.place_limit(req, Some(&tob), now).await;
                        for fill in fills {
                            self.apply_fill(&fill).await;
                        }
                    }
                    Err(rejection) => {
                        self.report.intents_rejected += 1;
                        info!(
                            market_id,
                            rule = rejection.code(),
                            side = %side,
                            price = %price,
                            size = %size,
                            reason,
                            context = %serde_json::to_string(&rejection).unwrap_or_default(),
                            "risk reject"
                        );
                    }
                }
            }
            QuoteIntent::Replace {
                order_id,
                price,
                size,
            } => {
                let side = match self.broker.get_order(market_id, &order_id) {
                    Some(o) => o.side,
                    None => return,
                };
                let proposal = Proposal {
                    market_id,
                    event_id,
                    side,
                    price,
                    size,
                };
                match self
                    .risk
                    .check(&proposal, &health, &self.portfolio, self.ops.kill_switch)
                {
                    Ok(()) => {
                        self.report.intents_submitted += 1;
                        if let Some((_, fills)) = self
                            .broker
                            .replace(&order_id, price, size, Some(&tob), now)
                            .await
                        {
                            for fill in fills {
                                self.apply_fill(&fill).await;
                            }
                        }
                    }
                    Err(rejection) => {
                        // The replacement is blocked; pull the stale quote.
                        self.report.intents_rejected += 1;
                        info!(
                            market_id,
                            rule = rejection.code(),
                            order_id = %order_id,
                            "risk rejected replace; cancelling quote"
                        );
                        self.broker.cancel(&order_id).await;
                    }
                }
            }
        }
    }

    /// Apply a fill to the portfolio and persist the updated position.
    async fn apply_fill(&mut self, fill: &crate::broker::Fill) {
        self.report.fills_applied += 1;
        let event_id = self
            .markets
            .get(&fill.market_id)
            .map(|rt| rt.meta.event_id.clone())
            .unwrap_or_else(|| format!("event:{}", fill.market_id));

        let before = self.portfolio.view(&fill.market_id, fill.ts);
        let realized_delta = self.portfolio.apply_fill(fill, &event_id);
        let after = self.portfolio.view(&fill.market_id, fill.ts);

        info!(
            fill_id = %fill.fill_id,
            order_id = %fill.order_id,
            market_id = %fill.market_id,
            side = %fill.side,
            price = %fill.price,
            size = %fill.size,
            pos_before = %before.net_size,
            pos_after = %after.net_size,
            realized_delta = %realized_delta,
            "fill applied"
        );
        if !before.net_size.is_zero() && after.net_size.is_zero() {
            info!(market_id = %fill.market_id, "position flat");
        }

        if let Some(position) = self.portfolio.get(&fill.market_id) {
            self.store
                .record(StoreMsg::Position(position.clone()))
                .await;
        }
    }

    /// Periodic work: marks, snapshots, unwind/time-stop pass.
    pub async fn periodic(&mut self, now: DateTime<Utc>) {
        // Mark open positions off the freshest books.
        for (market_id, rt) in &self.markets {
            if let (Some(mid), Some(position)) =
                (rt.book.mid(), self.portfolio.positions.get_mut(market_id))
            {
                position.mark_to_market(mid);
            }
        }
        self.portfolio.roll_day(now);

        let snapshot_due = match self.last_snapshot {
            Some(ts) => {
                (now - ts).num_milliseconds()
                    >= self.config.feed.snapshot_interval.as_millis() as i64
            }
            None => true,
        };
        if snapshot_due {
            self.last_snapshot = Some(now);
            self.write_snapshots(now).await;
            self.publish_feed_stats();
        }

        let unwind_due = match self.last_unwind_pass {
            Some(ts) => {
                (now - ts).num_seconds() >= self.config.risk.unwind_interval_secs as i64
            }
            None => true,
        };
        if unwind_due && self.run_strategies {
            self.last_unwind_pass = Some(now);
            self.unwind_pass(now).await;
        }
    }

    /// PnL snapshot + positions upsert.
    async fn write_snapshots(&mut self, now: DateTime<Utc>) {
        let unrealized = self.portfolio.total_unrealized();
        let realized = self.portfolio.total_realized();
        let open_markets = self.portfolio.open_positions_count();
        self.store
            .record(StoreMsg::Pnl {
                ts: now,
                unrealized,
                realized,
                open_markets,
            })
            .await;
        for position in self.portfolio.positions.values() {
            self.store
                .record(StoreMsg::Position(position.clone()))
                .await;
        }
        debug!(%unrealized, %realized, open_markets, "pnl snapshot");
    }

    /// Flatten positions that are too old, over the open-market cap, or
    /// stranded past the daily loss limit. Scheduler-injected: these are not
    /// risk rules, but every flatten still passes the risk gate (reduce-only
    /// intents survive it).
    async fn unwind_pass(&mut self, now: DateTime<Utc>) {
        let daily_loss_breached = self.portfolio.realized_today()
            + self.portfolio.total_unrealized()
            <= -self.risk.config().daily_loss_limit;

        let max_age = self.risk.config().max_pos_age_secs;
        let max_open = self.risk.config().max_open_positions;
        let open_count = self.portfolio.open_positions_count();

        let mut candidates: Vec<(String, &'static str)> = Vec::new();
        if daily_loss_breached {
            for p in self.portfolio.open_positions_by_age() {
                candidates.push((p.market_id.clone(), TAG_FLATTEN));
            }
        } else {
            if max_age > 0 {
                for p in self.portfolio.open_positions_by_age() {
                    if p.age_secs(now) >= max_age as i64 {
                        candidates.push((p.market_id.clone(), TAG_UNWIND));
                    }
                }
            }
            if max_open > 0 && open_count > max_open {
                let mut need = open_count - max_open;
                for p in self.portfolio.open_positions_by_age() {
                    if need == 0 {
                        break;
                    }
                    if candidates.iter().any(|(id, _)| id == &p.market_id) {
                        continue;
                    }
                    candidates.push((p.market_id.clone(), TAG_UNWIND));
                    need -= 1;
                }
            }
        }
        if candidates.is_empty() {
            return;
        }

        let min_repeat = self.risk.config().unwind_interval_secs.max(10) as i64;
        let max_per_cycle = if daily_loss_breached {
            usize::MAX
        } else {
            self.risk.config().unwind_max_markets_per_cycle
        };
        let mut done = 0usize;

        for (market_id, tag) in candidates {
            if done >= max_per_cycle {
                break;
            }
            let Some(rt) = self.markets.get(&market_id) else {
                continue;
            };
            if let Some(last) = rt.last_unwind {
                if (now - last).num_seconds() < min_repeat {
                    continue;
                }
            }
            let tob = rt.book.top_of_book();
            let net = self
                .portfolio
                .get(&market_id)
                .map(|p| p.net_size)
                .unwrap_or(Decimal::ZERO);
            if net.is_zero() {
                continue;
            }
            // Cross the spread to flatten.
            let (side, touch) = if net > Decimal::ZERO {
                (Side::Sell, tob.best_bid)
            } else {
                (Side::Buy, tob.best_ask)
            };
            let Some(level) = touch else { continue };

            info!(
                market_id = %market_id,
                side = %side,
                size = %net.abs(),
                reason = tag,
                "unwind intent"
            );
            let event_id = self
                .markets
                .get(&market_id)
                .map(|rt| rt.meta.event_id.clone())
                .unwrap_or_default();
            // Stop re-accumulating while flattening.
            self.broker.cancel_all_market(&market_id).await;
            self.apply_intent(
                &market_id,
                &event_id,
                QuoteIntent::Place {
                    side,
                    price: level.price,
                    size: net.abs(),
                    tif: TimeInForce::Ioc,
                    reason: tag,
                },
                now,
            )
            .await;
            if let Some(rt) = self.markets.get_mut(&market_id) {
                rt.last_unwind = Some(now);
            }
            done += 1;
        }
    }

    /// Fail-closed: cancel the market's orders and disable it for the
    /// session.
    async fn fail_close(&mut self, market_id: &str, why: &str) {
        self.report.markets_disabled += 1;
        error!(market_id, why, "fail-closed: disabling market");
        self.broker.cancel_all_market(market_id).await;
        if let Some(rt) = self.markets.get_mut(market_id) {
            rt.disabled = true;
        } else {
            let mut rt = MarketRuntime::new(synthetic_meta(market_id));
            rt.disabled = true;
            self.markets.insert(market_id.to_string(), rt);
        }
    }
}

async fn recv_selector(rx: &mut Option<mpsc::Receiver<SelectorMsg>>) -> Option<SelectorMsg> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Metadata stand-in for markets that appear on the tape before (or without)
/// discovery; backtests trade whatever the tape contains.
fn synthetic_meta(market_id: &str) -> MarketMeta {
    MarketMeta {
        market_id: market_id.to_string(),
        event_id: format!("event:{}", market_id),
        question: String::new(),
        active: true,
        end_ts: None,
        tick_size: Decimal::new(1, 3),
        min_size: Decimal::ONE,
        volume_24h_usd: Decimal::ZERO,
        liquidity_usd: Decimal::ZERO,
    }
}

/// Feed-event sanity: prices inside [0, 1], sizes non-negative.
fn validate_event(event: &TapeEvent) -> bool {
    let level_ok = |l: &PriceLevel| {
        l.price >= Decimal::ZERO && l.price <= Decimal::ONE && l.size >= Decimal::ZERO
    };
    match &event.body {
        TapeBody::BookSnapshot { bids, asks } => {
            bids.iter().all(level_ok) && asks.iter().all(level_ok)
        }
        TapeBody::BookDelta { changes } => changes.iter().all(|c| {
            c.price >= Decimal::ZERO && c.price <= Decimal::ONE && c.size >= Decimal::ZERO
        }),
        TapeBody::Trade { price, size, .. } => {
            *price >= Decimal::ZERO && *price <= Decimal::ONE && *size > Decimal::ZERO
        }
    }
}
