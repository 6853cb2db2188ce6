//! Paper trading mode: real (or mock) market data, simulated execution.

use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{info, warn};

use crate::broker::PaperBroker;
use crate::config::{BotConfig, TradeMode};
use crate::portfolio::Portfolio;
use crate::scheduler::Scheduler;
use crate::storage::SqliteStore;
use crate::strategy::{FairValueStrategy, FvProvider, MarketMakerStrategy, Strategy};

use super::common::{build_feed, open_storage, spawn_selector_task, spawn_signal_handler};

/// Build the enabled strategy set from config.
pub(crate) fn build_strategies(config: &BotConfig) -> Vec<Strategy> {
    let mut strategies = Vec::new();
    if config.strategies.fair_value {
        strategies.push(Strategy::FairValue(FairValueStrategy::new(
            config.fv.clone(),
            config.target_size,
        )));
    }
    if config.strategies.market_maker {
        strategies.push(Strategy::MarketMaker(MarketMakerStrategy::new(
            config.mm.clone(),
            config.target_size,
            config.risk.max_position_per_market,
        )));
    }
    strategies
}

pub(crate) fn build_fv_provider(config: &BotConfig) -> FvProvider {
    if config.fv.use_mock_provider {
        FvProvider::mock(config.feed.mock_feed_seed)
    } else {
        FvProvider::Stub
    }
}

/// Restore paper state from a previous run, or wipe it.
pub(crate) async fn restore_paper_state(
    config: &BotConfig,
    store: &SqliteStore,
    broker: &mut PaperBroker,
    portfolio: &mut Portfolio,
) -> Result<()> {
    if config.paper.reset_on_start {
        store
            .clear_trading_state()
            .await
            .context("failed to reset paper state")?;
        warn!("paper state wiped (PAPER_RESET_ON_START)");
        return Ok(());
    }

    let orders = store.fetch_open_orders().await?;
    if !orders.is_empty() {
        info!(count = orders.len(), "restored open paper orders");
        broker.restore_orders(orders);
    }
    let positions = store.fetch_positions().await?;
    let mut restored = 0;
    for p in positions {
        if p.is_open() || !p.realized_pnl.is_zero() {
            portfolio.restore(p);
            restored += 1;
        }
    }
    if restored > 0 {
        info!(count = restored, "rehydrated paper positions");
    }
    Ok(())
}

/// Run paper trading until shutdown.
pub async fn run_paper_mode(config: BotConfig) -> Result<()> {
    if config.trade_mode != TradeMode::Paper {
        anyhow::bail!("paper mode requires TRADE_MODE=paper");
    }
    info!(
        fill_model = %config.paper.fill_model,
        execution = ?config.execution_mode,
        target_size = %config.target_size,
        "starting paper trading mode"
    );

    let (store, store_handle, writer_task) = open_storage(&config).await?;
    let (shutdown_tx, _) = broadcast::channel(8);
    let signal_task = spawn_signal_handler(shutdown_tx.clone());

    let mut broker = PaperBroker::new(
        config.paper.clone(),
        config.execution_mode,
        store_handle.clone(),
    );
    let mut portfolio = Portfolio::new(Utc::now());
    restore_paper_state(&config, &store, &mut broker, &mut portfolio).await?;

    let (selector_tx, selector_rx) = mpsc::channel(16);
    let (stats_tx, stats_rx) = watch::channel(HashMap::new());
    let selector_task = spawn_selector_task(
        &config,
        store_handle.clone(),
        stats_rx,
        selector_tx,
        shutdown_tx.subscribe(),
    );

    let feed = build_feed(&config);
    let strategies = build_strategies(&config);
    let fv = build_fv_provider(&config);

    let mut scheduler = Scheduler::new(
        config.clone(),
        feed,
        broker,
        portfolio,
        strategies,
        fv,
        store_handle.clone(),
        shutdown_tx.subscribe(),
    )
    .with_selector_channel(selector_rx, stats_tx);

    let report = scheduler.run().await;

    // Stop background tasks, then let the writer drain.
    let _ = shutdown_tx.send(());
    selector_task.abort();
    signal_task.abort();
    drop(scheduler);
    drop(store_handle);
    writer_task
        .await
        .context("storage writer failed to drain")?;

    info!(
        events = report.events_processed,
        fills = report.fills_applied,
        rejected = report.intents_rejected,
        tape_rows = store.count_rows("tape").await.unwrap_or(-1),
        "paper trading shutdown complete"
    );
    Ok(())
}
