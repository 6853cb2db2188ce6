//! Scanner mode: selector + feed + storage, no strategies and no broker.
//!
//! Useful for building a tape before running backtests, and for sizing up
//! the opportunity set without quoting.

use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::info;

use crate::broker::PaperBroker;
use crate::config::{BotConfig, ExecutionMode};
use crate::portfolio::Portfolio;
use crate::scheduler::Scheduler;
use crate::strategy::FvProvider;

use super::common::{build_feed, open_storage, spawn_selector_task, spawn_signal_handler};

/// Run the scanner until shutdown.
pub async fn run_scanner_mode(config: BotConfig) -> Result<()> {
    info!(
        top_n = config.selector.top_n_markets,
        min_volume = %config.selector.min_24h_volume_usd,
        min_liquidity = %config.selector.min_liquidity_usd,
        "starting scanner mode"
    );

    let (store, store_handle, writer_task) = open_storage(&config).await?;
    let (shutdown_tx, _) = broadcast::channel(8);
    let signal_task = spawn_signal_handler(shutdown_tx.clone());

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
    // The scanner ingests and persists only; the broker never sees an intent.
    let broker = PaperBroker::new(
        config.paper.clone(),
        ExecutionMode::Shadow,
        store_handle.clone(),
    );

    let mut scheduler = Scheduler::new(
        config.clone(),
        feed,
        broker,
        Portfolio::new(Utc::now()),
        Vec::new(),
        FvProvider::Stub,
        store_handle.clone(),
        shutdown_tx.subscribe(),
    )
    .without_strategies()
    .with_selector_channel(selector_rx, stats_tx);

    let report = scheduler.run().await;

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
        tape_rows = store.count_rows("tape").await.unwrap_or(-1),
        "scanner shutdown complete"
    );
    Ok(())
}
