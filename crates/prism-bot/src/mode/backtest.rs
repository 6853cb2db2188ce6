//! Backtest mode: replay the persisted tape through the identical pipeline.
//!
//! The feed is swapped for a tape reader; everything downstream (broker,
//! risk, strategies, portfolio, snapshots) behaves exactly as in paper mode,
//! driven by the tape's own clock. Exit code 0 on clean EOF.

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::broadcast;
use tracing::info;

use crate::broker::PaperBroker;
use crate::config::{BotConfig, TradeMode};
use crate::feed::replay::TapeReplayFeed;
use crate::portfolio::Portfolio;
use crate::scheduler::Scheduler;

use super::common::{open_storage, spawn_signal_handler};
use super::paper::{build_fv_provider, build_strategies, restore_paper_state};

/// Run a backtest over the recorded tape. Returns on clean EOF.
pub async fn run_backtest_mode(config: BotConfig) -> Result<()> {
    if config.trade_mode != TradeMode::Paper {
        anyhow::bail!("backtest requires TRADE_MODE=paper");
    }
    info!(
        speed = config.backtest.speed,
        start_ts = ?config.backtest.start_ts,
        end_ts = ?config.backtest.end_ts,
        fill_model = %config.paper.fill_model,
        "starting backtest mode"
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

    let feed = TapeReplayFeed::load(
        store.clone(),
        config.backtest.start_ts,
        config.backtest.end_ts,
        config.backtest.speed,
    )
    .await
    .context("failed to load tape")?;
    if feed.event_count() == 0 {
        anyhow::bail!("tape is empty for the requested window; nothing to replay");
    }

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
    .with_simulated_time();

    let report = scheduler.run().await;

    let realized = scheduler.portfolio().total_realized();
    let unrealized = scheduler.portfolio().total_unrealized();

    let _ = shutdown_tx.send(());
    signal_task.abort();
    drop(scheduler);
    drop(store_handle);
    writer_task
        .await
        .context("storage writer failed to drain")?;

    info!(
        events = report.events_processed,
        fills = report.fills_applied,
        %realized,
        %unrealized,
        "backtest complete"
    );
    Ok(())
}
