//! Shared wiring for the run modes.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use prism_market::{MetadataClient, MetadataClientConfig};

use crate::config::BotConfig;
use crate::feed::{live::LiveFeed, mock::MockFeed, mock::MockFeedConfig, Feed};
use crate::scheduler::SelectorMsg;
use crate::selector::{FeedStats, MarketSelector};
use crate::storage::{spawn_writer, SqliteStore, StoreHandle, StoreMsg};

/// Open the store and start the writer task.
pub(crate) async fn open_storage(
    config: &BotConfig,
) -> Result<(Arc<SqliteStore>, StoreHandle, JoinHandle<()>)> {
    let store = Arc::new(
        SqliteStore::open(&config.sqlite_path)
            .await
            .with_context(|| format!("failed to open SQLITE_PATH={}", config.sqlite_path))?,
    );
    let (handle, task) = spawn_writer(store.clone(), config.feed.queue_capacity);
    Ok((store, handle, task))
}

/// Pick the live socket or the seeded synthetic feed.
pub(crate) fn build_feed(config: &BotConfig) -> Box<dyn Feed + Send> {
    if config.feed.mock_feed {
        info!(seed = config.feed.mock_feed_seed, "using mock feed");
        Box::new(MockFeed::new(MockFeedConfig {
            seed: config.feed.mock_feed_seed,
            ..Default::default()
        }))
    } else {
        Box::new(LiveFeed::new(config.feed.clone()))
    }
}

/// Spawn the background selector task: periodic metadata refresh, watchlist
/// persistence, and update fan-in to the scheduler. Never blocks the hot
/// path; failures back off and keep serving the last good watchlist.
pub(crate) fn spawn_selector_task(
    config: &BotConfig,
    store: StoreHandle,
    stats_rx: watch::Receiver<HashMap<String, FeedStats>>,
    update_tx: mpsc::Sender<SelectorMsg>,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    let selector_config = config.selector.clone();
    let interval = selector_config.interval;
    let client = MetadataClient::new(MetadataClientConfig {
        base_url: config.feed.gamma_base_url.clone(),
        request_timeout: config.feed.network_timeout,
        ..Default::default()
    });
    let mut selector = MarketSelector::new(selector_config, client);

    tokio::spawn(async move {
        loop {
            let stats = stats_rx.borrow().clone();
            let now = Utc::now();
            let delay = match selector.refresh(&stats, now).await {
                Ok(update) => {
                    store
                        .record(StoreMsg::UpsertMarkets(update.metas.values().cloned().collect()))
                        .await;
                    store
                        .record(StoreMsg::Watchlist {
                            entries: update
                                .watchlist
                                .entries
                                .iter()
                                .map(|e| (e.rank, e.market_id.clone(), e.score))
                                .collect(),
                            ts: now,
                        })
                        .await;
                    store
                        .record(StoreMsg::ScannerSnapshot {
                            ts: now,
                            eligible_count: update.eligible_count,
                            top_count: update.watchlist.entries.len(),
                        })
                        .await;
                    if update_tx.send(SelectorMsg::Update(update)).await.is_err() {
                        break;
                    }
                    interval
                }
                Err(_) => {
                    if selector.should_pause() {
                        warn!("selector pausing the scheduler: no usable watchlist");
                        if update_tx.send(SelectorMsg::Paused).await.is_err() {
                            break;
                        }
                    }
                    selector.retry_delay()
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.recv() => {
                    info!("selector task shutting down");
                    break;
                }
            }
        }
    })
}

/// Wait for SIGINT/SIGTERM and broadcast shutdown.
pub(crate) fn spawn_signal_handler(shutdown_tx: broadcast::Sender<()>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(s) => s,
                Err(_) => {
                    let _ = ctrl_c.await;
                    info!("received SIGINT");
                    let _ = shutdown_tx.send(());
                    return;
                }
            };
            tokio::select! {
                _ = ctrl_c => info!("received SIGINT"),
                _ = sigterm.recv() => info!("received SIGTERM"),
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
            info!("received Ctrl+C");
        }
        let _ = shutdown_tx.send(());
    })
}
