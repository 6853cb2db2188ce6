//! Live CLOB WebSocket feed.
//!
//! One connection task owns the socket and fans normalized [`TapeEvent`]s
//! into a bounded channel; the scheduler consumes from the other end. The
//! session enforces the snapshot-first discipline: after every (re)connect,
//! deltas for a market are discarded until its first book snapshot arrives.
//!
//! Backpressure: book deltas are posted with `try_send` and dropped (with a
//! counter) when the channel is full; the market is then re-subscribed to
//! solicit a fresh snapshot. Trade prints are posted with an awaited `send`
//! and are never dropped.

use std::collections::HashSet;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use futures_util::{SinkExt, StreamExt};
use prism_common::{PriceLevel, Side};
use prism_market::types::{BookMessage, GenericMessage, PriceChangeMessage, SubscribeMessage, TradeMessage};
use rust_decimal::Decimal;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, error, info, warn};

use crate::config::FeedConfig;

use super::{Feed, FeedError, LevelChange, TapeBody, TapeEvent};

/// Live feed over the CLOB market channel.
pub struct LiveFeed {
    event_rx: mpsc::Receiver<TapeEvent>,
    shutdown_tx: broadcast::Sender<()>,
    watchlist_tx: watch::Sender<Vec<String>>,
    is_running: bool,
    dropped_deltas: Arc<AtomicU64>,
}

impl LiveFeed {
    pub fn new(config: FeedConfig) -> Self {
        let (event_tx, event_rx) = mpsc::channel(config.queue_capacity);
        let (shutdown_tx, _) = broadcast::channel(4);
        let (watchlist_tx, watchlist_rx) = watch::channel(Vec::new());
        let dropped_deltas = Arc::new(AtomicU64::new(0));

        let task_shutdown = shutdown_tx.subscribe();
        let task_dropped = dropped_deltas.clone();
        tokio::spawn(async move {
            run_clob_connection(config, event_tx, watchlist_rx, task_shutdown, task_dropped).await;
        });

        Self {
            event_rx,
            shutdown_tx,
            watchlist_tx,
            is_running: true,
            dropped_deltas,
        }
    }

    pub fn dropped_deltas(&self) -> u64 {
        self.dropped_deltas.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Feed for LiveFeed {
    async fn next_event(&mut self) -> Result<Option<TapeEvent>, FeedError> {
        match self.event_rx.recv().await {
            Some(event) => Ok(Some(event)),
            None => {
                self.is_running = false;
                Ok(None)
            }
        }
    }

    fn has_more(&self) -> bool {
        self.is_running
    }

    async fn set_watchlist(&mut self, market_ids: Vec<String>) {
        // Only notify on a real change; every notification costs the session
        // a resubscribe.
        self.watchlist_tx.send_if_modified(|current| {
            if *current != market_ids {
                *current = market_ids;
                true
            } else {
                false
            }
        });
    }

    async fn shutdown(&mut self) {
        self.is_running = false;
        let _ = self.shutdown_tx.send(());
    }
}

/// Per-session normalization state.
#[derive(Debug, Default)]
struct SessionState {
    /// Markets whose first snapshot has arrived this session; deltas for any
    /// other market are discarded.
    snapshotted: HashSet<String>,
    /// Markets needing a fresh snapshot after a dropped delta.
    resync_wanted: HashSet<String>,
    /// (market, kind) pairs already logged at error level.
    logged_protocol_errors: HashSet<(String, String)>,
    /// Dropped-event counter for protocol mismatches.
    protocol_drops: u64,
}

impl SessionState {
    /// Record a protocol error, logging only the first occurrence per
    /// (market, kind).
    fn protocol_error(&mut self, market_id: &str, kind: &str, detail: &str) {
        self.protocol_drops += 1;
        let key = (market_id.to_string(), kind.to_string());
        if self.logged_protocol_errors.insert(key) {
            error!(market_id, kind, detail, "unparseable feed message, dropping");
        }
    }
}

/// Outer connection loop: reconnect with exponential backoff, fast
/// reconnect on watchlist change.
async fn run_clob_connection(
    config: FeedConfig,
    event_tx: mpsc::Sender<TapeEvent>,
    mut watchlist_rx: watch::Receiver<Vec<String>>,
    mut shutdown: broadcast::Receiver<()>,
    dropped_deltas: Arc<AtomicU64>,
) {
    let mut reconnect_delay = Duration::from_secs(1);
    let max_reconnect_delay = Duration::from_secs(30);
    let mut attempts: u32 = 0;

    loop {
        if shutdown.try_recv().is_ok() {
            info!("feed connection: shutdown signal received");
            return;
        }

        let markets = watchlist_rx.borrow_and_update().clone();
        if markets.is_empty() {
            // Nothing to subscribe to yet; wait for a watchlist.
            tokio::select! {
                changed = watchlist_rx.changed() => {
                    if changed.is_err() {
                        // Feed handle gone.
                        return;
                    }
                    continue;
                }
                _ = shutdown.recv() => return,
            }
        }

        let session = run_clob_session(
            &config,
            &markets,
            &event_tx,
            &mut watchlist_rx,
            &mut shutdown,
            &dropped_deltas,
        )
        .await;

        match session {
            Ok(SessionEnd::Shutdown) => return,
            Ok(SessionEnd::Resubscribe) => {
                // Watchlist changed: reconnect immediately with the new set.
                reconnect_delay = Duration::from_secs(1);
                attempts = 0;
            }
            Err(e) => {
                attempts += 1;
                if attempts >= config.permanent_attempts {
                    error!(attempts, error = %e, "feed reconnect budget exhausted");
                    return;
                }
                // 10% jitter keeps reconnect storms from synchronizing.
                let jitter = reconnect_delay.as_millis() as u64 / 10 * (attempts as u64 % 2);
                let delay = reconnect_delay + Duration::from_millis(jitter);
                warn!(error = %e, delay_secs = delay.as_secs(), "feed disconnected, reconnecting");
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.recv() => return,
                }
                reconnect_delay = (reconnect_delay * 2).min(max_reconnect_delay);
            }
        }
    }
}

enum SessionEnd {
    Shutdown,
    Resubscribe,
}

async fn run_clob_session(
    config: &FeedConfig,
    markets: &[String],
    event_tx: &mpsc::Sender<TapeEvent>,
    watchlist_rx: &mut watch::Receiver<Vec<String>>,
    shutdown: &mut broadcast::Receiver<()>,
    dropped_deltas: &AtomicU64,
) -> Result<SessionEnd, FeedError> {
    info!(url = %config.clob_ws_url, markets = markets.len(), "connecting to CLOB feed");

    let connect = timeout(config.network_timeout, connect_async(&config.clob_ws_url)).await;
    let (ws_stream, _) = match connect {
        Ok(Ok(pair)) => pair,
        Ok(Err(e)) => return Err(FeedError::Connection(e.to_string())),
        Err(_) => return Err(FeedError::Connection("connect timeout".to_string())),
    };
    let (mut write, mut read) = ws_stream.split();

    let subscribe = SubscribeMessage {
        assets_ids: markets.to_vec(),
        msg_type: "market",
    };
    let msg = serde_json::to_string(&subscribe).map_err(|e| FeedError::Parse(e.to_string()))?;
    write
        .send(Message::Text(msg))
        .await
        .map_err(|e| FeedError::WebSocket(e.to_string()))?;
    info!(markets = markets.len(), "subscribed to market channel");

    let mut state = SessionState::default();

    loop {
        // Re-solicit snapshots for markets that lost deltas to backpressure.
        if !state.resync_wanted.is_empty() {
            let ids: Vec<String> = state.resync_wanted.drain().collect();
            for id in &ids {
                state.snapshotted.remove(id);
            }
            let resub = SubscribeMessage {
                assets_ids: ids,
                msg_type: "market",
            };
            if let Ok(text) = serde_json::to_string(&resub) {
                let _ = write.send(Message::Text(text)).await;
            }
        }

        tokio::select! {
            _ = shutdown.recv() => {
                let _ = write.send(Message::Close(None)).await;
                return Ok(SessionEnd::Shutdown);
            }
            changed = watchlist_rx.changed() => {
                let _ = write.send(Message::Close(None)).await;
                return Ok(if changed.is_ok() {
                    SessionEnd::Resubscribe
                } else {
                    SessionEnd::Shutdown
                });
            }
            msg = timeout(config.network_timeout, read.next()) => {
                let msg = match msg {
                    Ok(m) => m,
                    // Read inactivity: force a reconnect.
                    Err(_) => return Err(FeedError::WebSocket("read inactivity timeout".to_string())),
                };
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if !handle_text(&text, &mut state, event_tx, dropped_deltas).await {
                            return Err(FeedError::StreamEnded);
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        write.send(Message::Pong(data)).await
                            .map_err(|e| FeedError::WebSocket(e.to_string()))?;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        return Err(FeedError::StreamEnded);
                    }
                    Some(Err(e)) => {
                        return Err(FeedError::WebSocket(e.to_string()));
                    }
                    _ => {}
                }
            }
        }
    }
}

/// Normalize and forward one text frame. Returns false when the event
/// channel is closed (consumer gone).
async fn handle_text(
    text: &str,
    state: &mut SessionState,
    event_tx: &mpsc::Sender<TapeEvent>,
    dropped_deltas: &AtomicU64,
) -> bool {
    let events = normalize_frame(text, state, Utc::now());
    for event in events {
        if event.is_delta() {
            match event_tx.try_send(event) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(ev)) => {
                    // Delta lost: the next snapshot will repair the book.
                    let dropped = dropped_deltas.fetch_add(1, Ordering::Relaxed) + 1;
                    state.resync_wanted.insert(ev.market_id.clone());
                    if dropped % 1_000 == 1 {
                        warn!(dropped, "feed channel saturated, dropping book deltas");
                    }
                }
                Err(mpsc::error::TrySendError::Closed(_)) => return false,
            }
        } else {
            // Snapshots and trades are never dropped.
            if event_tx.send(event).await.is_err() {
                return false;
            }
        }
    }
    true
}

/// Parse one WS text frame into zero or more tape events, enforcing the
/// snapshot-first discipline.
fn normalize_frame(text: &str, state: &mut SessionState, now: DateTime<Utc>) -> Vec<TapeEvent> {
    let generic: GenericMessage = match serde_json::from_str(text) {
        Ok(g) => g,
        Err(e) => {
            state.protocol_error("", "unknown", &e.to_string());
            return Vec::new();
        }
    };

    match generic.event_type.as_deref() {
        Some("book") => {
            let book: BookMessage = match serde_json::from_str(text) {
                Ok(b) => b,
                Err(e) => {
                    state.protocol_error("", "book", &e.to_string());
                    return Vec::new();
                }
            };
            let market_id = book.market.clone();
            let bids = parse_levels(&book.bids);
            let asks = parse_levels(&book.asks);
            state.snapshotted.insert(market_id.clone());
            vec![TapeEvent {
                market_id,
                source_ts: parse_ts_millis(&book.timestamp).unwrap_or(now),
                local_ts: now,
                seq: book.seq,
                body: TapeBody::BookSnapshot { bids, asks },
            }]
        }
        Some("price_change") => {
            let msg: PriceChangeMessage = match serde_json::from_str(text) {
                Ok(m) => m,
                Err(e) => {
                    state.protocol_error("", "price_change", &e.to_string());
                    return Vec::new();
                }
            };
            let market_id = msg.market.clone();
            if !state.snapshotted.contains(&market_id) {
                // Delta before the session's first snapshot: discard.
                debug!(market_id = %market_id, "delta before snapshot discarded");
                return Vec::new();
            }
            let mut changes = Vec::with_capacity(msg.price_changes.len());
            for pc in &msg.price_changes {
                let side = match Side::from_str(&pc.side) {
                    Ok(s) => s,
                    Err(_) => {
                        state.protocol_error(&market_id, "price_change", "bad side");
                        continue;
                    }
                };
                let (price, size) = match (
                    Decimal::from_str(&pc.price),
                    Decimal::from_str(&pc.size),
                ) {
                    (Ok(p), Ok(s)) => (p, s),
                    _ => {
                        state.protocol_error(&market_id, "price_change", "bad numerics");
                        continue;
                    }
                };
                changes.push(LevelChange { side, price, size });
            }
            if changes.is_empty() {
                return Vec::new();
            }
            vec![TapeEvent {
                market_id,
                source_ts: parse_ts_millis(&msg.timestamp).unwrap_or(now),
                local_ts: now,
                seq: msg.seq,
                body: TapeBody::BookDelta { changes },
            }]
        }
        Some("last_trade_price") => {
            let msg: TradeMessage = match serde_json::from_str(text) {
                Ok(m) => m,
                Err(e) => {
                    state.protocol_error("", "last_trade_price", &e.to_string());
                    return Vec::new();
                }
            };
            let market_id = msg.market.clone();
            let side = match Side::from_str(&msg.side) {
                Ok(s) => s,
                Err(_) => {
                    state.protocol_error(&market_id, "last_trade_price", "bad side");
                    return Vec::new();
                }
            };
            let (price, size) = match (Decimal::from_str(&msg.price), Decimal::from_str(&msg.size)) {
                (Ok(p), Ok(s)) => (p, s),
                _ => {
                    state.protocol_error(&market_id, "last_trade_price", "bad numerics");
                    return Vec::new();
                }
            };
            vec![TapeEvent {
                market_id,
                source_ts: parse_ts_millis(&msg.timestamp).unwrap_or(now),
                local_ts: now,
                seq: None,
                body: TapeBody::Trade { price, size, side },
            }]
        }
        Some(other) => {
            state.protocol_error("", other, "unrecognized event kind");
            Vec::new()
        }
        None => Vec::new(), // acks and heartbeats carry no event_type
    }
}

fn parse_levels(raw: &[prism_market::types::OrderSummary]) -> Vec<PriceLevel> {
    raw.iter()
        .filter_map(|l| {
            let price = Decimal::from_str(&l.price).ok()?;
            let size = Decimal::from_str(&l.size).ok()?;
            Some(PriceLevel::new(price, size))
        })
        .collect()
}

fn parse_ts_millis(ts: &str) -> Option<DateTime<Utc>> {
    ts.parse::<i64>()
        .ok()
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
}
