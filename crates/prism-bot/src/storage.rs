//! SQLite persistence.
//!
//! A single [`SqliteStore`] wraps the connection; at runtime it is owned by a
//! dedicated writer task fed through a bounded channel, so the scheduler
//! never touches the database directly. Tape writes are best-effort (dropped
//! with a counter under backpressure); order, fill, position, and PnL writes
//! are acknowledged and retried until they land.
//!
//! All money fields are stored as decimal strings to avoid floating-point
//! drift; timestamps are epoch seconds (REAL) so tape replay can order rows
//! cheaply.

use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use prism_common::{OrderStatus, Side};
use prism_market::MarketMeta;
use rust_decimal::Decimal;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::broker::{Fill, Order};
use crate::feed::TapeEvent;
use crate::portfolio::Position;

/// Errors from the storage layer.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

fn ts_to_f64(ts: DateTime<Utc>) -> f64 {
    ts.timestamp_micros() as f64 / 1_000_000.0
}

fn f64_to_ts(v: f64) -> DateTime<Utc> {
    Utc.timestamp_micros((v * 1_000_000.0).round() as i64)
        .single()
        .unwrap_or_else(|| Utc.timestamp_opt(0, 0).unwrap())
}

fn parse_decimal(s: &str, what: &str) -> Result<Decimal, StoreError> {
    Decimal::from_str(s).map_err(|_| StoreError::Corrupt(format!("{}: {:?}", what, s)))
}

/// A persisted tape row, as read back for replay.
#[derive(Debug, Clone)]
pub struct TapeRow {
    pub id: i64,
    pub market_id: String,
    pub local_ts: DateTime<Utc>,
    pub source_ts: DateTime<Utc>,
    pub kind: String,
    pub payload: String,
}

/// SQLite store. One connection, WAL mode.
pub struct SqliteStore {
    conn: Mutex<rusqlite::Connection>,
}

impl SqliteStore {
    /// Open (creating parent directories) and initialize the schema.
    pub async fn open(db_path: &str) -> Result<Self, StoreError> {
        if db_path != ":memory:" {
            if let Some(parent) = Path::new(db_path).parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent).await?;
                }
            }
        }

        let conn = rusqlite::Connection::open(db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.create_tables().await?;
        info!(path = %db_path, "database initialized");
        Ok(store)
    }

    async fn create_tables(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS markets (
                market_id TEXT PRIMARY KEY,
                event_id TEXT NOT NULL,
                question TEXT,
                tick_size TEXT NOT NULL,
                min_size TEXT NOT NULL,
                status TEXT NOT NULL,
                volume_24h_usd TEXT,
                liquidity_usd TEXT,
                updated_ts REAL
            );

            CREATE TABLE IF NOT EXISTS tape (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                market_id TEXT NOT NULL,
                local_ts REAL NOT NULL,
                source_ts REAL NOT NULL,
                kind TEXT NOT NULL,
                payload TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_tape_local_ts ON tape(local_ts);
            CREATE INDEX IF NOT EXISTS idx_tape_market ON tape(market_id, local_ts);

            CREATE TABLE IF NOT EXISTS orders (
                order_id TEXT PRIMARY KEY,
                market_id TEXT NOT NULL,
                side TEXT NOT NULL,
                price TEXT NOT NULL,
                size TEXT NOT NULL,
                status TEXT NOT NULL,
                created_ts REAL NOT NULL,
                rested_since_ts REAL NOT NULL,
                filled_size TEXT NOT NULL,
                avg_fill_price TEXT NOT NULL,
                reason TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_orders_market ON orders(market_id, created_ts);

            CREATE TABLE IF NOT EXISTS fills (
                fill_id TEXT PRIMARY KEY,
                order_id TEXT NOT NULL,
                market_id TEXT NOT NULL,
                side TEXT NOT NULL,
                price TEXT NOT NULL,
                size TEXT NOT NULL,
                ts REAL NOT NULL,
                fees TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_fills_market ON fills(market_id, ts);

            CREATE TABLE IF NOT EXISTS positions (
                market_id TEXT PRIMARY KEY,
                event_id TEXT NOT NULL,
                net_size TEXT NOT NULL,
                avg_price TEXT NOT NULL,
                realized_pnl TEXT NOT NULL,
                updated_ts REAL NOT NULL
            );

            CREATE TABLE IF NOT EXISTS pnl (
                ts REAL PRIMARY KEY,
                unrealized TEXT NOT NULL,
                realized TEXT NOT NULL,
                open_markets INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS scanner_snapshots (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ts REAL NOT NULL,
                eligible_count INTEGER NOT NULL,
                top_count INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS watchlist (
                rank INTEGER PRIMARY KEY,
                market_id TEXT NOT NULL,
                score REAL NOT NULL,
                ts REAL NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    pub async fn upsert_markets(&self, markets: &[MarketMeta]) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        let now = ts_to_f64(Utc::now());
        let mut stmt = conn.prepare_cached(
            r#"
            INSERT INTO markets(market_id, event_id, question, tick_size, min_size, status,
                                volume_24h_usd, liquidity_usd, updated_ts)
            VALUES(?1,?2,?3,?4,?5,?6,?7,?8,?9)
            ON CONFLICT(market_id) DO UPDATE SET
                event_id=excluded.event_id,
                question=excluded.question,
                tick_size=excluded.tick_size,
                min_size=excluded.min_size,
                status=excluded.status,
                volume_24h_usd=excluded.volume_24h_usd,
                liquidity_usd=excluded.liquidity_usd,
                updated_ts=excluded.updated_ts
            "#,
        )?;
        for m in markets {
            stmt.execute(rusqlite::params![
                m.market_id,
                m.event_id,
                m.question,
                m.tick_size.to_string(),
                m.min_size.to_string(),
                if m.active { "open" } else { "closed" },
                m.volume_24h_usd.to_string(),
                m.liquidity_usd.to_string(),
                now,
            ])?;
        }
        Ok(())
    }

    pub async fn insert_tape(&self, ev: &TapeEvent) -> Result<(), StoreError> {
        let payload = serde_json::to_string(&ev.body)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO tape(market_id, local_ts, source_ts, kind, payload) VALUES(?1,?2,?3,?4,?5)",
            rusqlite::params![
                ev.market_id,
                ts_to_f64(ev.local_ts),
                ts_to_f64(ev.source_ts),
                ev.body.kind(),
                payload,
            ],
        )?;
        Ok(())
    }

    /// Load tape rows within `[start_ts, end_ts]` in `local_ts` order.
    pub async fn load_tape(
        &self,
        start_ts: Option<f64>,
        end_ts: Option<f64>,
    ) -> Result<Vec<TapeRow>, StoreError> {
        let conn = self.conn.lock().await;
        let mut sql =
            "SELECT id, market_id, local_ts, source_ts, kind, payload FROM tape WHERE 1=1"
                .to_string();
        let mut params: Vec<f64> = Vec::new();
        if let Some(start) = start_ts {
            sql.push_str(" AND local_ts >= ?");
            params.push(start);
        }
        if let Some(end) = end_ts {
            sql.push_str(" AND local_ts <= ?");
            params.push(end);
        }
        sql.push_str(" ORDER BY local_ts ASC, id ASC");

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(params), |row| {
            Ok(TapeRow {
                id: row.get(0)?,
                market_id: row.get(1)?,
                local_ts: f64_to_ts(row.get(2)?),
                source_ts: f64_to_ts(row.get(3)?),
                kind: row.get(4)?,
                payload: row.get(5)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub async fn insert_order(&self, order: &Order) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"
            INSERT OR REPLACE INTO orders(order_id, market_id, side, price, size, status,
                                          created_ts, rested_since_ts, filled_size,
                                          avg_fill_price, reason)
            VALUES(?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)
            "#,
            rusqlite::params![
                order.order_id,
                order.market_id,
                order.side.to_string(),
                order.price.to_string(),
                order.size.to_string(),
                order.status.to_string(),
                ts_to_f64(order.created_ts),
                ts_to_f64(order.rested_since_ts),
                order.filled_size.to_string(),
                order.avg_fill_price.to_string(),
                order.reason,
            ],
        )?;
        Ok(())
    }

    pub async fn update_order_status(
        &self,
        order_id: &str,
        status: OrderStatus,
        filled_size: Decimal,
        avg_fill_price: Decimal,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE orders SET status=?1, filled_size=?2, avg_fill_price=?3 WHERE order_id=?4",
            rusqlite::params![
                status.to_string(),
                filled_size.to_string(),
                avg_fill_price.to_string(),
                order_id,
            ],
        )?;
        Ok(())
    }

    pub async fn insert_fill(&self, fill: &Fill) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"
            INSERT OR REPLACE INTO fills(fill_id, order_id, market_id, side, price, size, ts, fees)
            VALUES(?1,?2,?3,?4,?5,?6,?7,?8)
            "#,
            rusqlite::params![
                fill.fill_id,
                fill.order_id,
                fill.market_id,
                fill.side.to_string(),
                fill.price.to_string(),
                fill.size.to_string(),
                ts_to_f64(fill.ts),
                fill.fees.to_string(),
            ],
        )?;
        Ok(())
    }

    pub async fn upsert_position(&self, position: &Position) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"
            INSERT INTO positions(market_id, event_id, net_size, avg_price, realized_pnl, updated_ts)
            VALUES(?1,?2,?3,?4,?5,?6)
            ON CONFLICT(market_id) DO UPDATE SET
                event_id=excluded.event_id,
                net_size=excluded.net_size,
                avg_price=excluded.avg_price,
                realized_pnl=excluded.realized_pnl,
                updated_ts=excluded.updated_ts
            "#,
            rusqlite::params![
                position.market_id,
                position.event_id,
                position.net_size.to_string(),
                position.avg_price.to_string(),
                position.realized_pnl.to_string(),
                ts_to_f64(Utc::now()),
            ],
        )?;
        Ok(())
    }

    pub async fn insert_pnl_snapshot(
        &self,
        ts: DateTime<Utc>,
        unrealized: Decimal,
        realized: Decimal,
        open_markets: usize,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR REPLACE INTO pnl(ts, unrealized, realized, open_markets) VALUES(?1,?2,?3,?4)",
            rusqlite::params![
                ts_to_f64(ts),
                unrealized.to_string(),
                realized.to_string(),
                open_markets as i64,
            ],
        )?;
        Ok(())
    }

    pub async fn insert_scanner_snapshot(
        &self,
        ts: DateTime<Utc>,
        eligible_count: usize,
        top_count: usize,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO scanner_snapshots(ts, eligible_count, top_count) VALUES(?1,?2,?3)",
            rusqlite::params![ts_to_f64(ts), eligible_count as i64, top_count as i64],
        )?;
        Ok(())
    }

    /// Rewrite the ranked watchlist.
    pub async fn update_watchlist(
        &self,
        entries: &[(usize, String, f64)],
        ts: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute("DELETE FROM watchlist", [])?;
        let mut stmt = conn
            .prepare_cached("INSERT INTO watchlist(rank, market_id, score, ts) VALUES(?1,?2,?3,?4)")?;
        for (rank, market_id, score) in entries {
            stmt.execute(rusqlite::params![*rank as i64, market_id, score, ts_to_f64(ts)])?;
        }
        Ok(())
    }

    /// Open and partially-filled orders, for restart restore.
    pub async fn fetch_open_orders(&self) -> Result<Vec<Order>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            r#"
            SELECT order_id, market_id, side, price, size, status, created_ts,
                   rested_since_ts, filled_size, avg_fill_price, reason
            FROM orders WHERE status IN ('open', 'partial')
            ORDER BY created_ts ASC
            "#,
        )?;
        let rows: Vec<Order> = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, f64>(6)?,
                    row.get::<_, f64>(7)?,
                    row.get::<_, String>(8)?,
                    row.get::<_, String>(9)?,
                    row.get::<_, Option<String>>(10)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .map(|r| {
                Ok(Order {
                    order_id: r.0,
                    market_id: r.1,
                    side: Side::from_str(&r.2)
                        .map_err(StoreError::Corrupt)?,
                    price: parse_decimal(&r.3, "order price")?,
                    size: parse_decimal(&r.4, "order size")?,
                    status: OrderStatus::from_str(&r.5)
                        .map_err(StoreError::Corrupt)?,
                    created_ts: f64_to_ts(r.6),
                    rested_since_ts: f64_to_ts(r.7),
                    filled_size: parse_decimal(&r.8, "order filled size")?,
                    avg_fill_price: parse_decimal(&r.9, "order avg fill price")?,
                    reason: r.10,
                })
            })
            .collect::<Result<Vec<_>, StoreError>>()?;
        Ok(rows)
    }

    /// Every order row, oldest first.
    pub async fn fetch_all_orders(&self) -> Result<Vec<Order>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            r#"
            SELECT order_id, market_id, side, price, size, status, created_ts,
                   rested_since_ts, filled_size, avg_fill_price, reason
            FROM orders ORDER BY created_ts ASC, order_id ASC
            "#,
        )?;
        let raw: Vec<(
            String,
            String,
            String,
            String,
            String,
            String,
            f64,
            f64,
            String,
            String,
            Option<String>,
        )> = stmt
            .query_map([], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                    row.get(7)?,
                    row.get(8)?,
                    row.get(9)?,
                    row.get(10)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        raw.into_iter()
            .map(|r| {
                Ok(Order {
                    order_id: r.0,
                    market_id: r.1,
                    side: Side::from_str(&r.2).map_err(StoreError::Corrupt)?,
                    price: parse_decimal(&r.3, "order price")?,
                    size: parse_decimal(&r.4, "order size")?,
                    status: OrderStatus::from_str(&r.5).map_err(StoreError::Corrupt)?,
                    created_ts: f64_to_ts(r.6),
                    rested_since_ts: f64_to_ts(r.7),
                    filled_size: parse_decimal(&r.8, "order filled size")?,
                    avg_fill_price: parse_decimal(&r.9, "order avg fill price")?,
                    reason: r.10,
                })
            })
            .collect()
    }

    /// All persisted positions, for restart rehydration.
    pub async fn fetch_positions(&self) -> Result<Vec<Position>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT market_id, event_id, net_size, avg_price, realized_pnl FROM positions",
        )?;
        let raw: Vec<(String, String, String, String, String)> = stmt
            .query_map([], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        raw.into_iter()
            .map(|(market_id, event_id, net, avg, realized)| {
                Ok(Position {
                    market_id,
                    event_id,
                    net_size: parse_decimal(&net, "position net_size")?,
                    avg_price: parse_decimal(&avg, "position avg_price")?,
                    realized_pnl: parse_decimal(&realized, "position realized_pnl")?,
                    last_mark: Decimal::ZERO,
                    opened_ts: None,
                })
            })
            .collect()
    }

    pub async fn fetch_fills(&self) -> Result<Vec<Fill>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT fill_id, order_id, market_id, side, price, size, ts, fees FROM fills ORDER BY ts ASC",
        )?;
        let raw: Vec<(String, String, String, String, String, String, f64, String)> = stmt
            .query_map([], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                    row.get(7)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        raw.into_iter()
            .map(|r| {
                Ok(Fill {
                    fill_id: r.0,
                    order_id: r.1,
                    market_id: r.2,
                    side: Side::from_str(&r.3).map_err(StoreError::Corrupt)?,
                    price: parse_decimal(&r.4, "fill price")?,
                    size: parse_decimal(&r.5, "fill size")?,
                    ts: f64_to_ts(r.6),
                    fees: parse_decimal(&r.7, "fill fees")?,
                })
            })
            .collect()
    }

    /// Wipe paper trading state (orders, fills, positions, pnl); the tape and
    /// market cache survive so backtests remain possible.
    pub async fn clear_trading_state(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute_batch(
            "DELETE FROM orders; DELETE FROM fills; DELETE FROM positions; DELETE FROM pnl;",
        )?;
        Ok(())
    }

    pub async fn count_rows(&self, table: &str) -> Result<i64, StoreError> {
        // Table names come from code, never user input.
        let conn = self.conn.lock().await;
        let count =
            conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?;
        Ok(count)
    }
}

/// Messages accepted by the storage writer task.
#[derive(Debug)]
pub enum StoreMsg {
    Tape(TapeEvent),
    UpsertMarkets(Vec<MarketMeta>),
    Order(Order),
    OrderStatus {
        order_id: String,
        status: OrderStatus,
        filled_size: Decimal,
        avg_fill_price: Decimal,
    },
    Fill(Fill),
    Position(Position),
    Pnl {
        ts: DateTime<Utc>,
        unrealized: Decimal,
        realized: Decimal,
        open_markets: usize,
    },
    Watchlist {
        entries: Vec<(usize, String, f64)>,
        ts: DateTime<Utc>,
    },
    ScannerSnapshot {
        ts: DateTime<Utc>,
        eligible_count: usize,
        top_count: usize,
    },
}

/// Handle used by the engine to post writes to the storage task.
#[derive(Clone)]
pub struct StoreHandle {
    tx: mpsc::Sender<StoreMsg>,
    tape_dropped: Arc<AtomicU64>,
}

impl StoreHandle {
    /// Best-effort tape write: dropped (and counted) when the queue is full.
    pub fn record_tape(&self, ev: &TapeEvent) {
        if self.tx.try_send(StoreMsg::Tape(ev.clone())).is_err() {
            let dropped = self.tape_dropped.fetch_add(1, Ordering::Relaxed) + 1;
            if dropped % 1_000 == 1 {
                warn!(dropped, "storage queue saturated, dropping tape writes");
            }
        }
    }

    /// Acknowledged write: awaits queue capacity, never dropped.
    pub async fn record(&self, msg: StoreMsg) {
        if self.tx.send(msg).await.is_err() {
            error!("storage writer gone; critical write lost");
        }
    }

    pub fn tape_dropped(&self) -> u64 {
        self.tape_dropped.load(Ordering::Relaxed)
    }
}

/// Spawn the storage writer task. The returned handle feeds it; dropping
/// every handle lets the writer drain its queue and exit.
pub fn spawn_writer(
    store: Arc<SqliteStore>,
    capacity: usize,
) -> (StoreHandle, tokio::task::JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<StoreMsg>(capacity);
    let handle = StoreHandle {
        tx,
        tape_dropped: Arc::new(AtomicU64::new(0)),
    };

    let task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let is_tape = matches!(msg, StoreMsg::Tape(_));
            let mut backoff = Duration::from_secs(1);
            loop {
                let result = apply_msg(&store, &msg).await;
                match result {
                    Ok(()) => break,
                    Err(e) if is_tape => {
                        // Tape is best-effort end to end.
                        warn!(error = %e, "tape write failed, dropping row");
                        break;
                    }
                    Err(e) => {
                        error!(error = %e, retry_in_secs = backoff.as_secs(), "critical storage write failed");
                        tokio::time::sleep(backoff).await;
                        backoff = (backoff * 2).min(Duration::from_secs(30));
                    }
                }
            }
        }
        info!("storage writer drained and stopped");
    });

    (handle, task)
}

async fn apply_msg(store: &SqliteStore, msg: &StoreMsg) -> Result<(), StoreError> {
    match msg {
        StoreMsg::Tape(ev) => store.insert_tape(ev).await,
        StoreMsg::UpsertMarkets(markets) => store.upsert_markets(markets).await,
        StoreMsg::Order(order) => store.insert_order(order).await,
        StoreMsg::OrderStatus {
            order_id,
            status,
            filled_size,
            avg_fill_price,
        } => {
            store
                .update_order_status(order_id, *status, *filled_size, *avg_fill_price)
                .await
        }
        StoreMsg::Fill(fill) => store.insert_fill(fill).await,
        StoreMsg::Position(position) => store.upsert_position(position).await,
        StoreMsg::Pnl {
            ts,
            unrealized,
            realized,
            open_markets,
        } => {
            store
                .insert_pnl_snapshot(*ts, *unrealized, *realized, *open_markets)
                .await
        }
        StoreMsg::Watchlist { entries, ts } => store.update_watchlist(entries, *ts).await,
        StoreMsg::ScannerSnapshot {
            ts,
            eligible_count,
            top_count,
        } => {
            store
                .insert_scanner_snapshot(*ts, *eligible_count, *top_count)
                .await
        }
    }
}
