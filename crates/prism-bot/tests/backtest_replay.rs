//! Backtest replay equivalence: the tape reader drives the identical
//! pipeline, and replaying the same tape with the same config reproduces the
//! same orders, fills, and positions.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::broadcast;

use prism_bot::broker::PaperBroker;
use prism_bot::config::{BotConfig, ExecutionMode, FillModel};
use prism_bot::feed::replay::TapeReplayFeed;
use prism_bot::feed::{TapeBody, TapeEvent};
use prism_bot::portfolio::Portfolio;
use prism_bot::scheduler::Scheduler;
use prism_bot::storage::{spawn_writer, SqliteStore};
use prism_bot::strategy::{MarketMakerStrategy, Strategy};
use prism_common::{PriceLevel, Side};

fn test_config() -> BotConfig {
    let mut config = BotConfig::default();
    config.paper.fill_model = FillModel::MakerTouch;
    config.paper.min_rest_secs = 0.0;
    config.mm.edge_ticks = dec!(0);
    config.mm.skew_k = dec!(0);
    config.mm.min_quote_life_secs = 0.0;
    // Keep scheduler-injected flattens out of the walk so the only actor is
    // the deterministic quoting loop.
    config.risk.daily_loss_limit = dec!(1000000);
    config.risk.max_open_positions = 0;
    config.risk.max_pos_age_secs = 0;
    config
}

fn dec3(v: f64) -> Decimal {
    Decimal::from_f64((v * 1000.0).round() / 1000.0).unwrap()
}

/// Deterministic synthetic tape: a seeded random walk of snapshots with
/// occasional prints, on a fixed clock.
fn build_tape(events: usize, seed: u64) -> Vec<TapeEvent> {
    let mut rng = StdRng::seed_from_u64(seed);
    let base = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
    let mut out = Vec::with_capacity(events);
    let mut mids = [0.45f64, 0.62f64];

    for i in 0..events {
        let ts: DateTime<Utc> = base + Duration::milliseconds(i as i64 * 80);
        let market = i % 2;
        let market_id = format!("m{}", market + 1);
        mids[market] = (mids[market] + rng.gen_range(-0.01..0.01)).clamp(0.05, 0.95);
        let spread = rng.gen_range(0.01..0.04);
        let bid = (mids[market] - spread / 2.0).max(0.01);
        let ask = (mids[market] + spread / 2.0).min(0.99);

        if rng.gen_bool(0.25) {
            let side = if rng.gen_bool(0.5) { Side::Buy } else { Side::Sell };
            let px = if side == Side::Buy { ask } else { bid };
            out.push(TapeEvent {
                market_id,
                source_ts: ts,
                local_ts: ts,
                seq: None,
                body: TapeBody::Trade {
                    price: dec3(px),
                    size: dec3(rng.gen_range(5.0f64..40.0).round()),
                    side,
                },
            });
        } else {
            out.push(TapeEvent {
                market_id,
                source_ts: ts,
                local_ts: ts,
                seq: None,
                body: TapeBody::BookSnapshot {
                    bids: vec![PriceLevel::new(dec3(bid), dec3(rng.gen_range(50.0f64..200.0).round()))],
                    asks: vec![PriceLevel::new(dec3(ask), dec3(rng.gen_range(50.0f64..200.0).round()))],
                },
            });
        }
    }
    out
}

/// Run the engine over a store's tape via the replay feed; everything the
/// run produces lands back in the same store.
async fn run_over_tape(store: Arc<SqliteStore>, config: BotConfig) {
    let (handle, writer) = spawn_writer(store.clone(), 8192);
    let broker = PaperBroker::new(config.paper.clone(), ExecutionMode::Paper, handle.clone());
    let strategies = vec![Strategy::MarketMaker(MarketMakerStrategy::new(
        config.mm.clone(),
        config.target_size,
        config.risk.max_position_per_market,
    ))];
    let feed = TapeReplayFeed::load(store.clone(), None, None, 0.0).await.unwrap();
    assert!(feed.event_count() > 0);

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let mut scheduler = Scheduler::new(
        config,
        feed,
        broker,
        Portfolio::new(Utc::now()),
        strategies,
        prism_bot::strategy::FvProvider::Stub,
        handle.clone(),
        shutdown_rx,
    )
    .with_simulated_time();

    let report = scheduler.run().await;
    assert!(report.events_processed > 0);

    drop(shutdown_tx);
    drop(scheduler);
    drop(handle);
    writer.await.unwrap();
}

async fn seeded_store(tape: &[TapeEvent]) -> Arc<SqliteStore> {
    let store = Arc::new(SqliteStore::open(":memory:").await.unwrap());
    for ev in tape {
        store.insert_tape(ev).await.unwrap();
    }
    store
}

#[tokio::test]
async fn test_replay_is_deterministic() {
    let tape = build_tape(400, 42);
    let store_a = seeded_store(&tape).await;
    let store_b = seeded_store(&tape).await;

    run_over_tape(store_a.clone(), test_config()).await;
    run_over_tape(store_b.clone(), test_config()).await;

    // Orders: identical ids, prices, sizes, statuses, fill state.
    let orders_a = store_a.fetch_all_orders().await.unwrap();
    let orders_b = store_b.fetch_all_orders().await.unwrap();
    assert!(!orders_a.is_empty(), "the walk must produce orders");
    assert_eq!(orders_a.len(), orders_b.len());
    for (a, b) in orders_a.iter().zip(&orders_b) {
        assert_eq!(a.order_id, b.order_id);
        assert_eq!(a.market_id, b.market_id);
        assert_eq!(a.side, b.side);
        assert_eq!(a.price, b.price);
        assert_eq!(a.size, b.size);
        assert_eq!(a.status, b.status);
        assert_eq!(a.filled_size, b.filled_size);
        assert_eq!(a.avg_fill_price, b.avg_fill_price);
        assert_eq!(a.created_ts, b.created_ts);
    }

    // Fills: byte-for-byte identical (timestamps ride the tape clock).
    let fills_a = store_a.fetch_fills().await.unwrap();
    let fills_b = store_b.fetch_fills().await.unwrap();
    assert_eq!(fills_a.len(), fills_b.len());
    for (a, b) in fills_a.iter().zip(&fills_b) {
        assert_eq!(a.fill_id, b.fill_id);
        assert_eq!(a.order_id, b.order_id);
        assert_eq!(a.price, b.price);
        assert_eq!(a.size, b.size);
        assert_eq!(a.fees, b.fees);
        assert_eq!(a.ts, b.ts);
    }

    // Positions: identical end state.
    let mut pos_a = store_a.fetch_positions().await.unwrap();
    let mut pos_b = store_b.fetch_positions().await.unwrap();
    pos_a.sort_by(|x, y| x.market_id.cmp(&y.market_id));
    pos_b.sort_by(|x, y| x.market_id.cmp(&y.market_id));
    assert_eq!(pos_a.len(), pos_b.len());
    for (a, b) in pos_a.iter().zip(&pos_b) {
        assert_eq!(a.market_id, b.market_id);
        assert_eq!(a.net_size, b.net_size);
        assert_eq!(a.avg_price, b.avg_price);
        assert_eq!(a.realized_pnl, b.realized_pnl);
    }
}

#[tokio::test]
async fn test_replay_matches_direct_processing() {
    // Run A: events pushed straight through process_event (the paper path,
    // on the tape clock). Run B: the same events loaded back through the
    // replay feed. Both must produce identical fills and positions.
    let tape = build_tape(300, 7);

    let store_a = seeded_store(&tape).await;
    {
        let (handle, writer) = spawn_writer(store_a.clone(), 8192);
        let config = test_config();
        let broker = PaperBroker::new(config.paper.clone(), ExecutionMode::Paper, handle.clone());
        let strategies = vec![Strategy::MarketMaker(MarketMakerStrategy::new(
            config.mm.clone(),
            config.target_size,
            config.risk.max_position_per_market,
        ))];
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let mut scheduler = Scheduler::new(
            config,
            prism_bot::feed::mock::MockFeed::new(prism_bot::feed::mock::MockFeedConfig {
                max_events: Some(0),
                ..Default::default()
            }),
            broker,
            Portfolio::new(Utc::now()),
            strategies,
            prism_bot::strategy::FvProvider::Stub,
            handle.clone(),
            shutdown_rx,
        )
        .with_simulated_time();
        for ev in &tape {
            scheduler.process_event(ev.clone()).await;
        }
        drop(scheduler);
        drop(handle);
        writer.await.unwrap();
    }

    let store_b = seeded_store(&tape).await;
    run_over_tape(store_b.clone(), test_config()).await;

    let fills_a = store_a.fetch_fills().await.unwrap();
    let fills_b = store_b.fetch_fills().await.unwrap();
    assert_eq!(fills_a.len(), fills_b.len());
    for (a, b) in fills_a.iter().zip(&fills_b) {
        assert_eq!(a.fill_id, b.fill_id);
        assert_eq!(a.market_id, b.market_id);
        assert_eq!(a.side, b.side);
        assert_eq!(a.price, b.price);
        assert_eq!(a.size, b.size);
    }

    let mut pos_a = store_a.fetch_positions().await.unwrap();
    let mut pos_b = store_b.fetch_positions().await.unwrap();
    pos_a.sort_by(|x, y| x.market_id.cmp(&y.market_id));
    pos_b.sort_by(|x, y| x.market_id.cmp(&y.market_id));
    assert_eq!(pos_a.len(), pos_b.len());
    for (a, b) in pos_a.iter().zip(&pos_b) {
        assert_eq!(a.net_size, b.net_size);
        assert_eq!(a.avg_price, b.avg_price);
        assert_eq!(a.realized_pnl, b.realized_pnl);
    }
}
