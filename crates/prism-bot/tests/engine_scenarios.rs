//! End-to-end scenarios through the scheduler: feed events in, fills,
//! positions, and persisted rows out.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::broadcast;

use prism_bot::broker::{Fill, PaperBroker};
use prism_bot::config::{BotConfig, ExecutionMode, FillModel};
use prism_bot::feed::mock::{MockFeed, MockFeedConfig};
use prism_bot::feed::{LevelChange, TapeBody, TapeEvent};
use prism_bot::portfolio::Portfolio;
use prism_bot::scheduler::Scheduler;
use prism_bot::storage::{spawn_writer, SqliteStore, StoreHandle};
use prism_bot::strategy::{FvProvider, MarketMakerStrategy, Strategy};
use prism_common::{PriceLevel, Side};

fn test_config(fill_model: FillModel) -> BotConfig {
    let mut config = BotConfig::default();
    config.paper.fill_model = fill_model;
    config.paper.min_rest_secs = 0.0;
    config.mm.edge_ticks = dec!(0);
    config.mm.skew_k = dec!(0);
    config.mm.min_quote_life_secs = 0.0;
    config.mm.min_half_spread = dec!(0.005);
    config
}

fn idle_feed() -> MockFeed {
    MockFeed::new(MockFeedConfig {
        max_events: Some(0),
        ..Default::default()
    })
}

async fn build_scheduler(
    config: BotConfig,
    portfolio: Portfolio,
) -> (Scheduler<MockFeed>, Arc<SqliteStore>, StoreHandle, tokio::task::JoinHandle<()>) {
    let store = Arc::new(SqliteStore::open(":memory:").await.unwrap());
    let (handle, writer) = spawn_writer(store.clone(), 4096);
    let broker = PaperBroker::new(config.paper.clone(), ExecutionMode::Paper, handle.clone());
    let mut strategies = Vec::new();
    if config.strategies.market_maker {
        strategies.push(Strategy::MarketMaker(MarketMakerStrategy::new(
            config.mm.clone(),
            config.target_size,
            config.risk.max_position_per_market,
        )));
    }
    // The scheduler is driven directly via process_event; run() is never
    // polled, so the shutdown channel can close immediately.
    let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let scheduler = Scheduler::new(
        config,
        idle_feed(),
        broker,
        portfolio,
        strategies,
        FvProvider::Stub,
        handle.clone(),
        shutdown_rx,
    )
    .with_simulated_time();
    (scheduler, store, handle, writer)
}

fn snapshot(market_id: &str, ts: DateTime<Utc>, bids: &[(Decimal, Decimal)], asks: &[(Decimal, Decimal)]) -> TapeEvent {
    TapeEvent {
        market_id: market_id.to_string(),
        source_ts: ts,
        local_ts: ts,
        seq: None,
        body: TapeBody::BookSnapshot {
            bids: bids.iter().map(|(p, s)| PriceLevel::new(*p, *s)).collect(),
            asks: asks.iter().map(|(p, s)| PriceLevel::new(*p, *s)).collect(),
        },
    }
}

fn delta(market_id: &str, ts: DateTime<Utc>, changes: &[(Side, Decimal, Decimal)]) -> TapeEvent {
    TapeEvent {
        market_id: market_id.to_string(),
        source_ts: ts,
        local_ts: ts,
        seq: None,
        body: TapeBody::BookDelta {
            changes: changes
                .iter()
                .map(|(side, price, size)| LevelChange {
                    side: *side,
                    price: *price,
                    size: *size,
                })
                .collect(),
        },
    }
}

fn trade(market_id: &str, ts: DateTime<Utc>, price: Decimal, size: Decimal, side: Side) -> TapeEvent {
    TapeEvent {
        market_id: market_id.to_string(),
        source_ts: ts,
        local_ts: ts,
        seq: None,
        body: TapeBody::Trade { price, size, side },
    }
}

/// Scenario: single-market market-making cycle under the maker-touch model.
/// A quote pair goes out, the ask collapses onto our bid, the bid fills at
/// its limit, and a fresh pair is quoted around the new mid.
#[tokio::test]
async fn test_single_market_mm_cycle() {
    let (mut scheduler, store, handle, writer) =
        build_scheduler(test_config(FillModel::MakerTouch), Portfolio::new(Utc::now())).await;
    let t0 = Utc::now();

    // Seed book: MM quotes 0.49 / 0.51 around mid 0.50.
    scheduler
        .process_event(snapshot("m1", t0, &[(dec!(0.49), dec!(100))], &[(dec!(0.51), dec!(100))]))
        .await;
    let quotes = scheduler.broker().open_orders("m1", t0);
    assert_eq!(quotes.len(), 2);
    let bid = quotes.iter().find(|o| o.side == Side::Buy).unwrap();
    let ask = quotes.iter().find(|o| o.side == Side::Sell).unwrap();
    assert_eq!(bid.price, dec!(0.49));
    assert_eq!(ask.price, dec!(0.51));
    assert_eq!(bid.size, dec!(10));

    // Ask collapses to 0.49: our resting bid is hit for its full size.
    scheduler
        .process_event(delta(
            "m1",
            t0 + Duration::milliseconds(100),
            &[
                (Side::Sell, dec!(0.51), dec!(0)),
                (Side::Sell, dec!(0.49), dec!(50)),
            ],
        ))
        .await;

    let position = scheduler.portfolio().get("m1").unwrap();
    assert_eq!(position.net_size, dec!(10));
    assert_eq!(position.avg_price, dec!(0.49));

    // Book re-forms around a lower mid: a fresh pair goes out.
    scheduler
        .process_event(snapshot(
            "m1",
            t0 + Duration::milliseconds(200),
            &[(dec!(0.47), dec!(100))],
            &[(dec!(0.49), dec!(50))],
        ))
        .await;

    let quotes = scheduler
        .broker()
        .open_orders("m1", t0 + Duration::milliseconds(200));
    let bids: Vec<_> = quotes.iter().filter(|o| o.side == Side::Buy).collect();
    let asks: Vec<_> = quotes.iter().filter(|o| o.side == Side::Sell).collect();
    assert_eq!(bids.len(), 1, "one live bid after requote");
    assert_eq!(asks.len(), 1, "one live ask after requote");
    let new_mid = dec!(0.48);
    assert!(bids[0].price < new_mid);
    assert!(asks[0].price > new_mid);

    // The fill and the updated position both landed in storage.
    drop(handle);
    drop(scheduler);
    writer.await.unwrap();
    let fills = store.fetch_fills().await.unwrap();
    assert_eq!(fills.len(), 1);
    assert_eq!(fills[0].price, dec!(0.49));
    assert_eq!(fills[0].size, dec!(10));
    let positions = store.fetch_positions().await.unwrap();
    let p = positions.iter().find(|p| p.market_id == "m1").unwrap();
    assert_eq!(p.net_size, dec!(10));
}

/// Scenario: trade-through semantics. The same resting bid only fills when a
/// print crosses its price.
#[tokio::test]
async fn test_trade_through_fill() {
    let (mut scheduler, _store, _handle, _writer) =
        build_scheduler(test_config(FillModel::TradeThrough), Portfolio::new(Utc::now())).await;
    let t0 = Utc::now();

    scheduler
        .process_event(snapshot("m1", t0, &[(dec!(0.49), dec!(100))], &[(dec!(0.51), dec!(100))]))
        .await;
    assert_eq!(scheduler.broker().open_orders("m1", t0).len(), 2);

    // A book move alone does not fill in trade-through mode.
    scheduler
        .process_event(delta(
            "m1",
            t0 + Duration::milliseconds(100),
            &[(Side::Sell, dec!(0.50), dec!(30))],
        ))
        .await;
    assert!(scheduler.portfolio().get("m1").is_none());

    // A print at 0.485 lifts the 0.49 bid: min(10, 20 * 0.5) = 10.
    scheduler
        .process_event(trade(
            "m1",
            t0 + Duration::milliseconds(200),
            dec!(0.485),
            dec!(20),
            Side::Sell,
        ))
        .await;

    let position = scheduler.portfolio().get("m1").unwrap();
    assert_eq!(position.net_size, dec!(10));
    assert_eq!(position.avg_price, dec!(0.49));
}

/// Scenario: per-market position cap. At the cap, the growing side is
/// withheld and only the reducing side is quoted.
#[tokio::test]
async fn test_position_cap_quotes_reduce_only() {
    let mut config = test_config(FillModel::MakerTouch);
    config.risk.max_position_per_market = dec!(10);

    let mut portfolio = Portfolio::new(Utc::now());
    portfolio.apply_fill(
        &Fill {
            fill_id: "f0".to_string(),
            order_id: "o0".to_string(),
            market_id: "m1".to_string(),
            side: Side::Buy,
            price: dec!(0.50),
            size: dec!(10),
            ts: Utc::now(),
            fees: dec!(0),
        },
        "event:m1",
    );

    let (mut scheduler, _store, _handle, _writer) = build_scheduler(config, portfolio).await;
    let t0 = Utc::now();
    scheduler
        .process_event(snapshot("m1", t0, &[(dec!(0.49), dec!(100))], &[(dec!(0.51), dec!(100))]))
        .await;

    let quotes = scheduler.broker().open_orders("m1", t0);
    assert_eq!(quotes.len(), 1, "only the reducing side may quote at the cap");
    assert_eq!(quotes[0].side, Side::Sell);
}

/// Scenario: feed lag gates placements but cancels still go through.
#[tokio::test]
async fn test_feed_lag_pulls_quotes() {
    let (mut scheduler, _store, _handle, _writer) =
        build_scheduler(test_config(FillModel::MakerTouch), Portfolio::new(Utc::now())).await;
    let t0 = Utc::now();

    // Healthy book: quotes go out.
    scheduler
        .process_event(snapshot("m1", t0, &[(dec!(0.49), dec!(100))], &[(dec!(0.51), dec!(100))]))
        .await;
    assert_eq!(scheduler.broker().open_orders("m1", t0).len(), 2);

    // Lagged event: arrival runs 150ms behind the source timestamp.
    let mut ev = snapshot(
        "m1",
        t0 + Duration::milliseconds(100),
        &[(dec!(0.49), dec!(100))],
        &[(dec!(0.51), dec!(100))],
    );
    ev.local_ts = ev.source_ts + Duration::milliseconds(150);
    scheduler.process_event(ev).await;

    // The unhealthy feed makes the strategy pull both quotes; the cancels
    // pass without touching risk.
    let open = scheduler.broker().open_orders("m1", t0 + Duration::seconds(1));
    assert!(open.is_empty(), "quotes pulled under feed lag, got {:?}", open);
    // No placements were even attempted, so nothing was risk-rejected.
    assert_eq!(scheduler.broker().open_order_count(), 0);
}

/// Scenario: daily loss limit. New placements are rejected and the
/// scheduler injects flatten intents that survive the risk gate.
#[tokio::test]
async fn test_daily_loss_flattens_positions() {
    let mut config = test_config(FillModel::MakerTouch);
    config.risk.daily_loss_limit = dec!(100);

    let mut portfolio = Portfolio::new(Utc::now());
    // Realize a 150 loss in m0.
    for (side, price) in [(Side::Buy, dec!(0.50)), (Side::Sell, dec!(0.35))] {
        portfolio.apply_fill(
            &Fill {
                fill_id: format!("seed-{}", side),
                order_id: "o0".to_string(),
                market_id: "m0".to_string(),
                side,
                price,
                size: dec!(1000),
                ts: Utc::now(),
                fees: dec!(0),
            },
            "event:m0",
        );
    }
    // Carry an open long in m2.
    portfolio.apply_fill(
        &Fill {
            fill_id: "seed-pos".to_string(),
            order_id: "o1".to_string(),
            market_id: "m2".to_string(),
            side: Side::Buy,
            price: dec!(0.50),
            size: dec!(10),
            ts: Utc::now(),
            fees: dec!(0),
        },
        "event:m2",
    );
    assert_eq!(portfolio.realized_today(), dec!(-150));

    let (mut scheduler, _store, _handle, _writer) = build_scheduler(config, portfolio).await;
    let t0 = Utc::now();

    // Establish a book for m2. MM placements are rejected under the loss cap.
    scheduler
        .process_event(snapshot("m2", t0, &[(dec!(0.49), dec!(100))], &[(dec!(0.51), dec!(100))]))
        .await;
    assert!(scheduler.report().intents_rejected > 0, "opens must be rejected");

    // The periodic pass injects a flatten that crosses the spread.
    scheduler.periodic(t0 + Duration::seconds(1)).await;

    let position = scheduler.portfolio().get("m2").unwrap();
    assert_eq!(position.net_size, dec!(0), "daily-loss flatten must close m2");
}

/// Scenario: position time stop. Aged positions are unwound on the
/// scheduler's cadence, not by a risk rule.
#[tokio::test]
async fn test_time_stop_unwinds_aged_position() {
    let mut config = test_config(FillModel::MakerTouch);
    config.risk.max_pos_age_secs = 60;
    config.strategies.market_maker = false;

    let mut portfolio = Portfolio::new(Utc::now());
    let opened = Utc::now() - Duration::seconds(120);
    portfolio.apply_fill(
        &Fill {
            fill_id: "seed".to_string(),
            order_id: "o0".to_string(),
            market_id: "m1".to_string(),
            side: Side::Buy,
            price: dec!(0.50),
            size: dec!(10),
            ts: opened,
            fees: dec!(0),
        },
        "event:m1",
    );

    let (mut scheduler, _store, _handle, _writer) = build_scheduler(config, portfolio).await;
    let t0 = Utc::now();
    scheduler
        .process_event(snapshot("m1", t0, &[(dec!(0.49), dec!(100))], &[(dec!(0.51), dec!(100))]))
        .await;
    scheduler.periodic(t0 + Duration::seconds(1)).await;

    let position = scheduler.portfolio().get("m1").unwrap();
    assert_eq!(position.net_size, dec!(0), "aged position must be flattened");
}

/// Invariant: positions recomputed from the persisted fills match the
/// persisted position rows.
#[tokio::test]
async fn test_positions_recomputable_from_fills() {
    let (mut scheduler, store, handle, writer) =
        build_scheduler(test_config(FillModel::MakerTouch), Portfolio::new(Utc::now())).await;
    let t0 = Utc::now();

    scheduler
        .process_event(snapshot("m1", t0, &[(dec!(0.49), dec!(100))], &[(dec!(0.51), dec!(100))]))
        .await;
    scheduler
        .process_event(delta(
            "m1",
            t0 + Duration::milliseconds(100),
            &[
                (Side::Sell, dec!(0.51), dec!(0)),
                (Side::Sell, dec!(0.49), dec!(40)),
            ],
        ))
        .await;

    drop(handle);
    drop(scheduler);
    writer.await.unwrap();

    let fills = store.fetch_fills().await.unwrap();
    assert!(!fills.is_empty());

    let mut rebuilt = Portfolio::new(Utc::now());
    for fill in &fills {
        rebuilt.apply_fill(fill, "event:m1");
    }

    for stored in store.fetch_positions().await.unwrap() {
        let live = rebuilt.get(&stored.market_id).expect("position exists");
        assert_eq!(stored.net_size, live.net_size);
        assert_eq!(stored.avg_price, live.avg_price);
        assert_eq!(stored.realized_pnl, live.realized_pnl);
    }
}

/// Invariant: a crossed book suspends quoting until a snapshot repairs it.
#[tokio::test]
async fn test_crossed_book_suspends_quoting() {
    let (mut scheduler, _store, _handle, _writer) =
        build_scheduler(test_config(FillModel::MakerTouch), Portfolio::new(Utc::now())).await;
    let t0 = Utc::now();

    scheduler
        .process_event(snapshot("m1", t0, &[(dec!(0.49), dec!(100))], &[(dec!(0.51), dec!(100))]))
        .await;
    assert_eq!(scheduler.broker().open_orders("m1", t0).len(), 2);

    // A bid lands above the ask: crossed. Quotes must be pulled.
    scheduler
        .process_event(delta(
            "m1",
            t0 + Duration::milliseconds(100),
            &[(Side::Buy, dec!(0.52), dec!(10))],
        ))
        .await;
    // The crossing delta filled our resting ask (a buyer was willing to pay
    // through it); whatever remains live must be gone.
    let open = scheduler.broker().open_orders("m1", t0 + Duration::seconds(1));
    assert!(
        open.is_empty(),
        "no live quotes may remain on a crossed book: {:?}",
        open
    );
}

/// Invariant: an out-of-domain price in the feed fail-closes the market.
#[tokio::test]
async fn test_invariant_violation_disables_market() {
    let (mut scheduler, _store, _handle, _writer) =
        build_scheduler(test_config(FillModel::MakerTouch), Portfolio::new(Utc::now())).await;
    let t0 = Utc::now();

    scheduler
        .process_event(snapshot("m1", t0, &[(dec!(0.49), dec!(100))], &[(dec!(0.51), dec!(100))]))
        .await;
    assert_eq!(scheduler.broker().open_orders("m1", t0).len(), 2);

    // Price outside [0, 1]: fail-closed, orders cancelled, market disabled.
    scheduler
        .process_event(trade(
            "m1",
            t0 + Duration::milliseconds(100),
            dec!(1.5),
            dec!(10),
            Side::Buy,
        ))
        .await;
    assert_eq!(scheduler.report().markets_disabled, 1);
    assert!(scheduler
        .broker()
        .open_orders("m1", t0 + Duration::seconds(1))
        .is_empty());

    // Further events for the disabled market are ignored.
    scheduler
        .process_event(snapshot(
            "m1",
            t0 + Duration::milliseconds(200),
            &[(dec!(0.49), dec!(100))],
            &[(dec!(0.51), dec!(100))],
        ))
        .await;
    assert!(scheduler
        .broker()
        .open_orders("m1", t0 + Duration::seconds(1))
        .is_empty());
}
