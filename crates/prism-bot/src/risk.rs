//! Pre-trade risk checks.
//!
//! A stateless, ordered gate over proposed placements. The first failing rule
//! wins and is the only one reported. Cancels never pass through here: they
//! are always allowed, including under the kill switch.
//!
//! Rule order:
//! 1. kill switch
//! 2. daily loss limit (reduce-only placements exempt, so flattens can run)
//! 3. feed lag
//! 4. spread circuit breaker / crossed book
//! 5. per-market position cap (strictly-reducing orders exempt)
//! 6. per-event exposure
//! 7. max open positions (only blocks opening a new market from flat)
//!
//! Position time stops are not a rule: the scheduler injects flatten intents
//! on its own cadence.

use prism_common::Side;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::config::RiskConfig;
use crate::portfolio::Portfolio;

/// Market health inputs gathered by the scheduler.
#[derive(Debug, Clone, Copy)]
pub struct MarketHealth {
    pub tick_size: Decimal,
    pub spread_bps: Decimal,
    pub crossed: bool,
    pub feed_lag_p99_ms: u64,
    /// Mid price, for exposure of the prospective order.
    pub mid: Option<Decimal>,
}

/// A proposed placement, as seen by the risk engine.
#[derive(Debug, Clone)]
pub struct Proposal<'a> {
    pub market_id: &'a str,
    pub event_id: &'a str,
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
}

/// Why a placement was rejected. Serialized into structured reject records.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum RiskRejection {
    BadSize { size: Decimal },
    BadPrice { price: Decimal, tick_size: Decimal },
    KillSwitch,
    DailyLoss { total_pnl: Decimal, limit: Decimal },
    FeedLag { p99_ms: u64, limit_ms: u64 },
    CrossedBook,
    Spread { spread_bps: Decimal, limit_bps: Decimal },
    PerMarketPosition { new_net: Decimal, limit: Decimal },
    EventExposure { exposure: Decimal, limit: Decimal },
    MaxOpenPositions { open: usize, limit: usize },
}

impl RiskRejection {
    /// Short tag used in logs and reject records.
    pub fn code(&self) -> &'static str {
        match self {
            RiskRejection::BadSize { .. } => "bad_size",
            RiskRejection::BadPrice { .. } => "bad_price",
            RiskRejection::KillSwitch => "kill_switch",
            RiskRejection::DailyLoss { .. } => "daily_loss",
            RiskRejection::FeedLag { .. } => "feed_lag",
            RiskRejection::CrossedBook => "crossed_book",
            RiskRejection::Spread { .. } => "spread",
            RiskRejection::PerMarketPosition { .. } => "per_market_position",
            RiskRejection::EventExposure { .. } => "event_exposure",
            RiskRejection::MaxOpenPositions { .. } => "max_open_positions",
        }
    }
}

/// Stateless risk gate.
#[derive(Debug, Clone)]
pub struct RiskEngine {
    config: RiskConfig,
}

impl RiskEngine {
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// Gate a proposed placement. `kill_switch` is the live operational flag
    /// (config value OR'd with any auto-trip by the scheduler).
    pub fn check(
        &self,
        proposal: &Proposal<'_>,
        health: &MarketHealth,
        portfolio: &Portfolio,
        kill_switch: bool,
    ) -> Result<(), RiskRejection> {
        // Intent validity precedes the numbered rules.
        if proposal.size <= Decimal::ZERO {
            return Err(RiskRejection::BadSize {
                size: proposal.size,
            });
        }
        let min_price = health.tick_size;
        let max_price = Decimal::ONE - health.tick_size;
        if proposal.price < min_price || proposal.price > max_price {
            return Err(RiskRejection::BadPrice {
                price: proposal.price,
                tick_size: health.tick_size,
            });
        }

        let cur = portfolio
            .get(proposal.market_id)
            .map(|p| p.net_size)
            .unwrap_or(Decimal::ZERO);
        let signed = proposal.size * proposal.side.sign();
        let new_net = cur + signed;
        let is_reduce_only = new_net.abs() < cur.abs();

        // 1. Kill switch: no placements, reduce-only included.
        if kill_switch {
            return Err(RiskRejection::KillSwitch);
        }

        // 2. Daily loss limit. Flatten intents are reduce-only and must pass.
        let total_pnl = portfolio.realized_today() + portfolio.total_unrealized();
        if total_pnl <= -self.config.daily_loss_limit && !is_reduce_only {
            return Err(RiskRejection::DailyLoss {
                total_pnl,
                limit: self.config.daily_loss_limit,
            });
        }

        // 3. Feed lag.
        if health.feed_lag_p99_ms > self.config.reject_feed_lag_ms {
            return Err(RiskRejection::FeedLag {
                p99_ms: health.feed_lag_p99_ms,
                limit_ms: self.config.reject_feed_lag_ms,
            });
        }

        // 4. Spread circuit breaker.
        if health.crossed {
            return Err(RiskRejection::CrossedBook);
        }
        if health.spread_bps > self.config.max_spread_bps {
            return Err(RiskRejection::Spread {
                spread_bps: health.spread_bps,
                limit_bps: self.config.max_spread_bps,
            });
        }

        // 5. Per-market position cap.
        if new_net.abs() > self.config.max_position_per_market && !is_reduce_only {
            return Err(RiskRejection::PerMarketPosition {
                new_net,
                limit: self.config.max_position_per_market,
            });
        }

        // 6. Per-event exposure: the post-trade sum of |net * mark| across
        // the event must stay under the cap. `event_exposure` already counts
        // this market's current position, so swap that contribution for the
        // post-trade one rather than stacking the order on top of it.
        let mark = health.mid.unwrap_or(proposal.price);
        let exposure = portfolio.event_exposure(proposal.event_id) - cur.abs() * mark
            + new_net.abs() * mark;
        if exposure > self.config.max_event_exposure_usd {
            return Err(RiskRejection::EventExposure {
                exposure,
                limit: self.config.max_event_exposure_usd,
            });
        }

        // 7. Open-positions cap: only blocks opening a new market from flat.
        if self.config.max_open_positions > 0 && cur.is_zero() && !new_net.is_zero() {
            let open = portfolio.open_positions_count();
            if open >= self.config.max_open_positions {
                return Err(RiskRejection::MaxOpenPositions {
                    open,
                    limit: self.config.max_open_positions,
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::Fill;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn healthy() -> MarketHealth {
        MarketHealth {
            tick_size: dec!(0.01),
            spread_bps: dec!(400),
            crossed: false,
            feed_lag_p99_ms: 20,
            mid: Some(dec!(0.50)),
        }
    }

    fn engine() -> RiskEngine {
        RiskEngine::new(RiskConfig {
            daily_loss_limit: dec!(100),
            max_position_per_market: dec!(10),
            max_event_exposure_usd: dec!(1000),
            max_open_positions: 2,
            ..Default::default()
        })
    }

    fn proposal(side: Side, price: Decimal, size: Decimal) -> Proposal<'static> {
        Proposal {
            market_id: "m1",
            event_id: "e1",
            side,
            price,
            size,
        }
    }

    fn long_position(pf: &mut Portfolio, market_id: &str, size: Decimal, price: Decimal) {
        pf.apply_fill(
            &Fill {
                fill_id: "f0".to_string(),
                order_id: "o".to_string(),
                market_id: market_id.to_string(),
                side: Side::Buy,
                price,
                size,
                ts: Utc::now(),
                fees: dec!(0),
            },
            "e1",
        );
    }

    #[test]
    fn test_clean_placement_passes() {
        let pf = Portfolio::new(Utc::now());
        let r = engine().check(&proposal(Side::Buy, dec!(0.50), dec!(5)), &healthy(), &pf, false);
        assert!(r.is_ok());
    }

    #[test]
    fn test_price_boundaries() {
        let pf = Portfolio::new(Utc::now());
        let e = engine();
        // tick and 1 - tick are accepted
        assert!(e.check(&proposal(Side::Buy, dec!(0.01), dec!(5)), &healthy(), &pf, false).is_ok());
        assert!(e.check(&proposal(Side::Sell, dec!(0.99), dec!(5)), &healthy(), &pf, false).is_ok());
        // 0 and 1 are rejected
        assert_eq!(
            e.check(&proposal(Side::Buy, dec!(0), dec!(5)), &healthy(), &pf, false)
                .unwrap_err()
                .code(),
            "bad_price"
        );
        assert_eq!(
            e.check(&proposal(Side::Sell, dec!(1), dec!(5)), &healthy(), &pf, false)
                .unwrap_err()
                .code(),
            "bad_price"
        );
    }

    #[test]
    fn test_kill_switch_blocks_everything() {
        let mut pf = Portfolio::new(Utc::now());
        long_position(&mut pf, "m1", dec!(5), dec!(0.5));
        // Even a reduce-only sell is blocked by the kill switch.
        let r = engine().check(&proposal(Side::Sell, dec!(0.50), dec!(5)), &healthy(), &pf, true);
        assert_eq!(r.unwrap_err(), RiskRejection::KillSwitch);
    }

    #[test]
    fn test_daily_loss_blocks_opens_allows_flatten() {
        let mut pf = Portfolio::new(Utc::now());
        // Realize a -150 loss: buy 10 @ 0.5 then dump 10 @ ~0 won't work in
        // [0,1]; use many units instead: buy 1000 @ 0.5, sell 1000 @ 0.35.
        long_position(&mut pf, "m1", dec!(1000), dec!(0.5));
        pf.apply_fill(
            &Fill {
                fill_id: "f".to_string(),
                order_id: "o".to_string(),
                market_id: "m1".to_string(),
                side: Side::Sell,
                price: dec!(0.35),
                size: dec!(1000),
                ts: Utc::now(),
                fees: dec!(0),
            },
            "e1",
        );
        assert_eq!(pf.realized_today(), dec!(-150));
        long_position(&mut pf, "m2", dec!(5), dec!(0.5));

        let e = engine();
        // Opening more is rejected...
        let r = e.check(&proposal(Side::Buy, dec!(0.50), dec!(5)), &healthy(), &pf, false);
        assert_eq!(r.unwrap_err().code(), "daily_loss");
        // ...but flattening m2 passes.
        let flatten = Proposal {
            market_id: "m2",
            event_id: "e1",
            side: Side::Sell,
            price: dec!(0.50),
            size: dec!(5),
        };
        assert!(e.check(&flatten, &healthy(), &pf, false).is_ok());
    }

    #[test]
    fn test_feed_lag_rejects() {
        let pf = Portfolio::new(Utc::now());
        let mut h = healthy();
        h.feed_lag_p99_ms = 150;
        let r = engine().check(&proposal(Side::Buy, dec!(0.50), dec!(5)), &h, &pf, false);
        assert_eq!(r.unwrap_err().code(), "feed_lag");
    }

    #[test]
    fn test_crossed_and_wide_spread_reject() {
        let pf = Portfolio::new(Utc::now());
        let e = engine();

        let mut h = healthy();
        h.crossed = true;
        assert_eq!(
            e.check(&proposal(Side::Buy, dec!(0.50), dec!(5)), &h, &pf, false)
                .unwrap_err(),
            RiskRejection::CrossedBook
        );

        let mut h = healthy();
        h.spread_bps = dec!(5000);
        assert_eq!(
            e.check(&proposal(Side::Buy, dec!(0.50), dec!(5)), &h, &pf, false)
                .unwrap_err()
                .code(),
            "spread"
        );
    }

    #[test]
    fn test_per_market_cap_with_reduce_exemption() {
        let mut pf = Portfolio::new(Utc::now());
        long_position(&mut pf, "m1", dec!(10), dec!(0.5));
        let e = engine();

        // Already at +10 with cap 10: buy 5 rejected with the documented reason.
        let r = e.check(&proposal(Side::Buy, dec!(0.50), dec!(5)), &healthy(), &pf, false);
        assert_eq!(r.unwrap_err().code(), "per_market_position");

        // Sell 5 strictly reduces and is accepted.
        assert!(e
            .check(&proposal(Side::Sell, dec!(0.50), dec!(5)), &healthy(), &pf, false)
            .is_ok());
    }

    #[test]
    fn test_rule_order_first_failure_wins() {
        // Feed lag AND wide spread AND over-cap all trip; feed lag (rule 3)
        // must be the one reported.
        let mut pf = Portfolio::new(Utc::now());
        long_position(&mut pf, "m1", dec!(10), dec!(0.5));
        let mut h = healthy();
        h.feed_lag_p99_ms = 500;
        h.spread_bps = dec!(9000);

        let r = engine().check(&proposal(Side::Buy, dec!(0.50), dec!(5)), &h, &pf, false);
        assert_eq!(r.unwrap_err().code(), "feed_lag");
    }

    #[test]
    fn test_event_exposure_cap() {
        let mut pf = Portfolio::new(Utc::now());
        long_position(&mut pf, "m1", dec!(10), dec!(0.5));
        pf.positions.get_mut("m1").unwrap().mark_to_market(dec!(0.5));

        let e = RiskEngine::new(RiskConfig {
            max_event_exposure_usd: dec!(7),
            max_position_per_market: dec!(1000),
            ..Default::default()
        });
        // Post-trade net +15 at mark 0.5: exposure 7.5 > 7.
        let r = e.check(&proposal(Side::Buy, dec!(0.50), dec!(5)), &healthy(), &pf, false);
        assert_eq!(r.unwrap_err().code(), "event_exposure");
    }

    #[test]
    fn test_event_exposure_flip_counts_post_trade_position() {
        // Long +5 marked at 0.9 in a lone-market event with a 6 cap.
        let mut pf = Portfolio::new(Utc::now());
        long_position(&mut pf, "m1", dec!(5), dec!(0.9));
        pf.positions.get_mut("m1").unwrap().mark_to_market(dec!(0.9));

        let e = RiskEngine::new(RiskConfig {
            max_event_exposure_usd: dec!(6),
            max_position_per_market: dec!(100),
            ..Default::default()
        });
        let mut h = healthy();
        h.mid = Some(dec!(0.9));

        // Sell 10 flips +5 -> -5: post-trade exposure is |-5| * 0.9 = 4.5,
        // inside the cap. Stacking the order on the current contribution
        // would wrongly compute 4.5 + 9 = 13.5 and reject.
        let flip = proposal(Side::Sell, dec!(0.9), dec!(10));
        assert!(e.check(&flip, &h, &pf, false).is_ok());

        // Sell 20 flips +5 -> -15: post-trade exposure 13.5 breaches the cap.
        let big_flip = proposal(Side::Sell, dec!(0.9), dec!(20));
        assert_eq!(
            e.check(&big_flip, &h, &pf, false).unwrap_err().code(),
            "event_exposure"
        );
    }

    #[test]
    fn test_max_open_positions_only_blocks_new_markets() {
        let mut pf = Portfolio::new(Utc::now());
        long_position(&mut pf, "m1", dec!(5), dec!(0.5));
        let f2 = Fill {
            fill_id: "f2".to_string(),
            order_id: "o".to_string(),
            market_id: "m2".to_string(),
            side: Side::Buy,
            price: dec!(0.5),
            size: dec!(5),
            ts: Utc::now(),
            fees: dec!(0),
        };
        pf.apply_fill(&f2, "e2");
        let e = engine(); // cap = 2, both open

        // Opening m3 from flat is rejected.
        let open_new = Proposal {
            market_id: "m3",
            event_id: "e3",
            side: Side::Buy,
            price: dec!(0.50),
            size: dec!(5),
        };
        assert_eq!(
            e.check(&open_new, &healthy(), &pf, false).unwrap_err().code(),
            "max_open_positions"
        );

        // Adding to an existing market is fine.
        assert!(e
            .check(
                &Proposal {
                    market_id: "m2",
                    event_id: "e2",
                    side: Side::Buy,
                    price: dec!(0.50),
                    size: dec!(1),
                },
                &healthy(),
                &pf,
                false
            )
            .is_ok());
    }
}
