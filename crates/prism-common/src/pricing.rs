//! Price math helpers for binary-outcome markets.
//!
//! Prices live on [0, 1] and move on a tick grid (default 0.001).

use rust_decimal::Decimal;

/// Clamp a price into [lo, hi].
pub fn clamp_price(price: Decimal, lo: Decimal, hi: Decimal) -> Decimal {
    price.max(lo).min(hi)
}

/// Convert basis points to a decimal fraction (20 bps -> 0.002).
pub fn bps_to_decimal(bps: Decimal) -> Decimal {
    bps / Decimal::from(10_000)
}

/// Mid price from best bid/ask.
pub fn mid_price(best_bid: Decimal, best_ask: Decimal) -> Decimal {
    (best_bid + best_ask) / Decimal::TWO
}

/// Spread in basis points of mid: (ask - bid) / mid * 10000.
///
/// Returns zero when the book is one-sided or degenerate.
pub fn spread_bps(best_bid: Decimal, best_ask: Decimal) -> Decimal {
    if best_bid <= Decimal::ZERO || best_ask <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    let mid = mid_price(best_bid, best_ask);
    if mid.is_zero() {
        return Decimal::ZERO;
    }
    (best_ask - best_bid) / mid * Decimal::from(10_000)
}

/// Round to the nearest multiple of `tick`.
pub fn round_to_tick(price: Decimal, tick: Decimal) -> Decimal {
    if tick <= Decimal::ZERO {
        return price;
    }
    (price / tick).round() * tick
}

/// Round down to the tick grid. Bids round down so they never cross.
pub fn round_down_to_tick(price: Decimal, tick: Decimal) -> Decimal {
    if tick <= Decimal::ZERO {
        return price;
    }
    (price / tick).floor() * tick
}

/// Round up to the tick grid. Asks round up so they never cross.
pub fn round_up_to_tick(price: Decimal, tick: Decimal) -> Decimal {
    if tick <= Decimal::ZERO {
        return price;
    }
    (price / tick).ceil() * tick
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_spread_bps() {
        // spread = 0.04, mid = 0.50 -> 800 bps
        assert_eq!(spread_bps(dec!(0.48), dec!(0.52)), dec!(800));
    }

    #[test]
    fn test_spread_bps_degenerate() {
        assert_eq!(spread_bps(dec!(0), dec!(0.52)), dec!(0));
        assert_eq!(spread_bps(dec!(0.48), dec!(0)), dec!(0));
    }

    #[test]
    fn test_round_to_tick() {
        assert_eq!(round_to_tick(dec!(0.5014), dec!(0.001)), dec!(0.501));
        assert_eq!(round_to_tick(dec!(0.5015), dec!(0.001)), dec!(0.502));
        assert_eq!(round_down_to_tick(dec!(0.5019), dec!(0.001)), dec!(0.501));
        assert_eq!(round_up_to_tick(dec!(0.5011), dec!(0.001)), dec!(0.502));
    }

    #[test]
    fn test_round_tick_idempotent_on_grid() {
        let p = dec!(0.42);
        assert_eq!(round_to_tick(p, dec!(0.01)), p);
        assert_eq!(round_down_to_tick(p, dec!(0.01)), p);
        assert_eq!(round_up_to_tick(p, dec!(0.01)), p);
    }

    #[test]
    fn test_bps_to_decimal() {
        assert_eq!(bps_to_decimal(dec!(20)), dec!(0.002));
        assert_eq!(bps_to_decimal(dec!(0)), dec!(0));
    }

    #[test]
    fn test_clamp_price() {
        assert_eq!(clamp_price(dec!(1.2), dec!(0.001), dec!(0.999)), dec!(0.999));
        assert_eq!(clamp_price(dec!(-0.1), dec!(0.001), dec!(0.999)), dec!(0.001));
        assert_eq!(clamp_price(dec!(0.5), dec!(0.001), dec!(0.999)), dec!(0.5));
    }
}
