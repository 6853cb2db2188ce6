//! Shared types for the prism paper-trading engine.
//!
//! CRITICAL: All prices and quantities use `rust_decimal::Decimal`.
//! NEVER use f64 for financial math (scoring heuristics excepted).

pub mod pricing;
pub mod types;

pub use pricing::{bps_to_decimal, clamp_price, mid_price, round_down_to_tick, round_to_tick, round_up_to_tick, spread_bps};
pub use types::{OrderStatus, PriceLevel, Side, TopOfBook};
