//! Market metadata discovery and in-memory order book state.
//!
//! This crate talks to the metadata (Gamma-style) API and maintains per-market
//! `BookState` from streaming snapshots and deltas. It knows nothing about
//! strategies, risk, or persistence.

pub mod discovery;
pub mod orderbook;
pub mod types;

pub use discovery::{DiscoveryError, MarketMeta, MetadataClient, MetadataClientConfig};
pub use orderbook::{BookApply, BookState};
pub use types::{BookMessage, GenericMessage, OrderSummary, PriceChange, PriceChangeMessage, SubscribeMessage, TradeMessage};
