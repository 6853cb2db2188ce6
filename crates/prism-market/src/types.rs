//! Wire types for the metadata API and the CLOB WebSocket feed.
//!
//! Prices and sizes arrive as strings on both channels; parsing into
//! `Decimal` happens at the book/feed boundary.

use serde::{Deserialize, Serialize};

/// Market row from the metadata API.
///
/// The schema is deliberately loose: the upstream API evolves, so every field
/// is optional and resolution happens in [`crate::discovery`].
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMarket {
    pub id: Option<String>,
    pub question: Option<String>,
    pub condition_id: Option<String>,
    pub slug: Option<String>,
    pub active: Option<bool>,
    pub closed: Option<bool>,
    pub end_date: Option<String>,
    /// 24h volume in USD; the API has shipped this under several names.
    pub volume24hr: Option<serde_json::Value>,
    pub volume: Option<serde_json::Value>,
    pub liquidity: Option<serde_json::Value>,
    pub liquidity_num: Option<serde_json::Value>,
    pub order_price_min_tick_size: Option<serde_json::Value>,
    pub order_min_size: Option<serde_json::Value>,
    pub events: Option<Vec<RawEventRef>>,
}

/// Event reference embedded in a market row; used for exposure grouping.
#[derive(Debug, Clone, Deserialize)]
pub struct RawEventRef {
    pub id: Option<String>,
}

/// Subscription message to the CLOB WebSocket market channel.
#[derive(Debug, Serialize)]
pub struct SubscribeMessage {
    pub assets_ids: Vec<String>,
    #[serde(rename = "type")]
    pub msg_type: &'static str,
}

/// Orderbook level from the CLOB WebSocket.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderSummary {
    pub price: String,
    pub size: String,
}

/// Full orderbook snapshot from the CLOB WebSocket.
#[derive(Debug, Clone, Deserialize)]
pub struct BookMessage {
    pub event_type: String,
    pub asset_id: String,
    pub market: String,
    pub timestamp: String,
    #[serde(default)]
    pub seq: Option<u64>,
    pub bids: Vec<OrderSummary>,
    pub asks: Vec<OrderSummary>,
}

/// Single price-level delta.
#[derive(Debug, Clone, Deserialize)]
pub struct PriceChange {
    pub price: String,
    pub size: String,
    pub side: String,
}

/// Delta message from the CLOB WebSocket.
#[derive(Debug, Clone, Deserialize)]
pub struct PriceChangeMessage {
    pub event_type: String,
    pub asset_id: String,
    pub market: String,
    pub timestamp: String,
    #[serde(default)]
    pub seq: Option<u64>,
    pub price_changes: Vec<PriceChange>,
}

/// Trade print from the CLOB WebSocket.
#[derive(Debug, Clone, Deserialize)]
pub struct TradeMessage {
    pub event_type: String,
    pub asset_id: String,
    pub market: String,
    pub timestamp: String,
    pub price: String,
    pub size: String,
    pub side: String,
}

/// Generic message for detecting event type before full parsing.
#[derive(Debug, Deserialize)]
pub struct GenericMessage {
    pub event_type: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_book_message_parsing() {
        let json = r#"{
            "event_type": "book",
            "asset_id": "token123",
            "market": "cond456",
            "timestamp": "1704067200000",
            "seq": 42,
            "bids": [{"price": "0.45", "size": "100"}],
            "asks": [{"price": "0.55", "size": "150"}]
        }"#;

        let book: BookMessage = serde_json::from_str(json).unwrap();
        assert_eq!(book.event_type, "book");
        assert_eq!(book.seq, Some(42));
        assert_eq!(book.bids.len(), 1);
        assert_eq!(book.asks.len(), 1);
    }

    #[test]
    fn test_price_change_message_without_seq() {
        let json = r#"{
            "event_type": "price_change",
            "asset_id": "token123",
            "market": "cond456",
            "timestamp": "1704067200000",
            "price_changes": [
                {"price": "0.46", "size": "50", "side": "buy"}
            ]
        }"#;

        let msg: PriceChangeMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.seq, None);
        assert_eq!(msg.price_changes.len(), 1);
        assert_eq!(msg.price_changes[0].price, "0.46");
    }

    #[test]
    fn test_trade_message_parsing() {
        let json = r#"{
            "event_type": "last_trade_price",
            "asset_id": "token123",
            "market": "cond456",
            "timestamp": "1704067200000",
            "price": "0.47",
            "size": "25",
            "side": "sell"
        }"#;

        let msg: TradeMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.price, "0.47");
        assert_eq!(msg.side, "sell");
    }

    #[test]
    fn test_raw_market_tolerates_mixed_number_types() {
        let json = r#"{
            "id": "m1",
            "question": "Will it settle yes?",
            "active": true,
            "closed": false,
            "volume24hr": "123456.7",
            "liquidity": 9000.5,
            "orderPriceMinTickSize": 0.001,
            "events": [{"id": "e1"}]
        }"#;

        let m: RawMarket = serde_json::from_str(json).unwrap();
        assert_eq!(m.id.as_deref(), Some("m1"));
        assert!(m.volume24hr.is_some());
        assert!(m.liquidity.is_some());
    }

    #[test]
    fn test_subscribe_message_serialization() {
        let msg = SubscribeMessage {
            assets_ids: vec!["token1".to_string()],
            msg_type: "market",
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"assets_ids\""));
        assert!(json.contains("\"type\":\"market\""));
    }
}
