//! Wire types for the exchange trade stream.
//!
//! The stream speaks JSON text frames: a subscribe request per token batch,
//! then `last_trade_price` / `price_change` events, singly or in arrays.
//! Numeric fields arrive as decimal strings; timestamps may be milliseconds
//! or seconds and are normalized here.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use sentinel_common::{Side, Trade};

/// Subscription request for a batch of token ids.
#[derive(Debug, Serialize)]
pub struct SubscribeMessage {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    pub channel: &'static str,
    pub assets_ids: Vec<String>,
}

impl SubscribeMessage {
    pub fn market(assets_ids: Vec<String>) -> Self {
        Self {
            msg_type: "subscribe",
            channel: "market",
            assets_ids,
        }
    }
}

/// A raw event off the stream, before validation.
#[derive(Debug, Clone, Deserialize)]
pub struct RawStreamEvent {
    #[serde(default)]
    pub event_type: Option<String>,
    #[serde(default)]
    pub asset_id: Option<String>,
    /// Condition id of the market.
    #[serde(default)]
    pub market: Option<String>,
    #[serde(default)]
    pub price: Option<String>,
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub side: Option<String>,
    /// Decimal string of epoch milliseconds or seconds.
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl RawStreamEvent {
    pub fn is_trade(&self) -> bool {
        self.event_type.as_deref() == Some("last_trade_price")
    }

    /// Validate into a [`Trade`]. `None` on any schema defect, including a
    /// missing `side`, which is rejected rather than defaulted so detector
    /// direction stays honest.
    pub fn to_trade(&self, market_id: &str) -> Option<Trade> {
        let token_id = self.asset_id.clone()?;
        let price: Decimal = self.price.as_deref()?.parse().ok()?;
        let size: Decimal = self.size.as_deref()?.parse().ok()?;
        let side = Side::parse(self.side.as_deref()?)?;
        let timestamp_ms = parse_timestamp_ms(self.timestamp.as_deref()?)?;

        if price < Decimal::ZERO || price > Decimal::ONE || size <= Decimal::ZERO {
            return None;
        }

        Some(Trade {
            market_id: market_id.to_string(),
            token_id,
            price,
            size,
            side,
            timestamp_ms,
        })
    }
}

/// Parse a frame into events. A frame may carry one event or an array; any
/// other JSON (acks, pongs) yields an empty batch.
pub fn parse_stream_message(text: &str) -> Vec<RawStreamEvent> {
    if let Ok(batch) = serde_json::from_str::<Vec<RawStreamEvent>>(text) {
        return batch;
    }
    if let Ok(single) = serde_json::from_str::<RawStreamEvent>(text) {
        return vec![single];
    }
    Vec::new()
}

/// Normalize a decimal-string timestamp to epoch milliseconds. Values that
/// look like seconds (pre-2001 in millisecond terms) are scaled up.
fn parse_timestamp_ms(raw: &str) -> Option<i64> {
    // Some feeds send fractional seconds; take the integer part.
    let integral = raw.split('.').next()?;
    let value: i64 = integral.parse().ok()?;
    if value <= 0 {
        return None;
    }
    if value < 1_000_000_000_000 {
        Some(value * 1000)
    } else {
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn raw(side: Option<&str>, ts: &str) -> RawStreamEvent {
        RawStreamEvent {
            event_type: Some("last_trade_price".to_string()),
            asset_id: Some("tok1".to_string()),
            market: Some("cond1".to_string()),
            price: Some("0.42".to_string()),
            size: Some("150".to_string()),
            side: side.map(|s| s.to_string()),
            timestamp: Some(ts.to_string()),
        }
    }

    #[test]
    fn test_subscribe_message_shape() {
        let msg = SubscribeMessage::market(vec!["a".to_string(), "b".to_string()]);
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"subscribe\""));
        assert!(json.contains("\"channel\":\"market\""));
        assert!(json.contains("\"assets_ids\":[\"a\",\"b\"]"));
    }

    #[test]
    fn test_to_trade() {
        let trade = raw(Some("BUY"), "1700000000000").to_trade("cond1").unwrap();
        assert_eq!(trade.market_id, "cond1");
        assert_eq!(trade.token_id, "tok1");
        assert_eq!(trade.price, dec!(0.42));
        assert_eq!(trade.size, dec!(150));
        assert_eq!(trade.side, Side::Buy);
        assert_eq!(trade.timestamp_ms, 1_700_000_000_000);
    }

    #[test]
    fn test_missing_side_rejected() {
        assert!(raw(None, "1700000000000").to_trade("cond1").is_none());
        assert!(raw(Some("HOLD"), "1700000000000").to_trade("cond1").is_none());
    }

    #[test]
    fn test_seconds_timestamp_normalized() {
        let trade = raw(Some("SELL"), "1700000000").to_trade("cond1").unwrap();
        assert_eq!(trade.timestamp_ms, 1_700_000_000_000);

        let trade = raw(Some("SELL"), "1700000000.123").to_trade("cond1").unwrap();
        assert_eq!(trade.timestamp_ms, 1_700_000_000_000);
    }

    #[test]
    fn test_out_of_range_price_rejected() {
        let mut event = raw(Some("BUY"), "1700000000000");
        event.price = Some("1.5".to_string());
        assert!(event.to_trade("cond1").is_none());

        event.price = Some("-0.1".to_string());
        assert!(event.to_trade("cond1").is_none());
    }

    #[test]
    fn test_parse_single_and_batch() {
        let single = r#"{"event_type":"last_trade_price","asset_id":"t","market":"m",
            "price":"0.5","size":"10","side":"BUY","timestamp":"1700000000000"}"#;
        assert_eq!(parse_stream_message(single).len(), 1);

        let batch = format!("[{},{}]", single, single);
        assert_eq!(parse_stream_message(&batch).len(), 2);

        assert!(parse_stream_message("\"PONG\"").is_empty());
        assert!(parse_stream_message("not json").is_empty());
    }

    #[test]
    fn test_price_change_not_a_trade() {
        let event = RawStreamEvent {
            event_type: Some("price_change".to_string()),
            ..raw(Some("BUY"), "1700000000000")
        };
        assert!(!event.is_trade());
    }
}
