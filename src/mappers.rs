use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;

use crate::exchange::{Exchange, Filter};
use crate::message::{NormalizedMessage, Trade, TradeSide};
use crate::normalize::Mapper;

/// Maps BitMEX `trade` table messages to normalized trades.
pub struct BitmexTradesMapper;

impl Mapper for BitmexTradesMapper {
    fn can_handle(&self, payload: &Value) -> bool {
        payload.get("table").and_then(Value::as_str) == Some("trade")
    }

    fn map(
        &mut self,
        payload: &Value,
        local_timestamp: DateTime<Utc>,
    ) -> Option<Vec<NormalizedMessage>> {
        // `partial` carries the subscription snapshot, not new trades
        if payload.get("action").and_then(Value::as_str) == Some("partial") {
            return None;
        }
        let rows = payload.get("data")?.as_array()?;
        let mut messages = Vec::with_capacity(rows.len());
        for row in rows {
            let Some(trade) = bitmex_trade(row, local_timestamp) else {
                continue;
            };
            messages.push(NormalizedMessage::Trade(trade));
        }
        Some(messages)
    }

    fn filters(&self, symbols: &[String]) -> Vec<Filter> {
        vec![Filter {
            channel: "trade".to_string(),
            symbols: (!symbols.is_empty()).then(|| symbols.to_vec()),
        }]
    }
}

fn bitmex_trade(row: &Value, local_timestamp: DateTime<Utc>) -> Option<Trade> {
    let symbol = row.get("symbol")?.as_str()?.to_uppercase();
    let price = decimal(row.get("price")?)?;
    let amount = decimal(row.get("size")?)?;
    let side = match row.get("side").and_then(Value::as_str) {
        Some("Buy") => TradeSide::Buy,
        Some("Sell") => TradeSide::Sell,
        _ => TradeSide::Unknown,
    };
    let timestamp = row.get("timestamp")?.as_str()?.parse().ok()?;
    Some(Trade {
        symbol,
        exchange: Exchange::Bitmex,
        price,
        amount,
        side,
        timestamp,
        local_timestamp,
    })
}

/// Maps Coinbase `match` messages to normalized trades.
pub struct CoinbaseMapper;

impl Mapper for CoinbaseMapper {
    fn can_handle(&self, payload: &Value) -> bool {
        matches!(
            payload.get("type").and_then(Value::as_str),
            Some("match") | Some("last_match")
        )
    }

    fn map(
        &mut self,
        payload: &Value,
        local_timestamp: DateTime<Utc>,
    ) -> Option<Vec<NormalizedMessage>> {
        let symbol = payload.get("product_id")?.as_str()?.to_uppercase();
        let price = decimal(payload.get("price")?)?;
        let amount = decimal(payload.get("size")?)?;
        // `side` names the resting maker order; the aggressor is opposite
        let side = match payload.get("side").and_then(Value::as_str) {
            Some("buy") => TradeSide::Sell,
            Some("sell") => TradeSide::Buy,
            _ => TradeSide::Unknown,
        };
        let timestamp = payload.get("time")?.as_str()?.parse().ok()?;
        Some(vec![NormalizedMessage::Trade(Trade {
            symbol,
            exchange: Exchange::Coinbase,
            price,
            amount,
            side,
            timestamp,
            local_timestamp,
        })])
    }

    fn filters(&self, symbols: &[String]) -> Vec<Filter> {
        vec![Filter {
            channel: "match".to_string(),
            symbols: (!symbols.is_empty()).then(|| symbols.to_vec()),
        }]
    }
}

fn decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::String(text) => text.parse().ok(),
        Value::Number(number) => number.to_string().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn bitmex_insert_maps_each_row() {
        let local_timestamp = Utc.with_ymd_and_hms(2020, 3, 1, 0, 0, 1).unwrap();
        let payload = json!({
            "table": "trade",
            "action": "insert",
            "data": [
                { "symbol": "XBTUSD", "side": "Sell", "size": 100, "price": 8600.5,
                  "timestamp": "2020-03-01T00:00:00.912Z" },
                { "symbol": "ethusd", "side": "Buy", "size": 5, "price": 221.3,
                  "timestamp": "2020-03-01T00:00:00.954Z" }
            ]
        });

        let mut mapper = BitmexTradesMapper;
        assert!(mapper.can_handle(&payload));
        let messages = mapper.map(&payload, local_timestamp).unwrap();
        assert_eq!(messages.len(), 2);
        let NormalizedMessage::Trade(first) = &messages[0] else {
            panic!("expected trade");
        };
        assert_eq!(first.symbol, "XBTUSD");
        assert_eq!(first.side, TradeSide::Sell);
        assert_eq!(first.price.to_string(), "8600.5");
        assert_eq!(first.local_timestamp, local_timestamp);
        let NormalizedMessage::Trade(second) = &messages[1] else {
            panic!("expected trade");
        };
        assert_eq!(second.symbol, "ETHUSD");
    }

    #[test]
    fn bitmex_partial_is_ignored() {
        let payload = json!({ "table": "trade", "action": "partial", "data": [] });
        let mut mapper = BitmexTradesMapper;
        assert!(mapper
            .map(&payload, Utc.with_ymd_and_hms(2020, 3, 1, 0, 0, 0).unwrap())
            .is_none());
    }

    #[test]
    fn coinbase_match_flips_the_maker_side() {
        let local_timestamp = Utc.with_ymd_and_hms(2020, 3, 1, 0, 0, 1).unwrap();
        let payload = json!({
            "type": "match",
            "product_id": "BTC-USD",
            "price": "8612.34",
            "size": "0.25",
            "side": "buy",
            "time": "2020-03-01T00:00:00.500Z"
        });

        let mut mapper = CoinbaseMapper;
        assert!(mapper.can_handle(&payload));
        let messages = mapper.map(&payload, local_timestamp).unwrap();
        let NormalizedMessage::Trade(trade) = &messages[0] else {
            panic!("expected trade");
        };
        assert_eq!(trade.symbol, "BTC-USD");
        assert_eq!(trade.side, TradeSide::Sell);
        assert_eq!(trade.amount.to_string(), "0.25");
    }

    #[test]
    fn ticker_messages_are_not_handled() {
        let mapper = CoinbaseMapper;
        assert!(!mapper.can_handle(&json!({ "type": "ticker" })));
    }
}
