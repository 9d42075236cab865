//! Endpoint selection from the shape of message content.
//!
//! Only content carrying every order field reaches the order endpoint.
//! Anything unrecognised falls through to the read-only ticker list.

use serde_json::{Map, Value};

const INSTRUMENT_ID: &str = "instId";
const ORDER_FIELDS: [&str; 3] = [INSTRUMENT_ID, "side", "sz"];
const MARKET_DATA_TYPE: &str = "market_data";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// Order placement
    PlaceOrder,
    /// Ticker for a single instrument
    Ticker,
    /// Read-only default
    Tickers,
}

impl Endpoint {
    /// Path relative to the versioned API prefix.
    pub fn path(self) -> &'static str {
        match self {
            Endpoint::PlaceOrder => "trade/order",
            Endpoint::Ticker => "market/ticker",
            Endpoint::Tickers => "market/tickers",
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.path())
    }
}

/// A routed request: the endpoint and its endpoint-specific body fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub endpoint: Endpoint,
    pub fields: Map<String, Value>,
}

pub fn route(content: &Value, default_instrument: &str) -> Route {
    if let Value::Object(map) = content {
        if ORDER_FIELDS.iter().all(|field| map.contains_key(*field)) {
            return Route {
                endpoint: Endpoint::PlaceOrder,
                fields: map.clone(),
            };
        }

        if let Some(instrument) = map.get(INSTRUMENT_ID)
            && map.get("type").and_then(Value::as_str) == Some(MARKET_DATA_TYPE)
        {
            return Route {
                endpoint: Endpoint::Ticker,
                fields: instrument_only(instrument.clone()),
            };
        }
    }

    Route {
        endpoint: Endpoint::Tickers,
        fields: instrument_only(Value::String(default_instrument.to_string())),
    }
}

fn instrument_only(instrument: Value) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert(INSTRUMENT_ID.to_string(), instrument);
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_order_fields_route_to_order_endpoint() {
        let content = json!({"instId": "ETH-USDT", "side": "buy", "sz": "2", "ordType": "market"});
        let route = route(&content, "BTC-USDT");

        assert_eq!(route.endpoint, Endpoint::PlaceOrder);
        assert_eq!(Value::Object(route.fields), content);
    }

    #[test]
    fn test_market_data_routes_to_ticker() {
        let route = route(&json!({"instId": "ETH-USDT", "type": "market_data", "extra": 1}), "BTC-USDT");

        assert_eq!(route.endpoint, Endpoint::Ticker);
        assert_eq!(Value::Object(route.fields), json!({"instId": "ETH-USDT"}));
    }

    #[test]
    fn test_partial_order_never_places_an_order() {
        for content in [
            json!({"instId": "ETH-USDT", "side": "buy"}),
            json!({"instId": "ETH-USDT", "type": "other"}),
            json!({"type": "market_data"}),
            json!("buy 1 BTC"),
            json!([{"instId": "ETH-USDT", "side": "buy", "sz": "1"}]),
        ] {
            let route = route(&content, "BTC-USDT");
            assert_eq!(route.endpoint, Endpoint::Tickers, "content {content} should use the default");
            assert_eq!(Value::Object(route.fields), json!({"instId": "BTC-USDT"}));
        }
    }
}
