use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct BinanceExchangeInfo {
    pub symbols: Vec<BinanceMarket>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BinanceMarket {
    pub symbol: String,
    pub status: String,
    pub base_asset: String,
    pub quote_asset: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Binance24hrStats {
    pub last_price: String,
    /// Base asset volume
    pub volume: String,
}

/// `<symbol>@trade` stream event
#[derive(Debug, Clone, Deserialize)]
pub struct BinanceTradeEvent {
    #[serde(rename = "e")]
    pub event_type: String,
    #[serde(rename = "T")]
    pub trade_time: i64,
    #[serde(rename = "p")]
    pub price: String,
    #[serde(rename = "q")]
    pub quantity: String,
    /// True when the buyer is the maker, i.e. the aggressor sold
    #[serde(rename = "m")]
    pub buyer_is_maker: bool,
}

/// `<symbol>@bookTicker` stream event. Carries no event time on spot.
#[derive(Debug, Clone, Deserialize)]
pub struct BinanceBookTicker {
    #[serde(rename = "u")]
    pub update_id: i64,
    #[serde(rename = "b")]
    pub best_bid: String,
    #[serde(rename = "a")]
    pub best_ask: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_trade_event() {
        let raw = r#"{"e":"trade","E":1700000000100,"s":"BTCUSDT","t":1,"p":"43000.10","q":"0.5","T":1700000000050,"m":false,"M":true}"#;
        let event: BinanceTradeEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(event.event_type, "trade");
        assert_eq!(event.trade_time, 1700000000050);
        assert_eq!(event.price, "43000.10");
        assert!(!event.buyer_is_maker);
    }

    #[test]
    fn parses_book_ticker() {
        let raw = r#"{"u":400900217,"s":"BTCUSDT","b":"43000.10","B":"31.2","a":"43000.50","A":"40.6"}"#;
        let ticker: BinanceBookTicker = serde_json::from_str(raw).unwrap();
        assert_eq!(ticker.best_bid, "43000.10");
        assert_eq!(ticker.best_ask, "43000.50");
    }
}
