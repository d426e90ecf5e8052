use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Exchange identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExchangeId(pub String);

impl ExchangeId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ExchangeId {
    fn from(s: &str) -> Self {
        ExchangeId(s.to_string())
    }
}

impl std::fmt::Display for ExchangeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Normalized symbol representation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Symbol {
    pub base: String,
    pub quote: String,
}

impl Symbol {
    pub fn new(base: impl Into<String>, quote: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            quote: quote.into(),
        }
    }

    /// Canonical form `BASE/QUOTE`
    pub fn canonical(&self) -> String {
        format!("{}/{}", self.base, self.quote)
    }

    /// Parse a canonical `BASE/QUOTE` string
    pub fn parse(s: &str) -> Option<Self> {
        let (base, quote) = s.split_once('/')?;
        if base.is_empty() || quote.is_empty() {
            return None;
        }
        Some(Self::new(base, quote))
    }
}

/// One market as listed by an exchange
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketEntry {
    /// Canonical symbol, e.g. `BTC/USDT`
    pub symbol: String,
    /// Symbol in the exchange's own notation, e.g. `BTCUSDT`
    pub native_symbol: String,
    pub base: String,
    pub quote: String,
}

/// Point-in-time market stats used for weighting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub close: Decimal,
    pub volume_24h: f64,
}

/// Raw trade event from an exchange feed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeEvent {
    pub event_ts_ms: f64,
    pub price: Decimal,
    pub amount: Decimal,
    pub is_buy: bool,
}

/// Top of book from an exchange feed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookTop {
    pub event_ts_ms: f64,
    pub best_bid: Decimal,
    pub best_ask: Decimal,
}

/// Registry row mapping a logical symbol onto one exchange
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolMapping {
    pub symbol_id: i32,
    pub symbol: String,
    pub exchange: String,
    pub native_symbol: String,
    pub unavailable: bool,
}

/// Registry row for a logical symbol
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolRecord {
    pub id: i32,
    pub symbol: String,
    pub base_asset: String,
    pub quote_asset: String,
}
