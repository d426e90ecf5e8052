use rust_decimal::Decimal;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

use crate::time::now_ms;

/// Time-ordered unique message id, hex encoded
pub fn new_message_id() -> String {
    Uuid::now_v7().simple().to_string()
}

/// Common bound for everything that travels on the bus
pub trait BusMessage: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    fn id(&self) -> &str;
}

/// A single trade observed on one exchange
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: String,
    pub exchange: String,
    pub symbol_id: i32,
    pub event_ts_ms: f64,
    pub fetch_ts_ms: f64,
    pub price: Decimal,
    pub amount: Decimal,
    pub is_buy: bool,
}

impl Trade {
    pub fn new(
        exchange: impl Into<String>,
        symbol_id: i32,
        event_ts_ms: f64,
        price: Decimal,
        amount: Decimal,
        is_buy: bool,
    ) -> Self {
        Self {
            id: new_message_id(),
            exchange: exchange.into(),
            symbol_id,
            event_ts_ms,
            fetch_ts_ms: now_ms(),
            price,
            amount,
            is_buy,
        }
    }
}

/// Best bid/ask observed on one exchange
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Spread {
    pub id: String,
    pub exchange: String,
    pub symbol_id: i32,
    pub event_ts_ms: f64,
    pub fetch_ts_ms: f64,
    pub best_bid: Decimal,
    pub best_ask: Decimal,
}

impl Spread {
    pub fn new(
        exchange: impl Into<String>,
        symbol_id: i32,
        event_ts_ms: f64,
        best_bid: Decimal,
        best_ask: Decimal,
    ) -> Self {
        Self {
            id: new_message_id(),
            exchange: exchange.into(),
            symbol_id,
            event_ts_ms,
            fetch_ts_ms: now_ms(),
            best_bid,
            best_ask,
        }
    }

    pub fn mid(&self) -> Decimal {
        (self.best_bid + self.best_ask) / Decimal::TWO
    }
}

/// Latest 24h base-volume weight for one (exchange, symbol) pair.
/// `weight = 0` means the venue no longer contributes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightAdjust {
    pub id: String,
    pub exchange: String,
    pub symbol_id: i32,
    pub weight: f64,
}

impl WeightAdjust {
    pub fn new(exchange: impl Into<String>, symbol_id: i32, weight: f64) -> Self {
        Self {
            id: new_message_id(),
            exchange: exchange.into(),
            symbol_id,
            weight,
        }
    }
}

/// Volume-weighted consensus mid price, published only on change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrueMidPrice {
    pub id: String,
    pub symbol_id: i32,
    pub event_ts_ms: f64,
    pub true_mid_price: Decimal,
    pub triggering_spread_id: String,
}

impl TrueMidPrice {
    pub fn new(symbol_id: i32, true_mid_price: Decimal, triggering_spread_id: impl Into<String>) -> Self {
        Self {
            id: new_message_id(),
            symbol_id,
            event_ts_ms: now_ms(),
            true_mid_price,
            triggering_spread_id: triggering_spread_id.into(),
        }
    }
}

macro_rules! impl_bus_message {
    ($($ty:ty),*) => {
        $(impl BusMessage for $ty {
            fn id(&self) -> &str {
                &self.id
            }
        })*
    };
}

impl_bus_message!(Trade, Spread, WeightAdjust, TrueMidPrice);

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn message_ids_are_unique_and_ordered() {
        let a = new_message_id();
        // v7 ids embed a millisecond timestamp, so ids from different
        // milliseconds sort in generation order
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = new_message_id();
        assert_ne!(a, b);
        assert!(b > a);
    }

    #[test]
    fn spread_mid_is_decimal_exact() {
        let spread = Spread::new("binance", 1, 0.0, dec!(100), dec!(103));
        assert_eq!(spread.mid(), dec!(101.5));
    }

    #[test]
    fn decimal_fields_serialize_as_strings() {
        let trade = Trade::new("bybit", 7, 1.0, dec!(0.123456789012345678), dec!(2), true);
        let json = serde_json::to_value(&trade).unwrap();
        assert_eq!(json["price"], "0.123456789012345678");
        let back: Trade = serde_json::from_value(json).unwrap();
        assert_eq!(back.price, trade.price);
    }
}
