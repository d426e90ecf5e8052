use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;
use truemid_core::messages::{TrueMidPrice, WeightAdjust};

/// Cache key for per-venue weights
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WeightKey {
    pub exchange: String,
    pub symbol_id: i32,
}

impl WeightKey {
    pub fn new(exchange: impl Into<String>, symbol_id: i32) -> Self {
        Self {
            exchange: exchange.into(),
            symbol_id,
        }
    }
}

/// Last-value store for in-flight state that consumers may join late for.
///
/// Weights are only meaningful as "latest per (exchange, symbol)", so the
/// bus keeps the most recent value here on every publish. True mid prices
/// are kept per symbol for cheap read access.
#[derive(Clone, Default)]
pub struct LastValueCache {
    inner: Arc<LastValueCacheInner>,
}

#[derive(Default)]
struct LastValueCacheInner {
    weights: DashMap<WeightKey, WeightAdjust>,
    true_prices: DashMap<i32, TrueMidPrice>,
}

impl LastValueCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_weight(&self, weight: WeightAdjust) {
        debug!(
            exchange = %weight.exchange,
            symbol_id = weight.symbol_id,
            weight = weight.weight,
            "Cached weight"
        );
        let key = WeightKey::new(weight.exchange.clone(), weight.symbol_id);
        self.inner.weights.insert(key, weight);
    }

    pub fn get_weight(&self, exchange: &str, symbol_id: i32) -> Option<WeightAdjust> {
        let key = WeightKey::new(exchange, symbol_id);
        self.inner.weights.get(&key).map(|entry| entry.value().clone())
    }

    /// All currently known weights, in no particular order
    pub fn weights_snapshot(&self) -> Vec<WeightAdjust> {
        self.inner
            .weights
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn set_true_price(&self, price: TrueMidPrice) {
        self.inner.true_prices.insert(price.symbol_id, price);
    }

    pub fn get_true_price(&self, symbol_id: i32) -> Option<TrueMidPrice> {
        self.inner
            .true_prices
            .get(&symbol_id)
            .map(|entry| entry.value().clone())
    }
}
