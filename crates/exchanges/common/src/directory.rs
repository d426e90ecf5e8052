use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use truemid_core::model::{MarketEntry, SymbolMapping};

/// Read/write access to the symbol registry, as seen by the pipeline.
///
/// The production implementation is backed by PostgreSQL; tests use
/// [`MemoryDirectory`].
#[async_trait]
pub trait SymbolDirectory: Send + Sync {
    /// Mapping for one (exchange, canonical symbol) pair, if seeded.
    async fn get_mapping(&self, exchange: &str, symbol: &str) -> Result<Option<SymbolMapping>>;

    /// Idempotent upsert of an exchange's market listing.
    async fn upsert_markets(&self, exchange: &str, markets: &[MarketEntry]) -> Result<()>;

    /// Flip the availability flag for one mapping.
    async fn mark_unavailable(&self, symbol_id: i32, exchange: &str, unavailable: bool) -> Result<()>;

    /// Exchanges currently able to serve a symbol.
    async fn list_exchanges_for_symbol(&self, symbol: &str) -> Result<Vec<String>>;

    /// Symbols currently served by an exchange.
    async fn list_symbols_for_exchange(&self, exchange: &str) -> Result<Vec<String>>;
}

/// In-memory registry with the same seed-on-first-use semantics as the
/// database one. Symbol ids are assigned in insertion order.
#[derive(Default)]
pub struct MemoryDirectory {
    state: Mutex<MemoryDirectoryState>,
}

#[derive(Default)]
struct MemoryDirectoryState {
    symbol_ids: HashMap<String, i32>,
    // keyed by (exchange, symbol_id)
    mappings: HashMap<(String, i32), SymbolMapping>,
    next_id: i32,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of seeded mappings, across all exchanges.
    pub fn mapping_count(&self) -> usize {
        self.state.lock().expect("directory lock poisoned").mappings.len()
    }
}

#[async_trait]
impl SymbolDirectory for MemoryDirectory {
    async fn get_mapping(&self, exchange: &str, symbol: &str) -> Result<Option<SymbolMapping>> {
        let state = self.state.lock().expect("directory lock poisoned");
        let Some(&symbol_id) = state.symbol_ids.get(symbol) else {
            return Ok(None);
        };
        Ok(state.mappings.get(&(exchange.to_string(), symbol_id)).cloned())
    }

    async fn upsert_markets(&self, exchange: &str, markets: &[MarketEntry]) -> Result<()> {
        let mut state = self.state.lock().expect("directory lock poisoned");
        for market in markets {
            let symbol_id = match state.symbol_ids.get(&market.symbol) {
                Some(&id) => id,
                None => {
                    state.next_id += 1;
                    let id = state.next_id;
                    state.symbol_ids.insert(market.symbol.clone(), id);
                    id
                }
            };
            state
                .mappings
                .entry((exchange.to_string(), symbol_id))
                .and_modify(|m| m.native_symbol.clone_from(&market.native_symbol))
                .or_insert_with(|| SymbolMapping {
                    symbol_id,
                    symbol: market.symbol.clone(),
                    exchange: exchange.to_string(),
                    native_symbol: market.native_symbol.clone(),
                    unavailable: false,
                });
        }
        Ok(())
    }

    async fn mark_unavailable(&self, symbol_id: i32, exchange: &str, unavailable: bool) -> Result<()> {
        let mut state = self.state.lock().expect("directory lock poisoned");
        if let Some(mapping) = state.mappings.get_mut(&(exchange.to_string(), symbol_id)) {
            mapping.unavailable = unavailable;
        }
        Ok(())
    }

    async fn list_exchanges_for_symbol(&self, symbol: &str) -> Result<Vec<String>> {
        let state = self.state.lock().expect("directory lock poisoned");
        let Some(&symbol_id) = state.symbol_ids.get(symbol) else {
            return Ok(Vec::new());
        };
        let mut exchanges: Vec<String> = state
            .mappings
            .values()
            .filter(|m| m.symbol_id == symbol_id && !m.unavailable)
            .map(|m| m.exchange.clone())
            .collect();
        exchanges.sort();
        Ok(exchanges)
    }

    async fn list_symbols_for_exchange(&self, exchange: &str) -> Result<Vec<String>> {
        let state = self.state.lock().expect("directory lock poisoned");
        let mut symbols: Vec<String> = state
            .mappings
            .values()
            .filter(|m| m.exchange == exchange && !m.unavailable)
            .map(|m| m.symbol.clone())
            .collect();
        symbols.sort();
        Ok(symbols)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn market(symbol: &str, native: &str) -> MarketEntry {
        let (base, quote) = symbol.split_once('/').unwrap();
        MarketEntry {
            symbol: symbol.to_string(),
            native_symbol: native.to_string(),
            base: base.to_string(),
            quote: quote.to_string(),
        }
    }

    #[tokio::test]
    async fn upsert_assigns_stable_symbol_ids() {
        let dir = MemoryDirectory::new();
        dir.upsert_markets("binance", &[market("BTC/USDT", "BTCUSDT")])
            .await
            .unwrap();
        dir.upsert_markets("bybit", &[market("BTC/USDT", "BTCUSDT")])
            .await
            .unwrap();

        let a = dir.get_mapping("binance", "BTC/USDT").await.unwrap().unwrap();
        let b = dir.get_mapping("bybit", "BTC/USDT").await.unwrap().unwrap();
        assert_eq!(a.symbol_id, b.symbol_id);
    }

    #[tokio::test]
    async fn upsert_overwrites_native_symbol() {
        let dir = MemoryDirectory::new();
        dir.upsert_markets("binance", &[market("BTC/USDT", "BTCUSDT")])
            .await
            .unwrap();
        dir.upsert_markets("binance", &[market("BTC/USDT", "XBTUSDT")])
            .await
            .unwrap();

        let mapping = dir.get_mapping("binance", "BTC/USDT").await.unwrap().unwrap();
        assert_eq!(mapping.native_symbol, "XBTUSDT");
        assert_eq!(dir.mapping_count(), 1);
    }

    #[tokio::test]
    async fn unavailable_mappings_are_excluded_from_listings() {
        let dir = MemoryDirectory::new();
        dir.upsert_markets("binance", &[market("BTC/USDT", "BTCUSDT")])
            .await
            .unwrap();
        dir.upsert_markets("bybit", &[market("BTC/USDT", "BTCUSDT")])
            .await
            .unwrap();

        let mapping = dir.get_mapping("binance", "BTC/USDT").await.unwrap().unwrap();
        dir.mark_unavailable(mapping.symbol_id, "binance", true)
            .await
            .unwrap();

        assert_eq!(
            dir.list_exchanges_for_symbol("BTC/USDT").await.unwrap(),
            vec!["bybit"]
        );

        // Reset restores it
        dir.mark_unavailable(mapping.symbol_id, "binance", false)
            .await
            .unwrap();
        assert_eq!(
            dir.list_exchanges_for_symbol("BTC/USDT").await.unwrap(),
            vec!["binance", "bybit"]
        );
    }
}
