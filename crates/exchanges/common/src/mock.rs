use crate::adapter::{BookFeed, ExchangeAdapter, TradeFeed};
use async_trait::async_trait;
use futures::stream;
use futures::StreamExt;
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use truemid_core::error::AdapterError;
use truemid_core::model::{BookTop, ExchangeId, MarketEntry, MarketSnapshot, TradeEvent};

/// Build a [`MarketEntry`] from a canonical `BASE/QUOTE` symbol.
pub fn market_entry(symbol: &str, native_symbol: &str) -> MarketEntry {
    let (base, quote) = symbol.split_once('/').unwrap_or((symbol, ""));
    MarketEntry {
        symbol: symbol.to_string(),
        native_symbol: native_symbol.to_string(),
        base: base.to_string(),
        quote: quote.to_string(),
    }
}

/// Scriptable exchange adapter for tests.
///
/// Each `watch_*` call consumes the next queued script and returns it as a
/// finite prefix of an otherwise silent feed. With no scripts queued the
/// feed stays silent forever. `fail_streams_with_not_supported` makes every
/// watch call signal `NotSupported`, as a venue that rejects the symbol
/// would.
pub struct MockAdapter {
    id: ExchangeId,
    markets: Vec<MarketEntry>,
    snapshot: Mutex<MarketSnapshot>,
    trade_scripts: Mutex<VecDeque<Vec<Result<TradeEvent, AdapterError>>>>,
    book_scripts: Mutex<VecDeque<Vec<Result<BookTop, AdapterError>>>>,
    not_supported: bool,
    trade_feed_requests: AtomicUsize,
    book_feed_requests: AtomicUsize,
}

impl MockAdapter {
    pub fn new(name: &str) -> Self {
        Self {
            id: ExchangeId::from(name),
            markets: Vec::new(),
            snapshot: Mutex::new(MarketSnapshot {
                close: Decimal::ZERO,
                volume_24h: 1.0,
            }),
            trade_scripts: Mutex::new(VecDeque::new()),
            book_scripts: Mutex::new(VecDeque::new()),
            not_supported: false,
            trade_feed_requests: AtomicUsize::new(0),
            book_feed_requests: AtomicUsize::new(0),
        }
    }

    pub fn with_market(mut self, market: MarketEntry) -> Self {
        self.markets.push(market);
        self
    }

    pub fn with_volume_24h(self, volume: f64) -> Self {
        self.snapshot.lock().expect("mock lock").volume_24h = volume;
        self
    }

    pub fn fail_streams_with_not_supported(mut self) -> Self {
        self.not_supported = true;
        self
    }

    pub fn push_trade_script(&self, script: Vec<Result<TradeEvent, AdapterError>>) {
        self.trade_scripts.lock().expect("mock lock").push_back(script);
    }

    pub fn push_book_script(&self, script: Vec<Result<BookTop, AdapterError>>) {
        self.book_scripts.lock().expect("mock lock").push_back(script);
    }

    pub fn set_volume_24h(&self, volume: f64) {
        self.snapshot.lock().expect("mock lock").volume_24h = volume;
    }

    /// How many times a trade feed was (re)acquired.
    pub fn trade_feed_requests(&self) -> usize {
        self.trade_feed_requests.load(Ordering::Relaxed)
    }

    pub fn book_feed_requests(&self) -> usize {
        self.book_feed_requests.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ExchangeAdapter for MockAdapter {
    fn id(&self) -> ExchangeId {
        self.id.clone()
    }

    async fn list_markets(&self) -> Result<Vec<MarketEntry>, AdapterError> {
        Ok(self.markets.clone())
    }

    async fn watch_trades(&self, native_symbol: &str) -> Result<TradeFeed, AdapterError> {
        self.trade_feed_requests.fetch_add(1, Ordering::Relaxed);
        if self.not_supported {
            return Err(AdapterError::NotSupported(format!(
                "{} does not stream {native_symbol}",
                self.id
            )));
        }
        let script = self
            .trade_scripts
            .lock()
            .expect("mock lock")
            .pop_front()
            .unwrap_or_default();
        Ok(Box::pin(stream::iter(script).chain(stream::pending())))
    }

    async fn watch_spreads(&self, native_symbol: &str) -> Result<BookFeed, AdapterError> {
        self.book_feed_requests.fetch_add(1, Ordering::Relaxed);
        if self.not_supported {
            return Err(AdapterError::NotSupported(format!(
                "{} does not stream {native_symbol}",
                self.id
            )));
        }
        let script = self
            .book_scripts
            .lock()
            .expect("mock lock")
            .pop_front()
            .unwrap_or_default();
        Ok(Box::pin(stream::iter(script).chain(stream::pending())))
    }

    async fn get_market(&self, _native_symbol: &str) -> Result<MarketSnapshot, AdapterError> {
        Ok(self.snapshot.lock().expect("mock lock").clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn scripted_feed_plays_back_in_order() {
        let adapter = MockAdapter::new("mock").with_market(market_entry("BTC/USDT", "BTCUSDT"));
        adapter.push_trade_script(vec![
            Ok(TradeEvent {
                event_ts_ms: 1.0,
                price: dec!(100),
                amount: dec!(1),
                is_buy: true,
            }),
            Err(AdapterError::Transient("flake".into())),
        ]);

        let mut feed = adapter.watch_trades("BTCUSDT").await.unwrap();
        assert!(feed.next().await.unwrap().is_ok());
        assert!(feed.next().await.unwrap().is_err());
        assert_eq!(adapter.trade_feed_requests(), 1);
    }

    #[tokio::test]
    async fn not_supported_is_signalled_distinctly() {
        let adapter = MockAdapter::new("mock").fail_streams_with_not_supported();
        let err = adapter.watch_spreads("XYZABC").await.err().unwrap();
        assert!(err.is_not_supported());
    }
}
