use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use truemid_core::error::AdapterError;
use truemid_core::model::{BookTop, ExchangeId, MarketEntry, MarketSnapshot, TradeEvent};

/// Infinite trade feed. Not restartable once it yields an error; callers
/// acquire a fresh feed instead.
pub type TradeFeed = Pin<Box<dyn Stream<Item = Result<TradeEvent, AdapterError>> + Send>>;

/// Infinite top-of-book feed with the same error contract as [`TradeFeed`].
pub type BookFeed = Pin<Box<dyn Stream<Item = Result<BookTop, AdapterError>> + Send>>;

/// Common interface for exchange adapters.
///
/// `NotSupported` from any method means the exchange permanently cannot
/// serve the request; every other error is treated as transient.
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    /// Exchange identifier
    fn id(&self) -> ExchangeId;

    /// One-shot initialization; may fetch exchange metadata.
    async fn init(&self) -> Result<(), AdapterError> {
        Ok(())
    }

    /// All markets the exchange currently lists.
    async fn list_markets(&self) -> Result<Vec<MarketEntry>, AdapterError>;

    /// Stream of trades for one market, in the exchange's native symbol.
    async fn watch_trades(&self, native_symbol: &str) -> Result<TradeFeed, AdapterError>;

    /// Stream of best bid/ask for one market.
    async fn watch_spreads(&self, native_symbol: &str) -> Result<BookFeed, AdapterError>;

    /// Last close and 24h base volume, used for consensus weighting.
    async fn get_market(&self, native_symbol: &str) -> Result<MarketSnapshot, AdapterError>;
}
