pub mod adapter;
pub mod client;
pub mod directory;
pub mod mock;
pub mod retry;

pub use adapter::{BookFeed, ExchangeAdapter, TradeFeed};
pub use client::WsClient;
pub use directory::{MemoryDirectory, SymbolDirectory};
pub use mock::MockAdapter;
pub use retry::{retry_with_backoff, RetryConfig};
