use anyhow::{bail, Result};
use std::sync::Arc;
use truemid_binance::BinanceAdapter;
use truemid_bybit::BybitAdapter;
use truemid_exchanges_common::ExchangeAdapter;

/// The closed set of supported exchanges.
pub const SUPPORTED_EXCHANGES: &[&str] = &["binance", "bybit"];

pub fn create_adapter(name: &str) -> Result<Arc<dyn ExchangeAdapter>> {
    match name {
        "binance" => Ok(Arc::new(BinanceAdapter::new())),
        "bybit" => Ok(Arc::new(BybitAdapter::new())),
        other => bail!("unknown exchange '{other}'"),
    }
}
