mod types;

use async_trait::async_trait;
use futures::stream;
use rust_decimal::Decimal;
use std::str::FromStr;
use tracing::debug;
use truemid_core::error::AdapterError;
use truemid_core::model::{BookTop, ExchangeId, MarketEntry, MarketSnapshot, TradeEvent};
use truemid_core::time::now_ms;
use truemid_exchanges_common::{BookFeed, ExchangeAdapter, TradeFeed, WsClient};

use types::{Binance24hrStats, BinanceBookTicker, BinanceExchangeInfo, BinanceTradeEvent};

const BINANCE_REST_URL: &str = "https://api.binance.com/api/v3";
const BINANCE_WS_URL: &str = "wss://stream.binance.com:9443/ws";

pub struct BinanceAdapter {
    http: reqwest::Client,
}

impl BinanceAdapter {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, AdapterError> {
        let response = self.http.get(url).send().await.map_err(classify_reqwest)?;
        if response.status() == reqwest::StatusCode::BAD_REQUEST {
            return Err(AdapterError::NotSupported(format!("binance rejected {url}")));
        }
        let response = response.error_for_status().map_err(classify_reqwest)?;
        response.json::<T>().await.map_err(classify_reqwest)
    }
}

impl Default for BinanceAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExchangeAdapter for BinanceAdapter {
    fn id(&self) -> ExchangeId {
        ExchangeId::from("binance")
    }

    async fn list_markets(&self) -> Result<Vec<MarketEntry>, AdapterError> {
        let info: BinanceExchangeInfo =
            self.get_json(&format!("{BINANCE_REST_URL}/exchangeInfo")).await?;
        let markets = info
            .symbols
            .into_iter()
            .filter(|m| m.status == "TRADING")
            .map(|m| MarketEntry {
                symbol: format!("{}/{}", m.base_asset, m.quote_asset),
                native_symbol: m.symbol,
                base: m.base_asset,
                quote: m.quote_asset,
            })
            .collect::<Vec<_>>();
        debug!(count = markets.len(), "Loaded binance markets");
        Ok(markets)
    }

    async fn watch_trades(&self, native_symbol: &str) -> Result<TradeFeed, AdapterError> {
        let url = format!("{BINANCE_WS_URL}/{}@trade", native_symbol.to_lowercase());
        let client = WsClient::connect(&url).await?;
        Ok(Box::pin(stream::unfold(client, |mut client| async move {
            loop {
                match client.next_text().await {
                    Ok(text) => match serde_json::from_str::<BinanceTradeEvent>(&text) {
                        Ok(event) if event.event_type == "trade" => {
                            return Some((parse_trade(event), client));
                        }
                        // Subscription acks and other frames
                        _ => continue,
                    },
                    Err(err) => return Some((Err(err), client)),
                }
            }
        })))
    }

    async fn watch_spreads(&self, native_symbol: &str) -> Result<BookFeed, AdapterError> {
        let url = format!("{BINANCE_WS_URL}/{}@bookTicker", native_symbol.to_lowercase());
        let client = WsClient::connect(&url).await?;
        Ok(Box::pin(stream::unfold(client, |mut client| async move {
            loop {
                match client.next_text().await {
                    Ok(text) => match serde_json::from_str::<BinanceBookTicker>(&text) {
                        Ok(ticker) => return Some((parse_book_top(ticker), client)),
                        Err(_) => continue,
                    },
                    Err(err) => return Some((Err(err), client)),
                }
            }
        })))
    }

    async fn get_market(&self, native_symbol: &str) -> Result<MarketSnapshot, AdapterError> {
        let stats: Binance24hrStats = self
            .get_json(&format!("{BINANCE_REST_URL}/ticker/24hr?symbol={native_symbol}"))
            .await?;
        Ok(MarketSnapshot {
            close: parse_decimal(&stats.last_price)?,
            volume_24h: stats
                .volume
                .parse::<f64>()
                .map_err(|e| AdapterError::Transient(format!("bad 24h volume: {e}")))?,
        })
    }
}

fn parse_trade(event: BinanceTradeEvent) -> Result<TradeEvent, AdapterError> {
    Ok(TradeEvent {
        event_ts_ms: event.trade_time as f64,
        price: parse_decimal(&event.price)?,
        amount: parse_decimal(&event.quantity)?,
        // Buyer as maker means the taker sold
        is_buy: !event.buyer_is_maker,
    })
}

fn parse_book_top(ticker: BinanceBookTicker) -> Result<BookTop, AdapterError> {
    Ok(BookTop {
        // Spot bookTicker frames carry no event time; stamp at receipt
        event_ts_ms: now_ms(),
        best_bid: parse_decimal(&ticker.best_bid)?,
        best_ask: parse_decimal(&ticker.best_ask)?,
    })
}

fn parse_decimal(raw: &str) -> Result<Decimal, AdapterError> {
    Decimal::from_str(raw).map_err(|e| AdapterError::Transient(format!("bad decimal '{raw}': {e}")))
}

fn classify_reqwest(err: reqwest::Error) -> AdapterError {
    if err.is_timeout() {
        AdapterError::Timeout(err.to_string())
    } else {
        AdapterError::Transient(err.to_string())
    }
}
