mod types;

use async_trait::async_trait;
use futures::stream;
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::str::FromStr;
use tracing::debug;
use truemid_core::error::AdapterError;
use truemid_core::model::{BookTop, ExchangeId, MarketEntry, MarketSnapshot, TradeEvent};
use truemid_exchanges_common::{BookFeed, ExchangeAdapter, TradeFeed, WsClient};

use types::{
    BybitBookPush, BybitInstrument, BybitList, BybitResponse, BybitTickerStats, BybitTradePush,
};

const BYBIT_REST_URL: &str = "https://api.bybit.com/v5";
const BYBIT_WS_URL: &str = "wss://stream.bybit.com/v5/public/spot";

pub struct BybitAdapter {
    http: reqwest::Client,
}

impl BybitAdapter {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    async fn get_result<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, AdapterError> {
        // Error envelopes carry an empty `result`, so check retCode before
        // decoding the payload
        let response: BybitResponse<serde_json::Value> = self
            .http
            .get(url)
            .send()
            .await
            .map_err(classify_reqwest)?
            .error_for_status()
            .map_err(classify_reqwest)?
            .json()
            .await
            .map_err(classify_reqwest)?;
        if response.ret_code != 0 {
            return Err(AdapterError::NotSupported(format!(
                "bybit retCode {}: {}",
                response.ret_code, response.ret_msg
            )));
        }
        serde_json::from_value(response.result)
            .map_err(|e| AdapterError::Transient(format!("bybit payload: {e}")))
    }

    async fn subscribe(&self, topic: &str) -> Result<WsClient, AdapterError> {
        let mut client = WsClient::connect(BYBIT_WS_URL).await?;
        client
            .send_text(format!(r#"{{"op":"subscribe","args":["{topic}"]}}"#))
            .await?;
        Ok(client)
    }
}

impl Default for BybitAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExchangeAdapter for BybitAdapter {
    fn id(&self) -> ExchangeId {
        ExchangeId::from("bybit")
    }

    async fn list_markets(&self) -> Result<Vec<MarketEntry>, AdapterError> {
        let result: BybitList<BybitInstrument> = self
            .get_result(&format!("{BYBIT_REST_URL}/market/instruments-info?category=spot"))
            .await?;
        let markets = result
            .list
            .into_iter()
            .filter(|m| m.status == "Trading")
            .map(|m| MarketEntry {
                symbol: format!("{}/{}", m.base_coin, m.quote_coin),
                native_symbol: m.symbol,
                base: m.base_coin,
                quote: m.quote_coin,
            })
            .collect::<Vec<_>>();
        debug!(count = markets.len(), "Loaded bybit markets");
        Ok(markets)
    }

    async fn watch_trades(&self, native_symbol: &str) -> Result<TradeFeed, AdapterError> {
        let client = self.subscribe(&format!("publicTrade.{native_symbol}")).await?;
        let state = (client, VecDeque::<TradeEvent>::new());
        Ok(Box::pin(stream::unfold(state, |(mut client, mut ready)| async move {
            loop {
                if let Some(event) = ready.pop_front() {
                    return Some((Ok(event), (client, ready)));
                }
                match client.next_text().await {
                    Ok(text) => match serde_json::from_str::<BybitTradePush>(&text) {
                        Ok(push) => {
                            for data in push.data {
                                match parse_trade(&data) {
                                    Ok(event) => ready.push_back(event),
                                    Err(err) => return Some((Err(err), (client, ready))),
                                }
                            }
                        }
                        // Subscription acks and pongs
                        Err(_) => continue,
                    },
                    Err(err) => return Some((Err(err), (client, ready))),
                }
            }
        })))
    }

    async fn watch_spreads(&self, native_symbol: &str) -> Result<BookFeed, AdapterError> {
        let client = self.subscribe(&format!("orderbook.1.{native_symbol}")).await?;
        let state = (client, TopOfBook::default());
        Ok(Box::pin(stream::unfold(state, |(mut client, mut book)| async move {
            loop {
                match client.next_text().await {
                    Ok(text) => match serde_json::from_str::<BybitBookPush>(&text) {
                        Ok(push) => match book.apply(&push) {
                            Ok(Some(top)) => return Some((Ok(top), (client, book))),
                            Ok(None) => continue,
                            Err(err) => return Some((Err(err), (client, book))),
                        },
                        Err(_) => continue,
                    },
                    Err(err) => return Some((Err(err), (client, book))),
                }
            }
        })))
    }

    async fn get_market(&self, native_symbol: &str) -> Result<MarketSnapshot, AdapterError> {
        let result: BybitList<BybitTickerStats> = self
            .get_result(&format!(
                "{BYBIT_REST_URL}/market/tickers?category=spot&symbol={native_symbol}"
            ))
            .await?;
        let stats = result.list.into_iter().next().ok_or_else(|| {
            AdapterError::NotSupported(format!("bybit has no ticker for {native_symbol}"))
        })?;
        Ok(MarketSnapshot {
            close: parse_decimal(&stats.last_price)?,
            volume_24h: stats
                .volume_24h
                .parse::<f64>()
                .map_err(|e| AdapterError::Transient(format!("bad 24h volume: {e}")))?,
        })
    }
}

#[derive(Default)]
struct TopOfBook {
    best_bid: Option<Decimal>,
    best_ask: Option<Decimal>,
}

impl TopOfBook {
    /// Fold a snapshot or delta into the tracked top of book. Deltas omit
    /// unchanged sides; a zero size clears a level without a replacement,
    /// in which case the previous value is kept until the next update.
    fn apply(&mut self, push: &BybitBookPush) -> Result<Option<BookTop>, AdapterError> {
        if let Some(level) = push.data.bids.first() {
            if !is_zero_size(&level[1]) {
                self.best_bid = Some(parse_decimal(&level[0])?);
            }
        }
        if let Some(level) = push.data.asks.first() {
            if !is_zero_size(&level[1]) {
                self.best_ask = Some(parse_decimal(&level[0])?);
            }
        }
        match (self.best_bid, self.best_ask) {
            (Some(best_bid), Some(best_ask)) => Ok(Some(BookTop {
                event_ts_ms: push.ts as f64,
                best_bid,
                best_ask,
            })),
            _ => Ok(None),
        }
    }
}

fn parse_trade(data: &types::BybitTradeData) -> Result<TradeEvent, AdapterError> {
    Ok(TradeEvent {
        event_ts_ms: data.trade_time as f64,
        price: parse_decimal(&data.price)?,
        amount: parse_decimal(&data.volume)?,
        is_buy: data.side == "Buy",
    })
}

fn is_zero_size(raw: &str) -> bool {
    matches!(Decimal::from_str(raw), Ok(size) if size.is_zero())
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

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn push(raw: &str) -> BybitBookPush {
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn snapshot_then_delta_keeps_missing_side() {
        let mut book = TopOfBook::default();

        let snapshot = push(
            r#"{"topic":"orderbook.1.BTCUSDT","type":"snapshot","ts":1,
                "data":{"s":"BTCUSDT","b":[["100.0","2"]],"a":[["101.0","3"]]}}"#,
        );
        let top = book.apply(&snapshot).unwrap().unwrap();
        assert_eq!(top.best_bid, dec!(100.0));
        assert_eq!(top.best_ask, dec!(101.0));

        // Delta touching only the bid side keeps the known ask
        let delta = push(
            r#"{"topic":"orderbook.1.BTCUSDT","type":"delta","ts":2,
                "data":{"s":"BTCUSDT","b":[["100.5","1"]]}}"#,
        );
        let top = book.apply(&delta).unwrap().unwrap();
        assert_eq!(top.best_bid, dec!(100.5));
        assert_eq!(top.best_ask, dec!(101.0));
        assert_eq!(top.event_ts_ms, 2.0);
    }

    #[test]
    fn no_emission_until_both_sides_known() {
        let mut book = TopOfBook::default();
        let bid_only = push(
            r#"{"topic":"orderbook.1.BTCUSDT","type":"delta","ts":1,
                "data":{"s":"BTCUSDT","b":[["100.0","2"]]}}"#,
        );
        assert!(book.apply(&bid_only).unwrap().is_none());
    }

    #[test]
    fn zero_size_level_keeps_previous_price() {
        let mut book = TopOfBook::default();
        let snapshot = push(
            r#"{"topic":"orderbook.1.BTCUSDT","type":"snapshot","ts":1,
                "data":{"s":"BTCUSDT","b":[["100.0","2"]],"a":[["101.0","3"]]}}"#,
        );
        book.apply(&snapshot).unwrap();

        let clear_bid = push(
            r#"{"topic":"orderbook.1.BTCUSDT","type":"delta","ts":2,
                "data":{"s":"BTCUSDT","b":[["100.0","0"]]}}"#,
        );
        let top = book.apply(&clear_bid).unwrap().unwrap();
        assert_eq!(top.best_bid, dec!(100.0));
    }

    #[test]
    fn trade_side_maps_from_taker_direction() {
        let data = types::BybitTradeData {
            trade_time: 5,
            price: "43000.5".to_string(),
            volume: "0.01".to_string(),
            side: "Sell".to_string(),
        };
        let trade = parse_trade(&data).unwrap();
        assert!(!trade.is_buy);
        assert_eq!(trade.amount, dec!(0.01));
    }
}
