use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct BybitResponse<T> {
    #[serde(rename = "retCode")]
    pub ret_code: i64,
    #[serde(rename = "retMsg")]
    pub ret_msg: String,
    pub result: T,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BybitList<T> {
    pub list: Vec<T>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BybitInstrument {
    pub symbol: String,
    #[serde(rename = "baseCoin")]
    pub base_coin: String,
    #[serde(rename = "quoteCoin")]
    pub quote_coin: String,
    pub status: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BybitTickerStats {
    #[serde(rename = "lastPrice")]
    pub last_price: String,
    #[serde(rename = "volume24h")]
    pub volume_24h: String,
}

/// `publicTrade.<symbol>` push message
#[derive(Debug, Clone, Deserialize)]
pub struct BybitTradePush {
    pub topic: String,
    pub data: Vec<BybitTradeData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BybitTradeData {
    #[serde(rename = "T")]
    pub trade_time: i64,
    #[serde(rename = "p")]
    pub price: String,
    #[serde(rename = "v")]
    pub volume: String,
    #[serde(rename = "S")]
    pub side: String,
}

/// `orderbook.1.<symbol>` push message. Deltas may omit an unchanged side.
#[derive(Debug, Clone, Deserialize)]
pub struct BybitBookPush {
    pub topic: String,
    #[serde(rename = "type")]
    pub message_type: String,
    pub ts: i64,
    pub data: BybitBookData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BybitBookData {
    /// Bid levels best-first, `[price, size]` pairs
    #[serde(default, rename = "b")]
    pub bids: Vec<[String; 2]>,
    #[serde(default, rename = "a")]
    pub asks: Vec<[String; 2]>,
}
