use crate::worker::{Worker, HEALTH_COUNTER_MAX};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use truemid_bus::{BusError, MessageBus};
use truemid_core::error::{truncate_err, AdapterError};
use truemid_core::messages::{Spread, Trade, WeightAdjust};
use truemid_core::model::SymbolMapping;
use truemid_core::time::now_ms;
use truemid_exchanges_common::{ExchangeAdapter, SymbolDirectory};

/// Trades older than this are dropped; some exchanges replay history on
/// reconnect.
const TRADE_MAX_AGE_MS: f64 = 300_000.0;
/// Backoff between streaming restarts after a transient failure.
const RESTART_BACKOFF: Duration = Duration::from_secs(5);
/// Feed-level timeouts tolerated per streaming session before they count
/// against the health counter.
const FEED_TIMEOUT_RETRIES: u32 = 3;
const FEED_TIMEOUT_BACKOFF: Duration = Duration::from_secs(5);
/// How often the 24h volume weight is re-published while streaming.
const WEIGHT_REFRESH_INTERVAL: Duration = Duration::from_secs(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Trades,
    Spreads,
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamKind::Trades => f.write_str("trades"),
            StreamKind::Spreads => f.write_str("spreads"),
        }
    }
}

enum ProducerError {
    Adapter(AdapterError),
    Bus(BusError),
}

impl ProducerError {
    fn message(&self) -> String {
        match self {
            ProducerError::Adapter(e) => e.to_string(),
            ProducerError::Bus(e) => e.to_string(),
        }
    }
}

/// Per (exchange, symbol, stream-kind) producer.
///
/// Resolves its symbol mapping (seeding the exchange's markets on first
/// use), publishes an initial volume weight, then streams events onto the
/// bus. Transient failures burn the health counter, which every delivered
/// event resets; an exhausted counter or an unsupported symbol terminates
/// the producer, which then publishes a weight of zero so the aggregator
/// excludes the venue.
pub struct MarketProducer {
    adapter: Arc<dyn ExchangeAdapter>,
    directory: Arc<dyn SymbolDirectory>,
    bus: Arc<MessageBus>,
    symbol: String,
    kind: StreamKind,
    retry_forever: bool,
    shutdown: CancellationToken,
    health: i32,
    is_live: bool,
    mapping: Option<SymbolMapping>,
}

impl MarketProducer {
    pub fn new(
        adapter: Arc<dyn ExchangeAdapter>,
        directory: Arc<dyn SymbolDirectory>,
        bus: Arc<MessageBus>,
        symbol: impl Into<String>,
        kind: StreamKind,
        retry_forever: bool,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            adapter,
            directory,
            bus,
            symbol: symbol.into(),
            kind,
            retry_forever,
            shutdown,
            health: HEALTH_COUNTER_MAX,
            is_live: false,
            mapping: None,
        }
    }

    fn exchange(&self) -> String {
        self.adapter.id().as_str().to_string()
    }

    fn mark_alive(&mut self) {
        if !self.is_live {
            info!("{} is live!", self.name());
            self.is_live = true;
        }
        self.health = HEALTH_COUNTER_MAX;
    }

    async fn resolve_mapping(&self) -> Result<SymbolMapping> {
        let exchange = self.exchange();
        if let Some(mapping) = self.directory.get_mapping(&exchange, &self.symbol).await? {
            return Ok(mapping);
        }
        // Seed the exchange's markets once, then retry the lookup.
        let markets = self
            .adapter
            .list_markets()
            .await
            .map_err(|e| anyhow!("listing {exchange} markets: {e}"))?;
        self.directory.upsert_markets(&exchange, &markets).await?;
        self.directory
            .get_mapping(&exchange, &self.symbol)
            .await?
            .ok_or_else(|| anyhow!("{exchange} does not list {}", self.symbol))
    }

    async fn stream_loop(&mut self, mapping: &SymbolMapping) -> Result<()> {
        loop {
            if self.shutdown.is_cancelled() {
                return Ok(());
            }
            match self.stream_once(mapping).await {
                // Only cancellation ends a streaming session cleanly
                Ok(()) => return Ok(()),
                Err(ProducerError::Adapter(err)) if err.is_not_supported() => {
                    warn!("Disabling {}: {}", self.name(), truncate_err(&err.to_string()));
                    self.directory
                        .mark_unavailable(mapping.symbol_id, &mapping.exchange, true)
                        .await?;
                    return Err(anyhow!("{} cannot serve {}: {err}", mapping.exchange, self.symbol));
                }
                Err(ProducerError::Bus(BusError::Fatal(msg))) => {
                    return Err(anyhow!("bus failure in {}: {msg}", self.name()));
                }
                Err(err) => {
                    self.health -= 1;
                    warn!(
                        "Unable to watch {} ({}); health now {}",
                        self.name(),
                        truncate_err(&err.message()),
                        self.health
                    );
                    if !self.retry_forever && self.health <= 0 {
                        return Err(anyhow!("{} exhausted its health budget", self.name()));
                    }
                    tokio::select! {
                        _ = self.shutdown.cancelled() => return Ok(()),
                        _ = tokio::time::sleep(RESTART_BACKOFF) => {}
                    }
                }
            }
        }
    }

    async fn stream_once(&mut self, mapping: &SymbolMapping) -> Result<(), ProducerError> {
        match self.kind {
            StreamKind::Trades => self.stream_trades(mapping).await,
            StreamKind::Spreads => self.stream_spreads(mapping).await,
        }
    }

    async fn stream_trades(&mut self, mapping: &SymbolMapping) -> Result<(), ProducerError> {
        let mut feed = self
            .adapter
            .watch_trades(&mapping.native_symbol)
            .await
            .map_err(ProducerError::Adapter)?;
        let mut timeout_retries = FEED_TIMEOUT_RETRIES;
        loop {
            let item = tokio::select! {
                _ = self.shutdown.cancelled() => return Ok(()),
                item = feed.next() => item,
            };
            match item {
                Some(Ok(event)) => {
                    if event.event_ts_ms == 0.0 {
                        continue;
                    }
                    if event.event_ts_ms < now_ms() - TRADE_MAX_AGE_MS {
                        debug!("{} dropped stale trade", self.name());
                        continue;
                    }
                    let trade = Trade::new(
                        mapping.exchange.clone(),
                        mapping.symbol_id,
                        event.event_ts_ms,
                        event.price,
                        event.amount,
                        event.is_buy,
                    );
                    self.bus.trades.publish(trade).await.map_err(ProducerError::Bus)?;
                    self.mark_alive();
                    timeout_retries = FEED_TIMEOUT_RETRIES;
                }
                Some(Err(err)) if err.is_timeout() && timeout_retries > 0 => {
                    timeout_retries -= 1;
                    info!("Timeout with {}: retrying...", self.name());
                    tokio::select! {
                        _ = self.shutdown.cancelled() => return Ok(()),
                        _ = tokio::time::sleep(FEED_TIMEOUT_BACKOFF) => {}
                    }
                    // Feeds are not restartable once errored
                    feed = self
                        .adapter
                        .watch_trades(&mapping.native_symbol)
                        .await
                        .map_err(ProducerError::Adapter)?;
                }
                Some(Err(err)) => return Err(ProducerError::Adapter(err)),
                None => {
                    return Err(ProducerError::Adapter(AdapterError::Transient(
                        "trade feed ended".to_string(),
                    )))
                }
            }
        }
    }

    async fn stream_spreads(&mut self, mapping: &SymbolMapping) -> Result<(), ProducerError> {
        let mut feed = self
            .adapter
            .watch_spreads(&mapping.native_symbol)
            .await
            .map_err(ProducerError::Adapter)?;
        let mut timeout_retries = FEED_TIMEOUT_RETRIES;
        let mut last_published: Option<(rust_decimal::Decimal, rust_decimal::Decimal)> = None;
        loop {
            let item = tokio::select! {
                _ = self.shutdown.cancelled() => return Ok(()),
                item = feed.next() => item,
            };
            match item {
                Some(Ok(top)) => {
                    if top.event_ts_ms == 0.0 {
                        continue;
                    }
                    if top.best_bid > top.best_ask {
                        debug!("{} dropped crossed book", self.name());
                        continue;
                    }
                    // Coalesce: an unchanged top of book is never published
                    if last_published == Some((top.best_bid, top.best_ask)) {
                        continue;
                    }
                    let spread = Spread::new(
                        mapping.exchange.clone(),
                        mapping.symbol_id,
                        top.event_ts_ms,
                        top.best_bid,
                        top.best_ask,
                    );
                    self.bus.spreads.publish(spread).await.map_err(ProducerError::Bus)?;
                    last_published = Some((top.best_bid, top.best_ask));
                    self.mark_alive();
                    timeout_retries = FEED_TIMEOUT_RETRIES;
                }
                Some(Err(err)) if err.is_timeout() && timeout_retries > 0 => {
                    timeout_retries -= 1;
                    info!("Timeout with {}: retrying...", self.name());
                    tokio::select! {
                        _ = self.shutdown.cancelled() => return Ok(()),
                        _ = tokio::time::sleep(FEED_TIMEOUT_BACKOFF) => {}
                    }
                    feed = self
                        .adapter
                        .watch_spreads(&mapping.native_symbol)
                        .await
                        .map_err(ProducerError::Adapter)?;
                }
                Some(Err(err)) => return Err(ProducerError::Adapter(err)),
                None => {
                    return Err(ProducerError::Adapter(AdapterError::Transient(
                        "spread feed ended".to_string(),
                    )))
                }
            }
        }
    }
}

#[async_trait]
impl Worker for MarketProducer {
    fn name(&self) -> String {
        format!("{}:{}:{}", self.exchange(), self.symbol, self.kind)
    }

    async fn init(&mut self) -> Result<()> {
        let mapping = self.resolve_mapping().await?;
        if mapping.unavailable {
            return Err(anyhow!(
                "{} is marked unavailable on {}",
                self.symbol,
                mapping.exchange
            ));
        }
        self.adapter
            .init()
            .await
            .map_err(|e| anyhow!("init of {}: {e}", self.name()))?;

        let snapshot = self
            .adapter
            .get_market(&mapping.native_symbol)
            .await
            .map_err(|e| anyhow!("24h volume for {}: {e}", self.name()))?;
        self.bus
            .publish_weight(WeightAdjust::new(
                mapping.exchange.clone(),
                mapping.symbol_id,
                snapshot.volume_24h,
            ))
            .await
            .map_err(|e| anyhow!("initial weight for {}: {e}", self.name()))?;

        self.mapping = Some(mapping);
        Ok(())
    }

    async fn run(mut self: Box<Self>) -> Result<()> {
        let mapping = self.mapping.clone().context("producer started without init")?;
        let refresher = spawn_weight_refresh(
            Arc::clone(&self.adapter),
            Arc::clone(&self.bus),
            mapping.clone(),
            self.shutdown.clone(),
        );

        let result = self.stream_loop(&mapping).await;

        refresher.abort();
        let _ = refresher.await;

        // Terminal weight so the aggregator stops counting this venue
        if let Err(err) = self
            .bus
            .publish_weight(WeightAdjust::new(mapping.exchange.clone(), mapping.symbol_id, 0.0))
            .await
        {
            warn!("Terminal weight for {} not published: {err}", self.name());
        }
        result
    }
}

fn spawn_weight_refresh(
    adapter: Arc<dyn ExchangeAdapter>,
    bus: Arc<MessageBus>,
    mapping: SymbolMapping,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(WEIGHT_REFRESH_INTERVAL);
        // First tick fires immediately; init already published that weight
        interval.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = interval.tick() => {}
            }
            match adapter.get_market(&mapping.native_symbol).await {
                Ok(snapshot) => {
                    let weight = WeightAdjust::new(
                        mapping.exchange.clone(),
                        mapping.symbol_id,
                        snapshot.volume_24h,
                    );
                    if let Err(err) = bus.publish_weight(weight).await {
                        warn!(
                            "Weight refresh for {}:{} not published: {err}",
                            mapping.exchange, mapping.symbol
                        );
                    }
                }
                Err(err) => warn!(
                    "Weight refresh for {}:{} failed: {}",
                    mapping.exchange,
                    mapping.symbol,
                    truncate_err(&err.to_string())
                ),
            }
        }
    })
}
