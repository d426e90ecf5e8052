use crate::error::BusError;
use crate::redis_stream::spawn_reader;
use crate::topic::TopicHandle;
use redis::aio::ConnectionManager;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use truemid_cache::LastValueCache;
use truemid_core::messages::{Spread, Trade, TrueMidPrice, WeightAdjust};

pub const TRADES_STREAM: &str = "symbol_trades";
pub const SPREADS_STREAM: &str = "symbol_spreads";
pub const WEIGHTS_STREAM: &str = "connector_weights";
pub const TRUE_PRICES_STREAM: &str = "symbol_true_prices";

enum Backend {
    Memory,
    Redis { client: redis::Client },
}

/// The typed multi-topic bus connecting producers, the aggregator and the
/// sinks. Built once at startup; `enter` before launching workers, `exit`
/// on shutdown.
pub struct MessageBus {
    pub trades: TopicHandle<Trade>,
    pub spreads: TopicHandle<Spread>,
    pub weights: TopicHandle<WeightAdjust>,
    pub true_prices: TopicHandle<TrueMidPrice>,
    /// Latest weight and true price per key, for consumers that join late.
    pub last_values: LastValueCache,
    backend: Backend,
    reader_token: CancellationToken,
    readers: Mutex<Vec<JoinHandle<()>>>,
    fatal_tx: watch::Sender<Option<String>>,
    fatal_rx: watch::Receiver<Option<String>>,
}

impl MessageBus {
    /// Single-node bus: unbounded multi-subscriber queues, publish cannot
    /// fail.
    pub fn in_process() -> Self {
        let (fatal_tx, fatal_rx) = watch::channel(None);
        Self {
            trades: TopicHandle::memory("trades"),
            spreads: TopicHandle::memory("spreads"),
            weights: TopicHandle::memory("weights"),
            true_prices: TopicHandle::memory("true_prices"),
            last_values: LastValueCache::new(),
            backend: Backend::Memory,
            reader_token: CancellationToken::new(),
            readers: Mutex::new(Vec::new()),
            fatal_tx,
            fatal_rx,
        }
    }

    /// Distributed bus backed by Redis Streams, one stream per topic.
    pub async fn redis(url: &str) -> Result<Self, BusError> {
        let client = redis::Client::open(url).map_err(BusError::from)?;
        let conn = ConnectionManager::new(client.clone()).await?;
        let (fatal_tx, fatal_rx) = watch::channel(None);
        Ok(Self {
            trades: TopicHandle::redis("trades", TRADES_STREAM, conn.clone()),
            spreads: TopicHandle::redis("spreads", SPREADS_STREAM, conn.clone()),
            weights: TopicHandle::redis("weights", WEIGHTS_STREAM, conn.clone()),
            true_prices: TopicHandle::redis("true_prices", TRUE_PRICES_STREAM, conn),
            last_values: LastValueCache::new(),
            backend: Backend::Redis { client },
            reader_token: CancellationToken::new(),
            readers: Mutex::new(Vec::new()),
            fatal_tx,
            fatal_rx,
        })
    }

    /// Initialize the backend. For the stream-backed variant this pings the
    /// store and starts one tail reader per topic; workers must not start
    /// before this returns.
    pub async fn enter(&self) -> Result<(), BusError> {
        match &self.backend {
            Backend::Memory => Ok(()),
            Backend::Redis { client } => {
                let mut conn = client.get_multiplexed_async_connection().await?;
                redis::cmd("PING").query_async::<_, String>(&mut conn).await?;
                let mut readers = self.readers.lock().await;
                readers.push(spawn_reader(
                    client.clone(),
                    self.trades.clone(),
                    TRADES_STREAM,
                    self.reader_token.clone(),
                    self.fatal_tx.clone(),
                ));
                readers.push(spawn_reader(
                    client.clone(),
                    self.spreads.clone(),
                    SPREADS_STREAM,
                    self.reader_token.clone(),
                    self.fatal_tx.clone(),
                ));
                readers.push(spawn_reader(
                    client.clone(),
                    self.weights.clone(),
                    WEIGHTS_STREAM,
                    self.reader_token.clone(),
                    self.fatal_tx.clone(),
                ));
                readers.push(spawn_reader(
                    client.clone(),
                    self.true_prices.clone(),
                    TRUE_PRICES_STREAM,
                    self.reader_token.clone(),
                    self.fatal_tx.clone(),
                ));
                info!("Message bus entered (redis streams)");
                Ok(())
            }
        }
    }

    /// Stop stream readers and drop the backend client. In-flight local
    /// queues are abandoned; the external store retains its entries.
    pub async fn exit(&self) {
        self.reader_token.cancel();
        let mut readers = self.readers.lock().await;
        for handle in readers.drain(..) {
            let _ = handle.await;
        }
        debug!("Message bus exited");
    }

    /// Resolves when a bus backend declared itself dead. Never resolves for
    /// the in-process variant.
    pub async fn wait_fatal(&self) -> String {
        let mut rx = self.fatal_rx.clone();
        loop {
            if let Some(msg) = rx.borrow().clone() {
                return msg;
            }
            if rx.changed().await.is_err() {
                // Sender gone; nothing will ever be reported.
                std::future::pending::<()>().await;
            }
        }
    }

    /// Publish a weight and remember it as the latest value for its
    /// (exchange, symbol) key.
    pub async fn publish_weight(&self, weight: WeightAdjust) -> Result<(), BusError> {
        self.last_values.set_weight(weight.clone());
        self.weights.publish(weight).await
    }

    /// Publish a consensus price and remember it per symbol.
    pub async fn publish_true_price(&self, price: TrueMidPrice) -> Result<(), BusError> {
        self.last_values.set_true_price(price.clone());
        self.true_prices.publish(price).await
    }
}
