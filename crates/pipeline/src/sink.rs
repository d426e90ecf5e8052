use crate::worker::Worker;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use truemid_bus::{Subscription, TopicHandle};
use truemid_core::messages::{BusMessage, Spread, Trade, TrueMidPrice};

/// Idle sleep when the drain found nothing.
const SLEEP_DELAY: Duration = Duration::from_millis(20);
/// Flushes slower than this are surfaced in the logs.
const FLUSH_WARN_AFTER: Duration = Duration::from_secs(1);
const FLUSH_RETRY_DELAY: Duration = Duration::from_secs(1);
const THROUGHPUT_LOG_INTERVAL: Duration = Duration::from_secs(5);
/// Consecutive flush failures tolerated before the sink gives up.
pub const DEFAULT_MAX_FLUSH_FAILURES: u32 = 10;

/// Writes one batch of messages to storage. Implementations own their
/// dedicated single-connection pool.
#[async_trait]
pub trait SinkFlush<T>: Send + Sync + 'static {
    fn stream_name(&self) -> &'static str;
    async fn flush(&self, records: &[T]) -> Result<()>;
}

/// Drains one topic into storage in batches.
///
/// Messages are acked to the subscription only after the batch committed;
/// a failed flush retries the same batch.
pub struct StreamSink<T: BusMessage, F: SinkFlush<T>> {
    topic: TopicHandle<T>,
    flush: F,
    shutdown: CancellationToken,
    max_flush_failures: u32,
}

impl<T: BusMessage, F: SinkFlush<T>> StreamSink<T, F> {
    pub fn new(topic: TopicHandle<T>, flush: F, shutdown: CancellationToken) -> Self {
        Self {
            topic,
            flush,
            shutdown,
            max_flush_failures: DEFAULT_MAX_FLUSH_FAILURES,
        }
    }

    pub fn with_max_flush_failures(mut self, max: u32) -> Self {
        self.max_flush_failures = max;
        self
    }

    fn drain(subscription: &mut Subscription<T>) -> Vec<T> {
        let mut batch = Vec::new();
        while let Some(message) = subscription.try_recv() {
            batch.push(message);
        }
        batch
    }
}

#[async_trait]
impl<T: BusMessage, F: SinkFlush<T>> Worker for StreamSink<T, F> {
    fn name(&self) -> String {
        format!("db-sink:{}", self.flush.stream_name())
    }

    fn is_critical(&self) -> bool {
        true
    }

    async fn run(self: Box<Self>) -> Result<()> {
        let mut subscription = self.topic.subscribe();
        let counter = Arc::new(AtomicU64::new(0));
        let throughput_task = spawn_throughput_monitor(
            self.name(),
            Arc::clone(&counter),
            self.shutdown.clone(),
        );
        info!("{} is live!", self.name());

        let result = loop {
            if self.shutdown.is_cancelled() {
                break Ok(());
            }
            let batch = Self::drain(&mut subscription);
            if batch.is_empty() {
                tokio::select! {
                    _ = self.shutdown.cancelled() => break Ok(()),
                    _ = tokio::time::sleep(SLEEP_DELAY) => {}
                }
                continue;
            }

            let mut failures: u32 = 0;
            loop {
                let started = Instant::now();
                match self.flush.flush(&batch).await {
                    Ok(()) => {
                        let elapsed = started.elapsed();
                        if elapsed > FLUSH_WARN_AFTER {
                            warn!("Waited {:.2}s for flush!", elapsed.as_secs_f64());
                        }
                        for _ in &batch {
                            subscription.ack();
                        }
                        counter.fetch_add(batch.len() as u64, Ordering::Relaxed);
                        metrics::counter!("db_inserts_total", "stream" => self.flush.stream_name())
                            .increment(batch.len() as u64);
                        break;
                    }
                    Err(err) => {
                        failures += 1;
                        if failures >= self.max_flush_failures {
                            break;
                        }
                        warn!(
                            "Flush of {} {} records failed ({err}), retrying same batch",
                            batch.len(),
                            self.flush.stream_name()
                        );
                        tokio::select! {
                            _ = self.shutdown.cancelled() => break,
                            _ = tokio::time::sleep(FLUSH_RETRY_DELAY) => {}
                        }
                    }
                }
            }
            if failures >= self.max_flush_failures {
                break Err(anyhow!(
                    "{} gave up after {} consecutive flush failures",
                    self.name(),
                    failures
                ));
            }
            if self.shutdown.is_cancelled() {
                break Ok(());
            }
        };

        throughput_task.abort();
        let _ = throughput_task.await;
        result
    }
}

fn spawn_throughput_monitor(
    name: String,
    counter: Arc<AtomicU64>,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(THROUGHPUT_LOG_INTERVAL) => {}
            }
            let processed = counter.swap(0, Ordering::Relaxed);
            if processed > 0 {
                info!(
                    "{name} processed {processed} records in the last {}s",
                    THROUGHPUT_LOG_INTERVAL.as_secs()
                );
            } else {
                info!(
                    "{name} processed no records in the last {}s",
                    THROUGHPUT_LOG_INTERVAL.as_secs()
                );
            }
        }
    })
}

/// Trades flush against the dedicated priority pool.
pub struct PgTradesFlush {
    pool: PgPool,
}

impl PgTradesFlush {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SinkFlush<Trade> for PgTradesFlush {
    fn stream_name(&self) -> &'static str {
        "trades"
    }

    async fn flush(&self, records: &[Trade]) -> Result<()> {
        truemid_db::streams::insert_trades(&self.pool, records).await?;
        Ok(())
    }
}

pub struct PgSpreadsFlush {
    pool: PgPool,
}

impl PgSpreadsFlush {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SinkFlush<Spread> for PgSpreadsFlush {
    fn stream_name(&self) -> &'static str {
        "spreads"
    }

    async fn flush(&self, records: &[Spread]) -> Result<()> {
        truemid_db::streams::insert_spreads(&self.pool, records).await?;
        Ok(())
    }
}

pub struct PgTruePricesFlush {
    pool: PgPool,
}

impl PgTruePricesFlush {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SinkFlush<TrueMidPrice> for PgTruePricesFlush {
    fn stream_name(&self) -> &'static str {
        "true_prices"
    }

    async fn flush(&self, records: &[TrueMidPrice]) -> Result<()> {
        truemid_db::streams::insert_true_mid_prices(&self.pool, records).await?;
        Ok(())
    }
}
