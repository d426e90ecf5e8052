use crate::aggregator::TrueMidAggregator;
use crate::producer::{MarketProducer, StreamKind};
use crate::sink::{PgSpreadsFlush, PgTradesFlush, PgTruePricesFlush, StreamSink};
use crate::worker::Worker;
use anyhow::{anyhow, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use truemid_bus::MessageBus;
use truemid_core::error::truncate_err;
use truemid_exchanges_common::{ExchangeAdapter, SymbolDirectory};

/// Grace period for workers to observe cancellation before they are
/// aborted outright.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

pub const DEFAULT_LAUNCH_WORKERS: usize = 5;

/// Owns the worker queue and the bus lifecycle.
///
/// Workers are queued with `put_worker` and picked up by a small pool of
/// launcher tasks: init on the launcher, then `run` spawned as its own
/// task. Init failures are logged and the worker dropped; the producer's
/// streaming-phase retries cover transient trouble later.
pub struct ProcessingCore {
    bus: Arc<MessageBus>,
    queue_tx: mpsc::UnboundedSender<Box<dyn Worker>>,
    queue_rx: Arc<Mutex<mpsc::UnboundedReceiver<Box<dyn Worker>>>>,
    active_workers: Arc<Mutex<Vec<(String, JoinHandle<()>)>>>,
    launch_workers: usize,
    shutdown: CancellationToken,
    fatal_tx: watch::Sender<Option<String>>,
    fatal_rx: watch::Receiver<Option<String>>,
}

impl ProcessingCore {
    pub fn new(bus: Arc<MessageBus>, launch_workers: usize) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let (fatal_tx, fatal_rx) = watch::channel(None);
        Self {
            bus,
            queue_tx,
            queue_rx: Arc::new(Mutex::new(queue_rx)),
            active_workers: Arc::new(Mutex::new(Vec::new())),
            launch_workers,
            shutdown: CancellationToken::new(),
            fatal_tx,
            fatal_rx,
        }
    }

    pub fn bus(&self) -> Arc<MessageBus> {
        Arc::clone(&self.bus)
    }

    /// Token observed by every worker; cancel it to shut the pipeline down.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn put_worker(&self, worker: Box<dyn Worker>) -> Result<()> {
        self.queue_tx
            .send(worker)
            .map_err(|_| anyhow!("worker queue closed"))
    }

    /// Queue a trades producer for one (exchange, symbol).
    pub fn watch_trades(
        &self,
        adapter: Arc<dyn ExchangeAdapter>,
        directory: Arc<dyn SymbolDirectory>,
        symbol: &str,
        retry_forever: bool,
    ) -> Result<()> {
        self.put_worker(Box::new(MarketProducer::new(
            adapter,
            directory,
            self.bus(),
            symbol,
            StreamKind::Trades,
            retry_forever,
            self.shutdown.clone(),
        )))
    }

    /// Queue a spreads producer for one (exchange, symbol).
    pub fn watch_spreads(
        &self,
        adapter: Arc<dyn ExchangeAdapter>,
        directory: Arc<dyn SymbolDirectory>,
        symbol: &str,
        retry_forever: bool,
    ) -> Result<()> {
        self.put_worker(Box::new(MarketProducer::new(
            adapter,
            directory,
            self.bus(),
            symbol,
            StreamKind::Spreads,
            retry_forever,
            self.shutdown.clone(),
        )))
    }

    /// Queue the aggregator and the three sink workers, each with its own
    /// dedicated single-connection pool.
    pub async fn consume_streams_to_db(&self, database_url: &str) -> Result<()> {
        let trades_pool = truemid_db::priority_connect(database_url).await?;
        let spreads_pool = truemid_db::priority_connect(database_url).await?;
        let prices_pool = truemid_db::priority_connect(database_url).await?;

        self.put_worker(Box::new(StreamSink::new(
            self.bus.trades.clone(),
            PgTradesFlush::new(trades_pool),
            self.shutdown.clone(),
        )))?;
        self.put_worker(Box::new(StreamSink::new(
            self.bus.spreads.clone(),
            PgSpreadsFlush::new(spreads_pool),
            self.shutdown.clone(),
        )))?;
        self.put_worker(Box::new(StreamSink::new(
            self.bus.true_prices.clone(),
            PgTruePricesFlush::new(prices_pool),
            self.shutdown.clone(),
        )))?;
        self.put_worker(Box::new(TrueMidAggregator::new(
            self.bus(),
            self.shutdown.clone(),
        )))
    }

    /// Enter the bus, run launchers until shutdown or a fatal failure,
    /// then tear everything down.
    pub async fn run(&self) -> Result<()> {
        self.bus.enter().await.map_err(|e| anyhow!("entering bus: {e}"))?;

        let launchers: Vec<JoinHandle<()>> = (0..self.launch_workers)
            .map(|_| {
                let queue = Arc::clone(&self.queue_rx);
                let active = Arc::clone(&self.active_workers);
                let shutdown = self.shutdown.clone();
                let fatal_tx = self.fatal_tx.clone();
                tokio::spawn(launcher_loop(queue, active, shutdown, fatal_tx))
            })
            .collect();

        let mut fatal_rx = self.fatal_rx.clone();
        let result = tokio::select! {
            _ = self.shutdown.cancelled() => Ok(()),
            _ = fatal_rx.changed() => {
                let msg = fatal_rx.borrow().clone().unwrap_or_else(|| "unknown fatal error".to_string());
                Err(anyhow!(msg))
            }
            msg = self.bus.wait_fatal() => Err(anyhow!(msg)),
        };

        // Stop feeding new workers, then give the running ones a moment to
        // observe cancellation before aborting stragglers.
        self.shutdown.cancel();
        for launcher in &launchers {
            launcher.abort();
        }
        let mut active = self.active_workers.lock().await;
        let workers: Vec<(String, JoinHandle<()>)> = active.drain(..).collect();
        drop(active);
        let abort_handles: Vec<_> = workers.iter().map(|(_, h)| h.abort_handle()).collect();
        let drain = async {
            for (_, handle) in workers {
                let _ = handle.await;
            }
        };
        if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
            warn!("Some workers did not stop in time, aborting them");
            for handle in abort_handles {
                handle.abort();
            }
        }

        self.bus.exit().await;
        result
    }

    /// Number of workers whose `run` task was started.
    pub async fn active_worker_count(&self) -> usize {
        self.active_workers.lock().await.len()
    }
}

async fn launcher_loop(
    queue: Arc<Mutex<mpsc::UnboundedReceiver<Box<dyn Worker>>>>,
    active: Arc<Mutex<Vec<(String, JoinHandle<()>)>>>,
    shutdown: CancellationToken,
    fatal_tx: watch::Sender<Option<String>>,
) {
    loop {
        let worker = tokio::select! {
            _ = shutdown.cancelled() => return,
            worker = async { queue.lock().await.recv().await } => match worker {
                Some(worker) => worker,
                None => return,
            },
        };
        let name = worker.name();
        info!("Launching {name}...");
        let mut worker = worker;
        if let Err(err) = worker.init().await {
            warn!("Error during init of {name}: {}", truncate_err(&format!("{err:#}")));
            continue;
        }
        let critical = worker.is_critical();
        let fatal_tx = fatal_tx.clone();
        let task_name = name.clone();
        let handle = tokio::spawn(async move {
            if let Err(err) = worker.run().await {
                error!("{task_name} failed: {err:#}");
                if critical {
                    let _ = fatal_tx.send(Some(format!("{task_name} failed: {err}")));
                }
            }
        });
        active.lock().await.push((name, handle));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FlagWorker {
        ran: Arc<AtomicBool>,
        fail_init: bool,
        shutdown: CancellationToken,
    }

    #[async_trait]
    impl Worker for FlagWorker {
        fn name(&self) -> String {
            "flag-worker".to_string()
        }

        async fn init(&mut self) -> Result<()> {
            if self.fail_init {
                Err(anyhow!("init refused"))
            } else {
                Ok(())
            }
        }

        async fn run(self: Box<Self>) -> Result<()> {
            self.ran.store(true, Ordering::SeqCst);
            self.shutdown.cancelled().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn launcher_starts_queued_workers() {
        let core = ProcessingCore::new(Arc::new(MessageBus::in_process()), 2);
        let ran = Arc::new(AtomicBool::new(false));
        core.put_worker(Box::new(FlagWorker {
            ran: Arc::clone(&ran),
            fail_init: false,
            shutdown: core.shutdown_token(),
        }))
        .unwrap();

        let token = core.shutdown_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            token.cancel();
        });
        core.run().await.unwrap();

        assert!(ran.load(Ordering::SeqCst));
        assert_eq!(core.active_worker_count().await, 0);
    }

    #[tokio::test]
    async fn init_failure_drops_worker_without_stopping_core() {
        let core = ProcessingCore::new(Arc::new(MessageBus::in_process()), 1);
        let ran = Arc::new(AtomicBool::new(false));
        core.put_worker(Box::new(FlagWorker {
            ran: Arc::clone(&ran),
            fail_init: true,
            shutdown: core.shutdown_token(),
        }))
        .unwrap();
        let survivor = Arc::new(AtomicBool::new(false));
        core.put_worker(Box::new(FlagWorker {
            ran: Arc::clone(&survivor),
            fail_init: false,
            shutdown: core.shutdown_token(),
        }))
        .unwrap();

        let token = core.shutdown_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            token.cancel();
        });
        core.run().await.unwrap();

        assert!(!ran.load(Ordering::SeqCst));
        assert!(survivor.load(Ordering::SeqCst));
    }

    struct CriticalFailure;

    #[async_trait]
    impl Worker for CriticalFailure {
        fn name(&self) -> String {
            "critical".to_string()
        }

        fn is_critical(&self) -> bool {
            true
        }

        async fn run(self: Box<Self>) -> Result<()> {
            Err(anyhow!("boom"))
        }
    }

    #[tokio::test]
    async fn critical_worker_failure_stops_the_core() {
        let core = ProcessingCore::new(Arc::new(MessageBus::in_process()), 1);
        core.put_worker(Box::new(CriticalFailure)).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), core.run()).await;
        assert!(result.expect("core should stop on its own").is_err());
    }
}
