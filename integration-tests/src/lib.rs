//! Shared fixtures for the end-to-end pipeline tests.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use truemid_bus::MessageBus;
use truemid_core::messages::BusMessage;
use truemid_core::time::now_ms;
use truemid_exchanges_common::MemoryDirectory;
use truemid_pipeline::SinkFlush;

/// One in-process pipeline backdrop: bus, registry and shutdown token.
pub struct Harness {
    pub bus: Arc<MessageBus>,
    pub directory: Arc<MemoryDirectory>,
    pub shutdown: CancellationToken,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            bus: Arc::new(MessageBus::in_process()),
            directory: Arc::new(MemoryDirectory::new()),
            shutdown: CancellationToken::new(),
        }
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

/// Sink flush that records everything it is given, standing in for the
/// database.
pub struct CapturingFlush<T> {
    name: &'static str,
    pub records: Arc<Mutex<Vec<T>>>,
    pub batch_sizes: Arc<Mutex<Vec<usize>>>,
}

impl<T> CapturingFlush<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            records: Arc::new(Mutex::new(Vec::new())),
            batch_sizes: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn handles(&self) -> (Arc<Mutex<Vec<T>>>, Arc<Mutex<Vec<usize>>>) {
        (Arc::clone(&self.records), Arc::clone(&self.batch_sizes))
    }
}

#[async_trait]
impl<T: BusMessage> SinkFlush<T> for CapturingFlush<T> {
    fn stream_name(&self) -> &'static str {
        self.name
    }

    async fn flush(&self, records: &[T]) -> Result<()> {
        self.batch_sizes.lock().unwrap().push(records.len());
        self.records.lock().unwrap().extend_from_slice(records);
        Ok(())
    }
}

/// A fresh event timestamp, in wire milliseconds.
pub fn fresh_ts() -> f64 {
    now_ms()
}
