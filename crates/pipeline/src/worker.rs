use anyhow::Result;
use async_trait::async_trait;

/// Transient-error budget a producer gets before it self-terminates.
/// Reset on every successfully delivered event.
pub const HEALTH_COUNTER_MAX: i32 = 3;

/// A unit of work owned by the orchestrator.
///
/// `init` runs once on a launcher task; a failure there drops the worker.
/// `run` is spawned as its own task and owns the worker until exit.
#[async_trait]
pub trait Worker: Send + 'static {
    fn name(&self) -> String;

    /// Whether a failure of this worker should take the process down.
    /// Producers recover through their own state machine; sinks, the
    /// aggregator and bus readers do not.
    fn is_critical(&self) -> bool {
        false
    }

    async fn init(&mut self) -> Result<()> {
        Ok(())
    }

    async fn run(self: Box<Self>) -> Result<()>;
}
