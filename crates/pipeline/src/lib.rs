pub mod aggregator;
pub mod core;
pub mod factory;
pub mod producer;
pub mod sink;
pub mod worker;

pub use crate::core::ProcessingCore;
pub use aggregator::{SymbolProcessor, TrueMidAggregator};
pub use producer::{MarketProducer, StreamKind};
pub use sink::{SinkFlush, StreamSink};
pub use worker::{Worker, HEALTH_COUNTER_MAX};
