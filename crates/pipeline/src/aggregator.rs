use crate::worker::Worker;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use truemid_bus::MessageBus;
use truemid_core::messages::TrueMidPrice;

/// Significant digits kept when converting a weight fraction to decimal.
const WEIGHT_FRACTION_SIG_DIGITS: u32 = 12;

/// Consensus state for one symbol: last mid and weight per venue.
///
/// Weights default to zero for venues that have published a mid but no
/// weight yet, so such venues never move the consensus.
pub struct SymbolProcessor {
    symbol_id: i32,
    weights: HashMap<String, f64>,
    last_mids: HashMap<String, Decimal>,
    last_emitted: Option<Decimal>,
}

impl SymbolProcessor {
    pub fn new(symbol_id: i32) -> Self {
        Self {
            symbol_id,
            weights: HashMap::new(),
            last_mids: HashMap::new(),
            last_emitted: None,
        }
    }

    pub fn symbol_id(&self) -> i32 {
        self.symbol_id
    }

    pub fn set_weight(&mut self, exchange: &str, weight: f64) {
        self.weights.insert(exchange.to_string(), weight);
    }

    /// Record a venue's new mid and return the consensus if it changed.
    ///
    /// The consensus is the weight-normalized dot product over every venue
    /// with a known mid, computed in decimal. Undefined while the total
    /// weight is zero.
    pub fn update_mid(&mut self, exchange: &str, mid: Decimal) -> Option<Decimal> {
        self.last_mids.insert(exchange.to_string(), mid);

        let total: f64 = self
            .last_mids
            .keys()
            .map(|venue| self.weights.get(venue).copied().unwrap_or(0.0))
            .sum();
        if !(total > 0.0) {
            return None;
        }

        let max_scale = self.last_mids.values().map(|m| m.scale()).max().unwrap_or(0);
        let mut consensus = Decimal::ZERO;
        for (venue, last_mid) in &self.last_mids {
            let weight = self.weights.get(venue).copied().unwrap_or(0.0);
            if weight == 0.0 {
                continue;
            }
            let fraction = Decimal::from_f64(weight / total)
                .and_then(|f| f.round_sf(WEIGHT_FRACTION_SIG_DIGITS))?;
            consensus += fraction * last_mid;
        }
        // Cap the scale at the inputs' plus what the fractions introduce
        let consensus = consensus.round_dp(max_scale + WEIGHT_FRACTION_SIG_DIGITS);

        if self.last_emitted.as_ref() == Some(&consensus) {
            return None;
        }
        self.last_emitted = Some(consensus);
        Some(consensus)
    }
}

/// Subscribes to spreads and weights and publishes the volume-weighted
/// consensus mid per symbol, only when it changes.
///
/// Both inputs are multiplexed onto this single task, so per-symbol state
/// needs no locking; consensus events for one symbol keep the order of the
/// spreads that triggered them.
pub struct TrueMidAggregator {
    bus: Arc<MessageBus>,
    shutdown: CancellationToken,
}

impl TrueMidAggregator {
    pub fn new(bus: Arc<MessageBus>, shutdown: CancellationToken) -> Self {
        Self { bus, shutdown }
    }
}

#[async_trait]
impl Worker for TrueMidAggregator {
    fn name(&self) -> String {
        "true-mid-aggregator".to_string()
    }

    fn is_critical(&self) -> bool {
        true
    }

    async fn run(self: Box<Self>) -> Result<()> {
        let mut spreads = self.bus.spreads.subscribe();
        let mut weights = self.bus.weights.subscribe();
        let mut symbols: HashMap<i32, SymbolProcessor> = HashMap::new();

        // Weights published before this task subscribed (producers launch
        // concurrently) are recovered from the last-value cache.
        for weight in self.bus.last_values.weights_snapshot() {
            symbols
                .entry(weight.symbol_id)
                .or_insert_with(|| SymbolProcessor::new(weight.symbol_id))
                .set_weight(&weight.exchange, weight.weight);
        }
        info!("{} is live!", self.name());

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return Ok(()),
                weight = weights.recv() => {
                    let Some(weight) = weight else {
                        return Err(anyhow!("weights topic closed"));
                    };
                    symbols
                        .entry(weight.symbol_id)
                        .or_insert_with(|| SymbolProcessor::new(weight.symbol_id))
                        .set_weight(&weight.exchange, weight.weight);
                }
                spread = spreads.recv() => {
                    let Some(spread) = spread else {
                        return Err(anyhow!("spreads topic closed"));
                    };
                    let Some(processor) = symbols.get_mut(&spread.symbol_id) else {
                        // No weight seen yet for this symbol
                        debug!(symbol_id = spread.symbol_id, "Spread for unknown symbol");
                        continue;
                    };
                    if let Some(consensus) = processor.update_mid(&spread.exchange, spread.mid()) {
                        self.bus
                            .publish_true_price(TrueMidPrice::new(
                                spread.symbol_id,
                                consensus,
                                spread.id.clone(),
                            ))
                            .await
                            .map_err(|e| anyhow!("publishing consensus: {e}"))?;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn single_venue_consensus_is_its_mid() {
        let mut processor = SymbolProcessor::new(1);
        processor.set_weight("a", 1.0);

        // Spread (100, 102) -> mid 101
        assert_eq!(processor.update_mid("a", dec!(101)), Some(dec!(101)));
        // Identical mid again: no change, no emission
        assert_eq!(processor.update_mid("a", dec!(101)), None);
    }

    #[test]
    fn two_venues_weighted_average() {
        let mut processor = SymbolProcessor::new(1);
        processor.set_weight("a", 1.0);
        processor.set_weight("b", 3.0);

        assert_eq!(processor.update_mid("a", dec!(101)), Some(dec!(101)));
        // (1 * 101 + 3 * 200) / 4
        assert_eq!(processor.update_mid("b", dec!(200)), Some(dec!(175.25)));
    }

    #[test]
    fn zero_weight_venue_does_not_contribute() {
        let mut processor = SymbolProcessor::new(1);
        processor.set_weight("a", 1.0);
        processor.set_weight("b", 3.0);
        assert_eq!(processor.update_mid("a", dec!(101)), Some(dec!(101)));
        assert_eq!(processor.update_mid("b", dec!(200)), Some(dec!(175.25)));

        // Venue a drops to zero weight; b alone defines the consensus
        processor.set_weight("a", 0.0);
        assert_eq!(processor.update_mid("b", dec!(200)), Some(dec!(200)));
        // Unchanged value from b: no emission
        assert_eq!(processor.update_mid("b", dec!(200)), None);
        // A new mid from the zero-weighted venue does not move it either
        assert_eq!(processor.update_mid("a", dec!(91)), None);
    }

    #[test]
    fn consensus_undefined_without_weights() {
        let mut processor = SymbolProcessor::new(1);
        assert_eq!(processor.update_mid("a", dec!(100)), None);

        // A venue with a mid but no weight entry counts as weight zero
        processor.set_weight("b", 0.0);
        assert_eq!(processor.update_mid("b", dec!(50)), None);
    }

    #[test]
    fn consensus_stays_within_venue_mid_bounds() {
        let mut processor = SymbolProcessor::new(1);
        processor.set_weight("a", 0.7);
        processor.set_weight("b", 2.3);
        processor.set_weight("c", 11.1);
        processor.update_mid("a", dec!(99.5));
        processor.update_mid("b", dec!(100.25));
        let consensus = processor.update_mid("c", dec!(101.0)).unwrap();
        assert!(consensus >= dec!(99.5));
        assert!(consensus <= dec!(101.0));
    }

    #[test]
    fn raising_a_weight_pulls_consensus_toward_that_venue() {
        let mids = [("a", dec!(100)), ("b", dec!(200))];
        let mut previous = None;
        for weight_b in [1.0, 2.0, 4.0, 8.0] {
            let mut processor = SymbolProcessor::new(1);
            processor.set_weight("a", 1.0);
            processor.set_weight("b", weight_b);
            processor.update_mid(mids[0].0, mids[0].1);
            let consensus = processor.update_mid(mids[1].0, mids[1].1).unwrap();
            if let Some(previous) = previous {
                // Monotone toward b's mid of 200
                assert!(consensus > previous);
            }
            previous = Some(consensus);
        }
    }

    #[test]
    fn uneven_thirds_are_bounded_in_scale() {
        let mut processor = SymbolProcessor::new(1);
        processor.set_weight("a", 1.0);
        processor.set_weight("b", 2.0);
        processor.update_mid("a", dec!(100.00));
        let consensus = processor.update_mid("b", dec!(100.30)).unwrap();
        // 100.00 * 1/3 + 100.30 * 2/3 = 100.20, with the fraction noise
        // capped at the input scale plus twelve digits
        assert!(consensus.scale() <= 14);
        assert!(consensus > dec!(100.19) && consensus < dec!(100.21));
    }

    #[tokio::test]
    async fn aggregator_emits_only_on_change() {
        use std::time::Duration;
        use truemid_core::messages::{Spread, WeightAdjust};

        let bus = Arc::new(MessageBus::in_process());
        let shutdown = CancellationToken::new();
        let mut true_prices = bus.true_prices.subscribe();

        let aggregator = Box::new(TrueMidAggregator::new(Arc::clone(&bus), shutdown.clone()));
        let task = tokio::spawn(aggregator.run());

        bus.publish_weight(WeightAdjust::new("a", 1, 1.0)).await.unwrap();
        bus.spreads
            .publish(Spread::new("a", 1, 1.0, dec!(100), dec!(102)))
            .await
            .unwrap();

        let first = tokio::time::timeout(Duration::from_secs(1), true_prices.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.true_mid_price, dec!(101));
        assert_eq!(first.symbol_id, 1);
        assert!(!first.triggering_spread_id.is_empty());

        // Same top of book again: no new consensus
        bus.spreads
            .publish(Spread::new("a", 1, 2.0, dec!(100), dec!(102)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(true_prices.try_recv().is_none());

        shutdown.cancel();
        task.await.unwrap().unwrap();
    }
}
