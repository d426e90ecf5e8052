//! End-to-end pipeline scenarios on the in-process bus: mock exchange
//! feeds through producers, the aggregator and capturing sinks.

use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use truemid_core::messages::{Spread, TrueMidPrice, WeightAdjust};
use truemid_core::model::BookTop;
use truemid_exchanges_common::mock::{market_entry, MockAdapter};
use truemid_exchanges_common::{ExchangeAdapter, SymbolDirectory};
use truemid_integration_tests::{fresh_ts, CapturingFlush, Harness};
use truemid_pipeline::{
    MarketProducer, ProcessingCore, StreamKind, StreamSink, TrueMidAggregator, Worker,
};

fn top(bid: rust_decimal::Decimal, ask: rust_decimal::Decimal) -> Result<BookTop, truemid_core::error::AdapterError> {
    Ok(BookTop {
        event_ts_ms: fresh_ts(),
        best_bid: bid,
        best_ask: ask,
    })
}

async fn recv_true_price(
    sub: &mut truemid_bus::Subscription<TrueMidPrice>,
) -> TrueMidPrice {
    timeout(Duration::from_secs(2), sub.recv())
        .await
        .expect("expected a consensus emission")
        .expect("true price topic closed")
}

/// Wait until the aggregator's spread subscription is open, so no spread
/// published by a test fixture is lost.
async fn wait_for_subscribers(h: &Harness, count: usize) {
    timeout(Duration::from_secs(2), async {
        while h.bus.spreads.subscriber_count() < count {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("aggregator did not subscribe in time");
}

/// Spreads flow from a mock feed through a producer and the aggregator;
/// a second venue with triple weight pulls the consensus per the weighted
/// average, and unchanged or zero-weighted inputs emit nothing.
#[tokio::test]
async fn weighted_consensus_end_to_end() {
    let h = Harness::new();
    let mut true_prices = h.bus.true_prices.subscribe();

    let aggregator = Box::new(TrueMidAggregator::new(Arc::clone(&h.bus), h.shutdown.clone()));
    let aggregator_task = tokio::spawn(aggregator.run());
    wait_for_subscribers(&h, 1).await;

    // Venue A streams its book through a real producer
    let venue_a = Arc::new(
        MockAdapter::new("venue-a")
            .with_market(market_entry("BTC/USDT", "BTCUSDT"))
            .with_volume_24h(1.0),
    );
    venue_a.push_book_script(vec![
        top(dec!(100), dec!(102)),
        top(dec!(100), dec!(102)), // coalesced by the producer
    ]);
    let mut producer = MarketProducer::new(
        Arc::clone(&venue_a) as Arc<dyn ExchangeAdapter>,
        Arc::clone(&h.directory) as Arc<dyn SymbolDirectory>,
        Arc::clone(&h.bus),
        "BTC/USDT",
        StreamKind::Spreads,
        true,
        h.shutdown.clone(),
    );
    producer.init().await.unwrap();
    let producer_task = tokio::spawn(Box::new(producer).run());

    let first = recv_true_price(&mut true_prices).await;
    assert_eq!(first.true_mid_price, dec!(101));

    // The identical second spread was coalesced: no further emission
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(true_prices.try_recv().is_none());

    // Venue B joins with weight 3 and a flat book at 200
    let symbol_id = first.symbol_id;
    h.bus
        .publish_weight(WeightAdjust::new("venue-b", symbol_id, 3.0))
        .await
        .unwrap();
    h.bus
        .spreads
        .publish(Spread::new("venue-b", symbol_id, fresh_ts(), dec!(200), dec!(200)))
        .await
        .unwrap();

    let second = recv_true_price(&mut true_prices).await;
    // (1 * 101 + 3 * 200) / 4
    assert_eq!(second.true_mid_price, dec!(175.25));

    // Weight-zero for A: no emission until a spread arrives, then B alone
    // defines the consensus
    h.bus
        .publish_weight(WeightAdjust::new("venue-a", symbol_id, 0.0))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(true_prices.try_recv().is_none());

    h.bus
        .spreads
        .publish(Spread::new("venue-b", symbol_id, fresh_ts(), dec!(200), dec!(200)))
        .await
        .unwrap();
    let third = recv_true_price(&mut true_prices).await;
    assert_eq!(third.true_mid_price, dec!(200));

    // Unchanged value from B, and a fresh book from the zero-weighted A:
    // neither moves the consensus
    h.bus
        .spreads
        .publish(Spread::new("venue-b", symbol_id, fresh_ts(), dec!(200), dec!(200)))
        .await
        .unwrap();
    h.bus
        .spreads
        .publish(Spread::new("venue-a", symbol_id, fresh_ts(), dec!(90), dec!(92)))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(true_prices.try_recv().is_none());

    h.shutdown.cancel();
    producer_task.await.unwrap().unwrap();
    aggregator_task.await.unwrap().unwrap();
}

/// Consensus prices drain into the true-prices sink in order.
#[tokio::test]
async fn true_prices_reach_the_sink() {
    let h = Harness::new();

    let flush = CapturingFlush::<TrueMidPrice>::new("true_prices");
    let (records, _) = flush.handles();
    let sink = Box::new(StreamSink::new(
        h.bus.true_prices.clone(),
        flush,
        h.shutdown.clone(),
    ));
    let sink_task = tokio::spawn(sink.run());
    tokio::task::yield_now().await;

    for i in 1..=3i64 {
        h.bus
            .publish_true_price(TrueMidPrice::new(7, rust_decimal::Decimal::from(i), "spread-id"))
            .await
            .unwrap();
    }

    timeout(Duration::from_secs(2), async {
        loop {
            if records.lock().unwrap().len() == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("sink should persist all three prices");

    let seen: Vec<_> = records
        .lock()
        .unwrap()
        .iter()
        .map(|p| p.true_mid_price)
        .collect();
    assert_eq!(seen, vec![dec!(1), dec!(2), dec!(3)]);

    h.shutdown.cancel();
    sink_task.await.unwrap().unwrap();
}

/// A burst larger than the sink's poll cadence is drained in big batches
/// rather than row by row.
#[tokio::test]
async fn bursts_are_batched() {
    let h = Harness::new();

    let flush = CapturingFlush::<Spread>::new("spreads");
    let (records, batch_sizes) = flush.handles();
    let sink = Box::new(StreamSink::new(
        h.bus.spreads.clone(),
        flush,
        h.shutdown.clone(),
    ));
    let sink_task = tokio::spawn(sink.run());
    tokio::task::yield_now().await;

    const BURST: usize = 10_000;
    for i in 0..BURST {
        h.bus
            .spreads
            .publish(Spread::new(
                "venue-a",
                1,
                fresh_ts(),
                rust_decimal::Decimal::from(i as i64),
                rust_decimal::Decimal::from(i as i64 + 1),
            ))
            .await
            .unwrap();
    }

    timeout(Duration::from_secs(5), async {
        loop {
            if records.lock().unwrap().len() == BURST {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("sink should drain the whole burst");

    let sizes = batch_sizes.lock().unwrap();
    assert!(
        sizes.len() < BURST / 10,
        "burst of {BURST} should not take {} flushes",
        sizes.len()
    );
    assert!(sizes.iter().any(|&s| s >= 1_000), "largest batch was {:?}", sizes.iter().max());
    drop(sizes);

    h.shutdown.cancel();
    sink_task.await.unwrap().unwrap();
}

/// The orchestrator launches queued producers, sinks and the aggregator,
/// and a NotSupported venue flips its mapping without touching the rest.
#[tokio::test]
async fn orchestrated_run_with_unsupported_venue() {
    let h = Harness::new();
    let core = Arc::new(ProcessingCore::new(Arc::clone(&h.bus), 2));

    let good = Arc::new(
        MockAdapter::new("venue-good").with_market(market_entry("BTC/USDT", "BTCUSDT")),
    );
    good.push_book_script(vec![top(dec!(10), dec!(12))]);
    let bad = Arc::new(
        MockAdapter::new("venue-bad")
            .with_market(market_entry("BTC/USDT", "BTCUSDT"))
            .fail_streams_with_not_supported(),
    );

    // Aggregator first: its spread subscription must exist before the
    // producers' feeds start playing.
    core.put_worker(Box::new(TrueMidAggregator::new(
        core.bus(),
        core.shutdown_token(),
    )))
    .unwrap();

    let mut true_prices = h.bus.true_prices.subscribe();
    let token = core.shutdown_token();
    let core_task = tokio::spawn({
        let core = Arc::clone(&core);
        async move { core.run().await }
    });
    wait_for_subscribers(&h, 1).await;

    core.watch_spreads(
        Arc::clone(&good) as Arc<dyn ExchangeAdapter>,
        Arc::clone(&h.directory) as Arc<dyn SymbolDirectory>,
        "BTC/USDT",
        true,
    )
    .unwrap();
    core.watch_spreads(
        Arc::clone(&bad) as Arc<dyn ExchangeAdapter>,
        Arc::clone(&h.directory) as Arc<dyn SymbolDirectory>,
        "BTC/USDT",
        true,
    )
    .unwrap();

    // The good venue's spread makes it all the way to a consensus
    let price = timeout(Duration::from_secs(2), true_prices.recv())
        .await
        .expect("consensus from the good venue")
        .unwrap();
    assert_eq!(price.true_mid_price, dec!(11));

    // The bad venue disabled itself in the registry
    timeout(Duration::from_secs(2), async {
        loop {
            let exchanges = h.directory.list_exchanges_for_symbol("BTC/USDT").await.unwrap();
            if exchanges == vec!["venue-good".to_string()] {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("venue-bad should be marked unavailable");

    token.cancel();
    core_task.await.unwrap().unwrap();
}

/// The terminal weight of a dying producer reaches the aggregator's
/// last-value cache, so late consumers still see the venue excluded.
#[tokio::test]
async fn dead_producer_leaves_weight_zero() {
    let h = Harness::new();

    let venue = Arc::new(
        MockAdapter::new("venue-a")
            .with_market(market_entry("BTC/USDT", "BTCUSDT"))
            .with_volume_24h(9.0)
            .fail_streams_with_not_supported(),
    );
    let mut producer = MarketProducer::new(
        Arc::clone(&venue) as Arc<dyn ExchangeAdapter>,
        Arc::clone(&h.directory) as Arc<dyn SymbolDirectory>,
        Arc::clone(&h.bus),
        "BTC/USDT",
        StreamKind::Trades,
        true,
        h.shutdown.clone(),
    );
    producer.init().await.unwrap();

    let mapping = h.directory.get_mapping("venue-a", "BTC/USDT").await.unwrap().unwrap();
    assert_eq!(
        h.bus.last_values.get_weight("venue-a", mapping.symbol_id).unwrap().weight,
        9.0
    );

    let result = Box::new(producer).run().await;
    assert!(result.is_err());
    assert_eq!(
        h.bus.last_values.get_weight("venue-a", mapping.symbol_id).unwrap().weight,
        0.0
    );
}
