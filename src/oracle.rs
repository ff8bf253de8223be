//! Oracle service (C3): owns the three exchange sources and the
//! aggregator, drives `compute_update` on a fixed interval, and publishes
//! `price:update` plus the derived system events.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::time::{interval, Duration};
use tracing::{debug, info};

use crate::aggregator::{AggregatorConfig, PriceAggregator};
use crate::bus::EventBus;
use crate::sources::{BitstampSource, CoinbaseSource, ExchangeSource, KrakenSource};
use crate::types::SystemEvent;

pub struct OracleService {
    sources: Vec<Arc<dyn ExchangeSource>>,
    aggregator: Arc<PriceAggregator>,
    bus: EventBus,
    poll_interval: Duration,
    min_sources: usize,
    running: AtomicBool,
    stop_tx: tokio::sync::watch::Sender<bool>,
    stop_rx: tokio::sync::watch::Receiver<bool>,
}

impl OracleService {
    pub fn new(bus: EventBus, aggregator_config: AggregatorConfig, poll_interval_ms: u64) -> Self {
        let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);
        Self {
            sources: vec![KrakenSource::new(), CoinbaseSource::new(), BitstampSource::new()],
            aggregator: Arc::new(PriceAggregator::new(aggregator_config)),
            bus,
            poll_interval: Duration::from_millis(poll_interval_ms),
            min_sources: aggregator_config.min_sources,
            running: AtomicBool::new(false),
            stop_tx,
            stop_rx,
        }
    }

    pub fn aggregator(&self) -> Arc<PriceAggregator> {
        self.aggregator.clone()
    }

    /// Idempotent: starts each source, feeds their ticks into the
    /// aggregator, and begins the poll timer.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        for source in &self.sources {
            source.clone().start(self.bus.clone());
        }

        // C1 -> C2: every source_tick published on the bus is the
        // aggregator's only source of fresh data (spec §2 data flow).
        tokio::spawn(run_ingest_loop(
            self.aggregator.clone(),
            self.bus.subscribe_source_tick(),
            self.stop_rx.clone(),
        ));

        let this = self.clone();
        let mut stop_rx = self.stop_rx.clone();
        tokio::spawn(async move {
            let mut tick = interval(this.poll_interval);
            loop {
                tokio::select! {
                    _ = tick.tick() => this.on_tick(),
                    _ = stop_rx.changed() => {
                        if *stop_rx.borrow() {
                            return;
                        }
                    }
                }
            }
        });
        info!("oracle service started");
    }

    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
        for source in &self.sources {
            source.stop();
        }
        info!("oracle service stopped");
    }

    fn on_tick(&self) {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let Some(update) = self.aggregator.compute_update(now_ms) else {
            debug!("no fresh sources; skipping tick");
            return;
        };

        self.bus.publish_system_event(SystemEvent::PriceUpdate {
            price: update.price,
            timestamp_ms: update.timestamp_ms,
            sources: update.sources.clone(),
        });

        if update.circuit_breaker {
            self.bus.publish_system_event(SystemEvent::CircuitBreaker {
                price: update.price,
                last_known_good: self.aggregator.last_known_good(),
                timestamp_ms: update.timestamp_ms,
            });
        }

        if update.sources.len() < self.min_sources {
            self.bus.publish_system_event(SystemEvent::SourceDegraded {
                source_count: update.sources.len(),
                min_sources: self.min_sources,
                timestamp_ms: update.timestamp_ms,
            });
        }

        self.bus.publish_price_update(update);
    }
}

/// Feeds every `price:source_tick` into the aggregator until told to stop.
/// Split out from `start` so the C1 -> C2 wiring can be exercised without
/// spinning up real exchange connections.
async fn run_ingest_loop(
    aggregator: Arc<PriceAggregator>,
    mut ticks: tokio::sync::broadcast::Receiver<crate::bus::SourceTick>,
    mut stop_rx: tokio::sync::watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            tick = ticks.recv() => {
                match tick {
                    Ok(tick) => aggregator.ingest_tick(&tick.source, tick.price, tick.timestamp_ms),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                }
            }
            _ = stop_rx.changed() => {
                if *stop_rx.borrow() {
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::SourceTick;

    #[test]
    fn new_service_has_three_sources() {
        let bus = EventBus::new();
        let oracle = OracleService::new(bus, AggregatorConfig::default(), 5000);
        assert_eq!(oracle.sources.len(), 3);
    }

    // Regression: C1 ticks must reach the aggregator via the bus, not just
    // via direct unit-test calls to `ingest_tick`.
    #[tokio::test]
    async fn source_ticks_are_ingested_by_the_aggregator() {
        let bus = EventBus::new();
        let aggregator = Arc::new(PriceAggregator::new(AggregatorConfig::default()));
        let (_stop_tx, stop_rx) = tokio::sync::watch::channel(false);

        tokio::spawn(run_ingest_loop(
            aggregator.clone(),
            bus.subscribe_source_tick(),
            stop_rx,
        ));

        bus.publish_source_tick(SourceTick {
            source: "kraken".into(),
            price: 60_000.0,
            timestamp_ms: 1_000,
        });

        // Give the spawned task a chance to process the tick.
        for _ in 0..100 {
            if aggregator.source_count() == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }

        assert_eq!(aggregator.source_count(), 1);
        assert!(aggregator.compute_update(1_000).is_some());
    }
}
