//! In-process publish/subscribe hub connecting sources, the oracle, and
//! the alert engine. An injected dependency rather than a global: each
//! `OracleService` is built with its own `EventBus`, which keeps tests
//! isolated from one another.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::types::{PriceUpdate, SystemEvent};

const SYSTEM_EVENT_RING_CAP: usize = 1000;

/// Per-source tick, published on `price:source_tick`.
#[derive(Debug, Clone)]
pub struct SourceTick {
    pub source: String,
    pub price: f64,
    pub timestamp_ms: i64,
}

#[derive(Clone)]
pub struct EventBus {
    price_update_tx: broadcast::Sender<PriceUpdate>,
    source_tick_tx: broadcast::Sender<SourceTick>,
    system_event_tx: broadcast::Sender<SystemEvent>,
    system_events: Arc<Mutex<VecDeque<SystemEvent>>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (price_update_tx, _) = broadcast::channel(256);
        let (source_tick_tx, _) = broadcast::channel(1024);
        let (system_event_tx, _) = broadcast::channel(1024);
        Self {
            price_update_tx,
            source_tick_tx,
            system_event_tx,
            system_events: Arc::new(Mutex::new(VecDeque::with_capacity(SYSTEM_EVENT_RING_CAP))),
        }
    }

    pub fn subscribe_price_update(&self) -> broadcast::Receiver<PriceUpdate> {
        self.price_update_tx.subscribe()
    }

    pub fn subscribe_source_tick(&self) -> broadcast::Receiver<SourceTick> {
        self.source_tick_tx.subscribe()
    }

    pub fn subscribe_system_event(&self) -> broadcast::Receiver<SystemEvent> {
        self.system_event_tx.subscribe()
    }

    pub fn publish_price_update(&self, update: PriceUpdate) {
        // No subscribers is not an error: the dashboard and alert engine
        // may not have attached yet during startup.
        let _ = self.price_update_tx.send(update);
    }

    pub fn publish_source_tick(&self, tick: SourceTick) {
        let _ = self.source_tick_tx.send(tick);
    }

    pub fn publish_system_event(&self, event: SystemEvent) {
        let mut ring = self.system_events.lock();
        if ring.len() >= SYSTEM_EVENT_RING_CAP {
            ring.pop_front();
        }
        ring.push_back(event.clone());
        drop(ring);
        let _ = self.system_event_tx.send(event);
    }

    /// Last `limit` retained system events, optionally filtered by a predicate
    /// over the event's discriminant name (used by the dashboard boundary).
    pub fn recent_system_events(&self, limit: usize) -> Vec<SystemEvent> {
        let ring = self.system_events.lock();
        ring.iter().rev().take(limit).rev().cloned().collect()
    }
}
