//! Exchange sources (C1): one streaming price feed per exchange, each
//! owning its connection and reconnect timer. Grounded in the teacher's
//! `scrapers::dome_websocket` / `scrapers::polymarket_ws` connect-loop
//! shape, generalized into a shared trait + per-exchange subscribe frame
//! and price extraction.

pub mod bitstamp;
pub mod coinbase;
pub mod kraken;

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::bus::{EventBus, SourceTick};

pub use bitstamp::BitstampSource;
pub use coinbase::CoinbaseSource;
pub use kraken::KrakenSource;

/// Fixed reconnect cadence (spec §4.1): exchanges are cooperative enough
/// that a fixed delay is preferred over exponential backoff.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnPhase {
    Disconnected,
    Connecting,
    Subscribed,
    Stopped,
}

/// Shared last-tick bookkeeping for one exchange connection. Exclusively
/// owned by the `ExchangeSource` instance that holds it.
pub struct SourceState {
    phase: std::sync::Mutex<ConnPhase>,
    last_price: std::sync::Mutex<Option<f64>>,
    last_tick_ms: AtomicI64,
    has_ticked: AtomicBool,
}

impl Default for SourceState {
    fn default() -> Self {
        Self {
            phase: std::sync::Mutex::new(ConnPhase::Disconnected),
            last_price: std::sync::Mutex::new(None),
            last_tick_ms: AtomicI64::new(0),
            has_ticked: AtomicBool::new(false),
        }
    }
}

impl SourceState {
    pub fn set_phase(&self, phase: ConnPhase) {
        *self.phase.lock().unwrap() = phase;
    }

    pub fn phase(&self) -> ConnPhase {
        *self.phase.lock().unwrap()
    }

    pub fn record_tick(&self, price: f64, timestamp_ms: i64) {
        *self.last_price.lock().unwrap() = Some(price);
        self.last_tick_ms.store(timestamp_ms, Ordering::SeqCst);
        self.has_ticked.store(true, Ordering::SeqCst);
    }

    pub fn is_stale(&self, max_age_ms: i64, now_ms: i64) -> bool {
        if !self.has_ticked.load(Ordering::SeqCst) {
            return true;
        }
        now_ms - self.last_tick_ms.load(Ordering::SeqCst) >= max_age_ms
    }
}

/// One exchange's streaming price feed.
#[async_trait]
pub trait ExchangeSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// Begin connecting in the background. Idempotent: calling twice while
    /// already running is a no-op.
    fn start(self: Arc<Self>, bus: EventBus);

    /// Cancel any pending reconnect and stop emitting ticks. No tick is
    /// published after this call returns.
    fn stop(&self);

    fn is_stale(&self, max_age_ms: i64) -> bool;
}

/// A cancellation handle shared between `start`/`stop` and the connect loop.
/// `watch` rather than a plain `AtomicBool` so the loop can `select!` on it
/// while sleeping or awaiting the socket, instead of polling.
pub struct StopSignal {
    tx: watch::Sender<bool>,
}

impl Default for StopSignal {
    fn default() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }
}

impl StopSignal {
    pub fn stop(&self) {
        let _ = self.tx.send(true);
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }
}

pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub(crate) fn publish_and_record(
    bus: &EventBus,
    state: &SourceState,
    source: &'static str,
    price: f64,
) {
    if price <= 0.0 {
        return;
    }
    let ts = now_ms();
    state.record_tick(price, ts);
    bus.publish_source_tick(SourceTick {
        source: source.to_string(),
        price,
        timestamp_ms: ts,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_state_before_any_tick_is_stale() {
        let state = SourceState::default();
        assert!(state.is_stale(30_000, 1_000_000));
    }

    #[test]
    fn recorded_tick_is_fresh_until_cutoff() {
        let state = SourceState::default();
        state.record_tick(60_000.0, 1_000);
        assert!(!state.is_stale(30_000, 1_000 + 29_000));
        assert!(state.is_stale(30_000, 1_000 + 30_000));
    }
}
