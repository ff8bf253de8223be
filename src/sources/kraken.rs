//! Kraken ticker feed (`wss://ws.kraken.com`, XBT/USD).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::time::sleep;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::bus::EventBus;

use super::{now_ms, publish_and_record, ConnPhase, ExchangeSource, SourceState, StopSignal, RECONNECT_DELAY};

const URL: &str = "wss://ws.kraken.com";
const NAME: &str = "kraken";

pub struct KrakenSource {
    state: SourceState,
    stop_signal: StopSignal,
    started: AtomicBool,
}

impl Default for KrakenSource {
    fn default() -> Self {
        Self {
            state: SourceState::default(),
            stop_signal: StopSignal::default(),
            started: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl ExchangeSource for KrakenSource {
    fn name(&self) -> &'static str {
        NAME
    }

    fn start(self: Arc<Self>, bus: EventBus) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut stop_rx = self.stop_signal.subscribe();
        tokio::spawn(async move {
            loop {
                if *stop_rx.borrow() {
                    self.state.set_phase(ConnPhase::Stopped);
                    return;
                }
                self.state.set_phase(ConnPhase::Connecting);
                match self.connect_and_stream(&bus, &mut stop_rx).await {
                    Ok(()) => {}
                    Err(e) => warn!(source = NAME, error = %e, "kraken stream ended"),
                }
                if *stop_rx.borrow() {
                    self.state.set_phase(ConnPhase::Stopped);
                    return;
                }
                self.state.set_phase(ConnPhase::Disconnected);
                tokio::select! {
                    _ = sleep(RECONNECT_DELAY) => {}
                    _ = stop_rx.changed() => {
                        if *stop_rx.borrow() {
                            self.state.set_phase(ConnPhase::Stopped);
                            return;
                        }
                    }
                }
            }
        });
    }

    fn stop(&self) {
        self.stop_signal.stop();
    }

    fn is_stale(&self, max_age_ms: i64) -> bool {
        self.state.is_stale(max_age_ms, now_ms())
    }
}

impl KrakenSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    async fn connect_and_stream(
        &self,
        bus: &EventBus,
        stop_rx: &mut tokio::sync::watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        info!(source = NAME, "connecting");
        let (ws_stream, _) = connect_async(URL).await?;
        let (mut write, mut read) = ws_stream.split();

        let subscribe = serde_json::json!({
            "event": "subscribe",
            "pair": ["XBT/USD"],
            "subscription": { "name": "ticker" },
        });
        write.send(Message::Text(subscribe.to_string())).await?;
        self.state.set_phase(ConnPhase::Subscribed);
        info!(source = NAME, "subscribed");

        loop {
            tokio::select! {
                _ = stop_rx.changed() => {
                    if *stop_rx.borrow() {
                        return Ok(());
                    }
                }
                msg = read.next() => {
                    let Some(msg) = msg else {
                        return Ok(());
                    };
                    match msg {
                        Ok(Message::Text(text)) => self.handle_message(bus, &text),
                        Ok(Message::Ping(payload)) => {
                            let _ = write.send(Message::Pong(payload)).await;
                        }
                        Ok(Message::Close(frame)) => {
                            debug!(source = NAME, ?frame, "close frame");
                            return Ok(());
                        }
                        Ok(_) => {}
                        Err(e) => return Err(e.into()),
                    }
                }
            }
        }
    }

    fn handle_message(&self, bus: &EventBus, text: &str) {
        let Ok(value) = serde_json::from_str::<Value>(text) else {
            return;
        };
        let Some(price) = extract_price(&value) else {
            return;
        };
        publish_and_record(bus, &self.state, NAME, price);
    }
}

/// Kraken ticker messages are a 4-element array:
/// `[channelID, data, "ticker", pair]`. Subscription acks and heartbeats
/// are JSON objects and are silently ignored here.
fn extract_price(value: &Value) -> Option<f64> {
    let arr = value.as_array()?;
    if arr.len() < 3 || arr.get(2)?.as_str()? != "ticker" {
        return None;
    }
    let price_str = arr.get(1)?.get("c")?.get(0)?.as_str()?;
    let price: f64 = price_str.parse().ok()?;
    if price > 0.0 {
        Some(price)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ticker_array_message() {
        let msg = serde_json::json!([
            336,
            { "c": ["61234.50000", "0.1"] },
            "ticker",
            "XBT/USD"
        ]);
        assert_eq!(extract_price(&msg), Some(61234.5));
    }

    #[test]
    fn ignores_subscription_ack() {
        let msg = serde_json::json!({
            "event": "subscriptionStatus",
            "status": "subscribed",
        });
        assert_eq!(extract_price(&msg), None);
    }

    #[test]
    fn ignores_heartbeat() {
        let msg = serde_json::json!({ "event": "heartbeat" });
        assert_eq!(extract_price(&msg), None);
    }

    #[test]
    fn rejects_non_positive_price() {
        let msg = serde_json::json!([336, { "c": ["-1", "0"] }, "ticker", "XBT/USD"]);
        assert_eq!(extract_price(&msg), None);
    }

    #[test]
    fn ignores_malformed_array() {
        let msg = serde_json::json!([336, "not an object", "ticker"]);
        assert_eq!(extract_price(&msg), None);
    }
}
