//! Bitstamp live trades feed (`wss://ws.bitstamp.net`, live_trades_btcusd).

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

const URL: &str = "wss://ws.bitstamp.net";
const NAME: &str = "bitstamp";
const CHANNEL: &str = "live_trades_btcusd";

pub struct BitstampSource {
    state: SourceState,
    stop_signal: StopSignal,
    started: AtomicBool,
}

impl Default for BitstampSource {
    fn default() -> Self {
        Self {
            state: SourceState::default(),
            stop_signal: StopSignal::default(),
            started: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl ExchangeSource for BitstampSource {
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
                    Err(e) => warn!(source = NAME, error = %e, "bitstamp stream ended"),
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

impl BitstampSource {
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
            "event": "bts:subscribe",
            "data": { "channel": CHANNEL },
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

fn extract_price(value: &Value) -> Option<f64> {
    if value.get("event")?.as_str()? != "trade" {
        return None;
    }
    if value.get("channel")?.as_str()? != CHANNEL {
        return None;
    }
    let price = value.get("data")?.get("price")?;
    let price: f64 = match price {
        Value::String(s) => s.parse().ok()?,
        Value::Number(n) => n.as_f64()?,
        _ => return None,
    };
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
    fn parses_trade_message() {
        let msg = serde_json::json!({
            "event": "trade",
            "channel": CHANNEL,
            "data": { "price": 61400.75, "amount": 0.01 },
        });
        assert_eq!(extract_price(&msg), Some(61400.75));
    }

    #[test]
    fn ignores_other_channels() {
        let msg = serde_json::json!({
            "event": "trade",
            "channel": "live_trades_ethusd",
            "data": { "price": 3000.0 },
        });
        assert_eq!(extract_price(&msg), None);
    }

    #[test]
    fn ignores_subscription_success() {
        let msg = serde_json::json!({ "event": "bts:subscription_succeeded", "channel": CHANNEL });
        assert_eq!(extract_price(&msg), None);
    }

    #[test]
    fn rejects_non_positive_price() {
        let msg = serde_json::json!({
            "event": "trade",
            "channel": CHANNEL,
            "data": { "price": -5.0 },
        });
        assert_eq!(extract_price(&msg), None);
    }
}
