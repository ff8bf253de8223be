//! Coinbase Exchange ticker feed (`wss://ws-feed.exchange.coinbase.com`, BTC-USD).

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

const URL: &str = "wss://ws-feed.exchange.coinbase.com";
const NAME: &str = "coinbase";

pub struct CoinbaseSource {
    state: SourceState,
    stop_signal: StopSignal,
    started: AtomicBool,
}

impl Default for CoinbaseSource {
    fn default() -> Self {
        Self {
            state: SourceState::default(),
            stop_signal: StopSignal::default(),
            started: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl ExchangeSource for CoinbaseSource {
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
                    Err(e) => warn!(source = NAME, error = %e, "coinbase stream ended"),
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

impl CoinbaseSource {
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
            "type": "subscribe",
            "product_ids": ["BTC-USD"],
            "channels": ["ticker"],
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
    if value.get("type")?.as_str()? != "ticker" {
        return None;
    }
    if value.get("product_id")?.as_str()? != "BTC-USD" {
        return None;
    }
    let price: f64 = value.get("price")?.as_str()?.parse().ok()?;
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
    fn parses_ticker_message() {
        let msg = serde_json::json!({
            "type": "ticker",
            "product_id": "BTC-USD",
            "price": "61500.12",
        });
        assert_eq!(extract_price(&msg), Some(61500.12));
    }

    #[test]
    fn ignores_other_product_ids() {
        let msg = serde_json::json!({
            "type": "ticker",
            "product_id": "ETH-USD",
            "price": "3000.0",
        });
        assert_eq!(extract_price(&msg), None);
    }

    #[test]
    fn ignores_non_ticker_messages() {
        let msg = serde_json::json!({ "type": "subscriptions", "channels": [] });
        assert_eq!(extract_price(&msg), None);
    }

    #[test]
    fn rejects_non_positive_price() {
        let msg = serde_json::json!({
            "type": "ticker",
            "product_id": "BTC-USD",
            "price": "0",
        });
        assert_eq!(extract_price(&msg), None);
    }
}
