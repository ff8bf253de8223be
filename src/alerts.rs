//! Alert engine (C4): edge-triggered price and LTV threshold crossings,
//! at most one notification per alert ever. Subscribes to `price:update`
//! and runs two sweeps — price alerts, then LTV alerts — per update.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::warn;

use crate::bus::EventBus;
use crate::notify::Notifier;
use crate::store::LoanStore;
use crate::types::{AlertKind, Direction, LtvAlert, PriceAlert, PriceUpdate, SystemEvent};

struct EngineState {
    previous_price: f64,
    previous_ltv_by_token: HashMap<String, f64>,
}

pub struct AlertEngine {
    store: Arc<dyn LoanStore>,
    notifier: Arc<dyn Notifier>,
    bus: EventBus,
    state: Mutex<EngineState>,
}

impl AlertEngine {
    pub fn new(store: Arc<dyn LoanStore>, notifier: Arc<dyn Notifier>, bus: EventBus) -> Self {
        Self {
            store,
            notifier,
            bus,
            state: Mutex::new(EngineState {
                previous_price: 0.0,
                previous_ltv_by_token: HashMap::new(),
            }),
        }
    }

    /// Spawn the subscriber task. Each `price:update` is processed to
    /// completion before the next is pulled off the channel, preserving
    /// the strict per-subscriber ordering the crossing logic depends on.
    pub fn spawn(self: Arc<Self>) {
        let mut rx = self.bus.subscribe_price_update();
        tokio::spawn(async move {
            while let Ok(update) = rx.recv().await {
                self.on_price_update(&update).await;
            }
        });
    }

    async fn on_price_update(&self, update: &PriceUpdate) {
        let prev_price = self.state.lock().previous_price;

        self.sweep_price_alerts(prev_price, update.price).await;
        self.sweep_ltv_alerts(update.price).await;

        let mut state = self.state.lock();
        state.previous_price = update.price;
    }

    async fn sweep_price_alerts(&self, prev: f64, curr: f64) {
        let alerts: Vec<PriceAlert> = self
            .store
            .get_all_price_alerts()
            .into_iter()
            .filter(|a| !a.triggered)
            .collect();

        for alert in alerts {
            if price_crosses(prev, curr, alert.threshold, alert.direction) {
                self.trigger_price_alert(&alert, curr).await;
            }
        }
    }

    async fn sweep_ltv_alerts(&self, price: f64) {
        let loans = self.store.get_all_loans();
        let alerts: Vec<LtvAlert> = self
            .store
            .get_all_ltv_alerts()
            .into_iter()
            .filter(|a| !a.triggered)
            .collect();

        // Snapshot of previous LTVs before this tick mutates them.
        let previous_ltv_by_token = self.state.lock().previous_ltv_by_token.clone();

        for alert in &alerts {
            let Some(loan) = loans.iter().find(|l| l.token == alert.token) else {
                continue;
            };
            if loan.btc_collateral * price <= 0.0 {
                continue;
            }
            let curr_ltv = loan.ltv_at(price);
            let prev_ltv = previous_ltv_by_token.get(&loan.token).copied().unwrap_or(0.0);
            if price_crosses(prev_ltv, curr_ltv, alert.ltv_threshold, alert.direction) {
                self.trigger_ltv_alert(alert, curr_ltv).await;
            }
        }

        // Refresh previous LTV for every loan, not just ones with alerts,
        // so a newly created alert has a valid `prev` next tick.
        let mut next_ltv_by_token = HashMap::with_capacity(loans.len());
        for loan in &loans {
            if loan.btc_collateral * price > 0.0 {
                next_ltv_by_token.insert(loan.token.clone(), loan.ltv_at(price));
            }
        }
        self.state.lock().previous_ltv_by_token = next_ltv_by_token;
    }

    async fn trigger_price_alert(&self, alert: &PriceAlert, curr_price: f64) {
        let now = Utc::now();
        self.store.set_price_alert_triggered(&alert.alert_id, now);

        let Some(loan) = self.store.get_loan(&alert.token) else {
            return;
        };
        let text = format!(
            "*Price alert*: BTC crossed {} ${:.2} (now ${:.2})",
            direction_word(alert.direction),
            alert.threshold,
            curr_price
        );
        self.deliver(loan.chat_id, text).await;

        self.bus.publish_system_event(SystemEvent::AlertTriggered {
            alert_id: alert.alert_id.clone(),
            kind: AlertKind::Price,
            value: curr_price,
            threshold: alert.threshold,
        });
    }

    async fn trigger_ltv_alert(&self, alert: &LtvAlert, curr_ltv: f64) {
        let now = Utc::now();
        self.store.set_ltv_alert_triggered(&alert.alert_id, now);

        let Some(loan) = self.store.get_loan(&alert.token) else {
            return;
        };
        let text = format!(
            "*LTV alert*: loan-to-value crossed {} {:.1}% (now {:.1}%)",
            direction_word(alert.direction),
            alert.ltv_threshold * 100.0,
            curr_ltv * 100.0
        );
        self.deliver(loan.chat_id, text).await;

        self.bus.publish_system_event(SystemEvent::AlertTriggered {
            alert_id: alert.alert_id.clone(),
            kind: AlertKind::Ltv,
            value: curr_ltv,
            threshold: alert.ltv_threshold,
        });
    }

    async fn deliver(&self, chat_id: i64, text: String) {
        if let Err(e) = self.notifier.notify(chat_id, text).await {
            warn!(error = %e, chat_id, "notification delivery failed; not retried");
        }
    }
}

fn direction_word(direction: Direction) -> &'static str {
    match direction {
        Direction::Above => "above",
        Direction::Below => "below",
    }
}

/// Edge-crossing predicate shared by price and LTV alerts. `prev == 0.0`
/// is the half-open-boundary rule: the very first observation acts as a
/// fresh boundary, so an alert created while already past its threshold
/// fires once on the first tick it is evaluated against.
fn price_crosses(prev: f64, curr: f64, threshold: f64, direction: Direction) -> bool {
    match direction {
        Direction::Below => (prev > 0.0 && prev >= threshold && curr < threshold) || (prev == 0.0 && curr < threshold),
        Direction::Above => (prev > 0.0 && prev <= threshold && curr > threshold) || (prev == 0.0 && curr > threshold),
    }
}
