//! JSON-on-disk implementation of `LoanStore`. An in-memory snapshot
//! guarded by a `parking_lot::RwLock`, flushed to disk on every mutation
//! via a write-to-temp-file-then-rename so a crash mid-write never
//! corrupts the last good state.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::types::{Loan, LtvAlert, PriceAlert, PriceUpdate};

use super::LoanStore;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Snapshot {
    loans: Vec<Loan>,
    price_alerts: Vec<PriceAlert>,
    ltv_alerts: Vec<LtvAlert>,
    last_price: Option<PriceUpdate>,
}

pub struct JsonLoanStore {
    path: PathBuf,
    state: RwLock<Snapshot>,
}

impl JsonLoanStore {
    /// Load state from `path` if it exists, otherwise start empty. The file
    /// is created on the first mutation.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let state = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("reading state file {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("parsing state file {}", path.display()))?
        } else {
            Snapshot::default()
        };
        Ok(Self {
            path,
            state: RwLock::new(state),
        })
    }

    fn flush(&self, snapshot: &Snapshot) {
        if let Err(e) = self.flush_inner(snapshot) {
            tracing::warn!(error = %e, path = %self.path.display(), "failed to persist loan store");
        }
    }

    fn flush_inner(&self, snapshot: &Snapshot) -> Result<()> {
        let tmp_path = self.path.with_extension("json.tmp");
        let file = std::fs::File::create(&tmp_path)
            .with_context(|| format!("creating temp file {}", tmp_path.display()))?;
        serde_json::to_writer_pretty(file, snapshot).context("serializing snapshot")?;
        std::fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("renaming into {}", self.path.display()))?;
        Ok(())
    }
}

impl LoanStore for JsonLoanStore {
    fn get_loan(&self, token: &str) -> Option<Loan> {
        self.state.read().loans.iter().find(|l| l.token == token).cloned()
    }

    fn get_all_loans(&self) -> Vec<Loan> {
        self.state.read().loans.clone()
    }

    fn upsert_loan(&self, loan: Loan) {
        let mut state = self.state.write();
        if let Some(existing) = state.loans.iter_mut().find(|l| l.token == loan.token) {
            *existing = loan;
        } else {
            state.loans.push(loan);
        }
        self.flush(&state);
    }

    fn delete_loan(&self, token: &str) {
        let mut state = self.state.write();
        state.loans.retain(|l| l.token != token);
        state.price_alerts.retain(|a| a.token != token);
        state.ltv_alerts.retain(|a| a.token != token);
        self.flush(&state);
    }

    fn get_all_price_alerts(&self) -> Vec<PriceAlert> {
        self.state.read().price_alerts.clone()
    }

    fn get_all_ltv_alerts(&self) -> Vec<LtvAlert> {
        self.state.read().ltv_alerts.clone()
    }

    fn create_price_alert(&self, alert: PriceAlert) {
        let mut state = self.state.write();
        state.price_alerts.push(alert);
        self.flush(&state);
    }

    fn create_ltv_alert(&self, alert: LtvAlert) {
        let mut state = self.state.write();
        state.ltv_alerts.push(alert);
        self.flush(&state);
    }

    fn delete_alert(&self, alert_id: &str) {
        let mut state = self.state.write();
        state.price_alerts.retain(|a| a.alert_id != alert_id);
        state.ltv_alerts.retain(|a| a.alert_id != alert_id);
        self.flush(&state);
    }

    fn set_price_alert_triggered(&self, alert_id: &str, triggered_at: DateTime<Utc>) {
        let mut state = self.state.write();
        if let Some(alert) = state.price_alerts.iter_mut().find(|a| a.alert_id == alert_id) {
            alert.triggered = true;
            alert.triggered_at = Some(triggered_at);
        }
        self.flush(&state);
    }

    fn set_ltv_alert_triggered(&self, alert_id: &str, triggered_at: DateTime<Utc>) {
        let mut state = self.state.write();
        if let Some(alert) = state.ltv_alerts.iter_mut().find(|a| a.alert_id == alert_id) {
            alert.triggered = true;
            alert.triggered_at = Some(triggered_at);
        }
        self.flush(&state);
    }

    fn set_last_price(&self, update: PriceUpdate) {
        let mut state = self.state.write();
        state.last_price = Some(update);
        self.flush(&state);
    }

    fn get_last_price(&self) -> Option<PriceUpdate> {
        self.state.read().last_price.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Direction;

    fn sample_loan() -> Loan {
        Loan {
            token: "a".repeat(48),
            loan_amount_usd: 50_000.0,
            btc_collateral: 1.0,
            margin_call_ltv: 0.75,
            liquidation_ltv: 0.9,
            chat_id: 42,
            interest_rate: None,
            end_date: None,
            lender: None,
        }
    }

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        {
            let store = JsonLoanStore::open(&path).unwrap();
            store.upsert_loan(sample_loan());
            store.create_price_alert(PriceAlert {
                alert_id: "a1".into(),
                token: "a".repeat(48),
                threshold: 60_000.0,
                direction: Direction::Below,
                triggered: false,
                triggered_at: None,
            });
        }

        let reopened = JsonLoanStore::open(&path).unwrap();
        assert_eq!(reopened.get_all_loans().len(), 1);
        assert_eq!(reopened.get_all_price_alerts().len(), 1);
    }

    #[test]
    fn deleting_loan_cascades_to_its_alerts() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonLoanStore::open(dir.path().join("state.json")).unwrap();
        let loan = sample_loan();
        store.upsert_loan(loan.clone());
        store.create_price_alert(PriceAlert {
            alert_id: "a1".into(),
            token: loan.token.clone(),
            threshold: 60_000.0,
            direction: Direction::Below,
            triggered: false,
            triggered_at: None,
        });

        store.delete_loan(&loan.token);
        assert!(store.get_all_loans().is_empty());
        assert!(store.get_all_price_alerts().is_empty());
    }

    #[test]
    fn trigger_is_terminal_and_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonLoanStore::open(dir.path().join("state.json")).unwrap();
        store.create_price_alert(PriceAlert {
            alert_id: "a1".into(),
            token: "a".repeat(48),
            threshold: 60_000.0,
            direction: Direction::Below,
            triggered: false,
            triggered_at: None,
        });
        store.set_price_alert_triggered("a1", Utc::now());
        let alerts = store.get_all_price_alerts();
        assert!(alerts[0].triggered);
        assert!(alerts[0].triggered_at.is_some());
    }
}
