//! Loan/alert state surface (C6). The core only needs the read/write
//! contract below; persistence is an external collaborator (spec §1) —
//! `json` gives it the minimal on-disk JSON implementation needed to run
//! and test the core end-to-end.

pub mod json;

use crate::types::{Loan, LtvAlert, PriceAlert, PriceUpdate};

/// Read/write surface the alert engine and dashboard boundary depend on.
/// Implementations may back this with any container; the core does not
/// depend on ordering or persistence.
pub trait LoanStore: Send + Sync {
    fn get_loan(&self, token: &str) -> Option<Loan>;
    fn get_all_loans(&self) -> Vec<Loan>;
    fn upsert_loan(&self, loan: Loan);
    fn delete_loan(&self, token: &str);

    fn get_all_price_alerts(&self) -> Vec<PriceAlert>;
    fn get_all_ltv_alerts(&self) -> Vec<LtvAlert>;
    fn create_price_alert(&self, alert: PriceAlert);
    fn create_ltv_alert(&self, alert: LtvAlert);
    fn delete_alert(&self, alert_id: &str);

    fn set_price_alert_triggered(&self, alert_id: &str, triggered_at: chrono::DateTime<chrono::Utc>);
    fn set_ltv_alert_triggered(&self, alert_id: &str, triggered_at: chrono::DateTime<chrono::Utc>);

    fn set_last_price(&self, update: PriceUpdate);
    fn get_last_price(&self) -> Option<PriceUpdate>;
}
