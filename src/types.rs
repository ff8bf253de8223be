//! Shared domain types for loans, alerts, and aggregated price data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A registered BTC-collateralized loan. Immutable to the core: the core
/// reads loans and writes only alert-trigger state (see `LoanStore`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Loan {
    /// 48 hex characters. Sole authority for dashboard reads of this loan.
    pub token: String,
    pub loan_amount_usd: f64,
    pub btc_collateral: f64,
    pub margin_call_ltv: f64,
    pub liquidation_ltv: f64,
    /// Opaque routing key handed to the notifier.
    pub chat_id: i64,
    pub interest_rate: Option<f64>,
    pub end_date: Option<DateTime<Utc>>,
    pub lender: Option<String>,
}

impl Loan {
    /// `loan_amount_usd / (btc_collateral * price)`. Caller must guard against
    /// non-positive denominators; this returns `f64::INFINITY` rather than panic.
    pub fn ltv_at(&self, price: f64) -> f64 {
        let denom = self.btc_collateral * price;
        if denom <= 0.0 {
            return f64::INFINITY;
        }
        self.loan_amount_usd / denom
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Above,
    Below,
}

/// A one-shot price threshold alert. Terminal once `triggered`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceAlert {
    pub alert_id: String,
    pub token: String,
    pub threshold: f64,
    pub direction: Direction,
    pub triggered: bool,
    pub triggered_at: Option<DateTime<Utc>>,
}

/// A one-shot LTV threshold alert. Same lifecycle as `PriceAlert`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LtvAlert {
    pub alert_id: String,
    pub token: String,
    pub ltv_threshold: f64,
    pub direction: Direction,
    pub triggered: bool,
    pub triggered_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

/// Canonical output of the aggregator/oracle: one combined market price.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceUpdate {
    pub price: f64,
    pub timestamp_ms: i64,
    pub sources: Vec<String>,
    pub twap_5m: f64,
    pub confidence: Confidence,
    pub circuit_breaker: bool,
}

/// One retained ring entry in the aggregator's TWAP window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PriceSample {
    pub price: f64,
    pub timestamp_ms: i64,
}

/// System-wide observability events, retained in the bus's ring buffer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SystemEvent {
    PriceUpdate {
        price: f64,
        timestamp_ms: i64,
        sources: Vec<String>,
    },
    CircuitBreaker {
        price: f64,
        last_known_good: f64,
        timestamp_ms: i64,
    },
    SourceDegraded {
        source_count: usize,
        min_sources: usize,
        timestamp_ms: i64,
    },
    AlertTriggered {
        alert_id: String,
        kind: AlertKind,
        value: f64,
        threshold: f64,
    },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    Price,
    Ltv,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ltv_at_zero_collateral_is_infinite() {
        let loan = Loan {
            token: "a".repeat(48),
            loan_amount_usd: 1000.0,
            btc_collateral: 0.0,
            margin_call_ltv: 0.75,
            liquidation_ltv: 0.9,
            chat_id: 1,
            interest_rate: None,
            end_date: None,
            lender: None,
        };
        assert!(loan.ltv_at(50_000.0).is_infinite());
    }

    #[test]
    fn ltv_at_parity() {
        let loan = Loan {
            token: "a".repeat(48),
            loan_amount_usd: 50_000.0,
            btc_collateral: 1.0,
            margin_call_ltv: 0.75,
            liquidation_ltv: 0.9,
            chat_id: 1,
            interest_rate: None,
            end_date: None,
            lender: None,
        };
        assert!((loan.ltv_at(100_000.0) - 0.5).abs() < 1e-9);
        assert!((loan.ltv_at(50_000.0) - 1.0).abs() < 1e-9);
    }
}
