//! Risk tier presentation. Derives a human-facing tier and the
//! margin-call/liquidation prices from a loan's current LTV. Presentation
//! only — the alert engine's crossing logic never reads this module.

use serde::{Deserialize, Serialize};

use crate::types::Loan;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    Green,
    Yellow,
    Orange,
    Red,
    Liquidation,
}

/// Buckets `ltv` against the loan's own thresholds. Below 80% of the
/// margin-call LTV is `Green`; from there to margin call is `Yellow`;
/// margin call to the midpoint of margin-call/liquidation is `Orange`;
/// midpoint to liquidation is `Red`; at or past liquidation is terminal.
pub fn risk_tier(loan: &Loan, ltv: f64) -> RiskTier {
    if ltv >= loan.liquidation_ltv {
        return RiskTier::Liquidation;
    }
    let midpoint = (loan.margin_call_ltv + loan.liquidation_ltv) / 2.0;
    if ltv >= midpoint {
        RiskTier::Red
    } else if ltv >= loan.margin_call_ltv {
        RiskTier::Orange
    } else if ltv >= loan.margin_call_ltv * 0.8 {
        RiskTier::Yellow
    } else {
        RiskTier::Green
    }
}

/// BTC/USD price at which this loan's LTV reaches `margin_call_ltv`.
/// `None` if the loan has no collateral to divide by.
pub fn margin_call_price(loan: &Loan) -> Option<f64> {
    threshold_price(loan, loan.margin_call_ltv)
}

/// BTC/USD price at which this loan's LTV reaches `liquidation_ltv`.
pub fn liquidation_price(loan: &Loan) -> Option<f64> {
    threshold_price(loan, loan.liquidation_ltv)
}

fn threshold_price(loan: &Loan, ltv_threshold: f64) -> Option<f64> {
    if loan.btc_collateral <= 0.0 || ltv_threshold <= 0.0 {
        return None;
    }
    Some(loan.loan_amount_usd / (loan.btc_collateral * ltv_threshold))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loan() -> Loan {
        Loan {
            token: "a".repeat(48),
            loan_amount_usd: 50_000.0,
            btc_collateral: 1.0,
            margin_call_ltv: 0.75,
            liquidation_ltv: 0.9,
            chat_id: 1,
            interest_rate: None,
            end_date: None,
            lender: None,
        }
    }

    #[test]
    fn tiers_progress_with_ltv() {
        let loan = loan();
        assert_eq!(risk_tier(&loan, 0.3), RiskTier::Green);
        assert_eq!(risk_tier(&loan, 0.65), RiskTier::Yellow);
        assert_eq!(risk_tier(&loan, 0.78), RiskTier::Orange);
        assert_eq!(risk_tier(&loan, 0.85), RiskTier::Red);
        assert_eq!(risk_tier(&loan, 0.9), RiskTier::Liquidation);
        assert_eq!(risk_tier(&loan, 0.95), RiskTier::Liquidation);
    }

    #[test]
    fn margin_call_price_matches_ltv_definition() {
        let loan = loan();
        let price = margin_call_price(&loan).unwrap();
        assert!((loan.ltv_at(price) - loan.margin_call_ltv).abs() < 1e-9);
    }

    #[test]
    fn liquidation_price_matches_ltv_definition() {
        let loan = loan();
        let price = liquidation_price(&loan).unwrap();
        assert!((loan.ltv_at(price) - loan.liquidation_ltv).abs() < 1e-9);
    }

    #[test]
    fn zero_collateral_has_no_threshold_price() {
        let mut loan = loan();
        loan.btc_collateral = 0.0;
        assert_eq!(margin_call_price(&loan), None);
        assert_eq!(liquidation_price(&loan), None);
    }
}
