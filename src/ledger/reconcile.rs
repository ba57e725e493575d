//! Drift between derived balances and balances observed on the exchange.

use crate::domain::{Decimal, TimeMs};
use serde::{Deserialize, Serialize};

/// Balances as reported by the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedBalances {
    pub quote: Decimal,
    pub base: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriftStatus {
    Ok,
    Soft,
    Hard,
}

impl DriftStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DriftStatus::Ok => "ok",
            DriftStatus::Soft => "soft",
            DriftStatus::Hard => "hard",
        }
    }
}

/// Absolute drift limits, in quote currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriftThresholds {
    pub soft: Decimal,
    pub hard: Decimal,
}

impl DriftThresholds {
    pub fn classify(&self, drift: Decimal) -> DriftStatus {
        let magnitude = drift.abs();
        if magnitude >= self.hard {
            DriftStatus::Hard
        } else if magnitude >= self.soft {
            DriftStatus::Soft
        } else {
            DriftStatus::Ok
        }
    }
}

/// Result of one reconciliation; `drift = observed - derived`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriftReport {
    pub at: TimeMs,
    pub price: Decimal,
    pub derived_quote: Decimal,
    pub derived_base: Decimal,
    pub observed: ObservedBalances,
    pub quote_drift: Decimal,
    pub base_drift: Decimal,
    /// Quote drift plus base drift valued at `price`.
    pub value_drift: Decimal,
    pub status: DriftStatus,
}

impl DriftReport {
    pub fn compute(
        derived_quote: Decimal,
        derived_base: Decimal,
        observed: ObservedBalances,
        price: Decimal,
        at: TimeMs,
        thresholds: &DriftThresholds,
    ) -> Self {
        let quote_drift = observed.quote - derived_quote;
        let base_drift = observed.base - derived_base;
        let value_drift = quote_drift + base_drift * price;
        DriftReport {
            at,
            price,
            derived_quote,
            derived_base,
            observed,
            quote_drift,
            base_drift,
            value_drift,
            status: thresholds.classify(value_drift),
        }
    }
}
