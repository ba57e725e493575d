//! Per-call engine parameters supplied by the caller.

use crate::domain::{Decimal, TradeId};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Parameters read by the reducer on every call.
///
/// Owned and versioned by the caller; the governor layer may change any field
/// between loop iterations. Percent fields are in percent units (`0.2` = 0.2%).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Sell-entry distance above market for trade A.
    pub entry_pct_a: Decimal,
    /// Buy-entry distance below market for trade B.
    pub entry_pct_b: Decimal,
    pub profit_pct: Decimal,
    /// Entry distance from market beyond which the entry is re-placed.
    pub refresh_pct: Decimal,
    /// Quote-currency size of each new order (sizing input, not policy).
    pub order_size: Decimal,
    pub min_volume: Decimal,
    pub min_cost: Decimal,
    pub fee_pct: Decimal,
    pub price_decimals: u32,
    pub volume_decimals: u32,
    pub s1_orphan_after_sec: u64,
    pub s2_orphan_after_sec: u64,
    pub max_recovery_slots: usize,
    pub sticky_mode_enabled: bool,
    pub max_consecutive_refreshes: u32,
    pub refresh_cooldown_sec: u64,
    pub loss_backoff_start: u32,
    pub loss_cooldown_start: u32,
    pub loss_cooldown_sec: u64,
    pub backoff_factor: Decimal,
    pub backoff_max_multiplier: Decimal,
    /// Completed cycles kept in memory; older ones fold into the profit watermark.
    /// Zero keeps everything.
    pub max_retained_cycles: usize,
}

impl EngineConfig {
    pub fn entry_pct(&self, trade_id: TradeId) -> Decimal {
        match trade_id {
            TradeId::A => self.entry_pct_a,
            TradeId::B => self.entry_pct_b,
        }
    }

    /// Fee estimate for a fill of `notional` when the exchange did not report one.
    pub fn estimated_fee(&self, notional: Decimal) -> Option<Decimal> {
        notional.checked_mul(self.fee_pct.pct_fraction())
    }
}

fn lit(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap_or_default()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            entry_pct_a: lit("0.2"),
            entry_pct_b: lit("0.2"),
            profit_pct: lit("1.0"),
            refresh_pct: lit("1.0"),
            order_size: lit("2.0"),
            min_volume: lit("13"),
            min_cost: Decimal::zero(),
            fee_pct: lit("0.25"),
            price_decimals: 5,
            volume_decimals: 0,
            s1_orphan_after_sec: 600,
            s2_orphan_after_sec: 1800,
            max_recovery_slots: 2,
            sticky_mode_enabled: false,
            max_consecutive_refreshes: 3,
            refresh_cooldown_sec: 300,
            loss_backoff_start: 3,
            loss_cooldown_start: 5,
            loss_cooldown_sec: 900,
            backoff_factor: lit("0.5"),
            backoff_max_multiplier: lit("5.0"),
            max_retained_cycles: 200,
        }
    }
}
