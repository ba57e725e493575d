//! Ledger rows and their idempotency keys.

use crate::domain::{Decimal, SlotId, TimeMs, TradeId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryType {
    EntryFill,
    ExitFill,
    RecoveryFill,
    RecoveryWriteOff,
    Fee,
    CycleProfit,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::EntryFill => "ENTRY_FILL",
            EntryType::ExitFill => "EXIT_FILL",
            EntryType::RecoveryFill => "RECOVERY_FILL",
            EntryType::RecoveryWriteOff => "RECOVERY_WRITE_OFF",
            EntryType::Fee => "FEE",
            EntryType::CycleProfit => "CYCLE_PROFIT",
        }
    }

    /// Entry and exit fills of a leg arrive in cycle order. Recovery rows and
    /// cycle settlements can land after later cycles.
    pub fn follows_leg_cycle(&self) -> bool {
        matches!(self, EntryType::EntryFill | EntryType::ExitFill)
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ENTRY_FILL" => Ok(EntryType::EntryFill),
            "EXIT_FILL" => Ok(EntryType::ExitFill),
            "RECOVERY_FILL" => Ok(EntryType::RecoveryFill),
            "RECOVERY_WRITE_OFF" => Ok(EntryType::RecoveryWriteOff),
            "FEE" => Ok(EntryType::Fee),
            "CYCLE_PROFIT" => Ok(EntryType::CycleProfit),
            other => Err(format!("unknown entry type: {other}")),
        }
    }
}

/// `(slot, trade, cycle, entry type)`: at most one row per key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IdempotencyKey {
    pub slot_id: SlotId,
    pub trade_id: TradeId,
    pub cycle: u32,
    pub entry_type: EntryType,
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.slot_id.0, self.trade_id, self.cycle, self.entry_type
        )
    }
}

/// One immutable double-entry row. Debit is inflow, credit is outflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: u64,
    pub timestamp: TimeMs,
    pub slot_id: SlotId,
    pub trade_id: TradeId,
    pub cycle: u32,
    pub entry_type: EntryType,
    pub quote_debit: Decimal,
    pub quote_credit: Decimal,
    pub base_debit: Decimal,
    pub base_credit: Decimal,
    pub fee: Decimal,
    pub realized_pnl: Decimal,
    pub quote_balance_after: Decimal,
    pub base_balance_after: Decimal,
}

impl LedgerEntry {
    pub fn key(&self) -> IdempotencyKey {
        IdempotencyKey {
            slot_id: self.slot_id,
            trade_id: self.trade_id,
            cycle: self.cycle,
            entry_type: self.entry_type,
        }
    }

    /// Net quote movement of this row (inflow minus outflow).
    pub fn quote_net(&self) -> Decimal {
        self.quote_debit - self.quote_credit
    }

    pub fn base_net(&self) -> Decimal {
        self.base_debit - self.base_credit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_type_strings() {
        for t in [
            EntryType::EntryFill,
            EntryType::ExitFill,
            EntryType::RecoveryFill,
            EntryType::RecoveryWriteOff,
            EntryType::Fee,
            EntryType::CycleProfit,
        ] {
            assert_eq!(EntryType::from_str(t.as_str()), Ok(t));
            assert_eq!(serde_json::to_string(&t).unwrap(), format!("\"{}\"", t.as_str()));
        }
        assert!(EntryType::from_str("DEPOSIT").is_err());
    }

    #[test]
    fn test_key_display() {
        let key = IdempotencyKey {
            slot_id: SlotId(3),
            trade_id: TradeId::B,
            cycle: 12,
            entry_type: EntryType::ExitFill,
        };
        assert_eq!(key.to_string(), "3:B:12:EXIT_FILL");
    }
}
