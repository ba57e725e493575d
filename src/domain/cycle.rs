//! Completed round-trip record.

use crate::domain::{Decimal, TimeMs, TradeId};
use serde::{Deserialize, Serialize};

/// An immutable record of one completed round trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleRecord {
    pub trade_id: TradeId,
    pub cycle: u32,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub volume: Decimal,
    pub gross_profit: Decimal,
    /// Exchange-reported fee of the closing fill, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee_actual: Option<Decimal>,
    /// Exchange-reported cost of the closing fill, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_actual: Option<Decimal>,
    /// Entry plus exit fees used for the net figure (actual or estimated).
    pub fees: Decimal,
    pub entry_time: TimeMs,
    pub exit_time: TimeMs,
    pub net_profit: Decimal,
    #[serde(default)]
    pub from_recovery: bool,
}

impl CycleRecord {
    /// Gross profit of closing `volume` opened at `entry_price` with a fill at `exit_price`.
    ///
    /// Trade A sold first, so it profits when the buy-back is cheaper. `None`
    /// on overflow.
    pub fn gross_for(
        trade_id: TradeId,
        entry_price: Decimal,
        exit_price: Decimal,
        volume: Decimal,
    ) -> Option<Decimal> {
        let spread = match trade_id {
            TradeId::A => entry_price.checked_sub(exit_price)?,
            TradeId::B => exit_price.checked_sub(entry_price)?,
        };
        spread.checked_mul(volume)
    }

    pub fn is_loss(&self) -> bool {
        self.net_profit.is_negative()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_gross_direction() {
        assert_eq!(
            CycleRecord::gross_for(TradeId::A, d("0.1002"), d("0.0992"), d("20")),
            Some(d("0.02"))
        );
        assert_eq!(
            CycleRecord::gross_for(TradeId::B, d("0.0998"), d("0.1008"), d("20")),
            Some(d("0.02"))
        );
        assert!(CycleRecord::gross_for(TradeId::B, d("0.1"), d("0.09"), d("10"))
            .is_some_and(|g| g.is_negative()));
    }
}
