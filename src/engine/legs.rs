//! Worse-leg selection for the S2 break-glass timeout.

use crate::domain::{Decimal, OrderRecord, TradeId};

/// Chooses which exit to orphan when both legs of a slot are stuck.
pub trait LegSelector: Send + Sync {
    /// Return the trade whose exit should be written off.
    fn worse_leg(&self, a_exit: &OrderRecord, b_exit: &OrderRecord, market: Decimal) -> TradeId;
}

/// Orphans the exit resting farthest from the market. Ties go to trade B.
#[derive(Debug, Clone, Copy, Default)]
pub struct DistanceFromMarket;

impl LegSelector for DistanceFromMarket {
    fn worse_leg(&self, a_exit: &OrderRecord, b_exit: &OrderRecord, market: Decimal) -> TradeId {
        let a_distance = (a_exit.price - market).abs();
        let b_distance = (b_exit.price - market).abs();
        if a_distance > b_distance {
            TradeId::A
        } else {
            TradeId::B
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{LocalOrderId, TimeMs};
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn exit(trade_id: TradeId, price: &str) -> OrderRecord {
        let entry = OrderRecord::entry(LocalOrderId(1), trade_id, 1, d("0.1"), d("20"), TimeMs::new(0));
        OrderRecord::exit_for(LocalOrderId(2), &entry, d(price), d("20"), d("0.1"), Decimal::zero(), TimeMs::new(0))
    }

    #[test]
    fn test_farther_leg_is_worse() {
        let selector = DistanceFromMarket;
        let a = exit(TradeId::A, "0.0950");
        let b = exit(TradeId::B, "0.1010");
        assert_eq!(selector.worse_leg(&a, &b, d("0.1")), TradeId::A);

        let a = exit(TradeId::A, "0.0990");
        let b = exit(TradeId::B, "0.1100");
        assert_eq!(selector.worse_leg(&a, &b, d("0.1")), TradeId::B);
    }

    #[test]
    fn test_tie_goes_to_b() {
        let a = exit(TradeId::A, "0.0990");
        let b = exit(TradeId::B, "0.1010");
        assert_eq!(DistanceFromMarket.worse_leg(&a, &b, d("0.1")), TradeId::B);
    }
}
