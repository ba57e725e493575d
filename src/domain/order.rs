//! Order records owned by a slot: live grid orders and recovery tickets.

use crate::domain::{Decimal, LocalOrderId, OrderStatus, RecoveryId, Role, Side, TimeMs, TradeId};
use serde::{Deserialize, Serialize};

/// One resting or historical exchange order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub local_id: LocalOrderId,
    /// Exchange identifier, absent until the placement is acknowledged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exchange_id: Option<String>,
    pub side: Side,
    pub role: Role,
    pub trade_id: TradeId,
    /// Round-trip counter of the owning trade (starts at 1).
    pub cycle: u32,
    pub price: Decimal,
    pub volume: Decimal,
    pub placed_at: TimeMs,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filled_at: Option<TimeMs>,
    pub status: OrderStatus,
    /// Fill price of the entry this exit closes (exits only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_price: Option<Decimal>,
    /// Fee paid (or estimated) on the entry fill (exits only).
    #[serde(default)]
    pub entry_fee: Decimal,
    /// True when `entry_fee` is an estimate rather than an exchange-reported fee.
    #[serde(default)]
    pub entry_fee_estimated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_filled_at: Option<TimeMs>,
}

impl OrderRecord {
    /// A freshly requested entry order.
    pub fn entry(
        local_id: LocalOrderId,
        trade_id: TradeId,
        cycle: u32,
        price: Decimal,
        volume: Decimal,
        placed_at: TimeMs,
    ) -> Self {
        OrderRecord {
            local_id,
            exchange_id: None,
            side: trade_id.entry_side(),
            role: Role::Entry,
            trade_id,
            cycle,
            price,
            volume,
            placed_at,
            filled_at: None,
            status: OrderStatus::Pending,
            entry_price: None,
            entry_fee: Decimal::zero(),
            entry_fee_estimated: false,
            entry_filled_at: None,
        }
    }

    /// The exit that closes `entry`, which filled at `entry_price`.
    pub fn exit_for(
        local_id: LocalOrderId,
        entry: &OrderRecord,
        price: Decimal,
        volume: Decimal,
        entry_price: Decimal,
        entry_fee: Decimal,
        filled_at: TimeMs,
    ) -> Self {
        OrderRecord {
            local_id,
            exchange_id: None,
            side: entry.trade_id.exit_side(),
            role: Role::Exit,
            trade_id: entry.trade_id,
            cycle: entry.cycle,
            price,
            volume,
            placed_at: filled_at,
            filled_at: None,
            status: OrderStatus::Pending,
            entry_price: Some(entry_price),
            entry_fee,
            entry_fee_estimated: false,
            entry_filled_at: Some(filled_at),
        }
    }

    /// The moment this order's age is measured from.
    ///
    /// Exits age from the entry fill that created them.
    pub fn aged_from(&self) -> TimeMs {
        self.entry_filled_at.unwrap_or(self.placed_at)
    }

    /// A copy of this record marked filled at `at`.
    pub fn filled(&self, at: TimeMs) -> Self {
        OrderRecord {
            filled_at: Some(at),
            status: OrderStatus::Filled,
            ..self.clone()
        }
    }
}

/// A written-off exit kept on the book as a best-effort fill opportunity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryOrder {
    pub recovery_id: RecoveryId,
    pub original_side: Side,
    pub trade_id: TradeId,
    pub cycle: u32,
    pub price: Decimal,
    pub volume: Decimal,
    pub entry_price: Decimal,
    #[serde(default)]
    pub entry_fee: Decimal,
    #[serde(default)]
    pub entry_fee_estimated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_filled_at: Option<TimeMs>,
    pub orphaned_at: TimeMs,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exchange_id: Option<String>,
}

impl RecoveryOrder {
    /// Convert an orphaned exit into a recovery ticket.
    pub fn from_exit(
        recovery_id: RecoveryId,
        exit: &OrderRecord,
        orphaned_at: TimeMs,
        reason: &str,
    ) -> Self {
        RecoveryOrder {
            recovery_id,
            original_side: exit.side,
            trade_id: exit.trade_id,
            cycle: exit.cycle,
            price: exit.price,
            volume: exit.volume,
            entry_price: exit.entry_price.unwrap_or(exit.price),
            entry_fee: exit.entry_fee,
            entry_fee_estimated: exit.entry_fee_estimated,
            entry_filled_at: exit.entry_filled_at,
            orphaned_at,
            reason: reason.to_string(),
            exchange_id: exit.exchange_id.clone(),
        }
    }

    /// Absolute distance between the resting price and `market`.
    pub fn distance_from(&self, market: Decimal) -> Decimal {
        (self.price - market).abs()
    }
}
