//! Event/Action vocabulary shared by the reducer and its caller.
//!
//! Events describe things that happened (price observed, clock advanced,
//! exchange reported a fill). Actions are intents the caller executes and
//! reports back as events.

use crate::domain::{
    CycleRecord, Decimal, LocalOrderId, RecoveryId, Role, Side, TimeMs, TradeId,
};
use serde::{Deserialize, Serialize};

/// Inbound event for one slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    PriceTick {
        price: Decimal,
        at: TimeMs,
    },
    TimerTick {
        at: TimeMs,
    },
    Fill {
        local_id: LocalOrderId,
        price: Decimal,
        volume: Decimal,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fee: Option<Decimal>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cost: Option<Decimal>,
        at: TimeMs,
    },
    RecoveryFill {
        recovery_id: RecoveryId,
        price: Decimal,
        volume: Decimal,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fee: Option<Decimal>,
        at: TimeMs,
    },
    RecoveryCancel {
        recovery_id: RecoveryId,
        at: TimeMs,
    },
    /// Exchange acknowledged a placement and assigned its id.
    OrderAcked {
        local_id: LocalOrderId,
        exchange_id: String,
    },
}

impl Event {
    /// Event time, when the event carries one.
    pub fn at(&self) -> Option<TimeMs> {
        match self {
            Event::PriceTick { at, .. }
            | Event::TimerTick { at }
            | Event::Fill { at, .. }
            | Event::RecoveryFill { at, .. }
            | Event::RecoveryCancel { at, .. } => Some(*at),
            Event::OrderAcked { .. } => None,
        }
    }

    /// Name used in logs and anomaly counters.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::PriceTick { .. } => "price_tick",
            Event::TimerTick { .. } => "timer_tick",
            Event::Fill { .. } => "fill",
            Event::RecoveryFill { .. } => "recovery_fill",
            Event::RecoveryCancel { .. } => "recovery_cancel",
            Event::OrderAcked { .. } => "order_acked",
        }
    }
}

/// Outbound intent for the exchange adapter or the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    PlaceOrder {
        local_id: LocalOrderId,
        side: Side,
        role: Role,
        trade_id: TradeId,
        cycle: u32,
        price: Decimal,
        volume: Decimal,
        reason: String,
    },
    CancelOrder {
        local_id: LocalOrderId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exchange_id: Option<String>,
        reason: String,
    },
    /// Detach an aged exit from the slot and keep it as a recovery order.
    OrphanOrder {
        local_id: LocalOrderId,
        recovery_id: RecoveryId,
        reason: String,
    },
    BookCycle(CycleRecord),
    /// Pull a recovery order evicted by the capacity limit.
    CancelRecovery {
        recovery_id: RecoveryId,
        reason: String,
    },
}

/// What a fill or write-off did to the slot's capital; consumed by the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EffectKind {
    EntryFill,
    ExitFill,
    RecoveryFill,
    RecoveryWriteOff,
    /// Correction to an estimated entry fee once the exchange reported the
    /// rate on the closing fill. `fee` carries the delta; positive pays more.
    FeeAdjustment,
}

/// A ledger-relevant consequence of one transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Effect {
    pub kind: EffectKind,
    pub trade_id: TradeId,
    pub cycle: u32,
    pub side: Side,
    pub price: Decimal,
    pub volume: Decimal,
    /// Quote value moved by the fill (reported cost, else price * volume).
    pub notional: Decimal,
    pub fee: Decimal,
    pub at: TimeMs,
    /// The settled order record, for order fills.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<crate::domain::OrderRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery_id: Option<RecoveryId>,
}

/// Something the reducer noticed but did not act on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Anomaly {
    UnknownOrder { local_id: LocalOrderId },
    UnknownRecovery { recovery_id: RecoveryId },
    /// Fill with a non-positive price or volume, or amounts that overflow.
    InvalidFill { reason: String },
    InvalidPrice { price: Decimal },
    /// Fill volume differs from the resting volume; booked at the reported volume.
    VolumeMismatch {
        local_id: LocalOrderId,
        ordered: Decimal,
        filled: Decimal,
    },
}

impl Anomaly {
    pub fn kind(&self) -> &'static str {
        match self {
            Anomaly::UnknownOrder { .. } => "unknown_order",
            Anomaly::UnknownRecovery { .. } => "unknown_recovery",
            Anomaly::InvalidFill { .. } => "invalid_fill",
            Anomaly::InvalidPrice { .. } => "invalid_price",
            Anomaly::VolumeMismatch { .. } => "volume_mismatch",
        }
    }
}
