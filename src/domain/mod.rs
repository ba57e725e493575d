//! Domain types shared by the reducer, the ledger and persistence.
//!
//! This module provides:
//! - Lossless numeric handling via the Decimal wrapper
//! - Domain primitives: TimeMs, SlotId, order/recovery ids, Side, Role, TradeId
//! - Order, recovery and cycle records owned by a slot

pub mod cycle;
pub mod decimal;
pub mod order;
pub mod primitives;

pub use cycle::CycleRecord;
pub use decimal::Decimal;
pub use order::{OrderRecord, RecoveryOrder};
pub use primitives::{
    LocalOrderId, ModeSource, OrderStatus, RecoveryId, Role, Side, SlotId, TimeMs, TradeId,
};
