//! Structural checks over a slot state. Never auto-corrects.

use std::collections::HashSet;
use std::fmt;

use crate::domain::{LocalOrderId, ModeSource, RecoveryId, Role, TradeId};

use super::state::{Phase, SlotState};
use super::EngineConfig;

/// A broken structural rule, named for logs and error reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    DirectionalConflict,
    ModeSourceMissing,
    DuplicateLocalId(LocalOrderId),
    DuplicateRecoveryId(RecoveryId),
    MultipleEntries(TradeId),
    MultipleExits(TradeId),
    EntryAndExitLive(TradeId),
    BlockedEntryLive(TradeId),
    SideMismatch(LocalOrderId),
    ExitWithoutEntryPrice(LocalOrderId),
    NonPositiveVolume(LocalOrderId),
    SettledOrderLive(LocalOrderId),
    CycleCounterZero(TradeId),
    OrderIdCounterBehind,
    S2ClockOutsideS2,
    RecoveryCapacity { held: usize, cap: usize },
}

impl Violation {
    pub fn name(&self) -> &'static str {
        match self {
            Violation::DirectionalConflict => "directional_conflict",
            Violation::ModeSourceMissing => "mode_source_missing",
            Violation::DuplicateLocalId(_) => "duplicate_local_id",
            Violation::DuplicateRecoveryId(_) => "duplicate_recovery_id",
            Violation::MultipleEntries(_) => "multiple_entries",
            Violation::MultipleExits(_) => "multiple_exits",
            Violation::EntryAndExitLive(_) => "entry_and_exit_live",
            Violation::BlockedEntryLive(_) => "blocked_entry_live",
            Violation::SideMismatch(_) => "side_mismatch",
            Violation::ExitWithoutEntryPrice(_) => "exit_without_entry_price",
            Violation::NonPositiveVolume(_) => "non_positive_volume",
            Violation::SettledOrderLive(_) => "settled_order_live",
            Violation::CycleCounterZero(_) => "cycle_counter_zero",
            Violation::OrderIdCounterBehind => "order_id_counter_behind",
            Violation::S2ClockOutsideS2 => "s2_clock_outside_s2",
            Violation::RecoveryCapacity { .. } => "recovery_capacity",
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::DuplicateLocalId(id)
            | Violation::SideMismatch(id)
            | Violation::ExitWithoutEntryPrice(id)
            | Violation::NonPositiveVolume(id)
            | Violation::SettledOrderLive(id) => write!(f, "{} ({id})", self.name()),
            Violation::DuplicateRecoveryId(id) => write!(f, "{} ({id})", self.name()),
            Violation::MultipleEntries(t)
            | Violation::MultipleExits(t)
            | Violation::EntryAndExitLive(t)
            | Violation::BlockedEntryLive(t)
            | Violation::CycleCounterZero(t) => write!(f, "{} (trade {t})", self.name()),
            Violation::RecoveryCapacity { held, cap } => {
                write!(f, "{} ({held} > {cap})", self.name())
            }
            _ => f.write_str(self.name()),
        }
    }
}

/// Every violated rule of `state`; empty when the state is well formed.
pub fn check_invariants(state: &SlotState) -> Vec<Violation> {
    let mut violations = Vec::new();

    if state.long_only && state.short_only {
        violations.push(Violation::DirectionalConflict);
    }
    if (state.long_only || state.short_only) && state.mode_source == ModeSource::None {
        violations.push(Violation::ModeSourceMissing);
    }

    let mut seen = HashSet::new();
    for order in &state.orders {
        if !seen.insert(order.local_id) {
            violations.push(Violation::DuplicateLocalId(order.local_id));
        }
        if order.side != order.trade_id.side_for(order.role) {
            violations.push(Violation::SideMismatch(order.local_id));
        }
        if order.role == Role::Exit && order.entry_price.is_none() {
            violations.push(Violation::ExitWithoutEntryPrice(order.local_id));
        }
        if !order.volume.is_positive() {
            violations.push(Violation::NonPositiveVolume(order.local_id));
        }
        if !order.status.is_live() {
            violations.push(Violation::SettledOrderLive(order.local_id));
        }
        if order.local_id.0 >= state.next_order_id {
            violations.push(Violation::OrderIdCounterBehind);
        }
    }

    let mut seen = HashSet::new();
    for recovery in &state.recovery_orders {
        if !seen.insert(recovery.recovery_id) {
            violations.push(Violation::DuplicateRecoveryId(recovery.recovery_id));
        }
    }

    for trade_id in TradeId::ALL {
        let count = |role: Role| {
            state
                .orders
                .iter()
                .filter(|o| o.trade_id == trade_id && o.role == role)
                .count()
        };
        let entries = count(Role::Entry);
        let exits = count(Role::Exit);
        if entries > 1 {
            violations.push(Violation::MultipleEntries(trade_id));
        }
        if exits > 1 {
            violations.push(Violation::MultipleExits(trade_id));
        }
        if entries > 0 && exits > 0 {
            violations.push(Violation::EntryAndExitLive(trade_id));
        }
        if entries > 0 && !state.trade_enabled(trade_id) {
            violations.push(Violation::BlockedEntryLive(trade_id));
        }
        if state.leg(trade_id).cycle == 0 {
            violations.push(Violation::CycleCounterZero(trade_id));
        }
    }

    if state.s2_entered_at.is_some() && state.phase() != Phase::S2 {
        violations.push(Violation::S2ClockOutsideS2);
    }

    violations
}

/// `check_invariants` plus the rules that depend on the caller's config.
pub fn check_invariants_with(state: &SlotState, config: &EngineConfig) -> Vec<Violation> {
    let mut violations = check_invariants(state);
    if state.recovery_orders.len() > config.max_recovery_slots {
        violations.push(Violation::RecoveryCapacity {
            held: state.recovery_orders.len(),
            cap: config.max_recovery_slots,
        });
    }
    violations
}
