//! Per-slot state owned by the reducer.

use crate::domain::{
    CycleRecord, Decimal, LocalOrderId, ModeSource, OrderRecord, RecoveryId, RecoveryOrder,
    Role, SlotId, TimeMs, TradeId,
};
use serde::{Deserialize, Serialize};

/// Lifecycle phase, derived from which exits are live. Never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// Both trades waiting on entries.
    S0,
    /// Trade A holds a live exit.
    S1a,
    /// Trade B holds a live exit.
    S1b,
    /// Both exits live.
    S2,
}

/// Direction of the last entry refresh, used by the anti-chase rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshDirection {
    Up,
    Down,
}

/// Counters kept per trade leg.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegState {
    /// Cycle number the next entry of this trade carries.
    #[serde(default = "first_cycle")]
    pub cycle: u32,
    #[serde(default)]
    pub consecutive_losses: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_until: Option<TimeMs>,
    #[serde(default)]
    pub consecutive_refreshes: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_refresh_direction: Option<RefreshDirection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_cooldown_until: Option<TimeMs>,
}

fn first_cycle() -> u32 {
    1
}

fn first_id() -> u64 {
    1
}

fn sticky_default() -> bool {
    true
}

impl Default for LegState {
    fn default() -> Self {
        LegState {
            cycle: first_cycle(),
            consecutive_losses: 0,
            cooldown_until: None,
            consecutive_refreshes: 0,
            last_refresh_direction: None,
            refresh_cooldown_until: None,
        }
    }
}

impl LegState {
    /// True while a loss cooldown is pausing new entries.
    pub fn in_loss_cooldown(&self, now: TimeMs) -> bool {
        self.cooldown_until.is_some_and(|until| now < until)
    }

    pub fn in_refresh_cooldown(&self, now: TimeMs) -> bool {
        self.refresh_cooldown_until.is_some_and(|until| now < until)
    }
}

/// Everything the reducer knows about one slot.
///
/// `orders` holds live (pending/open) orders only. Filled orders leave the set
/// and are reported through the transition's effects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotState {
    pub slot_id: SlotId,
    #[serde(default)]
    pub market_price: Decimal,
    #[serde(default)]
    pub now: TimeMs,
    #[serde(default)]
    pub orders: Vec<OrderRecord>,
    #[serde(default)]
    pub recovery_orders: Vec<RecoveryOrder>,
    #[serde(default)]
    pub completed_cycles: Vec<CycleRecord>,
    /// Net profit of cycles trimmed from `completed_cycles`.
    #[serde(default)]
    pub profit_watermark: Decimal,
    #[serde(default)]
    pub trimmed_cycles: u64,
    #[serde(default)]
    pub long_only: bool,
    #[serde(default)]
    pub short_only: bool,
    #[serde(default)]
    pub mode_source: ModeSource,
    #[serde(default = "sticky_default")]
    pub sticky: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s2_entered_at: Option<TimeMs>,
    #[serde(default = "first_id")]
    pub next_order_id: u64,
    #[serde(default = "first_id")]
    pub next_recovery_id: u64,
    #[serde(default)]
    pub leg_a: LegState,
    #[serde(default)]
    pub leg_b: LegState,
}

impl SlotState {
    pub fn new(slot_id: SlotId, market_price: Decimal, now: TimeMs) -> Self {
        SlotState {
            slot_id,
            market_price,
            now,
            orders: Vec::new(),
            recovery_orders: Vec::new(),
            completed_cycles: Vec::new(),
            profit_watermark: Decimal::zero(),
            trimmed_cycles: 0,
            long_only: false,
            short_only: false,
            mode_source: ModeSource::None,
            sticky: sticky_default(),
            s2_entered_at: None,
            next_order_id: first_id(),
            next_recovery_id: first_id(),
            leg_a: LegState::default(),
            leg_b: LegState::default(),
        }
    }

    pub fn phase(&self) -> Phase {
        derive_phase(self)
    }

    /// Realized profit of the slot: watermark plus retained cycles.
    pub fn total_profit(&self) -> Decimal {
        self.profit_watermark + self.completed_cycles.iter().map(|c| c.net_profit).sum::<Decimal>()
    }

    /// Completed round trips, trimmed or retained.
    pub fn round_trips(&self) -> u64 {
        self.trimmed_cycles + self.completed_cycles.len() as u64
    }

    pub fn leg(&self, trade_id: TradeId) -> &LegState {
        match trade_id {
            TradeId::A => &self.leg_a,
            TradeId::B => &self.leg_b,
        }
    }

    pub fn leg_mut(&mut self, trade_id: TradeId) -> &mut LegState {
        match trade_id {
            TradeId::A => &mut self.leg_a,
            TradeId::B => &mut self.leg_b,
        }
    }

    /// False when directional mode blocks new entries for the trade.
    ///
    /// `long_only` keeps only trade B (buy entries); `short_only` only trade A.
    pub fn trade_enabled(&self, trade_id: TradeId) -> bool {
        match trade_id {
            TradeId::A => !self.long_only,
            TradeId::B => !self.short_only,
        }
    }

    pub fn find_order(&self, local_id: LocalOrderId) -> Option<&OrderRecord> {
        self.orders.iter().find(|o| o.local_id == local_id)
    }

    pub fn find_recovery(&self, recovery_id: RecoveryId) -> Option<&RecoveryOrder> {
        self.recovery_orders
            .iter()
            .find(|r| r.recovery_id == recovery_id)
    }

    /// The live order of `trade_id` in `role`, if any.
    pub fn live_order(&self, trade_id: TradeId, role: Role) -> Option<&OrderRecord> {
        self.orders
            .iter()
            .find(|o| o.trade_id == trade_id && o.role == role)
    }

    pub fn has_live_order(&self, trade_id: TradeId) -> bool {
        self.orders.iter().any(|o| o.trade_id == trade_id)
    }

    pub(crate) fn take_order(&mut self, local_id: LocalOrderId) -> Option<OrderRecord> {
        let idx = self.orders.iter().position(|o| o.local_id == local_id)?;
        Some(self.orders.remove(idx))
    }

    pub(crate) fn take_recovery(&mut self, recovery_id: RecoveryId) -> Option<RecoveryOrder> {
        let idx = self
            .recovery_orders
            .iter()
            .position(|r| r.recovery_id == recovery_id)?;
        Some(self.recovery_orders.remove(idx))
    }

    pub(crate) fn alloc_order_id(&mut self) -> LocalOrderId {
        let id = LocalOrderId(self.next_order_id);
        self.next_order_id += 1;
        id
    }

    pub(crate) fn alloc_recovery_id(&mut self) -> RecoveryId {
        let id = RecoveryId(self.next_recovery_id);
        self.next_recovery_id += 1;
        id
    }

    /// Append a completed cycle, then fold the oldest into the watermark until
    /// at most `max_retained` remain (zero keeps everything).
    pub fn push_cycle(&mut self, record: CycleRecord, max_retained: usize) {
        self.completed_cycles.push(record);
        if max_retained > 0 {
            self.trim_cycles_to(max_retained);
        }
    }

    /// Fold the oldest retained cycles into `profit_watermark`.
    ///
    /// `total_profit()` is unchanged by trimming.
    pub fn trim_cycles_to(&mut self, keep: usize) {
        if self.completed_cycles.len() <= keep {
            return;
        }
        let excess = self.completed_cycles.len() - keep;
        for cycle in self.completed_cycles.drain(..excess) {
            self.profit_watermark += cycle.net_profit;
            self.trimmed_cycles += 1;
        }
    }

    /// Raise id counters above every id held, so restored states never reuse one.
    pub(crate) fn normalize_counters(&mut self) {
        if let Some(max) = self.orders.iter().map(|o| o.local_id.0).max() {
            self.next_order_id = self.next_order_id.max(max + 1);
        }
        if let Some(max) = self.recovery_orders.iter().map(|r| r.recovery_id.0).max() {
            self.next_recovery_id = self.next_recovery_id.max(max + 1);
        }
        self.next_order_id = self.next_order_id.max(1);
        self.next_recovery_id = self.next_recovery_id.max(1);

        // A leg's cycle must not fall behind anything it already booked or holds.
        for trade_id in TradeId::ALL {
            let held = self
                .orders
                .iter()
                .filter(|o| o.trade_id == trade_id)
                .map(|o| o.cycle);
            let settled = self
                .recovery_orders
                .iter()
                .filter(|r| r.trade_id == trade_id)
                .map(|r| r.cycle + 1)
                .chain(
                    self.completed_cycles
                        .iter()
                        .filter(|c| c.trade_id == trade_id)
                        .map(|c| c.cycle + 1),
                );
            let floor = held.chain(settled).max().unwrap_or(1).max(1);
            let leg = self.leg_mut(trade_id);
            leg.cycle = leg.cycle.max(floor);
        }
    }
}

/// Phase as a pure function of the live exits.
pub fn derive_phase(state: &SlotState) -> Phase {
    let a_exit = state.live_order(TradeId::A, Role::Exit).is_some();
    let b_exit = state.live_order(TradeId::B, Role::Exit).is_some();
    match (a_exit, b_exit) {
        (true, true) => Phase::S2,
        (true, false) => Phase::S1a,
        (false, true) => Phase::S1b,
        (false, false) => Phase::S0,
    }
}
