//! The slot reducer: `(state, event, config) -> (state', actions, effects)`.
//!
//! Pure and deterministic. Every call clones the input state and returns a
//! new value; the caller decides whether to adopt it.

use crate::domain::{
    CycleRecord, Decimal, LocalOrderId, ModeSource, OrderRecord, OrderStatus, RecoveryId,
    RecoveryOrder, Role, Side, SlotId, TimeMs, TradeId,
};
use serde::{Deserialize, Serialize};

use super::legs::{DistanceFromMarket, LegSelector};
use super::pricing::{backoff_multiplier, entry_price, exit_price, order_volume};
use super::protocol::{Action, Anomaly, Effect, EffectKind, Event};
use super::state::{Phase, RefreshDirection, SlotState};
use super::EngineConfig;

/// Output of one reducer call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub state: SlotState,
    pub actions: Vec<Action>,
    pub effects: Vec<Effect>,
    pub anomalies: Vec<Anomaly>,
}

impl Transition {
    fn new(state: SlotState) -> Self {
        Transition {
            state,
            actions: Vec::new(),
            effects: Vec::new(),
            anomalies: Vec::new(),
        }
    }

    /// The input state unchanged, with the reason reported.
    fn rejected(state: &SlotState, anomaly: Anomaly) -> Self {
        Transition {
            anomalies: vec![anomaly],
            ..Transition::new(state.clone())
        }
    }

    fn settle(mut self, config: &EngineConfig) -> Self {
        enforce_recovery_cap(&mut self, config);
        sync_s2_clock(&mut self.state);
        self
    }
}

/// One-sided operation requested by the policy layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectionalMode {
    Both,
    /// Only trade B (buy entries) runs.
    LongOnly,
    /// Only trade A (sell entries) runs.
    ShortOnly,
}

/// Fresh slot with an entry for each trade that can be sized.
pub fn bootstrap(
    slot_id: SlotId,
    market_price: Decimal,
    now: TimeMs,
    config: &EngineConfig,
) -> (SlotState, Vec<Action>) {
    let mut out = Transition::new(SlotState::new(slot_id, market_price, now));
    for trade_id in TradeId::ALL {
        place_entry(&mut out, config, trade_id, "bootstrap");
    }
    (out.state, out.actions)
}

/// Apply one event with the default worse-leg rule.
pub fn transition(state: &SlotState, event: &Event, config: &EngineConfig) -> Transition {
    transition_with(state, event, config, &DistanceFromMarket)
}

/// Apply one event, choosing the S2 write-off leg with `selector`.
pub fn transition_with(
    state: &SlotState,
    event: &Event,
    config: &EngineConfig,
    selector: &dyn LegSelector,
) -> Transition {
    match event {
        Event::PriceTick { price, at } => on_price_tick(state, *price, *at, config),
        Event::TimerTick { at } => on_timer_tick(state, *at, config, selector),
        Event::Fill {
            local_id,
            price,
            volume,
            fee,
            cost,
            at,
        } => on_fill(state, *local_id, *price, *volume, *fee, *cost, *at, config),
        Event::RecoveryFill {
            recovery_id,
            price,
            volume,
            fee,
            at,
        } => on_recovery_fill(state, *recovery_id, *price, *volume, *fee, *at, config),
        Event::RecoveryCancel { recovery_id, at } => {
            on_recovery_cancel(state, *recovery_id, *at, config)
        }
        Event::OrderAcked {
            local_id,
            exchange_id,
        } => on_order_acked(state, *local_id, exchange_id, config),
    }
}

/// Switch the slot's directional mode and cancel the blocked side's entry.
///
/// A directional mode must carry a non-`None` source; `Both` clears it.
pub fn set_directional_mode(
    state: &SlotState,
    mode: DirectionalMode,
    source: ModeSource,
) -> Transition {
    let mut out = Transition::new(state.clone());
    let (long_only, short_only) = match mode {
        DirectionalMode::Both => (false, false),
        DirectionalMode::LongOnly => (true, false),
        DirectionalMode::ShortOnly => (false, true),
    };
    out.state.long_only = long_only;
    out.state.short_only = short_only;
    out.state.mode_source = match mode {
        DirectionalMode::Both => ModeSource::None,
        _ => source,
    };

    for trade_id in TradeId::ALL {
        if out.state.trade_enabled(trade_id) {
            continue;
        }
        let blocked = out
            .state
            .live_order(trade_id, Role::Entry)
            .map(|o| o.local_id);
        if let Some(local_id) = blocked {
            cancel_order(&mut out, local_id, "directional_mode");
        }
    }
    out
}

pub fn set_sticky(state: &SlotState, sticky: bool) -> SlotState {
    SlotState {
        sticky,
        ..state.clone()
    }
}

fn on_price_tick(state: &SlotState, price: Decimal, at: TimeMs, config: &EngineConfig) -> Transition {
    let priceable = TradeId::ALL.into_iter().all(|trade_id| {
        let multiplier = backoff_multiplier(state.leg(trade_id).consecutive_losses, config);
        entry_price(price, trade_id, config, multiplier).is_some()
    });
    if !price.is_positive() || !priceable {
        return Transition::rejected(state, Anomaly::InvalidPrice { price });
    }
    let mut out = Transition::new(state.clone());
    out.state.market_price = price;
    advance_clock(&mut out.state, at);
    refresh_stale_entry(&mut out, config);
    out.settle(config)
}

fn on_timer_tick(
    state: &SlotState,
    at: TimeMs,
    config: &EngineConfig,
    selector: &dyn LegSelector,
) -> Transition {
    let mut out = Transition::new(state.clone());
    advance_clock(&mut out.state, at);
    let now = out.state.now;
    let cycle_mode = !(config.sticky_mode_enabled && out.state.sticky);

    if cycle_mode {
        match out.state.phase() {
            Phase::S1a | Phase::S1b => {
                let aged = out
                    .state
                    .orders
                    .iter()
                    .find(|o| {
                        o.role == Role::Exit
                            && now.reached(o.aged_from(), config.s1_orphan_after_sec)
                    })
                    .map(|o| o.local_id);
                if let Some(local_id) = aged {
                    orphan_exit(&mut out, config, local_id, "s1_timeout");
                }
            }
            Phase::S2 => {
                let market = out.state.market_price;
                let timed_out = out
                    .state
                    .s2_entered_at
                    .is_some_and(|entered| now.reached(entered, config.s2_orphan_after_sec));
                if timed_out && market.is_positive() {
                    let worse = match (
                        out.state.live_order(TradeId::A, Role::Exit),
                        out.state.live_order(TradeId::B, Role::Exit),
                    ) {
                        (Some(a), Some(b)) => match selector.worse_leg(a, b, market) {
                            TradeId::A => Some(a.local_id),
                            TradeId::B => Some(b.local_id),
                        },
                        _ => None,
                    };
                    if let Some(local_id) = worse {
                        orphan_exit(&mut out, config, local_id, "s2_timeout");
                    }
                }
            }
            Phase::S0 => {}
        }
    }

    for trade_id in TradeId::ALL {
        place_entry(&mut out, config, trade_id, "reseed");
    }
    out.settle(config)
}

#[allow(clippy::too_many_arguments)]
fn on_fill(
    state: &SlotState,
    local_id: LocalOrderId,
    price: Decimal,
    volume: Decimal,
    fee: Option<Decimal>,
    cost: Option<Decimal>,
    at: TimeMs,
    config: &EngineConfig,
) -> Transition {
    if state.find_order(local_id).is_none() {
        return Transition::rejected(state, Anomaly::UnknownOrder { local_id });
    }
    let Some(amounts) = FillAmounts::checked(price, volume, fee, cost, config) else {
        return invalid_fill(state, local_id, price, volume);
    };

    let mut out = Transition::new(state.clone());
    advance_clock(&mut out.state, at);
    let Some(order) = out.state.take_order(local_id) else {
        return Transition::rejected(state, Anomaly::UnknownOrder { local_id });
    };
    if volume != order.volume {
        out.anomalies.push(Anomaly::VolumeMismatch {
            local_id,
            ordered: order.volume,
            filled: volume,
        });
    }

    out.effects.push(Effect {
        kind: match order.role {
            Role::Entry => EffectKind::EntryFill,
            Role::Exit => EffectKind::ExitFill,
        },
        trade_id: order.trade_id,
        cycle: order.cycle,
        side: order.side,
        price,
        volume,
        notional: amounts.notional,
        fee: amounts.fee,
        at,
        order: Some(order.filled(at)),
        recovery_id: None,
    });

    match order.role {
        Role::Entry => {
            let Some(target) = exit_price(price, out.state.market_price, order.trade_id, config)
            else {
                return invalid_fill(state, local_id, price, volume);
            };
            let exit_id = out.state.alloc_order_id();
            let exit = OrderRecord {
                entry_fee_estimated: amounts.fee_estimated,
                ..OrderRecord::exit_for(exit_id, &order, target, volume, price, amounts.fee, at)
            };
            out.actions.push(place_action(&exit, "entry_filled"));
            out.state.orders.push(exit);
        }
        Role::Exit => {
            let opened = Opening {
                price: order.entry_price.unwrap_or(order.price),
                fee: order.entry_fee,
                fee_estimated: order.entry_fee_estimated,
            };
            let Some(close) = opened.close(order.trade_id, price, volume, &amounts) else {
                return invalid_fill(state, local_id, price, volume);
            };
            push_fee_adjustment(&mut out, order.trade_id, order.cycle, order.side, close.fee_adjustment, at);
            let record = CycleRecord {
                trade_id: order.trade_id,
                cycle: order.cycle,
                entry_price: opened.price,
                exit_price: price,
                volume,
                gross_profit: close.gross,
                fee_actual: fee,
                cost_actual: cost,
                fees: close.fees,
                entry_time: order.aged_from(),
                exit_time: at,
                net_profit: close.net,
                from_recovery: false,
            };
            book_cycle(&mut out, config, record);
            advance_cycle(&mut out.state, order.trade_id, order.cycle);
            place_entry(&mut out, config, order.trade_id, "cycle_complete");
        }
    }
    out.settle(config)
}

fn on_recovery_fill(
    state: &SlotState,
    recovery_id: RecoveryId,
    price: Decimal,
    volume: Decimal,
    fee: Option<Decimal>,
    at: TimeMs,
    config: &EngineConfig,
) -> Transition {
    if state.find_recovery(recovery_id).is_none() {
        return Transition::rejected(state, Anomaly::UnknownRecovery { recovery_id });
    }
    let Some(amounts) = FillAmounts::checked(price, volume, fee, None, config) else {
        return invalid_fill(state, recovery_id, price, volume);
    };

    let mut out = Transition::new(state.clone());
    advance_clock(&mut out.state, at);
    let Some(recovery) = out.state.take_recovery(recovery_id) else {
        return Transition::rejected(state, Anomaly::UnknownRecovery { recovery_id });
    };
    let opened = Opening {
        price: recovery.entry_price,
        fee: recovery.entry_fee,
        fee_estimated: recovery.entry_fee_estimated,
    };
    let Some(close) = opened.close(recovery.trade_id, price, volume, &amounts) else {
        return invalid_fill(state, recovery_id, price, volume);
    };

    out.effects.push(Effect {
        kind: EffectKind::RecoveryFill,
        trade_id: recovery.trade_id,
        cycle: recovery.cycle,
        side: recovery.original_side,
        price,
        volume,
        notional: amounts.notional,
        fee: amounts.fee,
        at,
        order: None,
        recovery_id: Some(recovery_id),
    });
    push_fee_adjustment(
        &mut out,
        recovery.trade_id,
        recovery.cycle,
        recovery.original_side,
        close.fee_adjustment,
        at,
    );

    let record = CycleRecord {
        trade_id: recovery.trade_id,
        cycle: recovery.cycle,
        entry_price: recovery.entry_price,
        exit_price: price,
        volume,
        gross_profit: close.gross,
        fee_actual: fee,
        cost_actual: None,
        fees: close.fees,
        entry_time: recovery.entry_filled_at.unwrap_or(recovery.orphaned_at),
        exit_time: at,
        net_profit: close.net,
        from_recovery: true,
    };
    book_cycle(&mut out, config, record);
    out.settle(config)
}

/// Quote amounts of one fill, validated against overflow.
struct FillAmounts {
    /// Reported cost, else price * volume.
    notional: Decimal,
    fee: Decimal,
    fee_estimated: bool,
}

impl FillAmounts {
    fn checked(
        price: Decimal,
        volume: Decimal,
        fee: Option<Decimal>,
        cost: Option<Decimal>,
        config: &EngineConfig,
    ) -> Option<Self> {
        if !price.is_positive() || !volume.is_positive() {
            return None;
        }
        let value = price.checked_mul(volume)?;
        let notional = cost.unwrap_or(value);
        let (fee, fee_estimated) = match fee {
            Some(fee) => (fee, false),
            None => (config.estimated_fee(value)?, true),
        };
        // A buy debits notional plus fee in one row.
        notional.checked_add(fee)?;
        Some(FillAmounts {
            notional,
            fee,
            fee_estimated,
        })
    }
}

/// The filled entry a closing fill settles against.
struct Opening {
    price: Decimal,
    fee: Decimal,
    fee_estimated: bool,
}

struct Close {
    gross: Decimal,
    fees: Decimal,
    net: Decimal,
    /// Actual minus estimated entry fee; zero when nothing was re-derived.
    fee_adjustment: Decimal,
}

impl Opening {
    /// Cycle figures for closing `volume` at `exit_price`.
    ///
    /// When the closing fill reports its fee and the entry fee was estimated,
    /// the entry fee is re-derived at the rate the exchange just charged.
    fn close(
        &self,
        trade_id: TradeId,
        exit_price: Decimal,
        volume: Decimal,
        closing: &FillAmounts,
    ) -> Option<Close> {
        let gross = CycleRecord::gross_for(trade_id, self.price, exit_price, volume)?;
        let repriced = if self.fee_estimated && !closing.fee_estimated {
            closing
                .fee
                .checked_div(closing.notional)
                .and_then(|rate| self.price.checked_mul(volume)?.checked_mul(rate))
        } else {
            None
        };
        let entry_fee = repriced.unwrap_or(self.fee);
        let fees = entry_fee.checked_add(closing.fee)?;
        Some(Close {
            gross,
            fees,
            net: gross.checked_sub(fees)?,
            fee_adjustment: entry_fee.checked_sub(self.fee)?,
        })
    }
}

fn invalid_fill(
    state: &SlotState,
    subject: impl std::fmt::Display,
    price: Decimal,
    volume: Decimal,
) -> Transition {
    Transition::rejected(
        state,
        Anomaly::InvalidFill {
            reason: format!("{subject} reported {volume} @ {price}"),
        },
    )
}

fn push_fee_adjustment(
    out: &mut Transition,
    trade_id: TradeId,
    cycle: u32,
    side: Side,
    delta: Decimal,
    at: TimeMs,
) {
    if delta.is_zero() {
        return;
    }
    out.effects.push(Effect {
        kind: EffectKind::FeeAdjustment,
        trade_id,
        cycle,
        side,
        price: Decimal::zero(),
        volume: Decimal::zero(),
        notional: Decimal::zero(),
        fee: delta,
        at,
        order: None,
        recovery_id: None,
    });
}

fn on_recovery_cancel(
    state: &SlotState,
    recovery_id: RecoveryId,
    at: TimeMs,
    config: &EngineConfig,
) -> Transition {
    let mut out = Transition::new(state.clone());
    let Some(recovery) = out.state.take_recovery(recovery_id) else {
        return Transition::rejected(state, Anomaly::UnknownRecovery { recovery_id });
    };
    advance_clock(&mut out.state, at);
    out.effects.push(write_off_effect(&recovery, out.state.now));
    out.settle(config)
}

fn on_order_acked(
    state: &SlotState,
    local_id: LocalOrderId,
    exchange_id: &str,
    config: &EngineConfig,
) -> Transition {
    let mut out = Transition::new(state.clone());
    let Some(order) = out.state.orders.iter_mut().find(|o| o.local_id == local_id) else {
        return Transition::rejected(state, Anomaly::UnknownOrder { local_id });
    };
    order.exchange_id = Some(exchange_id.to_string());
    order.status = OrderStatus::Open;
    out.settle(config)
}

fn advance_clock(state: &mut SlotState, at: TimeMs) {
    state.now = state.now.max(at);
}

/// `s2_entered_at` is set while both exits are live and cleared otherwise.
fn sync_s2_clock(state: &mut SlotState) {
    if state.phase() == Phase::S2 {
        if state.s2_entered_at.is_none() {
            state.s2_entered_at = Some(state.now);
        }
    } else {
        state.s2_entered_at = None;
    }
}

fn advance_cycle(state: &mut SlotState, trade_id: TradeId, finished: u32) {
    let leg = state.leg_mut(trade_id);
    leg.cycle = leg.cycle.max(finished + 1);
}

fn place_action(order: &OrderRecord, reason: &str) -> Action {
    Action::PlaceOrder {
        local_id: order.local_id,
        side: order.side,
        role: order.role,
        trade_id: order.trade_id,
        cycle: order.cycle,
        price: order.price,
        volume: order.volume,
        reason: reason.to_string(),
    }
}

/// Place an entry for `trade_id` unless it is blocked, cooling down, already
/// holds an order, or cannot be sized.
fn place_entry(out: &mut Transition, config: &EngineConfig, trade_id: TradeId, reason: &str) {
    let state = &mut out.state;
    if !state.trade_enabled(trade_id)
        || state.has_live_order(trade_id)
        || state.leg(trade_id).in_loss_cooldown(state.now)
        || !state.market_price.is_positive()
    {
        return;
    }
    let multiplier = backoff_multiplier(state.leg(trade_id).consecutive_losses, config);
    let Some(price) = entry_price(state.market_price, trade_id, config, multiplier) else {
        return;
    };
    let Some(volume) = order_volume(price, config) else {
        return;
    };
    let local_id = state.alloc_order_id();
    let cycle = state.leg(trade_id).cycle;
    let order = OrderRecord::entry(local_id, trade_id, cycle, price, volume, state.now);
    out.actions.push(place_action(&order, reason));
    state.orders.push(order);
}

fn cancel_order(out: &mut Transition, local_id: LocalOrderId, reason: &str) {
    if let Some(order) = out.state.take_order(local_id) {
        out.actions.push(Action::CancelOrder {
            local_id,
            exchange_id: order.exchange_id,
            reason: reason.to_string(),
        });
    }
}

/// Cancel and re-place at most one entry that drifted beyond `refresh_pct`.
///
/// After `max_consecutive_refreshes` same-direction refreshes the trade stops
/// chasing for `refresh_cooldown_sec`.
fn refresh_stale_entry(out: &mut Transition, config: &EngineConfig) {
    let market = out.state.market_price;
    let now = out.state.now;
    if !config.refresh_pct.is_positive() || !market.is_positive() {
        return;
    }

    let stale: Vec<(LocalOrderId, TradeId, Decimal)> = out
        .state
        .orders
        .iter()
        .filter(|o| o.role == Role::Entry)
        .filter(|o| {
            (o.price - market)
                .abs()
                .checked_div(market)
                .is_some_and(|drift| {
                    drift
                        .checked_mul(Decimal::hundred())
                        .map_or(true, |pct| pct > config.refresh_pct)
                })
        })
        .map(|o| (o.local_id, o.trade_id, o.price))
        .collect();

    for (local_id, trade_id, price) in stale {
        let leg = out.state.leg_mut(trade_id);
        if leg.in_refresh_cooldown(now) {
            continue;
        }
        if leg.refresh_cooldown_until.take().is_some() {
            leg.consecutive_refreshes = 0;
            leg.last_refresh_direction = None;
        }

        let direction = if market > price {
            RefreshDirection::Up
        } else {
            RefreshDirection::Down
        };
        let streak = if leg.last_refresh_direction == Some(direction) {
            leg.consecutive_refreshes + 1
        } else {
            1
        };
        leg.last_refresh_direction = Some(direction);
        if config.max_consecutive_refreshes > 0 && streak > config.max_consecutive_refreshes {
            leg.refresh_cooldown_until = Some(now.plus_secs(config.refresh_cooldown_sec));
            return;
        }
        leg.consecutive_refreshes = streak;

        cancel_order(out, local_id, "stale_entry");
        place_entry(out, config, trade_id, "refresh_entry");
        return;
    }
}

fn book_cycle(out: &mut Transition, config: &EngineConfig, record: CycleRecord) {
    let trade_id = record.trade_id;
    let lost = record.is_loss();
    out.actions.push(Action::BookCycle(record.clone()));
    out.state.push_cycle(record, config.max_retained_cycles);

    let now = out.state.now;
    let leg = out.state.leg_mut(trade_id);
    if lost {
        leg.consecutive_losses += 1;
        if config.loss_cooldown_start > 0 && leg.consecutive_losses >= config.loss_cooldown_start {
            leg.cooldown_until = Some(now.plus_secs(config.loss_cooldown_sec));
        }
    } else {
        leg.consecutive_losses = 0;
    }
}

/// Move a live exit to the recovery book and re-seed its trade.
fn orphan_exit(out: &mut Transition, config: &EngineConfig, local_id: LocalOrderId, reason: &str) {
    let Some(exit) = out.state.take_order(local_id) else {
        return;
    };
    let recovery_id = out.state.alloc_recovery_id();
    let recovery = RecoveryOrder::from_exit(recovery_id, &exit, out.state.now, reason);
    out.actions.push(Action::OrphanOrder {
        local_id,
        recovery_id,
        reason: reason.to_string(),
    });
    out.state.recovery_orders.push(recovery);
    advance_cycle(&mut out.state, exit.trade_id, exit.cycle);
    place_entry(out, config, exit.trade_id, "orphan_reentry");
}

/// Evict recovery orders beyond `max_recovery_slots`, farthest from market
/// first, oldest first on ties.
fn enforce_recovery_cap(out: &mut Transition, config: &EngineConfig) {
    let market = out.state.market_price;
    while out.state.recovery_orders.len() > config.max_recovery_slots {
        let worst = out
            .state
            .recovery_orders
            .iter()
            .max_by(|x, y| {
                x.distance_from(market)
                    .cmp(&y.distance_from(market))
                    .then_with(|| y.orphaned_at.cmp(&x.orphaned_at))
                    .then_with(|| y.recovery_id.cmp(&x.recovery_id))
            })
            .map(|r| r.recovery_id);
        let Some(recovery) = worst.and_then(|id| out.state.take_recovery(id)) else {
            break;
        };
        out.actions.push(Action::CancelRecovery {
            recovery_id: recovery.recovery_id,
            reason: "recovery_cap".to_string(),
        });
        out.effects.push(write_off_effect(&recovery, out.state.now));
    }
}

fn write_off_effect(recovery: &RecoveryOrder, at: TimeMs) -> Effect {
    Effect {
        kind: EffectKind::RecoveryWriteOff,
        trade_id: recovery.trade_id,
        cycle: recovery.cycle,
        side: recovery.original_side,
        price: recovery.price,
        volume: recovery.volume,
        notional: Decimal::zero(),
        fee: Decimal::zero(),
        at,
        order: None,
        recovery_id: Some(recovery.recovery_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::check_invariants;
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn started(config: &EngineConfig) -> SlotState {
        bootstrap(SlotId(0), d("0.1"), TimeMs::from_secs(0), config).0
    }

    fn entry_id(state: &SlotState, trade_id: TradeId) -> LocalOrderId {
        state.live_order(trade_id, Role::Entry).unwrap().local_id
    }

    fn fill(local_id: LocalOrderId, price: &str, at_secs: i64) -> Event {
        Event::Fill {
            local_id,
            price: d(price),
            volume: d("20"),
            fee: None,
            cost: None,
            at: TimeMs::from_secs(at_secs),
        }
    }

    #[test]
    fn test_bootstrap_skips_unsizable_side() {
        let config = EngineConfig {
            order_size: d("1.3"),
            ..EngineConfig::default()
        };
        // 1.3 / 0.1002 rounds to 13, 1.3 / 0.0998 also to 13; raise the floor to drop both.
        let (state, actions) = bootstrap(SlotId(1), d("0.1"), TimeMs::new(0), &config);
        assert_eq!(actions.len(), 2);
        assert!(check_invariants(&state).is_empty());

        let tight = EngineConfig {
            min_volume: d("14"),
            ..config
        };
        let (state, actions) = bootstrap(SlotId(1), d("0.1"), TimeMs::new(0), &tight);
        assert!(actions.is_empty());
        assert!(state.orders.is_empty());
        assert!(!state.long_only && !state.short_only);
    }

    #[test]
    fn test_unknown_fill_leaves_state_untouched() {
        let config = EngineConfig::default();
        let state = started(&config);
        let t = transition(&state, &fill(LocalOrderId(99), "0.1", 5), &config);
        assert_eq!(t.state, state);
        assert!(t.actions.is_empty());
        assert_eq!(t.anomalies, vec![Anomaly::UnknownOrder { local_id: LocalOrderId(99) }]);
    }

    #[test]
    fn test_overflowing_fill_is_rejected() {
        let config = EngineConfig::default();
        let state = started(&config);
        let a = entry_id(&state, TradeId::A);
        let event = Event::Fill {
            local_id: a,
            price: d("100000000000000000000"),
            volume: d("10000000000"),
            fee: None,
            cost: None,
            at: TimeMs::from_secs(1),
        };

        let t = transition(&state, &event, &config);
        assert_eq!(t.state, state);
        assert!(t.actions.is_empty());
        assert!(t.effects.is_empty());
        assert!(matches!(t.anomalies.as_slice(), [Anomaly::InvalidFill { .. }]));
    }

    #[test]
    fn test_unpriceable_tick_is_rejected() {
        let config = EngineConfig::default();
        let state = started(&config);
        let price = d("79228162514264337593543950335");
        let t = transition(&state, &Event::PriceTick { price, at: TimeMs::from_secs(1) }, &config);
        assert_eq!(t.state, state);
        assert_eq!(t.anomalies, vec![Anomaly::InvalidPrice { price }]);

        // A vanishing price is accepted; entries that round to zero are not placed.
        let tiny = Event::PriceTick {
            price: d("0.0000000000000000000000000001"),
            at: TimeMs::from_secs(2),
        };
        let t = transition(&state, &tiny, &config);
        assert!(t.anomalies.is_empty());
        assert!(t
            .actions
            .iter()
            .all(|a| !matches!(a, Action::PlaceOrder { .. })));
        assert!(check_invariants(&t.state).is_empty());
    }

    #[test]
    fn test_exit_fill_books_cycle_and_reseeds() {
        let config = EngineConfig::default();
        let state = started(&config);
        let a = entry_id(&state, TradeId::A);
        let t = transition(&state, &fill(a, "0.1002", 10), &config);
        let exit = t.state.live_order(TradeId::A, Role::Exit).unwrap().local_id;

        let t = transition(&t.state, &fill(exit, "0.0992", 20), &config);
        let booked: Vec<_> = t
            .actions
            .iter()
            .filter_map(|a| match a {
                Action::BookCycle(c) => Some(c.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(booked.len(), 1);
        assert_eq!(booked[0].gross_profit, d("0.02"));
        assert!(booked[0].fee_actual.is_none());
        assert_eq!(t.state.phase(), Phase::S0);
        assert_eq!(t.state.leg_a.cycle, 2);

        let reseed = t.state.live_order(TradeId::A, Role::Entry).unwrap();
        assert_eq!(reseed.cycle, 2);
        assert_eq!(t.state.total_profit(), booked[0].net_profit);
        assert!(check_invariants(&t.state).is_empty());
    }

    #[test]
    fn test_refresh_chases_until_cooldown() {
        let config = EngineConfig {
            max_consecutive_refreshes: 2,
            ..EngineConfig::default()
        };
        let mut state =
            set_directional_mode(&started(&config), DirectionalMode::LongOnly, ModeSource::PolicyDriven)
                .state;
        let mut price = d("0.1");
        let mut refreshes = 0;
        for step in 1..=4 {
            price = price * d("1.05");
            let t = transition(
                &state,
                &Event::PriceTick {
                    price,
                    at: TimeMs::from_secs(step),
                },
                &config,
            );
            if t.actions.iter().any(|a| matches!(a, Action::CancelOrder { .. })) {
                refreshes += 1;
            }
            state = t.state;
        }
        // Two refreshes allowed, the third same-direction attempt starts a cooldown.
        assert_eq!(refreshes, 2);
        assert!(state.leg_b.refresh_cooldown_until.is_some());
        assert_eq!(state.leg_b.consecutive_refreshes, 2);
        assert!(check_invariants(&state).is_empty());
    }

    #[test]
    fn test_loss_streak_pauses_trade() {
        let config = EngineConfig {
            loss_backoff_start: 1,
            loss_cooldown_start: 1,
            loss_cooldown_sec: 60,
            ..EngineConfig::default()
        };
        let state = started(&config);
        let b = entry_id(&state, TradeId::B);
        let t = transition(&state, &fill(b, "0.0998", 1), &config);
        let exit = t.state.live_order(TradeId::B, Role::Exit).unwrap().local_id;

        // Sell back below the entry: a losing cycle.
        let t = transition(&t.state, &fill(exit, "0.0990", 2), &config);
        assert!(t.state.live_order(TradeId::B, Role::Entry).is_none());
        assert_eq!(t.state.leg_b.consecutive_losses, 1);

        let early = transition(&t.state, &Event::TimerTick { at: TimeMs::from_secs(30) }, &config);
        assert!(early.state.live_order(TradeId::B, Role::Entry).is_none());

        let later = transition(&t.state, &Event::TimerTick { at: TimeMs::from_secs(62) }, &config);
        let entry = later.state.live_order(TradeId::B, Role::Entry).unwrap();
        // Widened by the backoff multiplier (1.5x of 0.2%).
        assert_eq!(entry.price, d("0.0997"));
    }

    #[test]
    fn test_recovery_cap_evicts_farthest() {
        let config = EngineConfig {
            max_recovery_slots: 1,
            s1_orphan_after_sec: 10,
            ..EngineConfig::default()
        };
        let mut state = started(&config);
        let a = entry_id(&state, TradeId::A);
        state = transition(&state, &fill(a, "0.1002", 0), &config).state;
        state = transition(&state, &Event::TimerTick { at: TimeMs::from_secs(10) }, &config).state;
        assert_eq!(state.recovery_orders.len(), 1);

        let a = entry_id(&state, TradeId::A);
        state = transition(&state, &fill(a, "0.1002", 20), &config).state;
        state = transition(
            &state,
            &Event::PriceTick {
                price: d("0.1001"),
                at: TimeMs::from_secs(21),
            },
            &config,
        )
        .state;
        let t = transition(&state, &Event::TimerTick { at: TimeMs::from_secs(31) }, &config);
        assert_eq!(t.state.recovery_orders.len(), 1);
        let evicted: Vec<_> = t
            .actions
            .iter()
            .filter(|a| matches!(a, Action::CancelRecovery { .. }))
            .collect();
        assert_eq!(evicted.len(), 1);
        assert_eq!(
            t.effects.iter().filter(|e| e.kind == EffectKind::RecoveryWriteOff).count(),
            1
        );
    }

    #[test]
    fn test_recovery_cancel_writes_off() {
        let config = EngineConfig {
            s1_orphan_after_sec: 10,
            ..EngineConfig::default()
        };
        let state = started(&config);
        let a = entry_id(&state, TradeId::A);
        let state = transition(&state, &fill(a, "0.1002", 0), &config).state;
        let state = transition(&state, &Event::TimerTick { at: TimeMs::from_secs(10) }, &config).state;
        let recovery_id = state.recovery_orders[0].recovery_id;

        let t = transition(
            &state,
            &Event::RecoveryCancel {
                recovery_id,
                at: TimeMs::from_secs(11),
            },
            &config,
        );
        assert!(t.state.recovery_orders.is_empty());
        assert!(t.actions.is_empty());
        assert_eq!(t.effects.len(), 1);
        assert_eq!(t.effects[0].kind, EffectKind::RecoveryWriteOff);

        let again = transition(
            &t.state,
            &Event::RecoveryCancel {
                recovery_id,
                at: TimeMs::from_secs(12),
            },
            &config,
        );
        assert_eq!(again.state, t.state);
        assert!(again.effects.is_empty());
    }

    #[test]
    fn test_directional_mode_cancels_blocked_entry() {
        let config = EngineConfig::default();
        let state = started(&config);
        let a = entry_id(&state, TradeId::A);

        let t = set_directional_mode(&state, DirectionalMode::LongOnly, ModeSource::BalanceDriven);
        assert!(t.state.long_only);
        assert_eq!(t.state.mode_source, ModeSource::BalanceDriven);
        assert_eq!(t.actions.len(), 1);
        assert!(matches!(&t.actions[0], Action::CancelOrder { local_id, .. } if *local_id == a));
        assert!(check_invariants(&t.state).is_empty());

        // Blocked side is not re-seeded while long-only.
        let tick = transition(&t.state, &Event::TimerTick { at: TimeMs::from_secs(5) }, &config);
        assert!(tick.state.live_order(TradeId::A, Role::Entry).is_none());

        let both = set_directional_mode(&tick.state, DirectionalMode::Both, ModeSource::PolicyDriven);
        assert_eq!(both.state.mode_source, ModeSource::None);
        let tick = transition(&both.state, &Event::TimerTick { at: TimeMs::from_secs(6) }, &config);
        assert!(tick.state.live_order(TradeId::A, Role::Entry).is_some());
    }

    #[test]
    fn test_order_acked_binds_exchange_id() {
        let config = EngineConfig::default();
        let state = started(&config);
        let b = entry_id(&state, TradeId::B);
        let t = transition(
            &state,
            &Event::OrderAcked {
                local_id: b,
                exchange_id: "OX-7".to_string(),
            },
            &config,
        );
        let order = t.state.find_order(b).unwrap();
        assert_eq!(order.status, OrderStatus::Open);
        assert_eq!(order.exchange_id.as_deref(), Some("OX-7"));
    }

    #[test]
    fn test_set_sticky_only_touches_flag() {
        let config = EngineConfig::default();
        let state = started(&config);
        let cycled = set_sticky(&state, false);
        assert!(!cycled.sticky);
        assert_eq!(SlotState { sticky: true, ..cycled }, state);
    }
}
