use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::domain::{Decimal, ModeSource, SlotId, TimeMs};
use crate::engine::{
    self, check_invariants_with, Action, Anomaly, DirectionalMode, DistanceFromMarket,
    EngineConfig, Event, LegSelector, SlotState, Transition, Violation,
};
use crate::ledger::{DriftReport, Ledger, LedgerConfig, LedgerEntry, ObservedBalances};
use crate::snapshot::{self, Snapshot, SNAPSHOT_VERSION};

/// How often the orchestrator verifies reducer output before adopting it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvariantChecks {
    Always,
    /// Every Nth transition.
    Sampled(u64),
    Off,
}

/// Per-kind anomaly counts since start-up.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnomalyCounters {
    pub unknown_orders: u64,
    pub unknown_recoveries: u64,
    pub invalid_events: u64,
    pub volume_mismatches: u64,
}

impl AnomalyCounters {
    fn count(&mut self, anomaly: &Anomaly) {
        match anomaly {
            Anomaly::UnknownOrder { .. } => self.unknown_orders += 1,
            Anomaly::UnknownRecovery { .. } => self.unknown_recoveries += 1,
            Anomaly::InvalidFill { .. } | Anomaly::InvalidPrice { .. } => {
                self.invalid_events += 1
            }
            Anomaly::VolumeMismatch { .. } => self.volume_mismatches += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.unknown_orders + self.unknown_recoveries + self.invalid_events + self.volume_mismatches
    }
}

/// What one adopted transition produced for the outside world.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub slot_id: SlotId,
    pub actions: Vec<Action>,
    pub ledger_entries: Vec<LedgerEntry>,
    pub anomalies: Vec<Anomaly>,
}

/// Per-slot results of one broadcast event.
#[derive(Debug, Default)]
pub struct Broadcast {
    pub outcomes: Vec<StepOutcome>,
    /// Slots that rejected the event kept their prior state.
    pub errors: Vec<OrchestrationError>,
}

/// Owns every slot state and the ledger; applies events strictly serially.
pub struct SlotOrchestrator {
    slots: BTreeMap<SlotId, SlotState>,
    ledger: Ledger,
    selector: Box<dyn LegSelector>,
    checks: InvariantChecks,
    transitions: u64,
    anomalies: AnomalyCounters,
}

impl SlotOrchestrator {
    pub fn new(ledger: Ledger, checks: InvariantChecks) -> Self {
        Self {
            slots: BTreeMap::new(),
            ledger,
            selector: Box::new(DistanceFromMarket),
            checks,
            transitions: 0,
            anomalies: AnomalyCounters::default(),
        }
    }

    /// Replace the S2 worse-leg rule.
    pub fn with_selector(mut self, selector: Box<dyn LegSelector>) -> Self {
        self.selector = selector;
        self
    }

    pub fn slot(&self, slot_id: SlotId) -> Option<&SlotState> {
        self.slots.get(&slot_id)
    }

    pub fn slot_ids(&self) -> Vec<SlotId> {
        self.slots.keys().copied().collect()
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn ledger_mut(&mut self) -> &mut Ledger {
        &mut self.ledger
    }

    pub fn anomalies(&self) -> &AnomalyCounters {
        &self.anomalies
    }

    /// Realized profit across all slots.
    pub fn total_profit(&self) -> Decimal {
        self.slots.values().map(|s| s.total_profit()).sum()
    }

    /// Create a slot and return its initial placements.
    pub fn bootstrap_slot(
        &mut self,
        slot_id: SlotId,
        market_price: Decimal,
        now: TimeMs,
        config: &EngineConfig,
    ) -> Result<Vec<Action>, OrchestrationError> {
        if self.slots.contains_key(&slot_id) {
            return Err(OrchestrationError::DuplicateSlot(slot_id));
        }
        let (state, actions) = engine::bootstrap(slot_id, market_price, now, config);
        let violations = check_invariants_with(&state, config);
        if !violations.is_empty() {
            return Err(reject(slot_id, violations));
        }
        info!(slot = %slot_id, price = %market_price, placed = actions.len(), "slot bootstrapped");
        self.slots.insert(slot_id, state);
        Ok(actions)
    }

    /// Apply `event` to one slot. On an invariant violation the prior state is
    /// kept and nothing reaches the ledger.
    pub fn apply(
        &mut self,
        slot_id: SlotId,
        event: &Event,
        config: &EngineConfig,
    ) -> Result<StepOutcome, OrchestrationError> {
        let state = self
            .slots
            .get(&slot_id)
            .ok_or(OrchestrationError::UnknownSlot(slot_id))?;
        let transition = engine::transition_with(state, event, config, self.selector.as_ref());
        debug!(slot = %slot_id, event = event.kind(), actions = transition.actions.len(), "event applied");
        self.adopt(slot_id, transition, config)
    }

    /// Apply a slot-independent event (price or timer tick) to every slot.
    /// A slot that rejects the event does not keep the others from seeing it.
    pub fn broadcast(&mut self, event: &Event, config: &EngineConfig) -> Broadcast {
        let mut result = Broadcast::default();
        for slot_id in self.slot_ids() {
            match self.apply(slot_id, event, config) {
                Ok(outcome) => result.outcomes.push(outcome),
                Err(err) => result.errors.push(err),
            }
        }
        result
    }

    pub fn set_directional_mode(
        &mut self,
        slot_id: SlotId,
        mode: DirectionalMode,
        source: ModeSource,
        config: &EngineConfig,
    ) -> Result<StepOutcome, OrchestrationError> {
        let state = self
            .slots
            .get(&slot_id)
            .ok_or(OrchestrationError::UnknownSlot(slot_id))?;
        let transition = engine::set_directional_mode(state, mode, source);
        info!(slot = %slot_id, ?mode, ?source, "directional mode changed");
        self.adopt(slot_id, transition, config)
    }

    pub fn set_sticky(&mut self, slot_id: SlotId, sticky: bool) -> Result<(), OrchestrationError> {
        let state = self
            .slots
            .get_mut(&slot_id)
            .ok_or(OrchestrationError::UnknownSlot(slot_id))?;
        *state = engine::set_sticky(state, sticky);
        Ok(())
    }

    /// Reconcile against observed balances when the cadence says so.
    pub fn maybe_reconcile(
        &mut self,
        observed: ObservedBalances,
        price: Decimal,
        now: TimeMs,
    ) -> Option<DriftReport> {
        if !self.ledger.reconcile_due(now) && !self.ledger.needs_reconciliation() {
            return None;
        }
        Some(self.ledger.reconcile(observed, price, now))
    }

    fn adopt(
        &mut self,
        slot_id: SlotId,
        transition: Transition,
        config: &EngineConfig,
    ) -> Result<StepOutcome, OrchestrationError> {
        self.transitions += 1;
        if self.should_check() {
            let violations = check_invariants_with(&transition.state, config);
            if !violations.is_empty() {
                return Err(reject(slot_id, violations));
            }
        }

        for anomaly in &transition.anomalies {
            self.anomalies.count(anomaly);
            warn!(slot = %slot_id, kind = anomaly.kind(), ?anomaly, "reducer anomaly");
        }

        let Transition {
            state,
            actions,
            effects,
            anomalies,
        } = transition;
        let ledger_entries = self.ledger.record(slot_id, &effects, &actions);
        self.slots.insert(slot_id, state);

        Ok(StepOutcome {
            slot_id,
            actions,
            ledger_entries,
            anomalies,
        })
    }

    fn should_check(&self) -> bool {
        match self.checks {
            InvariantChecks::Always => true,
            InvariantChecks::Sampled(every) => every <= 1 || self.transitions % every == 0,
            InvariantChecks::Off => false,
        }
    }

    pub fn snapshot(&self, taken_at: TimeMs) -> Snapshot {
        Snapshot {
            version: SNAPSHOT_VERSION,
            taken_at,
            slots: self.slots.values().map(snapshot::to_snapshot).collect(),
            ledger: Some(self.ledger.snapshot()),
        }
    }

    pub fn from_snapshot(
        snapshot: Snapshot,
        ledger_config: LedgerConfig,
        checks: InvariantChecks,
    ) -> Result<Self, OrchestrationError> {
        let ledger = Ledger::restore(snapshot.ledger, ledger_config);
        let mut orchestrator = SlotOrchestrator::new(ledger, checks);
        for slot in snapshot.slots {
            let state = snapshot::from_snapshot(slot);
            if orchestrator.slots.contains_key(&state.slot_id) {
                return Err(OrchestrationError::DuplicateSlot(state.slot_id));
            }
            orchestrator.slots.insert(state.slot_id, state);
        }
        info!(
            slots = orchestrator.slots.len(),
            last_ledger_id = orchestrator.ledger.last_id(),
            "orchestrator restored from snapshot"
        );
        Ok(orchestrator)
    }
}

fn reject(slot_id: SlotId, violations: Vec<Violation>) -> OrchestrationError {
    let names: Vec<String> = violations.iter().map(|v| v.to_string()).collect();
    error!(slot = %slot_id, violations = ?names, "transition rejected");
    OrchestrationError::InvariantViolation {
        slot_id,
        violations,
    }
}

#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error("unknown slot {0}")]
    UnknownSlot(SlotId),
    #[error("slot {0} already exists")]
    DuplicateSlot(SlotId),
    #[error("transition on {slot_id} rejected: {}", format_violations(.violations))]
    InvariantViolation {
        slot_id: SlotId,
        violations: Vec<Violation>,
    },
}

fn format_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{OrderRecord, Role, TradeId};
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn orchestrator() -> SlotOrchestrator {
        SlotOrchestrator::new(Ledger::new(LedgerConfig::default()), InvariantChecks::Always)
    }

    #[test]
    fn test_unknown_slot() {
        let mut orch = orchestrator();
        let err = orch
            .apply(SlotId(9), &Event::TimerTick { at: TimeMs::new(0) }, &EngineConfig::default())
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::UnknownSlot(SlotId(9))));
    }

    #[test]
    fn test_duplicate_bootstrap() {
        let config = EngineConfig::default();
        let mut orch = orchestrator();
        orch.bootstrap_slot(SlotId(0), d("0.1"), TimeMs::new(0), &config).unwrap();
        assert!(matches!(
            orch.bootstrap_slot(SlotId(0), d("0.1"), TimeMs::new(0), &config),
            Err(OrchestrationError::DuplicateSlot(_))
        ));
    }

    #[test]
    fn test_anomalies_counted() {
        let config = EngineConfig::default();
        let mut orch = orchestrator();
        orch.bootstrap_slot(SlotId(0), d("0.1"), TimeMs::new(0), &config).unwrap();
        let outcome = orch
            .apply(
                SlotId(0),
                &Event::RecoveryCancel {
                    recovery_id: crate::domain::RecoveryId(4),
                    at: TimeMs::new(1),
                },
                &config,
            )
            .unwrap();
        assert!(outcome.ledger_entries.is_empty());
        assert_eq!(orch.anomalies().unknown_recoveries, 1);
        assert_eq!(orch.anomalies().total(), 1);
    }

    #[test]
    fn test_violation_rejects_and_keeps_state() {
        let config = EngineConfig::default();
        let mut orch = orchestrator();
        orch.bootstrap_slot(SlotId(0), d("0.1"), TimeMs::new(0), &config).unwrap();

        // Corrupt the slot by hand: a second live A entry.
        let mut state = orch.slot(SlotId(0)).unwrap().clone();
        let extra = OrderRecord::entry(
            crate::domain::LocalOrderId(state.next_order_id),
            TradeId::A,
            1,
            d("0.1003"),
            d("20"),
            TimeMs::new(0),
        );
        state.next_order_id += 1;
        state.orders.push(extra);
        orch.slots.insert(SlotId(0), state.clone());

        let err = orch
            .apply(SlotId(0), &Event::TimerTick { at: TimeMs::new(1) }, &config)
            .unwrap_err();
        match err {
            OrchestrationError::InvariantViolation { violations, .. } => {
                assert!(violations.contains(&Violation::MultipleEntries(TradeId::A)));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(orch.slot(SlotId(0)), Some(&state));
        assert_eq!(orch.ledger().last_id(), 0);
    }

    #[test]
    fn test_broadcast_reaches_slots_after_a_rejection() {
        let config = EngineConfig::default();
        let mut orch = orchestrator();
        orch.bootstrap_slot(SlotId(0), d("0.1"), TimeMs::new(0), &config).unwrap();
        orch.bootstrap_slot(SlotId(1), d("0.1"), TimeMs::new(0), &config).unwrap();

        let mut broken = orch.slot(SlotId(0)).unwrap().clone();
        let extra = OrderRecord::entry(
            crate::domain::LocalOrderId(broken.next_order_id),
            TradeId::B,
            1,
            d("0.0997"),
            d("20"),
            TimeMs::new(0),
        );
        broken.next_order_id += 1;
        broken.orders.push(extra);
        orch.slots.insert(SlotId(0), broken.clone());

        let result = orch.broadcast(&Event::TimerTick { at: TimeMs::new(5) }, &config);
        assert_eq!(result.errors.len(), 1);
        assert!(matches!(
            result.errors[0],
            OrchestrationError::InvariantViolation { slot_id: SlotId(0), .. }
        ));
        assert_eq!(result.outcomes.len(), 1);
        assert_eq!(result.outcomes[0].slot_id, SlotId(1));
        assert_eq!(orch.slot(SlotId(0)), Some(&broken));
        assert_eq!(orch.slot(SlotId(1)).unwrap().now, TimeMs::new(5));
    }

    #[test]
    fn test_sampled_checks_skip() {
        let config = EngineConfig::default();
        let mut orch = SlotOrchestrator::new(Ledger::new(LedgerConfig::default()), InvariantChecks::Off);
        orch.bootstrap_slot(SlotId(0), d("0.1"), TimeMs::new(0), &config).unwrap();
        let mut state = orch.slot(SlotId(0)).unwrap().clone();
        state.long_only = true;
        state.short_only = true;
        state.orders.clear();
        orch.slots.insert(SlotId(0), state);
        assert!(orch
            .apply(SlotId(0), &Event::TimerTick { at: TimeMs::new(1) }, &config)
            .is_ok());
    }

    #[test]
    fn test_directional_mode_through_orchestrator() {
        let config = EngineConfig::default();
        let mut orch = orchestrator();
        orch.bootstrap_slot(SlotId(0), d("0.1"), TimeMs::new(0), &config).unwrap();

        let outcome = orch
            .set_directional_mode(SlotId(0), DirectionalMode::ShortOnly, ModeSource::PolicyDriven, &config)
            .unwrap();
        assert_eq!(outcome.actions.len(), 1);
        let slot = orch.slot(SlotId(0)).unwrap();
        assert!(slot.short_only);
        assert!(slot.live_order(TradeId::B, Role::Entry).is_none());

        // A directional mode without a source is rejected.
        assert!(orch
            .set_directional_mode(SlotId(0), DirectionalMode::LongOnly, ModeSource::None, &config)
            .is_err());
        assert!(orch.slot(SlotId(0)).unwrap().short_only);
    }

    #[test]
    fn test_maybe_reconcile_cadence() {
        let mut orch = orchestrator();
        let observed = ObservedBalances {
            quote: Decimal::zero(),
            base: Decimal::zero(),
        };
        assert!(orch.maybe_reconcile(observed, d("0.1"), TimeMs::from_secs(0)).is_some());
        assert!(orch.maybe_reconcile(observed, d("0.1"), TimeMs::from_secs(10)).is_none());
        assert!(orch.maybe_reconcile(observed, d("0.1"), TimeMs::from_secs(300)).is_some());
    }
}
