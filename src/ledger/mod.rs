//! Append-only double-entry ledger fed by reducer effects.
//!
//! This module provides:
//! - Idempotent rows keyed by (slot, trade, cycle, entry type)
//! - Running quote/base balances from configured opening balances
//! - Per-slot accounts over the retained tail plus a trimmed watermark
//! - Reconciliation against observed exchange balances

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::domain::{Decimal, Side, SlotId, TimeMs, TradeId};
use crate::engine::{Action, Effect, EffectKind};

pub mod entry;
pub mod reconcile;

pub use entry::{EntryType, IdempotencyKey, LedgerEntry};
pub use reconcile::{DriftReport, DriftStatus, DriftThresholds, ObservedBalances};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerConfig {
    pub opening_quote: Decimal,
    pub opening_base: Decimal,
    /// Rows kept in memory; older rows fold into per-slot watermarks. Zero keeps all.
    pub max_retained_entries: usize,
    pub thresholds: DriftThresholds,
    pub reconcile_interval_sec: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        LedgerConfig {
            opening_quote: Decimal::zero(),
            opening_base: Decimal::zero(),
            max_retained_entries: 5000,
            thresholds: DriftThresholds {
                soft: Decimal::from_i64(1),
                hard: Decimal::from_i64(10),
            },
            reconcile_interval_sec: 300,
        }
    }
}

/// Aggregated flows of one slot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotAccount {
    pub entries: u64,
    pub quote_debit: Decimal,
    pub quote_credit: Decimal,
    pub base_debit: Decimal,
    pub base_credit: Decimal,
    pub fees: Decimal,
    pub realized_pnl: Decimal,
}

impl SlotAccount {
    fn absorb(&mut self, entry: &LedgerEntry) {
        self.entries += 1;
        self.quote_debit += entry.quote_debit;
        self.quote_credit += entry.quote_credit;
        self.base_debit += entry.base_debit;
        self.base_credit += entry.base_credit;
        self.fees += entry.fee;
        self.realized_pnl += entry.realized_pnl;
    }

    fn merge(&mut self, other: &SlotAccount) {
        self.entries += other.entries;
        self.quote_debit += other.quote_debit;
        self.quote_credit += other.quote_credit;
        self.base_debit += other.base_debit;
        self.base_credit += other.base_credit;
        self.fees += other.fees;
        self.realized_pnl += other.realized_pnl;
    }

    pub fn quote_net(&self) -> Decimal {
        self.quote_debit - self.quote_credit
    }

    pub fn base_net(&self) -> Decimal {
        self.base_debit - self.base_credit
    }
}

/// Trimmed totals of one slot, as persisted in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotWatermark {
    pub slot_id: SlotId,
    pub account: SlotAccount,
}

/// Highest trimmed cycle of one leg-ordered entry type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrimmedCycle {
    pub slot_id: SlotId,
    pub trade_id: TradeId,
    pub entry_type: EntryType,
    pub cycle: u32,
}

/// Serialized ledger state carried inside a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    #[serde(default)]
    pub last_id: u64,
    #[serde(default)]
    pub opening_quote: Decimal,
    #[serde(default)]
    pub opening_base: Decimal,
    #[serde(default)]
    pub quote_balance: Decimal,
    #[serde(default)]
    pub base_balance: Decimal,
    /// Written by older versions; read once on restore.
    #[serde(default, skip_serializing)]
    pub recorded_keys: Vec<IdempotencyKey>,
    #[serde(default)]
    pub trimmed_cycles: Vec<TrimmedCycle>,
    #[serde(default)]
    pub entries: Vec<LedgerEntry>,
    #[serde(default)]
    pub watermarks: Vec<SlotWatermark>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reconciled_at: Option<TimeMs>,
}

#[derive(Default)]
struct Flows {
    quote_debit: Decimal,
    quote_credit: Decimal,
    base_debit: Decimal,
    base_credit: Decimal,
    fee: Decimal,
    realized_pnl: Decimal,
}

impl Flows {
    /// Buys bring in base and pay cost plus fee; sells bring in cost and pay fee and base.
    fn for_fill(effect: &Effect) -> Self {
        match effect.side {
            Side::Buy => Flows {
                base_debit: effect.volume,
                quote_credit: effect.notional + effect.fee,
                fee: effect.fee,
                ..Flows::default()
            },
            Side::Sell => Flows {
                quote_debit: effect.notional,
                quote_credit: effect.fee,
                base_credit: effect.volume,
                fee: effect.fee,
                ..Flows::default()
            },
        }
    }

    /// A positive `delta` pays more fee, a negative one is refunded. The
    /// cycle's profit row already carries the corrected net.
    fn fee_adjustment(delta: Decimal) -> Self {
        if delta.is_negative() {
            Flows {
                quote_debit: -delta,
                fee: delta,
                ..Flows::default()
            }
        } else {
            Flows {
                quote_credit: delta,
                fee: delta,
                ..Flows::default()
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Ledger {
    config: LedgerConfig,
    last_id: u64,
    opening_quote: Decimal,
    opening_base: Decimal,
    quote_balance: Decimal,
    base_balance: Decimal,
    /// Keys of the retained tail.
    recorded: BTreeSet<IdempotencyKey>,
    /// Highest trimmed cycle per leg-ordered key class.
    trimmed_cycles: BTreeMap<(SlotId, TradeId, EntryType), u32>,
    entries: VecDeque<LedgerEntry>,
    trimmed: BTreeMap<SlotId, SlotAccount>,
    last_reconciled_at: Option<TimeMs>,
    needs_reconciliation: bool,
}

impl Ledger {
    pub fn new(config: LedgerConfig) -> Self {
        Ledger {
            last_id: 0,
            opening_quote: config.opening_quote,
            opening_base: config.opening_base,
            quote_balance: config.opening_quote,
            base_balance: config.opening_base,
            recorded: BTreeSet::new(),
            trimmed_cycles: BTreeMap::new(),
            entries: VecDeque::new(),
            trimmed: BTreeMap::new(),
            last_reconciled_at: None,
            needs_reconciliation: false,
            config,
        }
    }

    /// Book the effects and cycle bookings of one transition.
    ///
    /// Rows whose key was already recorded are skipped; the returned rows are
    /// the ones appended by this call. Keys are remembered for the retained
    /// tail; below that, entry and exit fills are recognized by their leg's
    /// trimmed cycle. Other trimmed keys are left to the database constraint.
    pub fn record(&mut self, slot_id: SlotId, effects: &[Effect], actions: &[Action]) -> Vec<LedgerEntry> {
        let mut appended = Vec::new();
        for effect in effects {
            let (entry_type, flows) = match effect.kind {
                EffectKind::EntryFill => (EntryType::EntryFill, Flows::for_fill(effect)),
                EffectKind::ExitFill => (EntryType::ExitFill, Flows::for_fill(effect)),
                EffectKind::RecoveryFill => (EntryType::RecoveryFill, Flows::for_fill(effect)),
                EffectKind::RecoveryWriteOff => (EntryType::RecoveryWriteOff, Flows::default()),
                EffectKind::FeeAdjustment => (EntryType::Fee, Flows::fee_adjustment(effect.fee)),
            };
            let key = IdempotencyKey {
                slot_id,
                trade_id: effect.trade_id,
                cycle: effect.cycle,
                entry_type,
            };
            appended.extend(self.append(key, effect.at, flows));
        }
        for action in actions {
            if let Action::BookCycle(cycle) = action {
                let key = IdempotencyKey {
                    slot_id,
                    trade_id: cycle.trade_id,
                    cycle: cycle.cycle,
                    entry_type: EntryType::CycleProfit,
                };
                let flows = Flows {
                    realized_pnl: cycle.net_profit,
                    ..Flows::default()
                };
                appended.extend(self.append(key, cycle.exit_time, flows));
            }
        }
        appended
    }

    fn append(&mut self, key: IdempotencyKey, timestamp: TimeMs, flows: Flows) -> Option<LedgerEntry> {
        if self.is_recorded(&key) {
            debug!(key = %key, "duplicate ledger entry ignored");
            return None;
        }
        self.recorded.insert(key);
        self.quote_balance += flows.quote_debit - flows.quote_credit;
        self.base_balance += flows.base_debit - flows.base_credit;
        self.last_id += 1;

        let entry = LedgerEntry {
            id: self.last_id,
            timestamp,
            slot_id: key.slot_id,
            trade_id: key.trade_id,
            cycle: key.cycle,
            entry_type: key.entry_type,
            quote_debit: flows.quote_debit,
            quote_credit: flows.quote_credit,
            base_debit: flows.base_debit,
            base_credit: flows.base_credit,
            fee: flows.fee,
            realized_pnl: flows.realized_pnl,
            quote_balance_after: self.quote_balance,
            base_balance_after: self.base_balance,
        };
        debug!(id = entry.id, key = %key, "ledger entry appended");
        self.entries.push_back(entry.clone());
        self.trim();
        Some(entry)
    }

    fn trim(&mut self) {
        let keep = self.config.max_retained_entries;
        if keep == 0 {
            return;
        }
        while self.entries.len() > keep {
            if let Some(oldest) = self.entries.pop_front() {
                let key = oldest.key();
                self.recorded.remove(&key);
                self.remember_trimmed(key);
                self.trimmed.entry(oldest.slot_id).or_default().absorb(&oldest);
            }
        }
    }

    fn remember_trimmed(&mut self, key: IdempotencyKey) {
        if !key.entry_type.follows_leg_cycle() {
            return;
        }
        let high = self
            .trimmed_cycles
            .entry((key.slot_id, key.trade_id, key.entry_type))
            .or_insert(key.cycle);
        *high = (*high).max(key.cycle);
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn last_id(&self) -> u64 {
        self.last_id
    }

    pub fn quote_balance(&self) -> Decimal {
        self.quote_balance
    }

    pub fn base_balance(&self) -> Decimal {
        self.base_balance
    }

    pub fn opening_quote(&self) -> Decimal {
        self.opening_quote
    }

    pub fn opening_base(&self) -> Decimal {
        self.opening_base
    }

    /// Retained rows, oldest first.
    pub fn entries(&self) -> impl Iterator<Item = &LedgerEntry> {
        self.entries.iter()
    }

    /// True when `record` would skip `key`.
    pub fn is_recorded(&self, key: &IdempotencyKey) -> bool {
        self.recorded.contains(key)
            || (key.entry_type.follows_leg_cycle()
                && self
                    .trimmed_cycles
                    .get(&(key.slot_id, key.trade_id, key.entry_type))
                    .is_some_and(|high| key.cycle <= *high))
    }

    pub fn needs_reconciliation(&self) -> bool {
        self.needs_reconciliation
    }

    /// Flows of one slot: trimmed watermark plus retained rows.
    pub fn slot_account(&self, slot_id: SlotId) -> SlotAccount {
        let mut account = self.trimmed.get(&slot_id).cloned().unwrap_or_default();
        for entry in self.entries.iter().filter(|e| e.slot_id == slot_id) {
            account.absorb(entry);
        }
        account
    }

    /// Flows across every slot.
    pub fn totals(&self) -> SlotAccount {
        let mut account = SlotAccount::default();
        for trimmed in self.trimmed.values() {
            account.merge(trimmed);
        }
        for entry in &self.entries {
            account.absorb(entry);
        }
        account
    }

    pub fn reconcile_due(&self, now: TimeMs) -> bool {
        match self.last_reconciled_at {
            None => true,
            Some(last) => now.reached(last, self.config.reconcile_interval_sec),
        }
    }

    /// Compare derived balances with `observed`. Reports only; never adjusts.
    pub fn reconcile(&mut self, observed: ObservedBalances, price: Decimal, now: TimeMs) -> DriftReport {
        let report = DriftReport::compute(
            self.quote_balance,
            self.base_balance,
            observed,
            price,
            now,
            &self.config.thresholds,
        );
        match report.status {
            DriftStatus::Ok => debug!(value_drift = %report.value_drift, "balances reconciled"),
            DriftStatus::Soft => warn!(
                quote_drift = %report.quote_drift,
                base_drift = %report.base_drift,
                value_drift = %report.value_drift,
                "soft balance drift"
            ),
            DriftStatus::Hard => error!(
                quote_drift = %report.quote_drift,
                base_drift = %report.base_drift,
                value_drift = %report.value_drift,
                "hard balance drift"
            ),
        }
        if self.needs_reconciliation {
            info!(status = report.status.as_str(), "first reconciliation after restore without ledger");
            self.needs_reconciliation = false;
        }
        self.last_reconciled_at = Some(now);
        report
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            last_id: self.last_id,
            opening_quote: self.opening_quote,
            opening_base: self.opening_base,
            quote_balance: self.quote_balance,
            base_balance: self.base_balance,
            recorded_keys: Vec::new(),
            trimmed_cycles: self
                .trimmed_cycles
                .iter()
                .map(|(&(slot_id, trade_id, entry_type), &cycle)| TrimmedCycle {
                    slot_id,
                    trade_id,
                    entry_type,
                    cycle,
                })
                .collect(),
            entries: self.entries.iter().cloned().collect(),
            watermarks: self
                .trimmed
                .iter()
                .map(|(slot_id, account)| SlotWatermark {
                    slot_id: *slot_id,
                    account: account.clone(),
                })
                .collect(),
            last_reconciled_at: self.last_reconciled_at,
        }
    }

    /// Rebuild from a snapshot; an absent ledger starts from zero balances and
    /// asks for a reconciliation instead of trusting configured openings.
    pub fn restore(snapshot: Option<LedgerSnapshot>, config: LedgerConfig) -> Self {
        let Some(snapshot) = snapshot else {
            warn!("snapshot carries no ledger; balances start at zero until reconciled");
            let mut ledger = Ledger::new(LedgerConfig {
                opening_quote: Decimal::zero(),
                opening_base: Decimal::zero(),
                ..config
            });
            ledger.needs_reconciliation = true;
            return ledger;
        };

        let recorded: BTreeSet<IdempotencyKey> =
            snapshot.entries.iter().map(LedgerEntry::key).collect();
        let last_id = snapshot
            .entries
            .iter()
            .map(|e| e.id)
            .max()
            .unwrap_or(0)
            .max(snapshot.last_id);

        let mut ledger = Ledger {
            config,
            last_id,
            opening_quote: snapshot.opening_quote,
            opening_base: snapshot.opening_base,
            quote_balance: snapshot.quote_balance,
            base_balance: snapshot.base_balance,
            recorded,
            trimmed_cycles: snapshot
                .trimmed_cycles
                .iter()
                .map(|t| ((t.slot_id, t.trade_id, t.entry_type), t.cycle))
                .collect(),
            entries: snapshot.entries.into_iter().collect(),
            trimmed: snapshot
                .watermarks
                .into_iter()
                .map(|w| (w.slot_id, w.account))
                .collect(),
            last_reconciled_at: snapshot.last_reconciled_at,
            needs_reconciliation: false,
        };
        for key in snapshot.recorded_keys {
            if !ledger.recorded.contains(&key) {
                ledger.remember_trimmed(key);
            }
        }
        ledger.trim();
        ledger
    }
}
