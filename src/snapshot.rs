//! Persisted form of the orchestrator: every slot state plus the ledger.
//!
//! Restores are backward compatible: missing fields take documented defaults
//! and a stored `total_profit` is checked against the derived value, never
//! adopted.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::domain::{Decimal, TimeMs};
use crate::engine::SlotState;
use crate::ledger::LedgerSnapshot;

pub const SNAPSHOT_VERSION: u32 = 2;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("snapshot version {0} is newer than supported version {SNAPSHOT_VERSION}")]
    UnsupportedVersion(u32),
}

/// One slot as written to disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotSnapshot {
    #[serde(flatten)]
    pub state: SlotState,
    /// Derived total at save time; informational only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_profit: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub taken_at: TimeMs,
    #[serde(default)]
    pub slots: Vec<SlotSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ledger: Option<LedgerSnapshot>,
}

impl Snapshot {
    pub fn to_json(&self) -> Result<String, SnapshotError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, SnapshotError> {
        let snapshot: Snapshot = serde_json::from_str(json)?;
        if snapshot.version > SNAPSHOT_VERSION {
            return Err(SnapshotError::UnsupportedVersion(snapshot.version));
        }
        Ok(snapshot)
    }
}

pub fn to_snapshot(state: &SlotState) -> SlotSnapshot {
    SlotSnapshot {
        state: state.clone(),
        total_profit: Some(state.total_profit()),
    }
}

/// Rebuild a slot state; `from_snapshot(to_snapshot(s)) == s` for every
/// reachable state.
pub fn from_snapshot(snapshot: SlotSnapshot) -> SlotState {
    let SlotSnapshot {
        mut state,
        total_profit,
    } = snapshot;
    state.normalize_counters();

    if let Some(stored) = total_profit {
        let derived = state.total_profit();
        if stored != derived {
            warn!(
                slot = %state.slot_id,
                stored = %stored,
                derived = %derived,
                "stored total_profit disagrees with cycle history; using derived value"
            );
        }
    }
    state
}
