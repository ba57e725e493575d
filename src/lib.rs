pub mod config;
pub mod db;
pub mod domain;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod orchestration;
pub mod snapshot;

pub use config::Config;
pub use db::{init_db, Repository};
pub use domain::{
    CycleRecord, Decimal, LocalOrderId, ModeSource, OrderRecord, RecoveryId, RecoveryOrder, Role,
    Side, SlotId, TimeMs, TradeId,
};
pub use engine::{
    bootstrap, check_invariants, derive_phase, transition, Action, EngineConfig, Event, Phase,
    SlotState, Transition,
};
pub use error::AppError;
pub use ledger::{Ledger, LedgerConfig, LedgerEntry};
pub use orchestration::{Replayer, SlotOrchestrator};
pub use snapshot::{Snapshot, SnapshotError};
