//! Pure, deterministic order-lifecycle reducer for one grid slot.
//!
//! Nothing in this module performs I/O or logs; the orchestrator owns both.

pub mod config;
pub mod invariants;
pub mod legs;
pub mod pricing;
pub mod protocol;
pub mod reducer;
pub mod state;

pub use config::EngineConfig;
pub use invariants::{check_invariants, check_invariants_with, Violation};
pub use legs::{DistanceFromMarket, LegSelector};
pub use protocol::{Action, Anomaly, Effect, EffectKind, Event};
pub use reducer::{
    bootstrap, set_directional_mode, set_sticky, transition, transition_with, DirectionalMode,
    Transition,
};
pub use state::{derive_phase, LegState, Phase, RefreshDirection, SlotState};
