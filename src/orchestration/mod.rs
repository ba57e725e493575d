pub mod orchestrator;
pub mod replay;

pub use orchestrator::{
    AnomalyCounters, Broadcast, InvariantChecks, OrchestrationError, SlotOrchestrator, StepOutcome,
};
pub use replay::{ReplayLine, ReplaySummary, Replayer};
