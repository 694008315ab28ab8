pub mod lease;
pub mod orchestrator;
pub mod schedule;

pub use lease::{CycleLease, LeaseGuard};
pub use orchestrator::{
    CommittedAnalysis, CycleReport, CycleSummary, Orchestrator, OrchestratorOptions, TickerOutcome, TickerPipeline,
};
pub use schedule::{run_scheduled, spawn_trigger_timer, Trigger};
