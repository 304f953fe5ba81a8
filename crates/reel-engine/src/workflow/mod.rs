mod downloads;
pub mod machine;
pub mod phase;
pub mod record;

pub use machine::{RunOutcome, run_workflow};
pub use phase::Phase;
pub use record::{
    DiscoveredTarget, PhaseResult, PhaseTrace, RunRecord, RunRecorder, RunStatus, WaitRecord,
    WaitStatus,
};
