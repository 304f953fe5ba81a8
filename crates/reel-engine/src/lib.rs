pub mod config;
pub mod error;
pub mod formatter;
pub mod interaction;
pub mod learner;
pub mod monitor;
pub mod poller;
pub mod resolution;
pub mod session;
pub mod workflow;

pub use error::{FailureKind, FailureRecord, WorkflowError};
pub use session::{NavigationResult, Query, Session, SessionError};
pub use workflow::{RunOutcome, RunRecord, RunStatus, run_workflow};
