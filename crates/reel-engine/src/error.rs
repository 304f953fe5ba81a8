use crate::session::SessionError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Outcomes the phase state machine treats as a phase failure.
///
/// Lower layers return typed outcomes; only the workflow turns them into one
/// of these.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("Target `{target}` not found within {waited:?}")]
    TargetNotFound { target: String, waited: Duration },

    #[error("Interaction with `{target}` failed: {cause}")]
    InteractionFailed { target: String, cause: SessionError },

    #[error("Timed out after {after:?} waiting for {operation}")]
    TimedOut { operation: String, after: Duration },

    #[error("Session fault: {0}")]
    SessionFault(SessionError),

    #[error("Run cancelled")]
    Cancelled,

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl WorkflowError {
    pub fn kind(&self) -> FailureKind {
        match self {
            WorkflowError::TargetNotFound { .. } => FailureKind::TargetNotFound,
            WorkflowError::InteractionFailed { .. } => FailureKind::InteractionFailed,
            WorkflowError::TimedOut { .. } => FailureKind::TimedOut,
            WorkflowError::SessionFault(_) => FailureKind::SessionFault,
            WorkflowError::Cancelled => FailureKind::Cancelled,
            WorkflowError::InvalidInput(_) => FailureKind::InvalidInput,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    TargetNotFound,
    InteractionFailed,
    TimedOut,
    SessionFault,
    Cancelled,
    InvalidInput,
}

/// Serialisable form of a [`WorkflowError`] kept in the run record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub kind: FailureKind,
    pub message: String,
}

impl From<&WorkflowError> for FailureRecord {
    fn from(e: &WorkflowError) -> Self {
        Self {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}
