use serde::{Deserialize, Serialize};
use std::fmt;

/// Workflow states. Runs only ever move forward by one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Init,
    SessionReady,
    Navigated,
    Uploaded,
    EditorEntered,
    GenerationTriggered,
    PromptSubmitted,
    GenerationComplete,
    Downloaded,
    Finished,
}

impl Phase {
    pub const ORDER: [Phase; 10] = [
        Phase::Init,
        Phase::SessionReady,
        Phase::Navigated,
        Phase::Uploaded,
        Phase::EditorEntered,
        Phase::GenerationTriggered,
        Phase::PromptSubmitted,
        Phase::GenerationComplete,
        Phase::Downloaded,
        Phase::Finished,
    ];

    pub fn next(self) -> Option<Phase> {
        let idx = Self::ORDER.iter().position(|p| *p == self)?;
        Self::ORDER.get(idx + 1).copied()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Init => "init",
            Phase::SessionReady => "session_ready",
            Phase::Navigated => "navigated",
            Phase::Uploaded => "uploaded",
            Phase::EditorEntered => "editor_entered",
            Phase::GenerationTriggered => "generation_triggered",
            Phase::PromptSubmitted => "prompt_submitted",
            Phase::GenerationComplete => "generation_complete",
            Phase::Downloaded => "downloaded",
            Phase::Finished => "finished",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
