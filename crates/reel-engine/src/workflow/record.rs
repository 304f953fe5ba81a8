//! The per-run trace.
//!
//! Phases append to a [`RunRecorder`]; the finished [`RunRecord`] is built
//! once at the end of the run and is never modified afterwards.

use super::phase::Phase;
use crate::config::{BudgetKey, WorkflowConfig};
use crate::error::{FailureRecord, WorkflowError};
use crate::interaction::{FailedAttempt, InteractionMethod};
use crate::resolution::Candidate;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    /// Artifact produced but the download control never appeared.
    Shortfall,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Completed => "completed",
            RunStatus::Shortfall => "shortfall",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitStatus {
    Ready,
    TimedOut,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitRecord {
    pub key: BudgetKey,
    pub target: Option<String>,
    pub status: WaitStatus,
    pub elapsed_ms: u64,
    pub budget_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy_index: Option<usize>,
}

/// What resolution learned about one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredTarget {
    pub strategy_index: usize,
    pub strategy: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

impl<E> From<&Candidate<E>> for DiscoveredTarget {
    fn from(c: &Candidate<E>) -> Self {
        Self {
            strategy_index: c.strategy_index,
            strategy: c.strategy.clone(),
            text: c.text.clone().filter(|t| !t.is_empty()),
            attributes: c.attributes.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseResult {
    /// State this phase was trying to reach.
    pub phase: Phase,
    pub success: bool,
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<InteractionMethod>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub diagnostics: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_attempts: Vec<FailedAttempt>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub soft_timeouts: Vec<BudgetKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub url: String,
    pub asset_path: PathBuf,
    pub instruction: String,
    pub status: RunStatus,
    pub success: bool,
    pub final_state: Phase,
    pub phases: Vec<PhaseResult>,
    pub waits: Vec<WaitRecord>,
    pub identifiers: BTreeMap<String, DiscoveredTarget>,
    pub artifact_found: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_reference: Option<String>,
    pub follow_up_succeeded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downloaded_file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub teardown_error: Option<String>,
    pub hints_applied: bool,
}

impl RunRecord {
    pub fn phase(&self, phase: Phase) -> Option<&PhaseResult> {
        self.phases.iter().find(|p| p.phase == phase)
    }

    /// Most recent wait recorded under `key`.
    pub fn wait(&self, key: BudgetKey) -> Option<&WaitRecord> {
        self.waits.iter().rev().find(|w| w.key == key)
    }

    pub fn elapsed(&self) -> Duration {
        (self.finished_at - self.started_at)
            .to_std()
            .unwrap_or_default()
    }
}

/// Mutable scratch space for the phase currently executing.
#[derive(Debug)]
pub struct PhaseTrace {
    phase: Phase,
    started: Instant,
    method: Option<InteractionMethod>,
    diagnostics: BTreeMap<String, String>,
    failed_attempts: Vec<FailedAttempt>,
    soft_timeouts: Vec<BudgetKey>,
}

impl PhaseTrace {
    pub fn new(phase: Phase) -> Self {
        Self {
            phase,
            started: Instant::now(),
            method: None,
            diagnostics: BTreeMap::new(),
            failed_attempts: Vec::new(),
            soft_timeouts: Vec::new(),
        }
    }

    pub fn diagnostic(&mut self, key: impl Into<String>, value: impl ToString) {
        self.diagnostics.insert(key.into(), value.to_string());
    }

    pub fn method(&mut self, method: Option<InteractionMethod>) {
        if method.is_some() {
            self.method = method;
        }
    }

    pub fn attempts(&mut self, attempts: Vec<FailedAttempt>) {
        self.failed_attempts.extend(attempts);
    }

    pub fn soft_timeout(&mut self, key: BudgetKey) {
        self.soft_timeouts.push(key);
    }

    fn finish(self, failure: Option<&WorkflowError>) -> PhaseResult {
        PhaseResult {
            phase: self.phase,
            success: failure.is_none(),
            elapsed_ms: millis(self.started.elapsed()),
            method: self.method,
            diagnostics: self.diagnostics,
            failed_attempts: self.failed_attempts,
            soft_timeouts: self.soft_timeouts,
            failure: failure.map(FailureRecord::from),
        }
    }
}

pub struct RunRecorder {
    run_id: String,
    started_at: DateTime<Utc>,
    url: String,
    asset_path: PathBuf,
    instruction: String,
    hints_applied: bool,
    state: Phase,
    phases: Vec<PhaseResult>,
    waits: Vec<WaitRecord>,
    identifiers: BTreeMap<String, DiscoveredTarget>,
    artifact_reference: Option<String>,
    follow_up_succeeded: bool,
    downloaded_file: Option<PathBuf>,
}

impl RunRecorder {
    pub fn new(config: &WorkflowConfig) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            url: config.url.clone(),
            asset_path: config.asset_path.clone(),
            instruction: config.instruction.clone(),
            hints_applied: config.hints.as_ref().is_some_and(|h| h.runs_observed > 0),
            state: Phase::Init,
            phases: Vec::new(),
            waits: Vec::new(),
            identifiers: BTreeMap::new(),
            artifact_reference: None,
            follow_up_succeeded: false,
            downloaded_file: None,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn state(&self) -> Phase {
        self.state
    }

    pub fn advance(&mut self, trace: PhaseTrace) {
        self.state = trace.phase;
        self.phases.push(trace.finish(None));
    }

    /// Record a phase that ended the run without reaching its state.
    pub fn stop(&mut self, trace: PhaseTrace, failure: Option<&WorkflowError>) {
        let mut result = trace.finish(failure);
        result.success = false;
        self.phases.push(result);
    }

    pub fn wait(&mut self, record: WaitRecord) {
        self.waits.push(record);
    }

    pub fn discovered<E>(&mut self, target: &str, candidate: &Candidate<E>) {
        self.identifiers
            .insert(target.to_string(), DiscoveredTarget::from(candidate));
    }

    pub fn artifact(&mut self, reference: String) {
        self.artifact_reference = Some(reference);
    }

    pub fn follow_up_succeeded(&mut self) {
        self.follow_up_succeeded = true;
    }

    pub fn downloaded_file(&mut self, path: PathBuf) {
        self.downloaded_file = Some(path);
    }

    pub fn finish(
        self,
        status: RunStatus,
        failure: Option<FailureRecord>,
        teardown_error: Option<String>,
    ) -> RunRecord {
        RunRecord {
            run_id: self.run_id,
            started_at: self.started_at,
            finished_at: Utc::now(),
            url: self.url,
            asset_path: self.asset_path,
            instruction: self.instruction,
            status,
            success: status == RunStatus::Completed,
            final_state: self.state,
            phases: self.phases,
            waits: self.waits,
            identifiers: self.identifiers,
            artifact_found: self.artifact_reference.is_some(),
            artifact_reference: self.artifact_reference,
            follow_up_succeeded: self.follow_up_succeeded,
            downloaded_file: self.downloaded_file,
            failure,
            teardown_error,
            hints_applied: self.hints_applied,
        }
    }
}

pub(crate) fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_only_for_completed() {
        let config = WorkflowConfig::default();
        for (status, expected) in [
            (RunStatus::Completed, true),
            (RunStatus::Shortfall, false),
            (RunStatus::Failed, false),
            (RunStatus::Cancelled, false),
        ] {
            let record = RunRecorder::new(&config).finish(status, None, None);
            assert_eq!(record.success, expected, "{:?}", status);
        }
    }

    #[tokio::test]
    async fn test_recorder_tracks_state_and_failures() {
        let config = WorkflowConfig::default();
        let mut recorder = RunRecorder::new(&config);
        recorder.advance(PhaseTrace::new(Phase::SessionReady));

        let mut trace = PhaseTrace::new(Phase::Navigated);
        trace.diagnostic("url", "https://app.example");
        let err = WorkflowError::InvalidInput("bad".into());
        recorder.stop(trace, Some(&err));

        let record = recorder.finish(RunStatus::Failed, Some(FailureRecord::from(&err)), None);
        assert_eq!(record.final_state, Phase::SessionReady);
        assert_eq!(record.phases.len(), 2);
        let failed = record.phase(Phase::Navigated).unwrap();
        assert!(!failed.success);
        assert_eq!(failed.diagnostics["url"], "https://app.example");
        assert!(!record.artifact_found);
    }

    #[test]
    fn test_record_json_shape() {
        let record = RunRecorder::new(&WorkflowConfig::default()).finish(
            RunStatus::Shortfall,
            None,
            None,
        );
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["status"], "shortfall");
        assert_eq!(value["final_state"], "init");
        assert!(value.get("failure").is_none());
        let back: RunRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back, record);
    }
}
