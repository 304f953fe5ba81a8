use crate::config::BudgetKey;
use crate::workflow::{DiscoveredTarget, RunRecord, WaitStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Aggregate of earlier runs, used to widen wait budgets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LearningHints {
    #[serde(default)]
    pub runs_observed: u64,
    /// Longest successful wait seen per budget.
    #[serde(default)]
    pub observed_ms: BTreeMap<BudgetKey, u64>,
    /// Last identifiers each target resolved with.
    #[serde(default)]
    pub identifiers: BTreeMap<String, DiscoveredTarget>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl LearningHints {
    pub fn observed(&self, key: BudgetKey) -> Option<Duration> {
        self.observed_ms
            .get(&key)
            .map(|ms| Duration::from_millis(*ms))
    }

    /// Fold one finished run in. Only waits that reached `Ready` say anything
    /// about how long the page really takes.
    pub fn merge(&mut self, record: &RunRecord) {
        self.runs_observed += 1;
        for wait in record
            .waits
            .iter()
            .filter(|w| w.status == WaitStatus::Ready)
        {
            let entry = self.observed_ms.entry(wait.key).or_insert(0);
            *entry = (*entry).max(wait.elapsed_ms);
        }
        for (target, found) in &record.identifiers {
            self.identifiers.insert(target.clone(), found.clone());
        }
        self.updated_at = Some(record.finished_at);
    }
}
