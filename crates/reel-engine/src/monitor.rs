//! Watching for a terminal artifact that is actually populated.
//!
//! An artifact element usually exists well before its content does, so the
//! monitor accepts an element only once its reference attribute holds a
//! well-formed URL with a recognised scheme.

use crate::poller::{PollBudget, PollOutcome, Poller, WaitOutcome};
use crate::resolution::{Candidate, SkippedStrategies, TargetResolver, TargetSpec};
use crate::session::{Session, SessionError};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};
use url::Url;

/// Which attribute carries the artifact's reference and which schemes count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceRule {
    #[serde(default = "default_reference_attribute")]
    pub attribute: String,
    #[serde(default = "default_schemes")]
    pub schemes: Vec<String>,
}

fn default_reference_attribute() -> String {
    "src".to_string()
}

fn default_schemes() -> Vec<String> {
    vec!["blob".into(), "http".into(), "https".into()]
}

impl Default for ReferenceRule {
    fn default() -> Self {
        Self {
            attribute: default_reference_attribute(),
            schemes: default_schemes(),
        }
    }
}

impl ReferenceRule {
    /// Object references (`blob:`) need a non-empty body; network references
    /// need a host.
    pub fn is_well_formed(&self, reference: &str) -> bool {
        let reference = reference.trim();
        if reference.is_empty() {
            return false;
        }
        let Ok(url) = Url::parse(reference) else {
            return false;
        };
        if !self
            .schemes
            .iter()
            .any(|s| s.eq_ignore_ascii_case(url.scheme()))
        {
            return false;
        }
        if url.cannot_be_a_base() {
            !url.path().trim().is_empty()
        } else {
            url.host_str().is_some_and(|h| !h.is_empty())
        }
    }
}

#[derive(Debug)]
pub struct Completion<E> {
    pub reference: String,
    /// 1-based strategy position that surfaced the artifact.
    pub strategy_index: usize,
    /// Follow-up control found right after acceptance, if it was already
    /// rendered.
    pub follow_up: Option<Candidate<E>>,
}

enum Scan {
    Accepted {
        reference: String,
        strategy_index: usize,
    },
    Pending {
        unpopulated: usize,
    },
}

pub struct CompletionMonitor<'a> {
    pub artifact: &'a TargetSpec,
    pub follow_up: &'a TargetSpec,
    pub rule: &'a ReferenceRule,
    /// Single short wait for the follow-up control after acceptance.
    pub probe: PollBudget,
    pub progress_every: Duration,
}

impl CompletionMonitor<'_> {
    pub async fn watch<S: Session>(
        &self,
        session: &S,
        poller: &Poller,
    ) -> WaitOutcome<Completion<S::Element>> {
        self.watch_noting(session, poller, &SkippedStrategies::new())
            .await
    }

    /// [`watch`](Self::watch), keeping artifact and follow-up strategies that
    /// failed structurally in `skipped`.
    pub async fn watch_noting<S: Session>(
        &self,
        session: &S,
        poller: &Poller,
        skipped: &SkippedStrategies,
    ) -> WaitOutcome<Completion<S::Element>> {
        let started = Instant::now();
        let every = self.progress_every.as_secs().max(1);
        let last_bucket = AtomicU64::new(0);

        let outcome = poller
            .wait_for(|| {
                let last_bucket = &last_bucket;
                async move {
                    match self.scan(session, skipped).await {
                        Ok(Scan::Accepted {
                            reference,
                            strategy_index,
                        }) => PollOutcome::Ready((reference, strategy_index)),
                        Ok(Scan::Pending { unpopulated }) => {
                            let bucket = started.elapsed().as_secs() / every;
                            if bucket > last_bucket.swap(bucket, Ordering::Relaxed) {
                                info!(
                                    "Still generating... {}s ({} artifact element(s) without a usable {})",
                                    started.elapsed().as_secs(),
                                    unpopulated,
                                    self.rule.attribute
                                );
                            }
                            PollOutcome::Pending
                        }
                        Err(e) => PollOutcome::Failed(e),
                    }
                }
            })
            .await;

        let (reference, strategy_index, elapsed) = match outcome {
            WaitOutcome::Ready {
                value: (reference, idx),
                elapsed,
            } => (reference, idx, elapsed),
            WaitOutcome::TimedOut { elapsed } => return WaitOutcome::TimedOut { elapsed },
            WaitOutcome::Failed { cause, elapsed } => {
                return WaitOutcome::Failed { cause, elapsed };
            }
            WaitOutcome::Cancelled { elapsed } => return WaitOutcome::Cancelled { elapsed },
        };
        info!("Artifact ready after {:?}: {}", elapsed, truncate(&reference, 60));

        let probe = poller.with_budget(self.probe);
        let probed = TargetResolver::wait_noting(session, self.follow_up, &probe, skipped).await;
        let follow_up = match probed {
            WaitOutcome::Ready { value, .. } => Some(value),
            WaitOutcome::TimedOut { .. } => {
                debug!("Follow-up control `{}` not rendered yet", self.follow_up.name);
                None
            }
            WaitOutcome::Failed { cause, .. } => {
                return WaitOutcome::Failed {
                    cause,
                    elapsed: started.elapsed(),
                };
            }
            WaitOutcome::Cancelled { .. } => {
                return WaitOutcome::Cancelled {
                    elapsed: started.elapsed(),
                };
            }
        };

        WaitOutcome::Ready {
            value: Completion {
                reference,
                strategy_index,
                follow_up,
            },
            elapsed,
        }
    }

    async fn scan<S: Session>(
        &self,
        session: &S,
        skipped: &SkippedStrategies,
    ) -> Result<Scan, SessionError> {
        let mut unpopulated = 0;
        for (idx, strategy) in self.artifact.strategies.iter().enumerate() {
            let elements = match TargetResolver::strategy_matches(session, strategy, None).await? {
                Ok(elements) => elements,
                Err(cause) => {
                    skipped.note(&self.artifact.name, idx + 1, cause);
                    continue;
                }
            };
            for element in elements {
                if self.artifact.require_visible
                    && !TargetResolver::visible(session, &element).await?
                {
                    continue;
                }
                let reference = match session.attribute(&element, &self.rule.attribute).await {
                    Ok(value) => value.unwrap_or_default(),
                    Err(e) if e.is_fault() => return Err(e),
                    Err(_) => continue,
                };
                if self.rule.is_well_formed(&reference) {
                    return Ok(Scan::Accepted {
                        reference,
                        strategy_index: idx + 1,
                    });
                }
                unpopulated += 1;
            }
        }
        Ok(Scan::Pending { unpopulated })
    }
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max).collect();
        format!("{}...", head)
    }
}
