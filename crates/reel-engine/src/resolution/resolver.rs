use super::strategy::{IdentificationStrategy, StrategyError};
use crate::interaction::FailedAttempt;
use crate::poller::{PollOutcome, Poller, WaitOutcome};
use crate::session::{Session, SessionError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use tracing::debug;

/// Ordered identification strategies for one UI role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetSpec {
    pub name: String,
    pub strategies: Vec<IdentificationStrategy>,
    /// Hidden elements (e.g. file inputs) need this off.
    #[serde(default = "default_require_visible")]
    pub require_visible: bool,
    /// Attribute names copied onto the resolved candidate.
    #[serde(default)]
    pub extract: Vec<String>,
}

fn default_require_visible() -> bool {
    true
}

impl TargetSpec {
    pub fn new(name: impl Into<String>, strategies: Vec<IdentificationStrategy>) -> Self {
        Self {
            name: name.into(),
            strategies,
            require_visible: true,
            extract: Vec::new(),
        }
    }

    pub fn allow_hidden(mut self) -> Self {
        self.require_visible = false;
        self
    }

    pub fn extracting<I, T>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.extract = attributes.into_iter().map(Into::into).collect();
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.strategies.is_empty() {
            return Err(format!("target `{}` has no strategies", self.name));
        }
        for s in &self.strategies {
            s.validate()
                .map_err(|e| format!("target `{}`: {}", self.name, e))?;
        }
        Ok(())
    }
}

/// A live element found by one resolution call.
///
/// Not `Clone`; acting on a candidate consumes it.
#[derive(Debug)]
pub struct Candidate<E> {
    pub element: E,
    /// 1-based position of the winning strategy in the spec.
    pub strategy_index: usize,
    pub strategy: String,
    pub text: Option<String>,
    pub attributes: BTreeMap<String, String>,
}

impl<E> Candidate<E> {
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Text if present, else the first non-empty extracted attribute.
    pub fn label(&self) -> Option<&str> {
        self.text
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .or_else(|| {
                self.attributes
                    .values()
                    .map(String::as_str)
                    .find(|v| !v.trim().is_empty())
            })
    }
}

/// Strategies that failed structurally and were passed over, one entry per
/// target and strategy position. The latest cause wins, so a strategy that
/// fails on every poll is kept once.
#[derive(Debug, Default)]
pub struct SkippedStrategies {
    entries: Mutex<BTreeMap<(String, usize), String>>,
}

impl SkippedStrategies {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn note(&self, target: &str, strategy_index: usize, cause: String) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((target.to_string(), strategy_index), cause);
    }

    /// Drain into attempts named `<target>/strategy#<n>`.
    pub fn take(&self) -> Vec<FailedAttempt> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *entries)
            .into_iter()
            .map(|((target, index), cause)| FailedAttempt {
                step: format!("{}/strategy#{}", target, index),
                cause,
            })
            .collect()
    }
}

/// Resolves a [`TargetSpec`] against the current DOM snapshot.
pub struct TargetResolver;

impl TargetResolver {
    /// First visible match of the first strategy that yields one.
    ///
    /// Strategies are a priority list: a later strategy is only consulted when
    /// every earlier one produced nothing visible. Structural failures inside
    /// a strategy count as "no match"; only session faults abort.
    pub async fn resolve<S: Session>(
        session: &S,
        spec: &TargetSpec,
        scope: Option<&S::Element>,
    ) -> Result<Option<Candidate<S::Element>>, SessionError> {
        Self::resolve_noting(session, spec, scope, &SkippedStrategies::new()).await
    }

    /// [`resolve`](Self::resolve), keeping every passed-over strategy in
    /// `skipped`.
    pub async fn resolve_noting<S: Session>(
        session: &S,
        spec: &TargetSpec,
        scope: Option<&S::Element>,
        skipped: &SkippedStrategies,
    ) -> Result<Option<Candidate<S::Element>>, SessionError> {
        for (idx, strategy) in spec.strategies.iter().enumerate() {
            let matches = Self::strategy_matches(session, strategy, scope).await?;
            let elements = match matches {
                Ok(elements) => elements,
                Err(cause) => {
                    skipped.note(&spec.name, idx + 1, cause);
                    continue;
                }
            };

            for element in elements {
                if spec.require_visible && !Self::visible(session, &element).await? {
                    continue;
                }
                debug!(
                    target_name = %spec.name,
                    strategy = idx + 1,
                    "Resolved via {}",
                    strategy.label()
                );
                let candidate = Self::candidate(session, spec, element, idx, strategy).await?;
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }

    /// Pair [`resolve`](Self::resolve) with the poller.
    pub async fn wait_for<S: Session>(
        session: &S,
        spec: &TargetSpec,
        poller: &Poller,
    ) -> WaitOutcome<Candidate<S::Element>> {
        Self::wait_noting(session, spec, poller, &SkippedStrategies::new()).await
    }

    pub async fn wait_noting<S: Session>(
        session: &S,
        spec: &TargetSpec,
        poller: &Poller,
        skipped: &SkippedStrategies,
    ) -> WaitOutcome<Candidate<S::Element>> {
        poller
            .wait_for(move || async move {
                match Self::resolve_noting(session, spec, None, skipped).await {
                    Ok(Some(candidate)) => PollOutcome::Ready(candidate),
                    Ok(None) => PollOutcome::Pending,
                    Err(e) => PollOutcome::Failed(e),
                }
            })
            .await
    }

    /// Elements a single strategy yields, or the cause when it failed
    /// structurally. Session faults propagate.
    pub(crate) async fn strategy_matches<S: Session>(
        session: &S,
        strategy: &IdentificationStrategy,
        scope: Option<&S::Element>,
    ) -> Result<Result<Vec<S::Element>, String>, SessionError> {
        match strategy.collect(session, scope).await {
            Ok(elements) => Ok(Ok(elements)),
            Err(StrategyError::Session(e)) if e.is_fault() => Err(e),
            Err(e) => {
                debug!("Strategy {} skipped: {}", strategy.label(), e);
                Ok(Err(e.to_string()))
            }
        }
    }

    /// Stale handles are simply not visible.
    pub(crate) async fn visible<S: Session>(
        session: &S,
        element: &S::Element,
    ) -> Result<bool, SessionError> {
        match session.is_visible(element).await {
            Ok(v) => Ok(v),
            Err(e) if e.is_fault() => Err(e),
            Err(_) => Ok(false),
        }
    }

    async fn candidate<S: Session>(
        session: &S,
        spec: &TargetSpec,
        element: S::Element,
        idx: usize,
        strategy: &IdentificationStrategy,
    ) -> Result<Candidate<S::Element>, SessionError> {
        let text = match session.text(&element).await {
            Ok(t) => Some(t.trim().to_string()),
            Err(e) if e.is_fault() => return Err(e),
            Err(_) => None,
        };

        let mut attributes = BTreeMap::new();
        for name in &spec.extract {
            match session.attribute(&element, name).await {
                Ok(Some(value)) => {
                    attributes.insert(name.clone(), value);
                }
                Ok(None) => {}
                Err(e) if e.is_fault() => return Err(e),
                Err(_) => {}
            }
        }

        Ok(Candidate {
            element,
            strategy_index: idx + 1,
            strategy: strategy.label(),
            text,
            attributes,
        })
    }
}
