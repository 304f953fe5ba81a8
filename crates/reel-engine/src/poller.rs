//! Condition polling.
//!
//! Every wait in the workflow is expressed as a predicate re-evaluated on a
//! fixed interval until it reports `Ready`, fails, the budget runs out or the
//! run is cancelled. There is no implicit timeout: each call site supplies its
//! own [`PollBudget`].

use crate::session::SessionError;
use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

/// Floor applied to the interval so a zero value cannot spin.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Result of a single predicate evaluation.
#[derive(Debug)]
pub enum PollOutcome<T> {
    Ready(T),
    Pending,
    /// Non-retryable failure; stops the wait immediately.
    Failed(SessionError),
}

/// Result of a whole wait.
#[derive(Debug)]
pub enum WaitOutcome<T> {
    Ready { value: T, elapsed: Duration },
    TimedOut { elapsed: Duration },
    Failed { cause: SessionError, elapsed: Duration },
    Cancelled { elapsed: Duration },
}

impl<T> WaitOutcome<T> {
    pub fn elapsed(&self) -> Duration {
        match self {
            WaitOutcome::Ready { elapsed, .. }
            | WaitOutcome::TimedOut { elapsed }
            | WaitOutcome::Failed { elapsed, .. }
            | WaitOutcome::Cancelled { elapsed } => *elapsed,
        }
    }

    pub fn is_timed_out(&self) -> bool {
        matches!(self, WaitOutcome::TimedOut { .. })
    }

    pub fn ready(self) -> Option<T> {
        match self {
            WaitOutcome::Ready { value, .. } => Some(value),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollBudget {
    pub timeout: Duration,
    pub interval: Duration,
}

impl PollBudget {
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        Self { timeout, interval }
    }

    pub fn from_millis(timeout_ms: u64, interval_ms: u64) -> Self {
        Self::new(
            Duration::from_millis(timeout_ms),
            Duration::from_millis(interval_ms),
        )
    }
}

#[derive(Debug, Clone)]
pub struct Poller {
    budget: PollBudget,
    cancel: Option<CancellationToken>,
}

impl Poller {
    pub fn new(budget: PollBudget) -> Self {
        Self {
            budget,
            cancel: None,
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Same cancellation, different budget.
    pub fn with_budget(&self, budget: PollBudget) -> Poller {
        Poller {
            budget,
            cancel: self.cancel.clone(),
        }
    }

    pub fn budget(&self) -> PollBudget {
        self.budget
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|t| t.is_cancelled())
    }

    /// Evaluate `predicate` immediately and then once per interval.
    ///
    /// Checks are never closer together than the interval. When the next
    /// check would fall after the deadline it is skipped: the wait sleeps
    /// out the rest of the budget and times out.
    pub async fn wait_for<T, F, Fut>(&self, mut predicate: F) -> WaitOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = PollOutcome<T>>,
    {
        let interval = self.budget.interval.max(MIN_INTERVAL);
        let start = Instant::now();
        let deadline = start + self.budget.timeout;

        loop {
            if self.is_cancelled() {
                return WaitOutcome::Cancelled {
                    elapsed: start.elapsed(),
                };
            }

            let polled_at = Instant::now();
            match predicate().await {
                PollOutcome::Ready(value) => {
                    return WaitOutcome::Ready {
                        value,
                        elapsed: start.elapsed(),
                    };
                }
                PollOutcome::Failed(cause) => {
                    return WaitOutcome::Failed {
                        cause,
                        elapsed: start.elapsed(),
                    };
                }
                PollOutcome::Pending => {}
            }

            let now = Instant::now();
            if now >= deadline {
                return WaitOutcome::TimedOut {
                    elapsed: now - start,
                };
            }

            let next = polled_at + interval;
            if !self.pause_until(next.min(deadline)).await {
                return WaitOutcome::Cancelled {
                    elapsed: start.elapsed(),
                };
            }
            if next > deadline {
                return WaitOutcome::TimedOut {
                    elapsed: start.elapsed(),
                };
            }
        }
    }

    /// Sleep until `at`; false when cancelled first.
    async fn pause_until(&self, at: Instant) -> bool {
        match &self.cancel {
            Some(token) => {
                tokio::select! {
                    _ = token.cancelled() => false,
                    _ = sleep_until(at) => true,
                }
            }
            None => {
                sleep_until(at).await;
                true
            }
        }
    }
}
