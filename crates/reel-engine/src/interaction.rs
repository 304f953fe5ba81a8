//! Acting on resolved targets through an ordered chain of techniques.

use crate::resolution::Candidate;
use crate::session::{Session, SessionError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionMethod {
    /// Pointer moved onto the element, then pressed and released.
    Simulated,
    /// The driver's element click.
    Native,
    /// `element.click()` from page script.
    Scripted,
}

impl InteractionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            InteractionMethod::Simulated => "simulated",
            InteractionMethod::Native => "native",
            InteractionMethod::Scripted => "scripted",
        }
    }
}

impl fmt::Display for InteractionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Click,
    FillAndSubmit(String),
}

/// One technique or sub-step that raised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedAttempt {
    pub step: String,
    pub cause: String,
}

#[derive(Debug)]
pub struct ActionOutcome {
    pub success: bool,
    pub method_used: Option<InteractionMethod>,
    /// Last error seen when `success` is false.
    pub error: Option<SessionError>,
    pub failed_attempts: Vec<FailedAttempt>,
}

impl ActionOutcome {
    fn succeeded(method: InteractionMethod, failed_attempts: Vec<FailedAttempt>) -> Self {
        Self {
            success: true,
            method_used: Some(method),
            error: None,
            failed_attempts,
        }
    }

    fn failed(error: SessionError, failed_attempts: Vec<FailedAttempt>) -> Self {
        Self {
            success: false,
            method_used: None,
            error: Some(error),
            failed_attempts,
        }
    }

    /// The session itself became unusable during the action.
    pub fn is_fault(&self) -> bool {
        self.error.as_ref().is_some_and(SessionError::is_fault)
    }
}

pub struct InteractionExecutor {
    click_chain: Vec<InteractionMethod>,
    settle: Duration,
}

impl InteractionExecutor {
    pub const DEFAULT_CHAIN: [InteractionMethod; 3] = [
        InteractionMethod::Simulated,
        InteractionMethod::Native,
        InteractionMethod::Scripted,
    ];

    pub fn new(click_chain: Vec<InteractionMethod>, settle: Duration) -> Self {
        Self {
            click_chain,
            settle,
        }
    }

    /// Scroll the element into view, let it settle, then perform `action`.
    ///
    /// Clicks walk the configured chain and stop at the first method that
    /// does not raise. Fill-and-submit runs focus, clear, insert and confirm
    /// in order and reports the first sub-step that fails.
    pub async fn act<S: Session>(
        &self,
        session: &S,
        candidate: Candidate<S::Element>,
        action: &Action,
    ) -> ActionOutcome {
        let element = candidate.element;
        let mut failed = Vec::new();

        match session.scroll_into_view(&element).await {
            Ok(()) => {}
            Err(e) if e.is_fault() => return ActionOutcome::failed(e, failed),
            Err(e) => {
                debug!("scroll into view failed: {}", e);
                failed.push(FailedAttempt {
                    step: "scroll".into(),
                    cause: e.to_string(),
                });
            }
        }
        tokio::time::sleep(self.settle).await;

        match action {
            Action::Click => self.click(session, &element, failed).await,
            Action::FillAndSubmit(text) => Self::fill_and_submit(session, &element, text, failed).await,
        }
    }

    async fn click<S: Session>(
        &self,
        session: &S,
        element: &S::Element,
        mut failed: Vec<FailedAttempt>,
    ) -> ActionOutcome {
        let mut last_error = SessionError::Other("click chain is empty".into());

        for method in &self.click_chain {
            let result = match method {
                InteractionMethod::Simulated => session.pointer_click(element).await,
                InteractionMethod::Native => session.native_click(element).await,
                InteractionMethod::Scripted => session.script_click(element).await,
            };

            match result {
                Ok(()) => {
                    debug!("Clicked via {} after {} failed attempt(s)", method, failed.len());
                    return ActionOutcome::succeeded(*method, failed);
                }
                Err(e) => {
                    warn!("{} click failed: {}", method, e);
                    failed.push(FailedAttempt {
                        step: method.as_str().into(),
                        cause: e.to_string(),
                    });
                    let fault = e.is_fault();
                    last_error = e;
                    if fault {
                        break;
                    }
                }
            }
        }

        ActionOutcome::failed(last_error, failed)
    }

    async fn fill_and_submit<S: Session>(
        session: &S,
        element: &S::Element,
        text: &str,
        failed: Vec<FailedAttempt>,
    ) -> ActionOutcome {
        if let Err(e) = session.native_click(element).await {
            return Self::abort_fill("focus", e, failed);
        }
        if let Err(e) = session.clear(element).await {
            return Self::abort_fill("clear", e, failed);
        }
        if let Err(e) = session.insert_text(element, text).await {
            return Self::abort_fill("insert", e, failed);
        }
        if let Err(e) = session.confirm(element).await {
            return Self::abort_fill("confirm", e, failed);
        }

        ActionOutcome::succeeded(InteractionMethod::Native, failed)
    }

    fn abort_fill(
        step: &str,
        error: SessionError,
        mut failed: Vec<FailedAttempt>,
    ) -> ActionOutcome {
        warn!("fill step `{}` failed: {}", step, error);
        failed.push(FailedAttempt {
            step: step.into(),
            cause: error.to_string(),
        });
        ActionOutcome::failed(error, failed)
    }
}
