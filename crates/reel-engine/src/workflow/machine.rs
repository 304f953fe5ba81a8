use super::downloads;
use super::phase::Phase;
use super::record::{
    PhaseTrace, RunRecord, RunRecorder, RunStatus, WaitRecord, WaitStatus, millis,
};
use crate::config::{BudgetKey, OnTimeout, WorkflowConfig};
use crate::error::{FailureRecord, WorkflowError};
use crate::interaction::{Action, ActionOutcome, InteractionExecutor};
use crate::learner::{LearningStore, StoreError};
use crate::monitor::CompletionMonitor;
use crate::poller::{PollOutcome, Poller, WaitOutcome};
use crate::resolution::{Candidate, SkippedStrategies, TargetResolver, TargetSpec};
use crate::session::{Session, SessionError};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How often the download control may go stale under the click before the
/// phase gives up.
const STALE_CONTROL_ATTEMPTS: usize = 3;

/// Everything a finished run produced.
#[derive(Debug)]
pub struct RunOutcome {
    pub record: RunRecord,
    pub persisted_to: Option<PathBuf>,
    /// The run itself is unaffected when persisting fails.
    pub persist_error: Option<StoreError>,
}

/// Drive one workflow from `Init` as far as it goes.
///
/// The session is owned for the whole run and closed on every exit path.
/// The record is persisted once, after teardown, whatever the outcome.
pub async fn run_workflow<S, L>(
    mut session: S,
    store: &L,
    config: &WorkflowConfig,
    cancel: CancellationToken,
) -> RunOutcome
where
    S: Session,
    L: LearningStore + ?Sized,
{
    let mut recorder = RunRecorder::new(config);
    info!(run_id = %recorder.run_id(), "Starting run against {}", config.url);

    let result = match config.validate_inputs() {
        Ok(()) => {
            Workflow::new(&mut session, config, cancel, &mut recorder)
                .run()
                .await
        }
        Err(reason) => Err(WorkflowError::InvalidInput(reason)),
    };

    let teardown_error = match session.close().await {
        Ok(()) => None,
        Err(e) => {
            warn!("Session teardown failed: {}", e);
            Some(e.to_string())
        }
    };

    let (status, failure) = match &result {
        Ok(status) => (*status, None),
        Err(e @ WorkflowError::Cancelled) => (RunStatus::Cancelled, Some(FailureRecord::from(e))),
        Err(e) => (RunStatus::Failed, Some(FailureRecord::from(e))),
    };
    let record = recorder.finish(status, failure, teardown_error);
    info!(
        run_id = %record.run_id,
        "Run {} at {}",
        record.status.as_str(),
        record.final_state
    );

    match store.persist(&record).await {
        Ok(persisted_to) => RunOutcome {
            record,
            persisted_to,
            persist_error: None,
        },
        Err(e) => {
            error!("Failed to persist run record: {}", e);
            RunOutcome {
                record,
                persisted_to: None,
                persist_error: Some(e),
            }
        }
    }
}

enum Step {
    Advance,
    /// Stop here without failing.
    Shortfall,
}

struct Workflow<'a, S: Session> {
    session: &'a mut S,
    config: &'a WorkflowConfig,
    cancel: CancellationToken,
    executor: InteractionExecutor,
    recorder: &'a mut RunRecorder,
    download_baseline: Option<BTreeSet<PathBuf>>,
}

impl<'a, S: Session> Workflow<'a, S> {
    fn new(
        session: &'a mut S,
        config: &'a WorkflowConfig,
        cancel: CancellationToken,
        recorder: &'a mut RunRecorder,
    ) -> Self {
        let executor = InteractionExecutor::new(
            config.interaction.click_chain.clone(),
            config.interaction.settle(),
        );
        Self {
            session,
            config,
            cancel,
            executor,
            recorder,
            download_baseline: None,
        }
    }

    async fn run(mut self) -> Result<RunStatus, WorkflowError> {
        let mut state = self.recorder.state();
        while let Some(next) = state.next() {
            if self.cancel.is_cancelled() {
                info!("Cancelled before {}", next);
                return Err(WorkflowError::Cancelled);
            }

            debug!("Entering phase {}", next);
            let mut trace = PhaseTrace::new(next);
            match self.transition(next, &mut trace).await {
                Ok(Step::Advance) => {
                    info!("Reached {}", next);
                    self.recorder.advance(trace);
                    state = next;
                }
                Ok(Step::Shortfall) => {
                    warn!("Stopping at {}: {} not reached", state, next);
                    self.recorder.stop(trace, None);
                    return Ok(RunStatus::Shortfall);
                }
                Err(e) => {
                    error!("Phase {} failed: {}", next, e);
                    self.recorder.stop(trace, Some(&e));
                    return Err(e);
                }
            }
        }
        Ok(RunStatus::Completed)
    }

    async fn transition(
        &mut self,
        next: Phase,
        trace: &mut PhaseTrace,
    ) -> Result<Step, WorkflowError> {
        match next {
            Phase::Init => Ok(Step::Advance),
            Phase::SessionReady => self.launch().await,
            Phase::Navigated => self.navigate(trace).await,
            Phase::Uploaded => self.upload(trace).await,
            Phase::EditorEntered => self.enter_editor(trace).await,
            Phase::GenerationTriggered => self.trigger_generation(trace).await,
            Phase::PromptSubmitted => self.submit_prompt(trace).await,
            Phase::GenerationComplete => self.await_artifact(trace).await,
            Phase::Downloaded => self.download(trace).await,
            Phase::Finished => self.verify_download(trace).await,
        }
    }

    async fn launch(&mut self) -> Result<Step, WorkflowError> {
        self.session
            .launch()
            .await
            .map_err(WorkflowError::SessionFault)?;
        Ok(Step::Advance)
    }

    async fn navigate(&mut self, trace: &mut PhaseTrace) -> Result<Step, WorkflowError> {
        let config = self.config;
        let landed = self
            .session
            .navigate(&config.url)
            .await
            .map_err(WorkflowError::SessionFault)?;
        trace.diagnostic("landed_url", &landed.url);
        trace.diagnostic("title", &landed.title);
        self.focus_nudge(trace).await?;
        Ok(Step::Advance)
    }

    async fn upload(&mut self, trace: &mut PhaseTrace) -> Result<Step, WorkflowError> {
        let config = self.config;
        let spec = &config.targets.upload_input;
        let candidate = self.require_target(BudgetKey::Upload, spec, trace).await?;

        let asset = tokio::fs::canonicalize(&config.asset_path)
            .await
            .map_err(|e| {
                WorkflowError::InvalidInput(format!(
                    "asset `{}`: {}",
                    config.asset_path.display(),
                    e
                ))
            })?;
        trace.diagnostic("asset", asset.display());

        self.session
            .upload_file(&candidate.element, &asset)
            .await
            .map_err(|e| interaction_error(&spec.name, e))?;
        info!("Uploaded {}", asset.display());

        self.focus_nudge(trace).await?;
        Ok(Step::Advance)
    }

    async fn enter_editor(&mut self, trace: &mut PhaseTrace) -> Result<Step, WorkflowError> {
        let config = self.config;
        let spec = &config.targets.editor_entry;
        let candidate = self.require_target(BudgetKey::EditorEntry, spec, trace).await?;
        if let Some(label) = candidate.label() {
            trace.diagnostic("entry_label", label);
        }
        self.click(&spec.name, candidate, trace).await?;
        Ok(Step::Advance)
    }

    async fn trigger_generation(&mut self, trace: &mut PhaseTrace) -> Result<Step, WorkflowError> {
        let config = self.config;

        // Readiness is advisory: the surface may be usable without it.
        let ready = self
            .wait_target(BudgetKey::EditorReady, &config.targets.editor_ready, trace)
            .await?;
        if ready.is_none() {
            self.soft_timeout(BudgetKey::EditorReady, config.policies.editor_ready, trace)?;
        }

        let spec = &config.targets.generation_control;
        let candidate = self
            .require_target(BudgetKey::GenerationControl, spec, trace)
            .await?;
        trace.diagnostic("strategy_index", candidate.strategy_index);
        if let Some(label) = candidate.label() {
            trace.diagnostic("control_label", label);
        }
        self.click(&spec.name, candidate, trace).await?;
        Ok(Step::Advance)
    }

    async fn submit_prompt(&mut self, trace: &mut PhaseTrace) -> Result<Step, WorkflowError> {
        let config = self.config;
        let targets = &config.targets;

        let (spec, candidate) = match self
            .wait_target(BudgetKey::PromptReady, &targets.prompt_input, trace)
            .await?
        {
            Some(candidate) => (&targets.prompt_input, Some(candidate)),
            None => {
                self.soft_timeout(BudgetKey::PromptReady, config.policies.prompt_ready, trace)?;
                let skipped = SkippedStrategies::new();
                let fallback = TargetResolver::resolve_noting(
                    &*self.session,
                    &targets.prompt_fallback,
                    None,
                    &skipped,
                )
                .await
                .map_err(WorkflowError::SessionFault)?;
                trace.attempts(skipped.take());
                if let Some(found) = &fallback {
                    self.recorder.discovered(&targets.prompt_fallback.name, found);
                }
                (&targets.prompt_fallback, fallback)
            }
        };

        let Some(candidate) = candidate else {
            warn!("No prompt input found; continuing without submitting");
            trace.diagnostic("prompt_submitted", false);
            return Ok(Step::Advance);
        };

        if let Some(placeholder) = candidate.attribute("placeholder") {
            info!("Prompt input placeholder: {}", placeholder);
            trace.diagnostic("placeholder", placeholder);
        }
        trace.diagnostic("prompt_target", &spec.name);

        let action = Action::FillAndSubmit(config.instruction.clone());
        let outcome = self.act(candidate, &action, trace).await;
        if !outcome.success {
            return Err(action_error(&spec.name, outcome));
        }
        trace.diagnostic("prompt_submitted", true);
        Ok(Step::Advance)
    }

    async fn await_artifact(&mut self, trace: &mut PhaseTrace) -> Result<Step, WorkflowError> {
        let config = self.config;
        let monitor = CompletionMonitor {
            artifact: &config.targets.artifact,
            follow_up: &config.targets.download_control,
            rule: &config.monitor.reference,
            probe: config.monitor.follow_up_probe.to_poll_budget(),
            progress_every: Duration::from_millis(config.monitor.progress_every_ms),
        };
        let poller = self.poller(BudgetKey::Generation);
        let skipped = SkippedStrategies::new();
        let outcome = monitor.watch_noting(&*self.session, &poller, &skipped).await;
        trace.attempts(skipped.take());

        let mut wait = WaitRecord {
            key: BudgetKey::Generation,
            target: Some(config.targets.artifact.name.clone()),
            status: WaitStatus::Ready,
            elapsed_ms: millis(outcome.elapsed()),
            budget_ms: millis(poller.budget().timeout),
            strategy_index: None,
        };

        let result = match outcome {
            WaitOutcome::Ready { value, .. } => {
                wait.strategy_index = Some(value.strategy_index);
                trace.diagnostic("artifact_reference", &value.reference);
                self.recorder.artifact(value.reference);
                // Only the sighting is kept; the download phase resolves
                // the control again against the live page.
                if let Some(follow_up) = value.follow_up {
                    self.recorder
                        .discovered(&config.targets.download_control.name, &follow_up);
                    trace.diagnostic("follow_up_ready", true);
                }
                Ok(Step::Advance)
            }
            WaitOutcome::TimedOut { elapsed } => {
                wait.status = WaitStatus::TimedOut;
                Err(WorkflowError::TimedOut {
                    operation: "generation".into(),
                    after: elapsed,
                })
            }
            WaitOutcome::Failed { cause, .. } => {
                wait.status = WaitStatus::Failed;
                Err(WorkflowError::SessionFault(cause))
            }
            WaitOutcome::Cancelled { .. } => {
                wait.status = WaitStatus::Cancelled;
                Err(WorkflowError::Cancelled)
            }
        };
        self.recorder.wait(wait);
        result
    }

    async fn download(&mut self, trace: &mut PhaseTrace) -> Result<Step, WorkflowError> {
        let config = self.config;
        let spec = &config.targets.download_control;

        if let Some(dir) = &config.download_dir {
            self.download_baseline = Some(downloads::snapshot(dir).await);
        }

        // The result card may re-render between resolving the control and
        // clicking it; a stale control is resolved again.
        let mut attempt = 1;
        loop {
            let candidate = match self
                .wait_target(BudgetKey::DownloadControl, spec, trace)
                .await?
            {
                Some(candidate) => candidate,
                None => match config.policies.download_control {
                    OnTimeout::Soft => {
                        warn!("Artifact ready but no download control appeared");
                        trace.soft_timeout(BudgetKey::DownloadControl);
                        return Ok(Step::Shortfall);
                    }
                    OnTimeout::Fatal => {
                        return Err(self.not_found(BudgetKey::DownloadControl, spec));
                    }
                },
            };

            let outcome = self.act(candidate, &Action::Click, trace).await;
            if outcome.success {
                trace.diagnostic("control_attempts", attempt);
                self.recorder.follow_up_succeeded();
                return Ok(Step::Advance);
            }
            let went_stale = matches!(outcome.error, Some(SessionError::StaleElement));
            if !went_stale || attempt >= STALE_CONTROL_ATTEMPTS {
                trace.diagnostic("control_attempts", attempt);
                return Err(action_error(&spec.name, outcome));
            }
            info!("`{}` went stale before the click; resolving again", spec.name);
            attempt += 1;
        }
    }

    async fn verify_download(&mut self, trace: &mut PhaseTrace) -> Result<Step, WorkflowError> {
        let config = self.config;
        let Some(dir) = &config.download_dir else {
            trace.diagnostic("download_verification", "skipped");
            return Ok(Step::Advance);
        };
        let baseline = self.download_baseline.take().unwrap_or_default();

        let poller = self.poller(BudgetKey::DownloadFile);
        let outcome = poller
            .wait_for(|| {
                let baseline = &baseline;
                async move {
                    match downloads::new_complete_file(dir, baseline).await {
                        Ok(Some(path)) => PollOutcome::Ready(path),
                        Ok(None) => PollOutcome::Pending,
                        Err(e) => {
                            debug!("Download directory not readable yet: {}", e);
                            PollOutcome::Pending
                        }
                    }
                }
            })
            .await;

        let mut wait = WaitRecord {
            key: BudgetKey::DownloadFile,
            target: Some(dir.display().to_string()),
            status: WaitStatus::Ready,
            elapsed_ms: millis(outcome.elapsed()),
            budget_ms: millis(poller.budget().timeout),
            strategy_index: None,
        };
        let result = match outcome {
            WaitOutcome::Ready { value, .. } => {
                info!("Downloaded {}", value.display());
                trace.diagnostic("file", value.display());
                self.recorder.downloaded_file(value);
                Ok(Step::Advance)
            }
            WaitOutcome::TimedOut { .. } => {
                wait.status = WaitStatus::TimedOut;
                self.soft_timeout(BudgetKey::DownloadFile, config.policies.download_file, trace)
                    .map(|()| Step::Advance)
            }
            WaitOutcome::Failed { cause, .. } => {
                wait.status = WaitStatus::Failed;
                Err(WorkflowError::SessionFault(cause))
            }
            WaitOutcome::Cancelled { .. } => {
                wait.status = WaitStatus::Cancelled;
                Err(WorkflowError::Cancelled)
            }
        };
        self.recorder.wait(wait);
        result
    }

    /// Click at the configured blank coordinate to give the page focus.
    async fn focus_nudge(&mut self, trace: &mut PhaseTrace) -> Result<(), WorkflowError> {
        let config = self.config;
        let Some(point) = config.interaction.focus_point else {
            return Ok(());
        };
        match self.session.click_at(point.x, point.y).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_fault() => Err(WorkflowError::SessionFault(e)),
            Err(e) => match config.policies.focus_nudge {
                OnTimeout::Soft => {
                    debug!("Focus nudge failed: {}", e);
                    trace.diagnostic("focus_nudge", &e);
                    Ok(())
                }
                OnTimeout::Fatal => Err(WorkflowError::InteractionFailed {
                    target: "focus_point".into(),
                    cause: e,
                }),
            },
        }
    }

    async fn click(
        &mut self,
        target: &str,
        candidate: Candidate<S::Element>,
        trace: &mut PhaseTrace,
    ) -> Result<(), WorkflowError> {
        let outcome = self.act(candidate, &Action::Click, trace).await;
        if outcome.success {
            Ok(())
        } else {
            Err(action_error(target, outcome))
        }
    }

    /// Run `action` and copy its method and failed attempts into the trace.
    async fn act(
        &self,
        candidate: Candidate<S::Element>,
        action: &Action,
        trace: &mut PhaseTrace,
    ) -> ActionOutcome {
        let mut outcome = self.executor.act(&*self.session, candidate, action).await;
        trace.method(outcome.method_used);
        trace.attempts(std::mem::take(&mut outcome.failed_attempts));
        outcome
    }

    fn poller(&self, key: BudgetKey) -> Poller {
        Poller::new(
            self.config
                .timeouts
                .effective(key, self.config.hints.as_ref()),
        )
        .with_cancellation(self.cancel.clone())
    }

    fn not_found(&self, key: BudgetKey, spec: &TargetSpec) -> WorkflowError {
        WorkflowError::TargetNotFound {
            target: spec.name.clone(),
            waited: self.poller(key).budget().timeout,
        }
    }

    /// Record a timed-out wait and apply its policy.
    fn soft_timeout(
        &self,
        key: BudgetKey,
        policy: OnTimeout,
        trace: &mut PhaseTrace,
    ) -> Result<(), WorkflowError> {
        match policy {
            OnTimeout::Soft => {
                warn!("{} wait timed out; continuing", key);
                trace.soft_timeout(key);
                Ok(())
            }
            OnTimeout::Fatal => Err(WorkflowError::TimedOut {
                operation: key.to_string(),
                after: self.poller(key).budget().timeout,
            }),
        }
    }

    async fn require_target(
        &mut self,
        key: BudgetKey,
        spec: &TargetSpec,
        trace: &mut PhaseTrace,
    ) -> Result<Candidate<S::Element>, WorkflowError> {
        match self.wait_target(key, spec, trace).await? {
            Some(candidate) => Ok(candidate),
            None => Err(self.not_found(key, spec)),
        }
    }

    /// Poll for `spec` under the budget for `key`. `None` means timed out.
    async fn wait_target(
        &mut self,
        key: BudgetKey,
        spec: &TargetSpec,
        trace: &mut PhaseTrace,
    ) -> Result<Option<Candidate<S::Element>>, WorkflowError> {
        let poller = self.poller(key);
        let skipped = SkippedStrategies::new();
        let outcome = TargetResolver::wait_noting(&*self.session, spec, &poller, &skipped).await;
        trace.attempts(skipped.take());

        let mut wait = WaitRecord {
            key,
            target: Some(spec.name.clone()),
            status: WaitStatus::Ready,
            elapsed_ms: millis(outcome.elapsed()),
            budget_ms: millis(poller.budget().timeout),
            strategy_index: None,
        };
        let result = match outcome {
            WaitOutcome::Ready { value, elapsed } => {
                debug!(
                    "`{}` resolved via strategy {} after {:?}",
                    spec.name, value.strategy_index, elapsed
                );
                wait.strategy_index = Some(value.strategy_index);
                self.recorder.discovered(&spec.name, &value);
                Ok(Some(value))
            }
            WaitOutcome::TimedOut { elapsed } => {
                debug!("`{}` not found within {:?}", spec.name, elapsed);
                wait.status = WaitStatus::TimedOut;
                Ok(None)
            }
            WaitOutcome::Failed { cause, .. } => {
                wait.status = WaitStatus::Failed;
                Err(WorkflowError::SessionFault(cause))
            }
            WaitOutcome::Cancelled { .. } => {
                wait.status = WaitStatus::Cancelled;
                Err(WorkflowError::Cancelled)
            }
        };
        self.recorder.wait(wait);
        result
    }
}

fn action_error(target: &str, outcome: ActionOutcome) -> WorkflowError {
    let cause = outcome
        .error
        .unwrap_or_else(|| SessionError::Other(format!("{} failed", target)));
    interaction_error(target, cause)
}

fn interaction_error(target: &str, cause: SessionError) -> WorkflowError {
    if cause.is_fault() {
        WorkflowError::SessionFault(cause)
    } else {
        WorkflowError::InteractionFailed {
            target: target.to_string(),
            cause,
        }
    }
}
