mod common;

use common::{FOOTER_PATH, MockSession, Node, PageScript, config_with_asset, editor_page, secs};
use reel_engine::config::{BudgetKey, OnTimeout};
use reel_engine::error::FailureKind;
use reel_engine::interaction::InteractionMethod;
use reel_engine::learner::{LearningHints, LearningStore, MemoryLearningStore};
use reel_engine::session::{Query, SessionError};
use reel_engine::workflow::{Phase, RunStatus, WaitStatus, run_workflow};
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;

#[tokio::test(start_paused = true)]
async fn test_scenario_a_fixed_path_reaches_finished() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_with_asset(dir.path());
    let session = MockSession::new();
    let page = editor_page(&session, PageScript::default());
    let store = MemoryLearningStore::new();

    let outcome = run_workflow(session.clone(), &store, &config, CancellationToken::new()).await;
    let record = outcome.record;

    assert_eq!(record.status, RunStatus::Completed, "{:#?}", record);
    assert!(record.success);
    assert_eq!(record.final_state, Phase::Finished);
    assert_eq!(record.identifiers["generation_control"].strategy_index, 1);

    let prompt = record.phase(Phase::PromptSubmitted).unwrap();
    assert!(prompt.success);
    assert_eq!(prompt.diagnostics["prompt_submitted"], "true");
    assert_eq!(prompt.diagnostics["placeholder"], "Customize your video...");
    assert!(prompt.soft_timeouts.is_empty());

    assert!(record.artifact_found);
    assert_eq!(
        record.artifact_reference.as_deref(),
        Some("blob:https://app.example/5d1f-9a")
    );
    assert!(record.follow_up_succeeded);

    // Strictly ordered, one result per phase.
    let phases: Vec<Phase> = record.phases.iter().map(|p| p.phase).collect();
    assert_eq!(phases, Phase::ORDER[1..].to_vec());

    let log = session.log();
    assert_eq!(log.first().map(String::as_str), Some("launch"));
    assert_eq!(log.last().map(String::as_str), Some("close"));
    assert!(log.contains(&format!("upload {}", page.file_input)));
    assert!(log.contains(&format!("simulated {}", page.edit_button)));
    assert!(log.contains(&format!("simulated {}", page.make_video)));
    assert!(log.contains(&format!("simulated {}", page.download)));
    assert!(log.contains(&"typed slow dolly zoom toward the subject".to_string()));
    assert_eq!(session.logged("click_at 800,400").len(), 2);

    assert_eq!(store.records().len(), 1);
    assert!(outcome.persist_error.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_scenario_b_text_strategy_when_path_is_gone() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_with_asset(dir.path());
    let session = MockSession::new();
    editor_page(
        &session,
        PageScript {
            footer_path: false,
            ..Default::default()
        },
    );
    let store = MemoryLearningStore::new();

    let record = run_workflow(session.clone(), &store, &config, CancellationToken::new())
        .await
        .record;

    assert_eq!(record.status, RunStatus::Completed);
    assert!(record.phase(Phase::PromptSubmitted).unwrap().success);
    let control = &record.identifiers["generation_control"];
    assert_eq!(control.strategy_index, 2);
    assert_eq!(control.text.as_deref(), Some("Make video"));
    assert_eq!(
        record.wait(BudgetKey::GenerationControl).unwrap().strategy_index,
        Some(2)
    );
}

#[tokio::test(start_paused = true)]
async fn test_scenario_c_missing_prompt_is_a_soft_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_with_asset(dir.path());
    let session = MockSession::new();
    editor_page(
        &session,
        PageScript {
            textarea: false,
            ..Default::default()
        },
    );
    let store = MemoryLearningStore::new();

    let record = run_workflow(session.clone(), &store, &config, CancellationToken::new())
        .await
        .record;

    assert_ne!(record.status, RunStatus::Failed, "{:#?}", record.failure);
    let triggered = record.phase(Phase::GenerationTriggered).unwrap();
    assert!(triggered.success);
    assert_eq!(triggered.soft_timeouts, vec![BudgetKey::EditorReady]);

    let prompt = record.phase(Phase::PromptSubmitted).unwrap();
    assert!(prompt.success);
    assert_eq!(prompt.soft_timeouts, vec![BudgetKey::PromptReady]);
    assert_eq!(prompt.diagnostics["prompt_submitted"], "false");
    assert_eq!(
        record.wait(BudgetKey::PromptReady).unwrap().status,
        WaitStatus::TimedOut
    );
    assert!(record.phase(Phase::GenerationComplete).is_some());
    assert!(session.logged("typed").is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_scenario_d_artifact_never_ready() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_with_asset(dir.path());
    let session = MockSession::new();
    editor_page(
        &session,
        PageScript {
            video_ready_after: None,
            ..Default::default()
        },
    );
    let store = MemoryLearningStore::new();

    let outcome = run_workflow(session.clone(), &store, &config, CancellationToken::new()).await;
    let record = outcome.record;

    assert_eq!(record.status, RunStatus::Failed);
    assert!(!record.success);
    assert!(!record.artifact_found);
    assert_eq!(record.final_state, Phase::PromptSubmitted);

    let failure = record.failure.as_ref().unwrap();
    assert_eq!(failure.kind, FailureKind::TimedOut);
    let generation = record.phase(Phase::GenerationComplete).unwrap();
    assert!(!generation.success);
    assert_eq!(generation.failure.as_ref().unwrap().kind, FailureKind::TimedOut);
    assert_eq!(
        record.wait(BudgetKey::Generation).unwrap().status,
        WaitStatus::TimedOut
    );
    assert!(record.phase(Phase::Downloaded).is_none());

    assert!(session.closed());
    let persisted = store.records();
    assert_eq!(persisted.len(), 1);
    assert!(!persisted[0].success);
}

#[tokio::test(start_paused = true)]
async fn test_missing_download_control_is_a_shortfall() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_with_asset(dir.path());
    let session = MockSession::new();
    editor_page(
        &session,
        PageScript {
            download_button: false,
            ..Default::default()
        },
    );
    let store = MemoryLearningStore::new();

    let record = run_workflow(session.clone(), &store, &config, CancellationToken::new())
        .await
        .record;

    assert_eq!(record.status, RunStatus::Shortfall);
    assert!(!record.success);
    assert!(record.artifact_found);
    assert!(!record.follow_up_succeeded);
    assert_eq!(record.final_state, Phase::GenerationComplete);
    assert!(record.failure.is_none());
    let download = record.phase(Phase::Downloaded).unwrap();
    assert_eq!(download.soft_timeouts, vec![BudgetKey::DownloadControl]);
    assert!(session.closed());
}

#[tokio::test(start_paused = true)]
async fn test_fatal_download_policy_turns_shortfall_into_failure() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_with_asset(dir.path());
    config.policies.download_control = OnTimeout::Fatal;
    let session = MockSession::new();
    editor_page(
        &session,
        PageScript {
            download_button: false,
            ..Default::default()
        },
    );

    let record = run_workflow(
        session,
        &MemoryLearningStore::new(),
        &config,
        CancellationToken::new(),
    )
    .await
    .record;

    assert_eq!(record.status, RunStatus::Failed);
    assert_eq!(
        record.failure.unwrap().kind,
        FailureKind::TargetNotFound
    );
}

#[tokio::test(start_paused = true)]
async fn test_click_chain_exhausted_fails_the_phase() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_with_asset(dir.path());
    let session = MockSession::new();
    let page = editor_page(&session, PageScript::default());
    for step in ["simulated", "native", "scripted"] {
        session.fail(
            page.edit_button,
            step,
            SessionError::NotInteractable("covered by overlay".into()),
        );
    }

    let record = run_workflow(
        session.clone(),
        &MemoryLearningStore::new(),
        &config,
        CancellationToken::new(),
    )
    .await
    .record;

    assert_eq!(record.status, RunStatus::Failed);
    assert_eq!(record.final_state, Phase::Uploaded);
    let entered = record.phase(Phase::EditorEntered).unwrap();
    assert_eq!(
        entered.failure.as_ref().unwrap().kind,
        FailureKind::InteractionFailed
    );
    let steps: Vec<&str> = entered
        .failed_attempts
        .iter()
        .map(|a| a.step.as_str())
        .collect();
    assert_eq!(steps, ["simulated", "native", "scripted"]);
    assert!(session.closed());
}

#[tokio::test(start_paused = true)]
async fn test_fallback_click_method_is_recorded() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_with_asset(dir.path());
    let session = MockSession::new();
    let page = editor_page(&session, PageScript::default());
    session.fail(
        page.make_video,
        "simulated",
        SessionError::NotInteractable("intercepted".into()),
    );

    let record = run_workflow(
        session,
        &MemoryLearningStore::new(),
        &config,
        CancellationToken::new(),
    )
    .await
    .record;

    let triggered = record.phase(Phase::GenerationTriggered).unwrap();
    assert!(triggered.success);
    assert_eq!(triggered.method, Some(InteractionMethod::Native));
    assert_eq!(triggered.failed_attempts.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_missing_asset_never_touches_the_session() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_with_asset(dir.path());
    config.asset_path = dir.path().join("gone.png");
    let session = MockSession::new();
    editor_page(&session, PageScript::default());
    let store = MemoryLearningStore::new();

    let record = run_workflow(session.clone(), &store, &config, CancellationToken::new())
        .await
        .record;

    assert_eq!(record.status, RunStatus::Failed);
    assert_eq!(record.final_state, Phase::Init);
    assert_eq!(record.failure.unwrap().kind, FailureKind::InvalidInput);
    assert!(record.phases.is_empty());
    assert_eq!(session.log(), vec!["close".to_string()]);
    assert_eq!(store.records().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_connection_loss_is_a_session_fault() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_with_asset(dir.path());
    let session = MockSession::new();
    editor_page(&session, PageScript::default());
    session.fail_query(
        Query::css("video"),
        SessionError::ConnectionLost("browser exited".into()),
    );

    let record = run_workflow(
        session.clone(),
        &MemoryLearningStore::new(),
        &config,
        CancellationToken::new(),
    )
    .await
    .record;

    assert_eq!(record.status, RunStatus::Failed);
    assert_eq!(record.failure.unwrap().kind, FailureKind::SessionFault);
    assert_eq!(record.final_state, Phase::PromptSubmitted);
    assert!(session.closed());
}

#[tokio::test(start_paused = true)]
async fn test_launch_failure_is_a_session_fault() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_with_asset(dir.path());
    let session = MockSession::new();
    session.fail_launch(SessionError::ConnectionLost("no driver".into()));

    let record = run_workflow(
        session.clone(),
        &MemoryLearningStore::new(),
        &config,
        CancellationToken::new(),
    )
    .await
    .record;

    assert_eq!(record.failure.unwrap().kind, FailureKind::SessionFault);
    assert_eq!(record.final_state, Phase::Init);
    assert!(session.closed());
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_during_generation() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_with_asset(dir.path());
    let session = MockSession::new();
    editor_page(
        &session,
        PageScript {
            video_ready_after: None,
            ..Default::default()
        },
    );
    let store = MemoryLearningStore::new();
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(secs(60)).await;
        trigger.cancel();
    });

    let record = run_workflow(session.clone(), &store, &config, cancel)
        .await
        .record;

    assert_eq!(record.status, RunStatus::Cancelled);
    assert_eq!(record.failure.as_ref().unwrap().kind, FailureKind::Cancelled);
    assert_eq!(
        record.wait(BudgetKey::Generation).unwrap().status,
        WaitStatus::Cancelled
    );
    assert!(session.closed());
    assert_eq!(store.records().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_before_start_still_tears_down() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_with_asset(dir.path());
    let session = MockSession::new();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let record = run_workflow(
        session.clone(),
        &MemoryLearningStore::new(),
        &config,
        cancel,
    )
    .await
    .record;

    assert_eq!(record.status, RunStatus::Cancelled);
    assert_eq!(session.log(), vec!["close".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_hints_widen_the_generation_budget() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_with_asset(dir.path());
    let session = MockSession::new();
    // Ready later than the default 180s budget.
    editor_page(
        &session,
        PageScript {
            video_ready_after: Some(secs(200)),
            ..Default::default()
        },
    );
    let mut observed = BTreeMap::new();
    observed.insert(BudgetKey::Generation, 150_000);
    config.hints = Some(LearningHints {
        runs_observed: 3,
        observed_ms: observed,
        ..Default::default()
    });
    let store = MemoryLearningStore::new();

    let record = run_workflow(session, &store, &config, CancellationToken::new())
        .await
        .record;

    assert_eq!(record.status, RunStatus::Completed, "{:#?}", record.failure);
    assert!(record.hints_applied);
    assert_eq!(record.wait(BudgetKey::Generation).unwrap().budget_ms, 300_000);

    let hints = store.load_hints().await.unwrap().unwrap();
    assert_eq!(hints.runs_observed, 1);
    assert!(hints.observed(BudgetKey::Generation).unwrap() >= secs(150));
}

#[tokio::test(start_paused = true)]
async fn test_download_file_is_verified() {
    let dir = tempfile::tempdir().unwrap();
    let downloads = tempfile::tempdir().unwrap();
    let mut config = config_with_asset(dir.path());
    config.download_dir = Some(downloads.path().to_path_buf());
    std::fs::write(downloads.path().join("older.mp4"), b"old").unwrap();

    let session = MockSession::new();
    let page = editor_page(&session, PageScript::default());
    let target = downloads.path().join("clip.mp4");
    session.download_on_click(page.download, target.clone());

    let record = run_workflow(
        session,
        &MemoryLearningStore::new(),
        &config,
        CancellationToken::new(),
    )
    .await
    .record;

    assert_eq!(record.status, RunStatus::Completed);
    assert_eq!(record.downloaded_file, Some(target));
}

#[tokio::test(start_paused = true)]
async fn test_focus_nudge_failure_is_tolerated() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_with_asset(dir.path());
    let session = MockSession::new();
    editor_page(&session, PageScript::default());
    session.fail_click_at(SessionError::NotSupported("click_at".into()));

    let record = run_workflow(
        session,
        &MemoryLearningStore::new(),
        &config,
        CancellationToken::new(),
    )
    .await
    .record;

    assert_eq!(record.status, RunStatus::Completed);
    let navigated = record.phase(Phase::Navigated).unwrap();
    assert!(navigated.diagnostics["focus_nudge"].contains("click_at"));
}

#[tokio::test(start_paused = true)]
async fn test_download_control_rerendered_before_click_is_resolved_again() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_with_asset(dir.path());
    let session = MockSession::new();
    editor_page(
        &session,
        PageScript {
            download_button: false,
            ..Default::default()
        },
    );
    let first = session.add(
        Node::new("button")
            .attr("aria-label", "Download")
            .appears_after(secs(40)),
    );
    let second = session.add(
        Node::new("button")
            .attr("aria-label", "Download")
            .appears_after(secs(10_000)),
    );
    session.route(Query::css("button[aria-label*='ownload']"), &[first, second]);
    session.rerender_on_scroll(first, second);

    let record = run_workflow(
        session.clone(),
        &MemoryLearningStore::new(),
        &config,
        CancellationToken::new(),
    )
    .await
    .record;

    assert_eq!(record.status, RunStatus::Completed, "{:#?}", record.failure);
    assert!(record.follow_up_succeeded);
    let downloaded = record.phase(Phase::Downloaded).unwrap();
    assert_eq!(downloaded.method, Some(InteractionMethod::Simulated));
    assert_eq!(downloaded.diagnostics["control_attempts"], "2");
    let steps: Vec<&str> = downloaded
        .failed_attempts
        .iter()
        .map(|a| a.step.as_str())
        .collect();
    assert_eq!(steps, ["simulated", "native", "scripted"]);

    let log = session.log();
    assert!(log.contains(&format!("scroll {}", first)));
    assert!(!log.contains(&format!("simulated {}", first)));
    assert!(log.contains(&format!("simulated {}", second)));
}

#[tokio::test(start_paused = true)]
async fn test_structural_strategy_failure_is_recorded() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_with_asset(dir.path());
    let session = MockSession::new();
    editor_page(&session, PageScript::default());
    session.fail_query(
        Query::xpath(FOOTER_PATH),
        SessionError::InvalidQuery {
            query: FOOTER_PATH.into(),
            reason: "not a valid XPath expression".into(),
        },
    );

    let record = run_workflow(
        session,
        &MemoryLearningStore::new(),
        &config,
        CancellationToken::new(),
    )
    .await
    .record;

    assert_eq!(record.status, RunStatus::Completed, "{:#?}", record.failure);
    assert_eq!(record.identifiers["generation_control"].strategy_index, 2);
    let triggered = record.phase(Phase::GenerationTriggered).unwrap();
    let skipped = triggered
        .failed_attempts
        .iter()
        .find(|a| a.step == "generation_control/strategy#1")
        .expect("skipped strategy is recorded");
    assert!(skipped.cause.contains("not a valid XPath expression"));
}

#[tokio::test(start_paused = true)]
async fn test_unmatched_placeholder_falls_back_to_any_textarea() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_with_asset(dir.path());
    let session = MockSession::new();
    editor_page(
        &session,
        PageScript {
            textarea: false,
            ..Default::default()
        },
    );
    let textarea = session.add(
        Node::new("textarea")
            .attr("placeholder", "Ask anything")
            .appears_after(secs(4)),
    );
    session.route(Query::css("textarea"), &[textarea]);

    let record = run_workflow(
        session.clone(),
        &MemoryLearningStore::new(),
        &config,
        CancellationToken::new(),
    )
    .await
    .record;

    assert_eq!(record.status, RunStatus::Completed, "{:#?}", record.failure);
    let prompt = record.phase(Phase::PromptSubmitted).unwrap();
    assert_eq!(prompt.soft_timeouts, vec![BudgetKey::PromptReady]);
    assert_eq!(prompt.diagnostics["prompt_target"], "prompt_fallback");
    assert_eq!(prompt.diagnostics["placeholder"], "Ask anything");
    assert_eq!(prompt.diagnostics["prompt_submitted"], "true");
    assert_eq!(
        record.wait(BudgetKey::PromptReady).unwrap().status,
        WaitStatus::TimedOut
    );
    assert!(record.identifiers.contains_key("prompt_fallback"));
    assert!(session.log().contains(&format!("insert {}", textarea)));
    assert_eq!(
        session.logged("typed"),
        ["typed slow dolly zoom toward the subject"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_fatal_editor_ready_policy_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_with_asset(dir.path());
    config.policies.editor_ready = OnTimeout::Fatal;
    let session = MockSession::new();
    editor_page(
        &session,
        PageScript {
            textarea: false,
            ..Default::default()
        },
    );

    let record = run_workflow(
        session.clone(),
        &MemoryLearningStore::new(),
        &config,
        CancellationToken::new(),
    )
    .await
    .record;

    assert_eq!(record.status, RunStatus::Failed);
    assert_eq!(record.final_state, Phase::EditorEntered);
    let triggered = record.phase(Phase::GenerationTriggered).unwrap();
    assert!(!triggered.success);
    assert_eq!(
        triggered.failure.as_ref().unwrap().kind,
        FailureKind::TimedOut
    );
    assert_eq!(record.failure.unwrap().kind, FailureKind::TimedOut);
    assert!(session.closed());
}

#[tokio::test(start_paused = true)]
async fn test_fatal_prompt_ready_policy_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_with_asset(dir.path());
    config.policies.prompt_ready = OnTimeout::Fatal;
    let session = MockSession::new();
    let page = editor_page(
        &session,
        PageScript {
            textarea: false,
            ..Default::default()
        },
    );
    // Present for editor readiness, but the placeholder matches nothing.
    let textarea = session.add(Node::new("textarea").attr("placeholder", "Ask anything"));
    session.route(Query::css("textarea"), &[textarea]);

    let record = run_workflow(
        session.clone(),
        &MemoryLearningStore::new(),
        &config,
        CancellationToken::new(),
    )
    .await
    .record;

    assert_eq!(record.status, RunStatus::Failed);
    assert_eq!(record.final_state, Phase::GenerationTriggered);
    let prompt = record.phase(Phase::PromptSubmitted).unwrap();
    assert_eq!(prompt.failure.as_ref().unwrap().kind, FailureKind::TimedOut);
    assert!(session.logged("typed").is_empty());
    assert!(session.log().contains(&format!("simulated {}", page.make_video)));
}
