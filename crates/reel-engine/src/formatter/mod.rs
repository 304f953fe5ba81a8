use crate::monitor::truncate;
use crate::workflow::{RunRecord, RunStatus, WaitStatus};
use std::path::Path;

/// Human-readable summary of a finished run.
pub fn format_run(record: &RunRecord, persisted_to: Option<&Path>) -> String {
    let mut output = format!(
        "Run {} {} at {} after {:.1}s",
        record.run_id,
        record.status.as_str().to_uppercase(),
        record.final_state,
        record.elapsed().as_secs_f64()
    );

    if let Some(failure) = &record.failure {
        output.push_str(&format!("\nFailure: {}", failure.message));
    }
    if record.status == RunStatus::Shortfall {
        output.push_str("\nArtifact was produced but could not be downloaded automatically.");
    }

    if !record.phases.is_empty() {
        output.push_str("\n\nPhases:");
        for phase in &record.phases {
            let mark = if phase.success { "ok" } else { "FAILED" };
            output.push_str(&format!(
                "\n- {:<22} {:>6} {:>8}ms",
                phase.phase.as_str(),
                mark,
                phase.elapsed_ms
            ));
            if let Some(method) = phase.method {
                output.push_str(&format!(" via {}", method));
            }
            if !phase.failed_attempts.is_empty() {
                output.push_str(&format!(" ({} failed attempt(s))", phase.failed_attempts.len()));
            }
            for key in &phase.soft_timeouts {
                output.push_str(&format!("\n    soft timeout: {}", key));
            }
        }
    }

    let timed_out: Vec<String> = record
        .waits
        .iter()
        .filter(|w| w.status == WaitStatus::TimedOut)
        .map(|w| format!("{} ({}ms)", w.key, w.elapsed_ms))
        .collect();
    if !timed_out.is_empty() {
        output.push_str(&format!("\n\nTimed-out waits: {}", timed_out.join(", ")));
    }

    if !record.identifiers.is_empty() {
        output.push_str("\n\nDiscovered:");
        for (target, found) in &record.identifiers {
            output.push_str(&format!(
                "\n- {} via #{} {}",
                target, found.strategy_index, found.strategy
            ));
            if let Some(text) = &found.text {
                output.push_str(&format!(" \"{}\"", truncate(text, 40)));
            }
        }
    }

    if let Some(reference) = &record.artifact_reference {
        output.push_str(&format!("\n\nArtifact: {}", truncate(reference, 80)));
    }
    if let Some(file) = &record.downloaded_file {
        output.push_str(&format!("\nDownloaded: {}", file.display()));
    }
    if let Some(err) = &record.teardown_error {
        output.push_str(&format!("\nTeardown error: {}", err));
    }
    if let Some(path) = persisted_to {
        output.push_str(&format!("\nRecord: {}", path.display()));
    }

    output
}
