//! Job history commands: list, enable, disable, reset.

use super::open_jobs;
use offsync_engine::{JobKind, JobRecord, RunOutcome};
use serde::Serialize;
use std::path::Path;

#[derive(Debug, Serialize)]
struct JobView {
    job: String,
    enabled: bool,
    last_run: Option<i64>,
    run_count: u64,
    success_count: u64,
    failure_count: u64,
    last_outcome: Option<String>,
    last_error: Option<String>,
}

impl JobView {
    fn new(kind: JobKind, record: &JobRecord) -> Self {
        Self {
            job: kind.to_string(),
            enabled: record.enabled,
            last_run: record.last_run.map(|ts| ts.as_millis()),
            run_count: record.run_count,
            success_count: record.success_count,
            failure_count: record.failure_count,
            last_outcome: record.last_outcome.map(outcome_name),
            last_error: record.last_error.clone(),
        }
    }
}

fn outcome_name(outcome: RunOutcome) -> String {
    match outcome {
        RunOutcome::Success => "success",
        RunOutcome::Failure => "failure",
        RunOutcome::Expired => "expired",
    }
    .to_string()
}

/// Lists every job with its persisted history.
pub fn list(state_dir: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let jobs = open_jobs(state_dir)?;
    let views: Vec<JobView> = jobs
        .all()?
        .iter()
        .map(|(kind, record)| JobView::new(*kind, record))
        .collect();

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&views)?);
        }
        _ => {
            println!("Background jobs ({})", state_dir.display());
            println!("===============");
            for view in &views {
                println!();
                print_text(view);
            }
        }
    }

    Ok(())
}

/// Enables or disables a job.
pub fn set_enabled(
    state_dir: &Path,
    job: &str,
    enabled: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let kind: JobKind = job.parse()?;
    let jobs = open_jobs(state_dir)?;
    let record = jobs.update(kind, |record| record.enabled = enabled)?;
    tracing::info!(%kind, enabled, "job updated");
    println!(
        "{kind}: {}",
        if record.enabled { "enabled" } else { "disabled" }
    );
    Ok(())
}

/// Clears a job's run history, keeping its enabled flag.
pub fn reset(state_dir: &Path, job: &str) -> Result<(), Box<dyn std::error::Error>> {
    let kind: JobKind = job.parse()?;
    let jobs = open_jobs(state_dir)?;
    jobs.reset(kind)?;
    tracing::info!(%kind, "job history cleared");
    println!("{kind}: history cleared");
    Ok(())
}

fn print_text(view: &JobView) {
    println!("[{}] {}", view.job, if view.enabled { "enabled" } else { "disabled" });
    println!("  Runs:      {}", view.run_count);
    println!("  Succeeded: {}", view.success_count);
    println!("  Failed:    {}", view.failure_count);
    match view.last_run {
        Some(ms) => println!("  Last run:  {ms} ms since epoch"),
        None => println!("  Last run:  never"),
    }
    if let Some(outcome) = &view.last_outcome {
        println!("  Outcome:   {outcome}");
    }
    if let Some(error) = &view.last_error {
        println!("  Error:     {error}");
    }
}
