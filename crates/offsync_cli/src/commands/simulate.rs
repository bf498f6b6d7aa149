//! Runs one sync cycle against in-memory stores.
//!
//! Useful for watching batching and backoff in the logs without a real
//! backend: records are created locally, the first commits are failed on
//! request, and the resulting report is printed.

use offsync_engine::{
    ConnectionKind, ManualPathMonitor, MemoryLocalStore, MemoryRemoteStore, NetworkMonitor,
    NetworkStatus, StaticAuth, SyncConfiguration, SyncOrchestrator,
};
use offsync_protocol::{ChangeOperation, Document, EntityType, Record};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Parameters of a simulated cycle.
#[derive(Debug, Clone)]
pub struct Simulation {
    /// Records created before the cycle.
    pub records: usize,
    /// Upload batch size.
    pub batch_size: usize,
    /// Commits that fail with a retryable error before any succeeds.
    pub fail_first: usize,
    /// Entity type of the created records.
    pub entity_type: String,
}

#[derive(Debug, Serialize)]
struct SimulationResult {
    state: String,
    uploaded: u64,
    batches_committed: u64,
    batch_sizes: Vec<usize>,
    commit_attempts: u64,
    still_queued: usize,
    total_errors: u64,
    duration_ms: u64,
    error: Option<String>,
}

/// Runs the simulation and prints the outcome.
pub async fn run(sim: Simulation, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let remote = Arc::new(MemoryRemoteStore::new());
    remote.fail_next_commits(sim.fail_first);
    let local = Arc::new(MemoryLocalStore::new());
    let path = Arc::new(ManualPathMonitor::new(NetworkStatus::connected(
        ConnectionKind::Unmetered,
    )));
    let network = Arc::new(NetworkMonitor::new(path));
    network.start();

    let config = SyncConfiguration::new()
        .with_upload_batch_size(sim.batch_size)
        .with_base_retry_delay(Duration::from_millis(20))
        .with_max_retry_delay(Duration::from_millis(200));
    let orchestrator = SyncOrchestrator::builder(
        remote.clone(),
        local,
        Arc::new(StaticAuth::signed_in("simulator")),
        network,
    )
    .configuration(config)
    .build();

    let entity_type = EntityType::new(sim.entity_type.as_str());
    for index in 0..sim.records {
        let mut fields = Document::new();
        fields.insert("index".into(), Value::from(index as u64));
        let mut record = Record::new(entity_type.clone(), fields);
        orchestrator.record_change(&mut record, ChangeOperation::Create)?;
    }
    tracing::info!(records = sim.records, "local records created");

    let outcome = orchestrator.sync_now().await;
    let stats = orchestrator.statistics();
    let (report, error) = match outcome {
        Ok(report) => (Some(report), None),
        Err(err) => (None, Some(err)),
    };

    let result = SimulationResult {
        state: orchestrator.state().to_string(),
        uploaded: stats.total_uploaded,
        batches_committed: report.as_ref().map_or(0, |r| r.batches_committed),
        batch_sizes: remote.committed_batches(),
        commit_attempts: remote.commit_attempts(),
        still_queued: orchestrator.pending_changes_count(),
        total_errors: stats.total_errors,
        duration_ms: report.as_ref().map_or(0, |r| r.duration.as_millis() as u64),
        error: error.as_ref().map(ToString::to_string),
    };

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => print_text(&result),
    }

    match error {
        Some(err) => Err(err.into()),
        None => Ok(()),
    }
}

fn print_text(result: &SimulationResult) {
    println!("Simulated sync cycle");
    println!("====================");
    println!();
    println!("State:           {}", result.state);
    println!("Uploaded:        {}", result.uploaded);
    println!("Batches:         {} {:?}", result.batches_committed, result.batch_sizes);
    println!("Commit attempts: {}", result.commit_attempts);
    println!("Still queued:    {}", result.still_queued);
    println!("Errors:          {}", result.total_errors);
    println!("Duration:        {} ms", result.duration_ms);
    if let Some(error) = &result.error {
        println!();
        println!("Cycle failed: {error}");
    }
}
