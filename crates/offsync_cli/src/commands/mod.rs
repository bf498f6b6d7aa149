//! CLI command implementations.

pub mod jobs;
pub mod simulate;

use offsync_engine::JobStore;
use offsync_storage::FileStore;
use std::path::Path;
use std::sync::Arc;

/// Opens the job store kept under `state_dir`.
pub fn open_jobs(state_dir: &Path) -> Result<JobStore, Box<dyn std::error::Error>> {
    let store = FileStore::open(state_dir)?;
    Ok(JobStore::new(Arc::new(store)))
}
