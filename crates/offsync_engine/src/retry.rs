//! Batch commits with exponential backoff.

use crate::cancel::CancelToken;
use crate::config::SyncConfiguration;
use crate::error::{SyncError, SyncResult};
use crate::network::NetworkMonitor;
use crate::remote::{DocumentWrite, RemoteStore};
use tracing::{debug, warn};

/// Commits `writes`, retrying retryable failures with jittered exponential
/// backoff.
///
/// Returns the number of attempts used on success. Cancellation is checked
/// before every attempt and during each commit and sleep. Before sleeping
/// for a retry, a dropped connection aborts with [`SyncError::NetworkLost`].
/// Non-retryable failures are returned as-is; after `max_retry_attempts`
/// failed commits the result is [`SyncError::MaxRetriesExceeded`].
pub async fn commit_with_retry(
    remote: &dyn RemoteStore,
    writes: &[DocumentWrite],
    config: &SyncConfiguration,
    network: &NetworkMonitor,
    cancel: &CancelToken,
) -> SyncResult<u32> {
    let max_attempts = config.max_retry_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        attempt += 1;

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SyncError::Cancelled),
            result = remote.commit(writes) => result,
        };

        let err = match result {
            Ok(()) => {
                debug!(attempt, writes = writes.len(), "commit succeeded");
                return Ok(attempt);
            }
            Err(err) if !err.is_retryable() => return Err(err),
            Err(err) => err,
        };

        if attempt >= max_attempts {
            warn!(attempts = attempt, error = %err, "giving up on batch");
            return Err(SyncError::MaxRetriesExceeded {
                attempts: attempt,
                last_error: err.to_string(),
            });
        }

        if !network.is_connected() {
            warn!(attempt, "connection dropped while retrying");
            return Err(SyncError::NetworkLost);
        }

        let delay = config.backoff_delay(attempt);
        warn!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "commit failed, retrying");
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SyncError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
