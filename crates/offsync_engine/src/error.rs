//! Error types for the sync engine.

use offsync_protocol::RecordError;
use offsync_storage::StorageError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
///
/// Conflicts are not errors: they are returned as
/// [`offsync_protocol::SyncConflict`] values.
#[derive(Error, Debug, Clone)]
pub enum SyncError {
    /// No authenticated principal. Fatal to the cycle, never retried.
    #[error("not authenticated")]
    NotAuthenticated,

    /// The sync policy rejected the current network path.
    #[error("network unavailable for sync")]
    NetworkUnavailable,

    /// Connectivity dropped while a batch was being retried.
    #[error("network connection lost")]
    NetworkLost,

    /// A batch failed on every allowed attempt.
    #[error("max retries exceeded after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded {
        /// Attempts made.
        attempts: u32,
        /// Error from the final attempt.
        last_error: String,
    },

    /// A single entity could not be serialized or deserialized.
    #[error("invalid data: {0}")]
    InvalidData(#[from] RecordError),

    /// The remote store rejected a batch commit.
    #[error("batch commit failed: {message}")]
    BatchCommitFailed {
        /// Error message.
        message: String,
        /// Whether the commit can be retried.
        retryable: bool,
    },

    /// The operation was cancelled by a stop or expiration signal.
    #[error("sync cancelled")]
    Cancelled,

    /// The local record store failed.
    #[error("local store error: {0}")]
    LocalStore(String),

    /// Durable engine state could not be read or written.
    #[error("storage error: {0}")]
    Storage(String),

    /// The host scheduler rejected a job request.
    #[error("scheduler error: {0}")]
    Scheduler(String),
}

impl SyncError {
    /// Creates a retryable commit failure.
    pub fn commit_retryable(message: impl Into<String>) -> Self {
        Self::BatchCommitFailed {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable commit failure.
    pub fn commit_fatal(message: impl Into<String>) -> Self {
        Self::BatchCommitFailed {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if the retry policy should try again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::BatchCommitFailed {
                retryable: true,
                ..
            }
        )
    }

    /// Returns true if the cycle should wait for connectivity instead of
    /// failing.
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::NetworkLost | SyncError::NetworkUnavailable)
    }
}

impl From<StorageError> for SyncError {
    fn from(err: StorageError) -> Self {
        SyncError::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::commit_retryable("503").is_retryable());
        assert!(!SyncError::commit_fatal("permission denied").is_retryable());
        assert!(!SyncError::NotAuthenticated.is_retryable());
        assert!(!SyncError::NetworkLost.is_retryable());
        assert!(!SyncError::Cancelled.is_retryable());
    }

    #[test]
    fn transient_errors() {
        assert!(SyncError::NetworkLost.is_transient());
        assert!(SyncError::NetworkUnavailable.is_transient());
        assert!(!SyncError::commit_retryable("x").is_transient());
    }

    #[test]
    fn error_display() {
        let err = SyncError::MaxRetriesExceeded {
            attempts: 5,
            last_error: "timeout".into(),
        };
        assert!(err.to_string().contains("5"));
        assert!(err.to_string().contains("timeout"));

        let err: SyncError = RecordError::invalid("tx-1", "bad").into();
        assert!(matches!(err, SyncError::InvalidData(_)));
    }
}
