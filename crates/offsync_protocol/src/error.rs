//! Error types for record serialization.

use thiserror::Error;

/// Result type for record operations.
pub type RecordResult<T> = Result<T, RecordError>;

/// Errors raised while turning records into remote payloads or back.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecordError {
    /// The record could not be represented as a remote document.
    #[error("invalid data for {entity_id}: {message}")]
    InvalidData {
        /// Entity the failure belongs to.
        entity_id: String,
        /// Error message.
        message: String,
    },

    /// A required field was absent from a remote payload.
    #[error("missing field `{field}` in {entity_id}")]
    MissingField {
        /// Entity the failure belongs to.
        entity_id: String,
        /// Field name.
        field: &'static str,
    },
}

impl RecordError {
    /// Creates an invalid-data error.
    pub fn invalid(entity_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidData {
            entity_id: entity_id.into(),
            message: message.into(),
        }
    }

    /// Returns the entity the error refers to.
    pub fn entity_id(&self) -> &str {
        match self {
            RecordError::InvalidData { entity_id, .. } => entity_id,
            RecordError::MissingField { entity_id, .. } => entity_id,
        }
    }
}
