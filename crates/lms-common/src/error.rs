//! Error types for the synchronization pipeline

use thiserror::Error;

/// Result type alias for sync operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// Main error type for the synchronization pipeline
///
/// The duplicate-key case is a first-class variant ([`SyncError::Conflict`])
/// so that the skip-and-continue branches in staging and normalization can
/// match on it explicitly instead of catching everything.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Configuration is missing or invalid. Fatal at startup.
    #[error("Configuration error: {0}. Check your environment variables or .env file.")]
    Config(String),

    /// HTTP request failed
    #[error("Network request failed: {0}. Check your connection and LMS_API_BASE_URL.")]
    Http(#[from] reqwest::Error),

    /// Unexpected database error. Aborts the current stage.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// JSON serialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A uniqueness constraint was violated. Expected during re-runs;
    /// handled by skipping the record.
    #[error("{entity} {id} already exists")]
    Conflict { entity: &'static str, id: i64 },

    /// Staged JSON does not map to the expected record shape
    #[error("failed to map staged {entity} {id}: {message}")]
    Parse {
        entity: &'static str,
        id: i64,
        message: String,
    },

    /// Enrollment payload carries no nested user object. Some API roles
    /// omit it; the record is skipped.
    #[error("enrollment {enrollment_id} has no nested user object")]
    MissingUser { enrollment_id: i64 },

    /// A pipeline stage was started before its prerequisite completed
    #[error("stage '{stage}' requires '{missing}' to have completed first")]
    StageOrder { stage: String, missing: String },

    /// The requested pull does not exist in storage
    #[error("pull {0} not found")]
    PullNotFound(i64),
}

impl SyncError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a conflict error
    pub fn conflict(entity: &'static str, id: i64) -> Self {
        Self::Conflict { entity, id }
    }

    /// Create a parse error for a staged record
    pub fn parse(entity: &'static str, id: i64, message: impl Into<String>) -> Self {
        Self::Parse {
            entity,
            id,
            message: message.into(),
        }
    }

    /// Whether this error is a duplicate-key conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}
