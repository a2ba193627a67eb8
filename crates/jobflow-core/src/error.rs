//! Error types for jobflow-core.

use thiserror::Error;

/// Result type alias using jobflow-core's Error type.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors that can occur in the platform core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Backing key-value store failure
    #[error("store error: {0}")]
    Store(#[from] sled::Error),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// A rate limit denied the request. `retry_after_secs` is the time until
    /// the current window ends.
    #[error("{name} limit exceeded; try again in {retry_after_secs} seconds")]
    LimitDenied { name: String, retry_after_secs: i64 },

    /// The global LLM budget cannot admit another request right now.
    #[error("API quota exceeded: {reason}")]
    QuotaExceeded { reason: String },

    /// User already holds the maximum number of queued + running jobs.
    #[error("user {user_id} has reached maximum concurrent jobs limit ({max})")]
    UserJobCap { user_id: uuid::Uuid, max: usize },

    #[error("job {0} not found")]
    JobNotFound(uuid::Uuid),

    #[error("no handler registered for job type: {0}")]
    UnknownJobType(String),

    #[error("job was cancelled")]
    Cancelled,

    #[error("job timed out after {seconds} seconds")]
    JobTimeout { seconds: u64 },

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("backup error: {0}")]
    Backup(String),

    /// The backup file on disk does not match its recorded checksum.
    /// Restore MUST abort without side effects.
    #[error("backup {backup_id} checksum mismatch - file may be corrupted")]
    ChecksumMismatch { backup_id: String },

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("vault error: {0}")]
    Vault(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl CoreError {
    /// True when the error is a limit/quota admission failure that should be
    /// reported to the user verbatim rather than retried.
    pub fn is_admission_failure(&self) -> bool {
        matches!(
            self,
            CoreError::LimitDenied { .. } | CoreError::QuotaExceeded { .. } | CoreError::UserJobCap { .. }
        )
    }
}
