use thiserror::Error;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("remote changed concurrently: expected revision {expected}, got {got}")]
    RevisionConflict { expected: i64, got: i64 },

    #[error("remote {op} failed: {status} {message}")]
    HttpStatus {
        op: &'static str,
        status: u16,
        message: String,
    },

    #[error("remote request failed: {message}")]
    Network { message: String, retryable: bool },

    #[error("cloud URL is not configured; set ENVSYNC_CLOUD_URL")]
    CloudUrlMissing,

    #[error("cloud login required; run `envsync login`")]
    SessionMissing,

    #[error("cloud session expired; run `envsync login`")]
    SessionExpired,

    #[error("cloud session is invalid; run `envsync login`")]
    SessionInvalid,

    #[error("remote store is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RemoteError {
    /// Whether the retry loop may try again: transient network failures,
    /// HTTP 429, and 5xx. Other 4xx (including 409 conflicts) are final.
    pub fn is_retryable(&self) -> bool {
        match self {
            RemoteError::Network { retryable, .. } => *retryable,
            RemoteError::HttpStatus { status, .. } => {
                *status == 429 || (500..=599).contains(status)
            }
            _ => false,
        }
    }

    /// True for optimistic-concurrency failures from any backend.
    pub fn is_revision_conflict(&self) -> bool {
        matches!(
            self,
            RemoteError::RevisionConflict { .. }
                | RemoteError::HttpStatus { status: 409, .. }
        )
    }
}
