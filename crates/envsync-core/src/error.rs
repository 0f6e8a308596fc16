use thiserror::Error;

/// Errors surfaced by the vault model and state store. The CLI renders these
/// as a single `error: <message>` line.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("envsync is not initialized; run `envsync init`")]
    NotInitialized,

    #[error("already initialized")]
    AlreadyInitialized,

    #[error("invalid recovery phrase")]
    BadPhrase,

    #[error("{entity} {name:?} not found")]
    NotFound { entity: &'static str, name: String },

    #[error("version {0} not found")]
    VersionNotFound(i64),

    #[error("key {0:?} is deleted")]
    Deleted(String),

    #[error("key {0:?} is expired")]
    Expired(String),

    #[error("invalid expiry {0:?}: expected RFC3339 or a duration like 30m, 12h")]
    InvalidExpiry(String),

    #[error("invalid role {0:?}")]
    InvalidRole(String),

    #[error("insufficient permissions for team {team:?}")]
    Unauthorized { team: String },

    #[error("no active project; run `envsync project create <name>` and `envsync project use <name>`")]
    NoActiveProject,

    #[error("active project {0:?} missing")]
    ActiveProjectMissing(String),

    #[error("environment {0:?} does not exist")]
    EnvMissing(String),

    #[error("push conflicts for keys: {} (rerun with --force)", .0.join(", "))]
    PushConflicts(Vec<String>),

    #[error("pull conflicts for keys: {} (rerun with --force-remote)", .0.join(", "))]
    PullConflicts(Vec<String>),

    #[error("remote store is encrypted with a different recovery phrase")]
    PhraseMismatch,

    #[error("state file is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Kdf(#[from] envsync_crypto::KdfError),

    #[error(transparent)]
    Crypto(#[from] envsync_crypto::CryptoError),
}
