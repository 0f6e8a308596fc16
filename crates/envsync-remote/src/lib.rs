//! Remote store transports.
//!
//! One contract, three backends: a flat file guarded by an advisory lock, a
//! self-hosted HTTP server, and the managed cloud service. All of them load
//! a [`RemoteStore`] and save it under optimistic concurrency: a save must
//! name the revision it read, and bumps it by one on success.

mod config;
mod error;
mod file;
mod http;
mod keychain;
mod retry;
mod session;

pub use config::{RemoteMode, RemoteSettings};
pub use error::RemoteError;
pub use file::FileRemote;
pub use http::{cloud_me, HttpRemote};
pub use keychain::{phrase_sink, session_sink, KeychainError, KeychainSink};
pub use retry::{with_retry, RetryPolicy, SleepFn};
pub use session::{CloudSession, SessionStore};

use envsync_core::RemoteStore;

/// A remote backend. `save` must fail with
/// [`RemoteError::RevisionConflict`] (or the HTTP 409 equivalent) when the
/// remote's current revision differs from `expected_revision`, and must
/// store the payload with `revision = expected_revision + 1` otherwise.
pub trait RemoteTransport {
    fn load(&self) -> Result<RemoteStore, RemoteError>;
    fn save(&self, store: &RemoteStore, expected_revision: i64) -> Result<(), RemoteError>;

    /// Human-readable target for diagnostics (`doctor`).
    fn describe(&self) -> String;
}
