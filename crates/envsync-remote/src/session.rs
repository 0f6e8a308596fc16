//! Cloud session persistence.
//!
//! The session blob prefers the OS keychain and falls back to
//! `<config>/envsync/session.json` with owner-only permissions. An
//! `expires_at` in the past makes every token lookup fail before any
//! request goes out.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use envsync_core::{create_private_dir, write_private_atomic};

use crate::error::RemoteError;
use crate::keychain::{session_sink, KeychainSink};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CloudSession {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

pub struct SessionStore {
    path: PathBuf,
    keychain: KeychainSink,
}

impl SessionStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            keychain: session_sink(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Option<CloudSession> {
        if let Ok(Some(raw)) = self.keychain.get() {
            if let Ok(session) = serde_json::from_str::<CloudSession>(&raw) {
                return Some(session);
            }
        }
        let raw = std::fs::read(&self.path).ok()?;
        serde_json::from_slice(&raw).ok()
    }

    pub fn exists(&self) -> bool {
        self.load().is_some()
    }

    /// Persist to the keychain when possible; the file copy is removed on
    /// keychain success and written 0600 otherwise.
    pub fn save(&self, session: &CloudSession) -> Result<(), RemoteError> {
        let raw = serde_json::to_string(session)?;
        if self.keychain.put(&raw).is_ok() {
            let _ = std::fs::remove_file(&self.path);
            return Ok(());
        }
        if let Some(dir) = self.path.parent() {
            create_private_dir(dir)?;
        }
        write_private_atomic(&self.path, raw.as_bytes())?;
        Ok(())
    }

    /// Remove both copies. Used by `logout`.
    pub fn clear(&self) {
        let _ = std::fs::remove_file(&self.path);
        let _ = self.keychain.clear();
    }

    /// The access token, after checking expiry against `now`.
    pub fn access_token(&self, now: DateTime<Utc>) -> Result<String, RemoteError> {
        let session = self.load().ok_or(RemoteError::SessionMissing)?;
        if let Some(raw) = session.expires_at.as_deref() {
            if let Ok(expiry) = DateTime::parse_from_rfc3339(raw) {
                if now > expiry.with_timezone(&Utc) {
                    return Err(RemoteError::SessionExpired);
                }
            }
        }
        if session.access_token.trim().is_empty() {
            return Err(RemoteError::SessionInvalid);
        }
        Ok(session.access_token)
    }
}
