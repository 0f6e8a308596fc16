//! Backend selection.
//!
//! Explicit `ENVSYNC_REMOTE_MODE` wins; otherwise a configured remote URL
//! selects HTTP, a cloud URL plus a stored session selects cloud, and the
//! flat file is the default.

use std::path::PathBuf;

use chrono::Utc;

use crate::error::RemoteError;
use crate::file::FileRemote;
use crate::http::HttpRemote;
use crate::session::SessionStore;
use crate::RemoteTransport;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RemoteMode {
    File,
    Http,
    Cloud,
}

impl RemoteMode {
    pub fn as_str(self) -> &'static str {
        match self {
            RemoteMode::File => "file",
            RemoteMode::Http => "http",
            RemoteMode::Cloud => "cloud",
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct RemoteSettings {
    pub mode: Option<String>,
    pub remote_url: String,
    pub remote_token: String,
    pub remote_file: PathBuf,
    pub cloud_url: String,
}

impl RemoteSettings {
    /// Read the remote configuration from the environment, defaulting the
    /// file path under `config_dir`.
    pub fn from_env(config_dir: &std::path::Path) -> Self {
        let remote_file = match std::env::var("ENVSYNC_REMOTE_FILE") {
            Ok(path) if !path.trim().is_empty() => PathBuf::from(path.trim()),
            _ => config_dir.join("remote_store.json"),
        };
        Self {
            mode: std::env::var("ENVSYNC_REMOTE_MODE").ok(),
            remote_url: env_trimmed("ENVSYNC_REMOTE_URL")
                .trim_end_matches('/')
                .to_string(),
            remote_token: env_trimmed("ENVSYNC_REMOTE_TOKEN"),
            remote_file,
            cloud_url: env_trimmed("ENVSYNC_CLOUD_URL")
                .trim_end_matches('/')
                .to_string(),
        }
    }

    pub fn effective_mode(&self, has_session: bool) -> RemoteMode {
        if let Some(mode) = self.mode.as_deref() {
            match mode.trim().to_lowercase().as_str() {
                "file" => return RemoteMode::File,
                "http" => return RemoteMode::Http,
                "cloud" => return RemoteMode::Cloud,
                _ => {}
            }
        }
        if !self.remote_url.is_empty() {
            return RemoteMode::Http;
        }
        if !self.cloud_url.is_empty() && has_session {
            return RemoteMode::Cloud;
        }
        RemoteMode::File
    }

    /// Build the transport for the effective mode. Cloud mode resolves the
    /// session token up front so expiry errors surface before any request.
    pub fn build_transport(
        &self,
        sessions: &SessionStore,
    ) -> Result<Box<dyn RemoteTransport>, RemoteError> {
        match self.effective_mode(sessions.exists()) {
            RemoteMode::File => Ok(Box::new(FileRemote::new(self.remote_file.clone()))),
            RemoteMode::Http => {
                let token = if self.remote_token.is_empty() {
                    None
                } else {
                    Some(self.remote_token.clone())
                };
                Ok(Box::new(HttpRemote::new(&self.remote_url, token)?))
            }
            RemoteMode::Cloud => {
                if self.cloud_url.is_empty() {
                    return Err(RemoteError::CloudUrlMissing);
                }
                let token = sessions.access_token(Utc::now())?;
                Ok(Box::new(HttpRemote::new(&self.cloud_url, Some(token))?))
            }
        }
    }

    /// The target string reported by `doctor`.
    pub fn describe_target(&self, has_session: bool) -> String {
        match self.effective_mode(has_session) {
            RemoteMode::File => self.remote_file.to_string_lossy().to_string(),
            RemoteMode::Http => self.remote_url.clone(),
            RemoteMode::Cloud => self.cloud_url.clone(),
        }
    }
}

fn env_trimmed(name: &str) -> String {
    std::env::var(name)
        .map(|v| v.trim().to_string())
        .unwrap_or_default()
}
