//! Shared command context: filesystem paths, remote settings, the audit log
//! and a per-process phrase cache.

use std::cell::RefCell;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};

use envsync_audit::{AuditContext, AuditLog};
use envsync_core::{actor_id, load_state, CoreError, State};
use envsync_crypto::VaultKey;
use envsync_remote::{phrase_sink, RemoteSettings, RemoteTransport, SessionStore};

pub type CliResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

pub struct App {
    pub config_dir: PathBuf,
    pub state_path: PathBuf,
    pub cwd: PathBuf,
    pub settings: RemoteSettings,
    pub sessions: SessionStore,
    pub audit: AuditLog,
    phrase_cache: RefCell<Option<String>>,
}

impl App {
    pub fn new() -> CliResult<App> {
        let config_dir = dirs::config_dir()
            .ok_or("could not determine the user config directory")?
            .join("envsync");
        let cwd = std::env::current_dir()?;
        Ok(Self::with_paths(config_dir, cwd))
    }

    /// Construct against explicit paths; the test entry point.
    pub fn with_paths(config_dir: PathBuf, cwd: PathBuf) -> App {
        let state_path = config_dir.join("state.json");
        let settings = RemoteSettings::from_env(&config_dir);
        let sessions = SessionStore::new(config_dir.join("session.json"));
        let audit = AuditLog::new(config_dir.join("audit.log"), cwd.clone());
        App {
            config_dir,
            state_path,
            cwd,
            settings,
            sessions,
            audit,
            phrase_cache: RefCell::new(None),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    pub fn load_state(&self) -> Result<State, CoreError> {
        load_state(&self.state_path)
    }

    pub fn save_state(&self, state: &State) -> Result<(), CoreError> {
        envsync_core::save_state(&self.state_path, state)
    }

    pub fn remote(&self) -> CliResult<Box<dyn RemoteTransport>> {
        Ok(self.settings.build_transport(&self.sessions)?)
    }

    /// Audit context for the loaded state. The audit log itself never fails.
    pub fn audit_ctx(&self, state: &State) -> AuditContext {
        AuditContext {
            actor: actor_id(state),
            device_id: state.device_id.clone(),
            team: state.current_team.clone(),
            project: state.current_project.clone(),
            environment: state.current_env.clone(),
        }
    }

    /// The recovery phrase: `ENVSYNC_RECOVERY_PHRASE`, then the keychain,
    /// then an interactive prompt on stderr.
    pub fn read_phrase(&self) -> CliResult<String> {
        if let Some(cached) = self.phrase_cache.borrow().clone() {
            return Ok(cached);
        }
        let phrase = self.read_phrase_uncached()?;
        *self.phrase_cache.borrow_mut() = Some(phrase.clone());
        Ok(phrase)
    }

    fn read_phrase_uncached(&self) -> CliResult<String> {
        if let Ok(phrase) = std::env::var("ENVSYNC_RECOVERY_PHRASE") {
            let phrase = phrase.trim().to_string();
            if !phrase.is_empty() {
                return Ok(phrase);
            }
        }
        if let Ok(Some(phrase)) = phrase_sink().get() {
            let phrase = phrase.trim().to_string();
            if !phrase.is_empty() {
                return Ok(phrase);
            }
        }
        eprint!("Recovery phrase: ");
        std::io::stderr().flush()?;
        let mut line = String::new();
        std::io::stdin().lock().read_line(&mut line)?;
        let phrase = line.trim().to_string();
        if phrase.is_empty() {
            return Err("recovery phrase cannot be empty".into());
        }
        Ok(phrase)
    }

    pub fn cache_phrase(&self, phrase: &str) {
        *self.phrase_cache.borrow_mut() = Some(phrase.to_string());
    }

    /// Derive the vault key from the phrase and verify it against the state's
    /// key-check tag.
    pub fn secret_key(&self, state: &State) -> CliResult<VaultKey> {
        let phrase = self.read_phrase()?;
        derive_checked_key(&phrase, state).map_err(Into::into)
    }
}

/// Derive a key from `phrase` using the state's salt and fail with
/// `BadPhrase` unless the key-check matches.
pub fn derive_checked_key(phrase: &str, state: &State) -> Result<VaultKey, CoreError> {
    let salt = BASE64
        .decode(&state.salt_b64)
        .map_err(|_| CoreError::BadPhrase)?;
    let expected = BASE64
        .decode(&state.key_check_b64)
        .map_err(|_| CoreError::BadPhrase)?;
    let key = envsync_crypto::derive_vault_key(phrase, &salt)?;
    if !envsync_crypto::verify_key_check(&key, &expected) {
        return Err(CoreError::BadPhrase);
    }
    Ok(key)
}

pub fn cwd_key(path: &Path) -> String {
    path.to_string_lossy().to_string()
}
