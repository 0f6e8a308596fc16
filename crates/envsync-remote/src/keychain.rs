//! OS keychain access for the recovery phrase and the cloud session.
//!
//! Two named sinks, both optional: a missing or broken keychain must never
//! block an operation, callers fall back to env vars, files or prompts.

use thiserror::Error;

const ACCOUNT: &str = "envsync";
const DEFAULT_PHRASE_SERVICE: &str = "envsync-recovery-phrase";
const DEFAULT_SESSION_SERVICE: &str = "envsync-session";

#[derive(Debug, Error)]
pub enum KeychainError {
    #[error("keychain is not available on this system")]
    NotAvailable,
    #[error("keychain error: {0}")]
    Backend(String),
}

impl From<keyring::Error> for KeychainError {
    fn from(err: keyring::Error) -> Self {
        match err {
            keyring::Error::NoStorageAccess(_) | keyring::Error::PlatformFailure(_) => {
                KeychainError::NotAvailable
            }
            other => KeychainError::Backend(other.to_string()),
        }
    }
}

/// One named secret slot in the platform keychain.
pub struct KeychainSink {
    service: String,
}

impl KeychainSink {
    pub fn new(service: String) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    fn entry(&self) -> Result<keyring::Entry, KeychainError> {
        Ok(keyring::Entry::new(&self.service, ACCOUNT)?)
    }

    pub fn get(&self) -> Result<Option<String>, KeychainError> {
        match self.entry()?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    pub fn put(&self, value: &str) -> Result<(), KeychainError> {
        self.entry()?.set_password(value)?;
        Ok(())
    }

    pub fn clear(&self) -> Result<(), KeychainError> {
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// The recovery-phrase sink; service name from `ENVSYNC_KEYCHAIN_SERVICE`.
pub fn phrase_sink() -> KeychainSink {
    KeychainSink::new(service_from_env(
        "ENVSYNC_KEYCHAIN_SERVICE",
        DEFAULT_PHRASE_SERVICE,
    ))
}

/// The cloud-session sink; service name from `ENVSYNC_SESSION_SERVICE`.
pub fn session_sink() -> KeychainSink {
    KeychainSink::new(service_from_env(
        "ENVSYNC_SESSION_SERVICE",
        DEFAULT_SESSION_SERVICE,
    ))
}

fn service_from_env(name: &str, fallback: &str) -> String {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => fallback.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_service_names() {
        // Only assert the fallbacks; env overrides are covered by CLI tests.
        assert_eq!(
            service_from_env("ENVSYNC_TEST_UNSET_SERVICE", DEFAULT_PHRASE_SERVICE),
            "envsync-recovery-phrase"
        );
    }

    #[test]
    #[ignore = "requires system keychain"]
    fn put_get_clear_round_trip() {
        let sink = KeychainSink::new("envsync-test-sink".into());
        sink.put("value").unwrap();
        assert_eq!(sink.get().unwrap().as_deref(), Some("value"));
        sink.clear().unwrap();
        assert!(sink.get().unwrap().is_none());
    }

    #[test]
    #[ignore = "requires system keychain"]
    fn clear_missing_entry_is_ok() {
        let sink = KeychainSink::new("envsync-test-absent".into());
        sink.clear().unwrap();
    }
}
