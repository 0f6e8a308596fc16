//! On-disk and wire types. Field names are part of the JSON contract shared
//! with every remote backend; do not rename.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::rbac::Role;

/// Local per-device state, persisted at `<config>/envsync/state.json`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct State {
    pub version: i64,
    pub device_id: String,
    pub salt_b64: String,
    pub key_check_b64: String,
    #[serde(default)]
    pub current_team: String,
    #[serde(default)]
    pub current_project: String,
    #[serde(default)]
    pub current_env: String,
    #[serde(default)]
    pub project_bindings: BTreeMap<String, String>,
    #[serde(default)]
    pub teams: BTreeMap<String, Team>,
    #[serde(default)]
    pub projects: BTreeMap<String, Project>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Team {
    pub name: String,
    #[serde(default)]
    pub members: BTreeMap<String, Role>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Project {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team: Option<String>,
    #[serde(default)]
    pub envs: BTreeMap<String, Environment>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Environment {
    pub name: String,
    #[serde(default)]
    pub vars: BTreeMap<String, SecretRecord>,
}

/// One secret key's full version chain.
///
/// Invariants: `versions` is strictly increasing by `version`, never mutated
/// in place, `current_version` equals the last entry's version, and
/// `last_synced_remote_version <= current_version`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SecretRecord {
    pub current_version: i64,
    #[serde(default)]
    pub last_synced_remote_version: i64,
    #[serde(default)]
    pub versions: Vec<SecretVersion>,
}

/// One immutable encrypted snapshot of a secret value, or a tombstone.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SecretVersion {
    pub version: i64,
    #[serde(default)]
    pub nonce_b64: String,
    #[serde(default)]
    pub cipher_b64: String,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub rotated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
    pub updated_at: String,
    pub device_id: String,
    #[serde(default)]
    pub plain_hash: String,
}

/// The authoritative shared copy kept by a remote backend.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RemoteStore {
    pub version: i64,
    pub revision: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub salt_b64: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub key_check_b64: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub teams: BTreeMap<String, Team>,
    #[serde(default)]
    pub projects: BTreeMap<String, Project>,
}

impl RemoteStore {
    /// The store a backend reports before anything was ever pushed.
    pub fn empty() -> Self {
        Self {
            version: 1,
            revision: 0,
            salt_b64: String::new(),
            key_check_b64: String::new(),
            teams: BTreeMap::new(),
            projects: BTreeMap::new(),
        }
    }
}

impl Default for RemoteStore {
    fn default() -> Self {
        Self::empty()
    }
}

impl Project {
    pub fn with_default_env(name: &str, default_env: &str) -> Self {
        let mut envs = BTreeMap::new();
        envs.insert(
            default_env.to_string(),
            Environment {
                name: default_env.to_string(),
                vars: BTreeMap::new(),
            },
        );
        Self {
            name: name.to_string(),
            team: None,
            envs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_store_empty_shape() {
        let store = RemoteStore::empty();
        let json = serde_json::to_value(&store).unwrap();
        assert_eq!(json["version"], 1);
        assert_eq!(json["revision"], 0);
        assert!(json.get("salt_b64").is_none());
        assert!(json.get("teams").is_none());
        assert!(json["projects"].as_object().unwrap().is_empty());
    }

    #[test]
    fn secret_version_omits_empty_optionals() {
        let v = SecretVersion {
            version: 1,
            nonce_b64: "bm8=".into(),
            cipher_b64: "Y3Q=".into(),
            updated_at: "2026-01-01T00:00:00Z".into(),
            device_id: "abcd".into(),
            plain_hash: "00".into(),
            ..Default::default()
        };
        let json = serde_json::to_value(&v).unwrap();
        assert!(json.get("rotated").is_none());
        assert!(json.get("expires_at").is_none());
        assert_eq!(json["deleted"], false);
    }

    #[test]
    fn secret_version_round_trips_expiry() {
        let v = SecretVersion {
            version: 2,
            rotated: true,
            expires_at: Some("2026-06-01T00:00:00Z".into()),
            updated_at: "2026-01-01T00:00:00Z".into(),
            device_id: "abcd".into(),
            ..Default::default()
        };
        let json = serde_json::to_string(&v).unwrap();
        let back: SecretVersion = serde_json::from_str(&json).unwrap();
        assert!(back.rotated);
        assert_eq!(back.expires_at.as_deref(), Some("2026-06-01T00:00:00Z"));
    }

    #[test]
    fn legacy_remote_store_parses_without_teams() {
        let raw = r#"{"version":1,"revision":3,"projects":{}}"#;
        let store: RemoteStore = serde_json::from_str(raw).unwrap();
        assert_eq!(store.revision, 3);
        assert!(store.teams.is_empty());
    }
}
