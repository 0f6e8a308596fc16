//! Three-way reconciliation between a local environment and the remote copy.
//!
//! A key conflicts when both sides advanced past the record's last synced
//! point. Push aborts (or, with force, lets local win); pull mirrors this
//! with the remote winning. All conflict lists come back sorted so the CLI
//! reports them deterministically.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use crate::error::CoreError;
use crate::types::{Environment, Project, RemoteStore, State};

/// Copy local records into the remote environment. On success every copied
/// record's `last_synced_remote_version` is advanced to its current version.
pub fn push_env(
    local: &mut Environment,
    remote: &mut Environment,
    force: bool,
) -> Result<(), CoreError> {
    let mut conflicts = BTreeSet::new();
    for (key, local_rec) in local.vars.iter() {
        let remote_current = remote
            .vars
            .get(key)
            .map(|r| r.current_version)
            .unwrap_or(0);
        if remote_current > local_rec.last_synced_remote_version
            && local_rec.current_version > local_rec.last_synced_remote_version
        {
            conflicts.insert(key.clone());
        }
    }
    if !conflicts.is_empty() && !force {
        return Err(CoreError::PushConflicts(conflicts.into_iter().collect()));
    }

    for (key, local_rec) in local.vars.iter_mut() {
        let remote_current = remote
            .vars
            .get(key)
            .map(|r| r.current_version)
            .unwrap_or(0);
        let conflicted = conflicts.contains(key);
        if conflicted || local_rec.current_version >= remote_current {
            remote.vars.insert(key.clone(), local_rec.clone());
            local_rec.last_synced_remote_version = local_rec.current_version;
        }
    }
    Ok(())
}

/// Copy remote records into the local environment. Copied records get
/// `last_synced_remote_version` set to the remote's current version.
pub fn pull_env(
    local: &mut Environment,
    remote: &Environment,
    force_remote: bool,
) -> Result<(), CoreError> {
    let mut conflicts = BTreeSet::new();
    for (key, remote_rec) in remote.vars.iter() {
        if let Some(local_rec) = local.vars.get(key) {
            if remote_rec.current_version > local_rec.last_synced_remote_version
                && local_rec.current_version > local_rec.last_synced_remote_version
            {
                conflicts.insert(key.clone());
            }
        }
    }
    if !conflicts.is_empty() && !force_remote {
        return Err(CoreError::PullConflicts(conflicts.into_iter().collect()));
    }

    for (key, remote_rec) in remote.vars.iter() {
        let take = match local.vars.get(key) {
            None => true,
            Some(local_rec) => {
                conflicts.contains(key)
                    || remote_rec.current_version >= local_rec.current_version
                    || force_remote
            }
        };
        if take {
            let mut copied = remote_rec.clone();
            copied.last_synced_remote_version = remote_rec.current_version;
            local.vars.insert(key.clone(), copied);
        }
    }
    Ok(())
}

/// Per-key relationship between the local and remote copies. Computed from
/// version numbers and plaintext hashes only; no phrase required.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiffClass {
    LocalOnly,
    RemoteOnly,
    Ahead,
    Behind,
    Differs,
    InSync,
}

#[derive(Clone, Debug)]
pub struct DiffEntry {
    pub key: String,
    pub class: DiffClass,
    pub local_version: i64,
    pub remote_version: i64,
}

/// Enumerate the union of keys, classifying each.
pub fn diff_env(local: &Environment, remote: &Environment) -> Vec<DiffEntry> {
    let keys: BTreeSet<&String> = local.vars.keys().chain(remote.vars.keys()).collect();
    let mut out = Vec::with_capacity(keys.len());
    for key in keys {
        let local_rec = local.vars.get(key);
        let remote_rec = remote.vars.get(key);
        let lv = local_rec.map(|r| r.current_version).unwrap_or(0);
        let rv = remote_rec.map(|r| r.current_version).unwrap_or(0);
        let class = match (local_rec, remote_rec) {
            (Some(_), None) => DiffClass::LocalOnly,
            (None, Some(_)) => DiffClass::RemoteOnly,
            (Some(l), Some(r)) => {
                if lv > rv {
                    DiffClass::Ahead
                } else if rv > lv {
                    DiffClass::Behind
                } else {
                    let lh = l.versions.last().map(|v| v.plain_hash.as_str());
                    let rh = r.versions.last().map(|v| v.plain_hash.as_str());
                    if lh != rh {
                        DiffClass::Differs
                    } else {
                        DiffClass::InSync
                    }
                }
            }
            (None, None) => unreachable!("key came from the union"),
        };
        out.push(DiffEntry {
            key: key.clone(),
            class,
            local_version: lv,
            remote_version: rv,
        });
    }
    out
}

/// After a restore, every record is in sync with the remote by definition.
pub fn mark_synced_versions(projects: &mut BTreeMap<String, Project>) {
    for project in projects.values_mut() {
        for env in project.envs.values_mut() {
            for rec in env.vars.values_mut() {
                rec.last_synced_remote_version = rec.current_version;
            }
        }
    }
}

/// Stamp the local salt and key-check onto an outgoing store.
pub fn attach_crypto_metadata(state: &State, remote: &mut RemoteStore) {
    remote.salt_b64 = state.salt_b64.clone();
    remote.key_check_b64 = state.key_check_b64.clone();
}

/// A populated remote must match our crypto metadata exactly. A fully empty
/// remote is accepted; the first pusher claims it.
pub fn validate_remote_crypto(state: &State, remote: &RemoteStore) -> Result<(), CoreError> {
    if remote.salt_b64.is_empty() && remote.key_check_b64.is_empty() {
        return Ok(());
    }
    if remote.salt_b64 != state.salt_b64 || remote.key_check_b64 != state.key_check_b64 {
        return Err(CoreError::PhraseMismatch);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SecretRecord, SecretVersion};

    fn record(current: i64, synced: i64) -> SecretRecord {
        let versions = (1..=current)
            .map(|v| SecretVersion {
                version: v,
                updated_at: "2026-01-01T00:00:00Z".into(),
                device_id: "dev1".into(),
                plain_hash: format!("hash-{v}"),
                ..Default::default()
            })
            .collect();
        SecretRecord {
            current_version: current,
            last_synced_remote_version: synced,
            versions,
        }
    }

    fn env(vars: Vec<(&str, SecretRecord)>) -> Environment {
        Environment {
            name: "dev".into(),
            vars: vars.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
        }
    }

    #[test]
    fn push_copies_new_and_ahead_keys() {
        let mut local = env(vec![("A", record(2, 1)), ("B", record(1, 0))]);
        let mut remote = env(vec![("A", record(1, 0))]);

        push_env(&mut local, &mut remote, false).unwrap();

        assert_eq!(remote.vars["A"].current_version, 2);
        assert_eq!(remote.vars["B"].current_version, 1);
        assert_eq!(local.vars["A"].last_synced_remote_version, 2);
        assert_eq!(local.vars["B"].last_synced_remote_version, 1);
    }

    #[test]
    fn push_detects_conflicts_and_aborts() {
        // Both sides advanced past last sync (1).
        let mut local = env(vec![("A", record(3, 1))]);
        let mut remote = env(vec![("A", record(2, 0))]);

        let err = push_env(&mut local, &mut remote, false).unwrap_err();
        match err {
            CoreError::PushConflicts(keys) => assert_eq!(keys, vec!["A".to_string()]),
            other => panic!("unexpected {other:?}"),
        }
        // Nothing was applied.
        assert_eq!(remote.vars["A"].current_version, 2);
        assert_eq!(local.vars["A"].last_synced_remote_version, 1);
    }

    #[test]
    fn push_force_overwrites_conflicts() {
        let mut local = env(vec![("A", record(3, 1))]);
        let mut remote = env(vec![("A", record(2, 0))]);

        push_env(&mut local, &mut remote, true).unwrap();
        assert_eq!(remote.vars["A"].current_version, 3);
        assert_eq!(local.vars["A"].last_synced_remote_version, 3);
    }

    #[test]
    fn push_skips_behind_keys() {
        // Local never changed since sync, remote moved on: leave remote alone.
        let mut local = env(vec![("A", record(1, 1))]);
        let mut remote = env(vec![("A", record(4, 0))]);

        push_env(&mut local, &mut remote, false).unwrap();
        assert_eq!(remote.vars["A"].current_version, 4);
        assert_eq!(local.vars["A"].last_synced_remote_version, 1);
    }

    #[test]
    fn pull_takes_new_and_newer_keys() {
        let mut local = env(vec![("A", record(1, 1))]);
        let remote = env(vec![("A", record(3, 0)), ("B", record(2, 0))]);

        pull_env(&mut local, &remote, false).unwrap();
        assert_eq!(local.vars["A"].current_version, 3);
        assert_eq!(local.vars["A"].last_synced_remote_version, 3);
        assert_eq!(local.vars["B"].current_version, 2);
        assert_eq!(local.vars["B"].last_synced_remote_version, 2);
    }

    #[test]
    fn pull_detects_conflicts() {
        let mut local = env(vec![("A", record(3, 1))]);
        let remote = env(vec![("A", record(2, 0))]);

        let err = pull_env(&mut local, &remote, false).unwrap_err();
        match err {
            CoreError::PullConflicts(keys) => assert_eq!(keys, vec!["A".to_string()]),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(local.vars["A"].current_version, 3);
    }

    #[test]
    fn pull_force_remote_wins() {
        let mut local = env(vec![("A", record(3, 1))]);
        let remote = env(vec![("A", record(2, 0))]);

        pull_env(&mut local, &remote, true).unwrap();
        assert_eq!(local.vars["A"].current_version, 2);
        assert_eq!(local.vars["A"].last_synced_remote_version, 2);
    }

    #[test]
    fn pull_keeps_local_ahead_without_conflict() {
        // Local moved on, remote unchanged since sync: keep local.
        let mut local = env(vec![("A", record(5, 2))]);
        let remote = env(vec![("A", record(2, 0))]);

        pull_env(&mut local, &remote, false).unwrap();
        assert_eq!(local.vars["A"].current_version, 5);
    }

    #[test]
    fn push_then_pull_converges() {
        let mut local = env(vec![("A", record(2, 0)), ("B", record(1, 0))]);
        let mut remote = env(vec![]);

        push_env(&mut local, &mut remote, false).unwrap();
        let mut second_device = env(vec![]);
        pull_env(&mut second_device, &remote, false).unwrap();

        for key in ["A", "B"] {
            assert_eq!(
                second_device.vars[key].current_version,
                local.vars[key].current_version
            );
            assert_eq!(
                second_device.vars[key].versions.len(),
                local.vars[key].versions.len()
            );
        }
    }

    #[test]
    fn sync_invariant_holds_after_push_and_pull() {
        let mut local = env(vec![("A", record(3, 1)), ("B", record(2, 2))]);
        let mut remote = env(vec![("B", record(2, 0))]);
        push_env(&mut local, &mut remote, false).unwrap();
        for rec in local.vars.values() {
            assert!(rec.last_synced_remote_version <= rec.current_version);
        }

        let mut other = env(vec![("A", record(1, 1))]);
        pull_env(&mut other, &remote, false).unwrap();
        for rec in other.vars.values() {
            assert!(rec.last_synced_remote_version <= rec.current_version);
        }
    }

    #[test]
    fn diff_classifies_every_case() {
        let mut ahead = record(2, 1);
        ahead.versions.last_mut().unwrap().plain_hash = "x".into();
        let local = env(vec![
            ("LOCAL_ONLY", record(1, 0)),
            ("AHEAD", ahead),
            ("BEHIND", record(1, 1)),
            ("SAME", record(2, 2)),
            ("DIFFERS", record(2, 2)),
        ]);
        let mut remote_differs = record(2, 0);
        remote_differs.versions.last_mut().unwrap().plain_hash = "other".into();
        let remote = env(vec![
            ("REMOTE_ONLY", record(1, 0)),
            ("AHEAD", record(1, 0)),
            ("BEHIND", record(3, 0)),
            ("SAME", record(2, 0)),
            ("DIFFERS", remote_differs),
        ]);

        let entries = diff_env(&local, &remote);
        let class_of = |key: &str| entries.iter().find(|e| e.key == key).unwrap().class;
        assert_eq!(class_of("LOCAL_ONLY"), DiffClass::LocalOnly);
        assert_eq!(class_of("REMOTE_ONLY"), DiffClass::RemoteOnly);
        assert_eq!(class_of("AHEAD"), DiffClass::Ahead);
        assert_eq!(class_of("BEHIND"), DiffClass::Behind);
        assert_eq!(class_of("SAME"), DiffClass::InSync);
        assert_eq!(class_of("DIFFERS"), DiffClass::Differs);
    }

    #[test]
    fn crypto_guard_accepts_empty_remote() {
        let state = State {
            version: 2,
            device_id: "d".into(),
            salt_b64: "salt".into(),
            key_check_b64: "check".into(),
            current_team: String::new(),
            current_project: String::new(),
            current_env: "dev".into(),
            project_bindings: BTreeMap::new(),
            teams: BTreeMap::new(),
            projects: BTreeMap::new(),
        };
        let mut remote = RemoteStore::empty();
        validate_remote_crypto(&state, &remote).unwrap();

        attach_crypto_metadata(&state, &mut remote);
        validate_remote_crypto(&state, &remote).unwrap();

        let mut foreign = remote.clone();
        foreign.salt_b64 = "other-salt".into();
        assert!(matches!(
            validate_remote_crypto(&state, &foreign),
            Err(CoreError::PhraseMismatch)
        ));
    }
}
