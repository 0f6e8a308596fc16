//! Single-blob revisioned store.
//!
//! The store is an open JSON document; only the top-level `revision` is
//! interpreted here so richer client schemas round-trip untouched. Writes
//! are read-modify-write under the caller's lock and persist via temp file
//! + rename with owner-only permissions.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde_json::{json, Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("revision conflict: expected {expected}, got {got}")]
    Conflict { expected: i64, got: i64 },
    #[error("missing projects")]
    MissingProjects,
    #[error("parse store: {0}")]
    Parse(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub struct BlobStore {
    path: PathBuf,
    current: Value,
}

fn empty_store() -> Value {
    json!({"version": 1, "revision": 0, "projects": {}})
}

fn revision_of(value: &Value) -> i64 {
    value.get("revision").and_then(Value::as_i64).unwrap_or(0)
}

impl BlobStore {
    /// Load the blob from disk, creating an empty store file when absent and
    /// initializing missing `projects`/`revision` members.
    pub fn open(path: PathBuf) -> Result<Self, StoreError> {
        let current = match std::fs::read(&path) {
            Ok(raw) => {
                let mut value: Value = serde_json::from_slice(&raw)?;
                if let Some(obj) = value.as_object_mut() {
                    obj.entry("projects").or_insert_with(|| json!({}));
                    obj.entry("revision").or_insert(json!(0));
                } else {
                    value = empty_store();
                }
                value
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                let value = empty_store();
                persist(&path, &value)?;
                value
            }
            Err(err) => return Err(err.into()),
        };
        Ok(Self { path, current })
    }

    pub fn snapshot(&self) -> Value {
        self.current.clone()
    }

    pub fn revision(&self) -> i64 {
        revision_of(&self.current)
    }

    /// Replace the blob if `expected_revision` matches; the stored copy gets
    /// `revision = expected + 1`.
    pub fn replace(&mut self, mut next: Map<String, Value>, expected_revision: i64) -> Result<i64, StoreError> {
        if !next.contains_key("projects") {
            return Err(StoreError::MissingProjects);
        }
        let current_revision = self.revision();
        if current_revision != expected_revision {
            return Err(StoreError::Conflict {
                expected: expected_revision,
                got: current_revision,
            });
        }
        let new_revision = current_revision + 1;
        next.insert("revision".into(), json!(new_revision));
        let next = Value::Object(next);
        persist(&self.path, &next)?;
        self.current = next;
        Ok(new_revision)
    }
}

fn persist(path: &Path, value: &Value) -> Result<(), StoreError> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let _ = std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700));
            }
        }
    }
    let body = serde_json::to_vec_pretty(value)?;
    let dir = path.parent().filter(|d| !d.as_os_str().is_empty());
    let mut tmp = match dir {
        Some(dir) => tempfile::NamedTempFile::new_in(dir)?,
        None => tempfile::NamedTempFile::new_in(".")?,
    };
    tmp.write_all(&body)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tmp.as_file()
            .set_permissions(std::fs::Permissions::from_mode(0o600))?;
    }
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
