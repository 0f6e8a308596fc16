//! Local state persistence and selection helpers.
//!
//! The state file is pretty JSON written atomically (temp file + rename)
//! with owner-only permissions. Every load runs the schema migration.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::CoreError;
use crate::types::{Environment, State};

pub const CURRENT_STATE_SCHEMA_VERSION: i64 = 2;
pub const DEFAULT_ENV: &str = "dev";

pub fn state_exists(path: &Path) -> bool {
    path.exists()
}

/// Load and migrate the state file. Missing file means not initialized.
pub fn load_state(path: &Path) -> Result<State, CoreError> {
    let raw = match std::fs::read(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(CoreError::NotInitialized)
        }
        Err(err) => return Err(err.into()),
    };
    let mut state: State = serde_json::from_slice(&raw)?;
    migrate_state(&mut state);
    Ok(state)
}

/// Atomically persist the state: temp file in the same directory with mode
/// 0600, then rename over the target. The directory is created 0700.
pub fn save_state(path: &Path, state: &State) -> Result<(), CoreError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    create_private_dir(dir)?;

    let body = serde_json::to_vec_pretty(state)?;
    write_private_atomic(path, &body)?;
    Ok(())
}

/// Create `dir` (and parents) with owner-only permissions.
pub fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))?;
    }
    Ok(())
}

/// Write `body` to `path` via a sibling temp file with mode 0600 + rename.
pub fn write_private_atomic(path: &Path, body: &[u8]) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(body)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tmp.as_file()
            .set_permissions(std::fs::Permissions::from_mode(0o600))?;
    }
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Normalize a loaded state in place. Returns `(changed, from, to)`.
///
/// Version 1 documents get empty containers initialized and `current_env`
/// defaulted to `dev`; versions above the current schema are left alone.
pub fn migrate_state(state: &mut State) -> (bool, i64, i64) {
    let mut changed = false;
    let from = state.version;

    if state.version <= 0 {
        state.version = 1;
        changed = true;
    }
    if state.version < 2 && state.current_env.is_empty() {
        state.current_env = DEFAULT_ENV.to_string();
        changed = true;
    }
    if state.current_env.is_empty() {
        state.current_env = DEFAULT_ENV.to_string();
        changed = true;
    }
    // serde defaults already initialize missing containers; nothing to do for
    // project_bindings/teams/projects beyond the version bump.

    if state.version > CURRENT_STATE_SCHEMA_VERSION {
        return (changed, from, state.version);
    }
    if state.version < CURRENT_STATE_SCHEMA_VERSION {
        state.version = CURRENT_STATE_SCHEMA_VERSION;
        changed = true;
    }
    (changed, from, state.version)
}

/// Resolve the active project name: explicit selection, then the cwd
/// binding, then a `.envsync.json` marker in cwd or any ancestor.
pub fn resolve_project_name(state: &State, cwd: &Path) -> Result<String, CoreError> {
    let cwd_key = cwd.to_string_lossy().to_string();
    let mut name = state.current_project.clone();
    if name.is_empty() {
        name = state
            .project_bindings
            .get(&cwd_key)
            .cloned()
            .unwrap_or_default();
    }
    if name.is_empty() {
        name = detect_project_from_marker(cwd, state).unwrap_or_default();
    }
    if name.is_empty() {
        return Err(CoreError::NoActiveProject);
    }
    if !state.projects.contains_key(&name) {
        return Err(CoreError::ActiveProjectMissing(name));
    }
    Ok(name)
}

/// The active environment name (`dev` when unset).
pub fn current_env_name(state: &State) -> String {
    if state.current_env.is_empty() {
        DEFAULT_ENV.to_string()
    } else {
        state.current_env.clone()
    }
}

/// Ensure the environment exists on the project, creating nothing. Returns a
/// mutable handle or `EnvMissing`.
pub fn require_env<'a>(
    envs: &'a mut BTreeMap<String, Environment>,
    env_name: &str,
) -> Result<&'a mut Environment, CoreError> {
    envs.get_mut(env_name)
        .ok_or_else(|| CoreError::EnvMissing(env_name.to_string()))
}

#[derive(Deserialize)]
struct ProjectMarker {
    #[serde(default)]
    project: String,
}

/// Walk from `cwd` to the filesystem root looking for `.envsync.json` with a
/// `project` member naming a project that exists in `state`.
pub fn detect_project_from_marker(cwd: &Path, state: &State) -> Option<String> {
    let mut dir: PathBuf = cwd.to_path_buf();
    loop {
        let marker = dir.join(".envsync.json");
        if let Ok(raw) = std::fs::read(&marker) {
            if let Ok(parsed) = serde_json::from_slice::<ProjectMarker>(&raw) {
                if !parsed.project.is_empty() && state.projects.contains_key(&parsed.project) {
                    return Some(parsed.project);
                }
            }
        }
        if !dir.pop() {
            return None;
        }
    }
}
