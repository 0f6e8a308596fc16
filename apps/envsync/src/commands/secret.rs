use std::collections::BTreeMap;
use std::path::Path;

use envsync_core::{
    actor_id, current_env_name, decrypt_current, delete_version, is_expired, parse_expiry,
    require_env, require_project_role, resolve_project_name, rollback_version, shell_export_line,
    version_status, write_version, CoreError, Role, State,
};

use crate::app::{App, CliResult};

/// Borrow the active environment mutably after the RBAC check.
fn writable_env<'a>(
    app: &App,
    state: &'a mut State,
    required: Role,
) -> Result<(&'a mut envsync_core::Environment, String, String), Box<dyn std::error::Error>> {
    let project_name = resolve_project_name(state, &app.cwd)?;
    let actor = actor_id(state);
    require_project_role(state, &state.projects[&project_name], &actor, required)?;
    let env_name = current_env_name(state);
    let project = state
        .projects
        .get_mut(&project_name)
        .ok_or_else(|| CoreError::ActiveProjectMissing(project_name.clone()))?;
    let env = require_env(&mut project.envs, &env_name)?;
    Ok((env, project_name, env_name))
}

fn readable_env<'a>(
    app: &App,
    state: &'a State,
) -> Result<&'a envsync_core::Environment, Box<dyn std::error::Error>> {
    let project_name = resolve_project_name(state, &app.cwd)?;
    let actor = actor_id(state);
    require_project_role(state, &state.projects[&project_name], &actor, Role::Reader)?;
    let env_name = current_env_name(state);
    state.projects[&project_name]
        .envs
        .get(&env_name)
        .ok_or_else(|| CoreError::EnvMissing(env_name).into())
}

pub fn set(app: &App, key: &str, value: &str, expires_at: Option<&str>) -> CliResult {
    let mut state = app.load_state()?;
    let now = app.now();
    let expires = parse_expiry(expires_at.unwrap_or(""), now)?;
    let secret_key = app.secret_key(&state)?;
    let device_id = state.device_id.clone();

    let (env, ..) = writable_env(app, &mut state, Role::Maintainer)?;
    let rec = env.vars.entry(key.to_string()).or_default();
    let version = write_version(rec, &secret_key, value, false, expires, now, &device_id)?;

    app.save_state(&state)?;
    println!("set {key}");
    app.audit.log(
        "set",
        Some(&app.audit_ctx(&state)),
        serde_json::json!({"key": key, "version": version}),
    );
    Ok(())
}

pub fn rotate(app: &App, key: &str, value: &str) -> CliResult {
    let mut state = app.load_state()?;
    let now = app.now();
    let secret_key = app.secret_key(&state)?;
    let device_id = state.device_id.clone();

    let (env, ..) = writable_env(app, &mut state, Role::Maintainer)?;
    let rec = env.vars.get_mut(key).ok_or_else(|| CoreError::NotFound {
        entity: "key",
        name: key.to_string(),
    })?;
    let version = write_version(rec, &secret_key, value, true, None, now, &device_id)?;

    app.save_state(&state)?;
    println!("rotated {key}");
    app.audit.log(
        "rotate",
        Some(&app.audit_ctx(&state)),
        serde_json::json!({"key": key, "version": version}),
    );
    Ok(())
}

pub fn get(app: &App, key: &str) -> CliResult {
    let state = app.load_state()?;
    let secret_key = app.secret_key(&state)?;
    let env = readable_env(app, &state)?;
    let rec = env.vars.get(key).ok_or_else(|| CoreError::NotFound {
        entity: "key",
        name: key.to_string(),
    })?;
    let value = decrypt_current(rec, key, &secret_key, app.now())?;
    println!("{value}");
    Ok(())
}

pub fn delete(app: &App, key: &str) -> CliResult {
    let mut state = app.load_state()?;
    let now = app.now();
    let device_id = state.device_id.clone();

    let (env, ..) = writable_env(app, &mut state, Role::Maintainer)?;
    let rec = env.vars.get_mut(key).ok_or_else(|| CoreError::NotFound {
        entity: "key",
        name: key.to_string(),
    })?;
    let version = delete_version(rec, now, &device_id);

    app.save_state(&state)?;
    println!("deleted {key}");
    app.audit.log(
        "delete",
        Some(&app.audit_ctx(&state)),
        serde_json::json!({"key": key, "version": version}),
    );
    Ok(())
}

pub fn list(app: &App, show: bool) -> CliResult {
    let state = app.load_state()?;
    let env = readable_env(app, &state)?;
    if env.vars.is_empty() {
        println!("no variables");
        return Ok(());
    }
    let secret_key = if show {
        Some(app.secret_key(&state)?)
    } else {
        None
    };
    let now = app.now();
    for (key, rec) in &env.vars {
        let Some(current) = rec.versions.last() else {
            continue;
        };
        if current.deleted {
            continue;
        }
        let expired = is_expired(current, now);
        match &secret_key {
            None => {
                if expired {
                    println!("{key}=****** (expired)");
                } else {
                    println!("{key}=******");
                }
            }
            Some(k) => {
                if expired {
                    println!("{key}=****** (expired)");
                    continue;
                }
                let value = decrypt_current(rec, key, k, now)?;
                println!("{key}={value}");
            }
        }
    }
    Ok(())
}

pub fn load(app: &App) -> CliResult {
    let state = app.load_state()?;
    let secret_key = app.secret_key(&state)?;
    let env = readable_env(app, &state)?;
    let now = app.now();
    for (key, rec) in &env.vars {
        let Some(current) = rec.versions.last() else {
            continue;
        };
        if current.deleted || is_expired(current, now) {
            continue;
        }
        let value = decrypt_current(rec, key, &secret_key, now)?;
        println!("{}", shell_export_line(key, &value));
    }
    Ok(())
}

pub fn history(app: &App, key: &str) -> CliResult {
    let state = app.load_state()?;
    let env = readable_env(app, &state)?;
    let rec = env.vars.get(key).ok_or_else(|| CoreError::NotFound {
        entity: "key",
        name: key.to_string(),
    })?;
    for v in &rec.versions {
        println!(
            "v{} {} {} {}",
            v.version,
            version_status(v),
            v.updated_at,
            v.device_id
        );
    }
    Ok(())
}

pub fn rollback(app: &App, key: &str, version: i64) -> CliResult {
    let mut state = app.load_state()?;
    let now = app.now();
    let device_id = state.device_id.clone();

    let (env, ..) = writable_env(app, &mut state, Role::Maintainer)?;
    let rec = env.vars.get_mut(key).ok_or_else(|| CoreError::NotFound {
        entity: "key",
        name: key.to_string(),
    })?;
    rollback_version(rec, version, now, &device_id)?;

    app.save_state(&state)?;
    println!("rolled back {key} to v{version}");
    app.audit.log(
        "rollback",
        Some(&app.audit_ctx(&state)),
        serde_json::json!({"key": key, "version": version}),
    );
    Ok(())
}

/// Parse minimal .env content: `KEY=VALUE` lines, `#` comments, blanks.
pub fn parse_env_content(content: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            out.push((key.trim().to_string(), value.trim().to_string()));
        }
    }
    out
}

/// Format secrets as .env content, keys sorted.
pub fn format_env_content(secrets: &BTreeMap<String, String>) -> String {
    secrets
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn import(app: &App, file: &Path) -> CliResult {
    let content = std::fs::read_to_string(file)?;
    let entries = parse_env_content(&content);
    if entries.is_empty() {
        return Err("no variables found in file".into());
    }

    let mut state = app.load_state()?;
    let now = app.now();
    let secret_key = app.secret_key(&state)?;
    let device_id = state.device_id.clone();

    let (env, ..) = writable_env(app, &mut state, Role::Maintainer)?;
    let count = entries.len();
    for (key, value) in entries {
        let rec = env.vars.entry(key).or_default();
        write_version(rec, &secret_key, &value, false, None, now, &device_id)?;
    }

    app.save_state(&state)?;
    println!("imported {count} variables");
    app.audit.log(
        "import",
        Some(&app.audit_ctx(&state)),
        serde_json::json!({"count": count, "file": file.to_string_lossy()}),
    );
    Ok(())
}

pub fn export(app: &App, file: &Path) -> CliResult {
    let state = app.load_state()?;
    let secret_key = app.secret_key(&state)?;
    let env = readable_env(app, &state)?;
    let now = app.now();

    let mut values = BTreeMap::new();
    for (key, rec) in &env.vars {
        let Some(current) = rec.versions.last() else {
            continue;
        };
        if current.deleted || is_expired(current, now) {
            continue;
        }
        values.insert(key.clone(), decrypt_current(rec, key, &secret_key, now)?);
    }
    std::fs::write(file, format_env_content(&values) + "\n")?;
    println!("exported {} variables", values.len());
    app.audit.log(
        "export",
        Some(&app.audit_ctx(&state)),
        serde_json::json!({"count": values.len(), "file": file.to_string_lossy()}),
    );
    Ok(())
}
