use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use envsync_core::{
    actor_id, attach_crypto_metadata, current_env_name, diff_env, mark_synced_versions, pull_env,
    push_env, require_project_role, resolve_project_name, validate_remote_crypto, CoreError,
    DiffClass, Environment, Project, Role, State, DEFAULT_ENV,
};

use crate::app::{cwd_key, App, CliResult};

pub fn push(app: &App, force: bool) -> CliResult {
    let mut state = app.load_state()?;
    let project_name = resolve_project_name(&state, &app.cwd)?;
    let actor = actor_id(&state);
    require_project_role(&state, &state.projects[&project_name], &actor, Role::Maintainer)?;
    let env_name = current_env_name(&state);
    if !state.projects[&project_name].envs.contains_key(&env_name) {
        return Err(CoreError::EnvMissing(env_name).into());
    }

    let remote_transport = app.remote()?;
    let mut remote = remote_transport.load()?;
    let expected_revision = remote.revision;
    validate_remote_crypto(&state, &remote)?;
    attach_crypto_metadata(&state, &mut remote);
    remote.teams = state.teams.clone();

    let remote_project = remote
        .projects
        .entry(project_name.clone())
        .or_insert_with(|| Project {
            name: project_name.clone(),
            team: None,
            envs: BTreeMap::new(),
        });
    let remote_env = remote_project
        .envs
        .entry(env_name.clone())
        .or_insert_with(|| Environment {
            name: env_name.clone(),
            vars: BTreeMap::new(),
        });

    let local_env = state
        .projects
        .get_mut(&project_name)
        .and_then(|p| p.envs.get_mut(&env_name))
        .ok_or_else(|| CoreError::EnvMissing(env_name.clone()))?;
    push_env(local_env, remote_env, force)?;

    remote_transport.save(&remote, expected_revision)?;
    app.save_state(&state)?;
    println!("push complete");
    app.audit.log(
        "push",
        Some(&app.audit_ctx(&state)),
        serde_json::json!({"project": project_name, "env": env_name, "force": force}),
    );
    Ok(())
}

pub fn pull(app: &App, force_remote: bool) -> CliResult {
    let mut state = app.load_state()?;
    let project_name = resolve_project_name(&state, &app.cwd)?;
    let actor = actor_id(&state);
    require_project_role(&state, &state.projects[&project_name], &actor, Role::Reader)?;
    let env_name = current_env_name(&state);

    let remote_transport = app.remote()?;
    let remote = remote_transport.load()?;
    if !remote.teams.is_empty() {
        state.teams = remote.teams.clone();
    }
    validate_remote_crypto(&state, &remote)?;

    let Some(remote_env) = remote
        .projects
        .get(&project_name)
        .and_then(|p| p.envs.get(&env_name))
    else {
        println!("nothing to pull");
        return Ok(());
    };

    let local_env = state
        .projects
        .get_mut(&project_name)
        .ok_or_else(|| CoreError::ActiveProjectMissing(project_name.clone()))?
        .envs
        .entry(env_name.clone())
        .or_insert_with(|| Environment {
            name: env_name.clone(),
            vars: BTreeMap::new(),
        });
    pull_env(local_env, remote_env, force_remote)?;

    app.save_state(&state)?;
    println!("pull complete");
    app.audit.log(
        "pull",
        Some(&app.audit_ctx(&state)),
        serde_json::json!({"project": project_name, "env": env_name, "force_remote": force_remote}),
    );
    Ok(())
}

pub fn diff(app: &App) -> CliResult {
    let state = app.load_state()?;
    let project_name = resolve_project_name(&state, &app.cwd)?;
    let actor = actor_id(&state);
    require_project_role(&state, &state.projects[&project_name], &actor, Role::Reader)?;
    let env_name = current_env_name(&state);

    let empty = Environment {
        name: env_name.clone(),
        vars: BTreeMap::new(),
    };
    let local_env = state.projects[&project_name]
        .envs
        .get(&env_name)
        .unwrap_or(&empty);

    let remote = app.remote()?.load()?;
    let remote_env = remote
        .projects
        .get(&project_name)
        .and_then(|p| p.envs.get(&env_name))
        .unwrap_or(&empty);

    let entries = diff_env(local_env, remote_env);
    if entries.iter().all(|e| e.class == DiffClass::InSync) {
        println!("in sync");
        return Ok(());
    }
    for entry in entries {
        let label = match entry.class {
            DiffClass::LocalOnly => "+local",
            DiffClass::RemoteOnly => "+remote",
            DiffClass::Ahead => "ahead",
            DiffClass::Behind => "behind",
            DiffClass::Differs => "differs",
            DiffClass::InSync => continue,
        };
        println!(
            "{} {} (local v{}, remote v{})",
            label, entry.key, entry.local_version, entry.remote_version
        );
    }
    Ok(())
}

pub fn restore(app: &App) -> CliResult {
    if envsync_core::state_exists(&app.state_path) {
        return Err("state already exists; remove it before restore".into());
    }
    let remote = app.remote()?.load()?;
    if remote.salt_b64.is_empty() || remote.key_check_b64.is_empty() {
        return Err(
            "remote store has no restore metadata; run push from an initialized device first"
                .into(),
        );
    }
    let phrase = app.read_phrase()?;
    let salt = BASE64
        .decode(&remote.salt_b64)
        .map_err(|e| format!("invalid remote salt: {e}"))?;
    let expected = BASE64
        .decode(&remote.key_check_b64)
        .map_err(|e| format!("invalid remote key check: {e}"))?;
    let key = envsync_crypto::derive_vault_key(&phrase, &salt)?;
    if !envsync_crypto::verify_key_check(&key, &expected) {
        return Err(CoreError::BadPhrase.into());
    }

    let device_id = envsync_crypto::random_hex(8);
    let mut state = State {
        version: envsync_core::CURRENT_STATE_SCHEMA_VERSION,
        device_id: device_id.clone(),
        salt_b64: remote.salt_b64.clone(),
        key_check_b64: remote.key_check_b64.clone(),
        current_team: String::new(),
        current_project: String::new(),
        current_env: DEFAULT_ENV.to_string(),
        project_bindings: BTreeMap::new(),
        teams: remote.teams.clone(),
        projects: remote.projects.clone(),
    };
    if let Some(first) = state.projects.keys().next().cloned() {
        state.current_project = first.clone();
        state.project_bindings.insert(cwd_key(&app.cwd), first);
    }
    mark_synced_versions(&mut state.projects);
    app.save_state(&state)?;
    println!("restore complete");
    app.audit.log(
        "restore",
        Some(&app.audit_ctx(&state)),
        serde_json::json!({"device_id": device_id, "projects": state.projects.len()}),
    );
    Ok(())
}
