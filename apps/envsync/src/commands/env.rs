use envsync_core::{
    actor_id, current_env_name, require_project_role, resolve_project_name, Environment, Role,
};

use crate::app::{App, CliResult};

pub fn create(app: &App, name: &str) -> CliResult {
    let mut state = app.load_state()?;
    let project_name = resolve_project_name(&state, &app.cwd)?;
    let actor = actor_id(&state);
    require_project_role(&state, &state.projects[&project_name], &actor, Role::Maintainer)?;

    let project = state
        .projects
        .get_mut(&project_name)
        .ok_or_else(|| envsync_core::CoreError::ActiveProjectMissing(project_name.clone()))?;
    if project.envs.contains_key(name) {
        return Err(format!("environment {name:?} already exists").into());
    }
    project.envs.insert(
        name.to_string(),
        Environment {
            name: name.to_string(),
            vars: Default::default(),
        },
    );
    app.save_state(&state)?;
    println!("created environment {name}");
    app.audit.log(
        "env_create",
        Some(&app.audit_ctx(&state)),
        serde_json::json!({"env": name}),
    );
    Ok(())
}

pub fn use_env(app: &App, name: &str) -> CliResult {
    let mut state = app.load_state()?;
    let project_name = resolve_project_name(&state, &app.cwd)?;
    let actor = actor_id(&state);
    require_project_role(&state, &state.projects[&project_name], &actor, Role::Reader)?;

    if !state.projects[&project_name].envs.contains_key(name) {
        return Err(format!("unknown environment {name:?}").into());
    }
    state.current_env = name.to_string();
    app.save_state(&state)?;
    println!("using environment {name}");
    app.audit.log(
        "env_use",
        Some(&app.audit_ctx(&state)),
        serde_json::json!({"env": name}),
    );
    Ok(())
}

pub fn list(app: &App) -> CliResult {
    let state = app.load_state()?;
    let project_name = resolve_project_name(&state, &app.cwd)?;
    let actor = actor_id(&state);
    require_project_role(&state, &state.projects[&project_name], &actor, Role::Reader)?;

    let current = current_env_name(&state);
    for name in state.projects[&project_name].envs.keys() {
        let marker = if *name == current { "*" } else { " " };
        println!("{marker} {name}");
    }
    Ok(())
}
