use envsync_core::{actor_id, require_project_role, team_role, Project, Role, DEFAULT_ENV};

use crate::app::{cwd_key, App, CliResult};

pub fn create(app: &App, name: &str) -> CliResult {
    let mut state = app.load_state()?;
    if name.is_empty() {
        return Err("project name required".into());
    }
    if state.projects.contains_key(name) {
        return Err(format!("project {name:?} already exists").into());
    }
    let mut project = Project::with_default_env(name, DEFAULT_ENV);
    if !state.current_team.is_empty() {
        let actor = actor_id(&state);
        match team_role(&state, &state.current_team, &actor) {
            Some(role) if role.allows(Role::Maintainer) => {}
            _ => return Err("maintainer/admin role required on current team".into()),
        }
        project.team = Some(state.current_team.clone());
    }
    state.projects.insert(name.to_string(), project);
    if state.current_project.is_empty() {
        state.current_project = name.to_string();
    }
    app.save_state(&state)?;
    println!("created project {name}");
    app.audit.log(
        "project_create",
        Some(&app.audit_ctx(&state)),
        serde_json::json!({"project": name}),
    );
    Ok(())
}

pub fn list(app: &App) -> CliResult {
    let state = app.load_state()?;
    if state.projects.is_empty() {
        println!("no projects");
        return Ok(());
    }
    for name in state.projects.keys() {
        let marker = if state.current_project == *name {
            "*"
        } else {
            " "
        };
        println!("{marker} {name}");
    }
    Ok(())
}

pub fn use_project(app: &App, name: &str) -> CliResult {
    let mut state = app.load_state()?;
    let project = state
        .projects
        .get(name)
        .ok_or_else(|| format!("unknown project {name:?}"))?;
    let actor = actor_id(&state);
    require_project_role(&state, project, &actor, Role::Reader)?;
    state.current_project = name.to_string();
    state
        .project_bindings
        .insert(cwd_key(&app.cwd), name.to_string());
    if state.current_env.is_empty() {
        state.current_env = DEFAULT_ENV.to_string();
    }
    app.save_state(&state)?;
    println!("using project {name}");
    app.audit.log(
        "project_use",
        Some(&app.audit_ctx(&state)),
        serde_json::json!({"project": name}),
    );
    Ok(())
}

pub fn delete(app: &App, name: &str) -> CliResult {
    let mut state = app.load_state()?;
    let project = state
        .projects
        .get(name)
        .ok_or_else(|| format!("unknown project {name:?}"))?;
    let actor = actor_id(&state);
    require_project_role(&state, project, &actor, Role::Admin)?;

    state.projects.remove(name);
    if state.current_project == name {
        state.current_project = String::new();
    }
    state.project_bindings.retain(|_, bound| bound != name);
    app.save_state(&state)?;
    println!("deleted project {name}");
    app.audit.log(
        "project_delete",
        Some(&app.audit_ctx(&state)),
        serde_json::json!({"project": name}),
    );
    Ok(())
}
