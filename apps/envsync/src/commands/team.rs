use std::str::FromStr;

use envsync_core::{actor_id, team_role, CoreError, Role, Team};

use crate::app::{App, CliResult};

pub fn create(app: &App, name: &str) -> CliResult {
    let mut state = app.load_state()?;
    if name.is_empty() {
        return Err("team name required".into());
    }
    if state.teams.contains_key(name) {
        return Err(format!("team {name:?} already exists").into());
    }
    let actor = actor_id(&state);
    let mut team = Team {
        name: name.to_string(),
        members: Default::default(),
    };
    team.members.insert(actor.clone(), Role::Admin);
    state.teams.insert(name.to_string(), team);
    if state.current_team.is_empty() {
        state.current_team = name.to_string();
    }
    app.save_state(&state)?;
    println!("created team {name}");
    app.audit.log(
        "team_create",
        Some(&app.audit_ctx(&state)),
        serde_json::json!({"team": name, "actor": actor}),
    );
    Ok(())
}

pub fn list(app: &App) -> CliResult {
    let state = app.load_state()?;
    if state.teams.is_empty() {
        println!("no teams");
        return Ok(());
    }
    for name in state.teams.keys() {
        let marker = if state.current_team == *name { "*" } else { " " };
        println!("{marker} {name}");
    }
    Ok(())
}

pub fn use_team(app: &App, name: &str) -> CliResult {
    let mut state = app.load_state()?;
    if !state.teams.contains_key(name) {
        return Err(format!("unknown team {name:?}").into());
    }
    let actor = actor_id(&state);
    if team_role(&state, name, &actor).is_none() {
        return Err(format!("actor is not a member of team {name:?}").into());
    }
    state.current_team = name.to_string();
    app.save_state(&state)?;
    println!("using team {name}");
    app.audit.log(
        "team_use",
        Some(&app.audit_ctx(&state)),
        serde_json::json!({"team": name}),
    );
    Ok(())
}

pub fn add_member(app: &App, team_name: &str, actor: &str, role: &str) -> CliResult {
    let mut state = app.load_state()?;
    let team_name = resolve_team_name(&state.current_team, team_name)?;
    if actor.is_empty() {
        return Err("actor required".into());
    }
    let role = Role::from_str(role)?;
    let current = actor_id(&state);
    require_team_admin(&state, &team_name, &current)?;
    let team = state
        .teams
        .get_mut(&team_name)
        .ok_or_else(|| format!("unknown team {team_name:?}"))?;
    team.members.insert(actor.to_string(), role);
    app.save_state(&state)?;
    println!("added {actor} to team {team_name} as {role}");
    app.audit.log(
        "team_add_member",
        Some(&app.audit_ctx(&state)),
        serde_json::json!({"team": team_name, "member": actor, "role": role.to_string()}),
    );
    Ok(())
}

pub fn remove_member(app: &App, team_name: &str, actor: &str) -> CliResult {
    let mut state = app.load_state()?;
    let team_name = resolve_team_name(&state.current_team, team_name)?;
    let current = actor_id(&state);
    require_team_admin(&state, &team_name, &current)?;
    let team = state
        .teams
        .get_mut(&team_name)
        .ok_or_else(|| format!("unknown team {team_name:?}"))?;
    if team.members.remove(actor).is_none() {
        return Err(format!("{actor:?} is not a member of team {team_name:?}").into());
    }
    app.save_state(&state)?;
    println!("removed {actor} from team {team_name}");
    app.audit.log(
        "team_remove_member",
        Some(&app.audit_ctx(&state)),
        serde_json::json!({"team": team_name, "member": actor}),
    );
    Ok(())
}

pub fn list_members(app: &App, team_name: Option<&str>) -> CliResult {
    let state = app.load_state()?;
    let team_name = resolve_team_name(&state.current_team, team_name.unwrap_or(""))?;
    let team = state
        .teams
        .get(&team_name)
        .ok_or_else(|| format!("unknown team {team_name:?}"))?;
    if team.members.is_empty() {
        println!("no members");
        return Ok(());
    }
    for (actor, role) in &team.members {
        println!("{role} {actor}");
    }
    Ok(())
}

fn resolve_team_name(current: &str, given: &str) -> Result<String, Box<dyn std::error::Error>> {
    let name = if given.is_empty() { current } else { given };
    if name.is_empty() {
        return Err("team name required".into());
    }
    Ok(name.to_string())
}

fn require_team_admin(
    state: &envsync_core::State,
    team_name: &str,
    actor: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    if !state.teams.contains_key(team_name) {
        return Err(format!("unknown team {team_name:?}").into());
    }
    match team_role(state, team_name, actor) {
        Some(role) if role.allows(Role::Admin) => Ok(()),
        _ => Err(CoreError::Unauthorized {
            team: team_name.to_string(),
        }
        .into()),
    }
}
