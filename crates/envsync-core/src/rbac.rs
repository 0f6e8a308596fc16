//! Team roles and per-project access checks.
//!
//! A project without an owning team grants everything to any caller. For
//! team-owned projects the actor's role on that team gates the operation;
//! `admin` implies the lower roles.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{Project, State};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Reader,
    #[serde(alias = "writer")]
    Maintainer,
    Admin,
}

impl Role {
    pub fn rank(self) -> u8 {
        match self {
            Role::Reader => 1,
            Role::Maintainer => 2,
            Role::Admin => 3,
        }
    }

    pub fn allows(self, required: Role) -> bool {
        self.rank() >= required.rank()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::Reader => "reader",
            Role::Maintainer => "maintainer",
            Role::Admin => "admin",
        };
        write!(f, "{s}")
    }
}

impl FromStr for Role {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reader" => Ok(Role::Reader),
            // `writer` is a historical alias kept for old state files.
            "maintainer" | "writer" => Ok(Role::Maintainer),
            "admin" => Ok(Role::Admin),
            other => Err(CoreError::InvalidRole(other.to_string())),
        }
    }
}

/// The acting identity: `ENVSYNC_ACTOR` when set, else this device's id.
pub fn actor_id(state: &State) -> String {
    match std::env::var("ENVSYNC_ACTOR") {
        Ok(actor) if !actor.trim().is_empty() => actor.trim().to_string(),
        _ => state.device_id.clone(),
    }
}

/// The actor's role on `team`, if any.
pub fn team_role(state: &State, team: &str, actor: &str) -> Option<Role> {
    state.teams.get(team)?.members.get(actor).copied()
}

/// Fail with `Unauthorized` unless the actor holds at least `required` on the
/// project's owning team. Projects without a team always pass.
pub fn require_project_role(
    state: &State,
    project: &Project,
    actor: &str,
    required: Role,
) -> Result<(), CoreError> {
    let Some(team) = project.team.as_deref() else {
        return Ok(());
    };
    match team_role(state, team, actor) {
        Some(role) if role.allows(required) => Ok(()),
        _ => Err(CoreError::Unauthorized {
            team: team.to_string(),
        }),
    }
}
