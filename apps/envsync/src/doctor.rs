//! Read-only diagnostics.

use serde::Serialize;

use envsync_core::current_env_name;
use envsync_remote::phrase_sink;

use crate::app::{App, CliResult};
use crate::permissions;

#[derive(Serialize)]
struct DoctorCheck {
    name: &'static str,
    ok: bool,
    details: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    hint: String,
}

fn check(name: &'static str, ok: bool, details: impl Into<String>, hint: &str) -> DoctorCheck {
    DoctorCheck {
        name,
        ok,
        details: details.into(),
        hint: hint.to_string(),
    }
}

fn collect_checks(app: &App) -> Vec<DoctorCheck> {
    let mut checks = Vec::new();

    if app.config_dir.exists() {
        checks.push(check(
            "config_dir",
            true,
            app.config_dir.display().to_string(),
            "",
        ));
    } else {
        checks.push(check(
            "config_dir",
            false,
            "config directory does not exist",
            "run `envsync init` to create local config and state",
        ));
    }

    match app.load_state() {
        Err(err) => checks.push(check(
            "state",
            false,
            err.to_string(),
            "initialize or restore first: `envsync init` or `envsync restore`",
        )),
        Ok(state) => {
            match envsync_core::resolve_project_name(&state, &app.cwd) {
                Err(err) => checks.push(check(
                    "active_project",
                    false,
                    err.to_string(),
                    "select a project with `envsync project use <name>` or create one with `envsync project create <name>`",
                )),
                Ok(project_name) => {
                    checks.push(check("active_project", true, project_name.clone(), ""));
                    let env_name = current_env_name(&state);
                    if state.projects[&project_name].envs.contains_key(&env_name) {
                        checks.push(check("active_env", true, env_name, ""));
                    } else {
                        checks.push(check(
                            "active_env",
                            false,
                            format!("environment {env_name:?} missing"),
                            "create/select an environment: `envsync env create <name>` then `envsync env use <name>`",
                        ));
                    }
                }
            }
        }
    }

    let has_session = app.sessions.exists();
    let mode = app.settings.effective_mode(has_session);
    checks.push(check("remote_mode", true, mode.as_str(), ""));
    checks.push(check(
        "remote_target",
        true,
        app.settings.describe_target(has_session),
        "",
    ));

    match app.remote().and_then(|r| Ok(r.load()?)) {
        Ok(_) => checks.push(check("remote_read", true, "ok", "")),
        Err(err) => checks.push(check(
            "remote_read",
            false,
            err.to_string(),
            "verify remote settings/token reachability and retry `envsync pull`",
        )),
    }

    if std::env::var("ENVSYNC_RECOVERY_PHRASE")
        .map(|v| !v.trim().is_empty())
        .unwrap_or(false)
    {
        checks.push(check(
            "recovery_phrase",
            true,
            "available via ENVSYNC_RECOVERY_PHRASE",
            "",
        ));
    } else if matches!(phrase_sink().get(), Ok(Some(p)) if !p.trim().is_empty()) {
        checks.push(check("recovery_phrase", true, "available via keychain", ""));
    } else {
        checks.push(check(
            "recovery_phrase",
            false,
            "ENVSYNC_RECOVERY_PHRASE is not set and keychain phrase is unavailable",
            "set ENVSYNC_RECOVERY_PHRASE or run `envsync phrase save` to use keychain-backed recovery",
        ));
    }

    if permissions::fix_permissions_enabled() {
        for fixed in permissions::fix_permissions(app) {
            checks.push(check("permissions", true, fixed, ""));
        }
    }
    for issue in permissions::permission_issues(app) {
        checks.push(check(
            "permissions",
            false,
            issue,
            "set ENVSYNC_FIX_PERMISSIONS=true to auto-fix insecure file modes",
        ));
    }

    checks
}

pub fn run(app: &App, as_json: bool) -> CliResult {
    let checks = collect_checks(app);
    let ok = checks.iter().all(|c| c.ok);

    if as_json {
        println!(
            "{}",
            serde_json::to_string(&serde_json::json!({"ok": ok, "checks": checks}))?
        );
    } else {
        for c in &checks {
            let status = if c.ok { "OK" } else { "FAIL" };
            println!("[{status}] {}: {}", c.name, c.details);
            if !c.ok && !c.hint.is_empty() {
                println!("      hint: {}", c.hint);
            }
        }
    }

    if !ok {
        return Err("doctor found issues".into());
    }
    if let Ok(state) = app.load_state() {
        app.audit.log(
            "doctor",
            Some(&app.audit_ctx(&state)),
            serde_json::json!({"status": "ok"}),
        );
    }
    Ok(())
}
