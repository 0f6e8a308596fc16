//! Local file permission checks and optional enforcement.
//!
//! The config directory must be 0700 and every data file 0600. With
//! `ENVSYNC_FIX_PERMISSIONS=true` offending paths are chmod'ed to the
//! expected mode.

use std::path::{Path, PathBuf};

use crate::app::App;

struct Target {
    path: PathBuf,
    kind: &'static str,
    mode: u32,
}

fn targets(app: &App) -> Vec<Target> {
    let mut out = vec![
        Target {
            path: app.config_dir.clone(),
            kind: "directory",
            mode: 0o700,
        },
        Target {
            path: app.state_path.clone(),
            kind: "file",
            mode: 0o600,
        },
    ];
    // The remote file (and its lock) only matter for the file backend.
    if app.settings.remote_url.is_empty() && app.settings.cloud_url.is_empty() {
        out.push(Target {
            path: app.settings.remote_file.clone(),
            kind: "file",
            mode: 0o600,
        });
        let mut lock = app.settings.remote_file.as_os_str().to_owned();
        lock.push(".lock");
        out.push(Target {
            path: PathBuf::from(lock),
            kind: "file",
            mode: 0o600,
        });
    }
    out.push(Target {
        path: app.audit.path().to_path_buf(),
        kind: "file",
        mode: 0o600,
    });
    out
}

#[cfg(unix)]
fn mode_of(path: &Path) -> Option<u32> {
    use std::os::unix::fs::PermissionsExt;
    Some(std::fs::metadata(path).ok()?.permissions().mode() & 0o777)
}

#[cfg(not(unix))]
fn mode_of(_path: &Path) -> Option<u32> {
    None
}

/// Paths whose modes are wider than expected, as human-readable findings.
pub fn permission_issues(app: &App) -> Vec<String> {
    let mut issues = Vec::new();
    for target in targets(app) {
        if !target.path.exists() {
            continue;
        }
        let Some(mode) = mode_of(&target.path) else {
            continue;
        };
        if mode & !target.mode != 0 {
            issues.push(format!(
                "{} {} is too permissive ({:o}, expected {:o} or stricter)",
                target.kind,
                target.path.display(),
                mode,
                target.mode
            ));
        }
    }
    issues
}

pub fn fix_permissions_enabled() -> bool {
    matches!(
        std::env::var("ENVSYNC_FIX_PERMISSIONS").as_deref(),
        Ok("true") | Ok("1")
    )
}

/// Chmod every existing over-permissive target to its expected mode.
/// Returns one line per applied fix.
pub fn fix_permissions(app: &App) -> Vec<String> {
    let mut fixed = Vec::new();
    #[cfg(unix)]
    for target in targets(app) {
        use std::os::unix::fs::PermissionsExt;
        let Some(mode) = mode_of(&target.path) else {
            continue;
        };
        if mode & !target.mode == 0 {
            continue;
        }
        if std::fs::set_permissions(&target.path, std::fs::Permissions::from_mode(target.mode))
            .is_ok()
        {
            fixed.push(format!(
                "fixed permissions for {} to {:o}",
                target.path.display(),
                target.mode
            ));
        }
    }
    #[cfg(not(unix))]
    let _ = app;
    fixed
}
