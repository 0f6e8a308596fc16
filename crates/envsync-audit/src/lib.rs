//! Append-only JSON-lines audit log.
//!
//! One event per line, written with a single append syscall so concurrent
//! writers never interleave within a line on POSIX. The log must never break
//! an operation: every failure in here is swallowed.
//!
//! Before each append the file is rotated when the next write would push it
//! past the size cap, or when it is older than the rotate interval and
//! non-empty. Rotation shifts `audit.log.i` to `.i+1` (dropping `.N`) and
//! then prunes rotated files older than the retention window.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};

pub const DEFAULT_MAX_BYTES: u64 = 1024 * 1024;
pub const DEFAULT_MAX_FILES: u32 = 5;
pub const DEFAULT_ROTATE_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);
pub const DEFAULT_RETENTION_DAYS: u32 = 30;

/// Context merged into every event when the caller has loaded state.
#[derive(Clone, Debug, Default)]
pub struct AuditContext {
    pub actor: String,
    pub device_id: String,
    pub team: String,
    pub project: String,
    pub environment: String,
}

pub struct AuditLog {
    path: PathBuf,
    cwd: PathBuf,
    max_bytes: u64,
    max_files: u32,
    rotate_interval: Duration,
    retention_days: u32,
    now: fn() -> DateTime<Utc>,
}

impl AuditLog {
    pub fn new(path: PathBuf, cwd: PathBuf) -> Self {
        Self {
            path,
            cwd,
            max_bytes: env_u64("ENVSYNC_AUDIT_MAX_BYTES", DEFAULT_MAX_BYTES),
            max_files: env_u32("ENVSYNC_AUDIT_MAX_FILES", DEFAULT_MAX_FILES),
            rotate_interval: env_duration_secs(
                "ENVSYNC_AUDIT_ROTATE_INTERVAL",
                DEFAULT_ROTATE_INTERVAL,
            ),
            retention_days: env_u32("ENVSYNC_AUDIT_RETENTION_DAYS", DEFAULT_RETENTION_DAYS),
            now: Utc::now,
        }
    }

    /// Override the limits; used by tests and by callers that already parsed
    /// configuration.
    pub fn with_limits(
        mut self,
        max_bytes: u64,
        max_files: u32,
        rotate_interval: Duration,
        retention_days: u32,
    ) -> Self {
        self.max_bytes = max_bytes;
        self.max_files = max_files;
        self.rotate_interval = rotate_interval;
        self.retention_days = retention_days;
        self
    }

    pub fn with_clock(mut self, now: fn() -> DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one event. Infallible by contract; any I/O problem is ignored.
    pub fn log(&self, action: &str, ctx: Option<&AuditContext>, fields: Value) {
        let mut event = Map::new();
        event.insert(
            "ts".into(),
            Value::String((self.now)().to_rfc3339_opts(SecondsFormat::Secs, true)),
        );
        event.insert("action".into(), Value::String(action.to_string()));
        event.insert(
            "cwd".into(),
            Value::String(self.cwd.to_string_lossy().to_string()),
        );
        if let Some(ctx) = ctx {
            event.insert("actor".into(), Value::String(ctx.actor.clone()));
            event.insert("device_id".into(), Value::String(ctx.device_id.clone()));
            if !ctx.team.is_empty() {
                event.insert("team".into(), Value::String(ctx.team.clone()));
            }
            if !ctx.project.is_empty() {
                event.insert("project".into(), Value::String(ctx.project.clone()));
            }
            if !ctx.environment.is_empty() {
                event.insert("environment".into(), Value::String(ctx.environment.clone()));
            }
        }
        if let Value::Object(extra) = fields {
            for (k, v) in extra {
                event.insert(k, v);
            }
        }

        let Ok(mut line) = serde_json::to_vec(&Value::Object(event)) else {
            return;
        };
        line.push(b'\n');

        let Some(dir) = self.path.parent() else {
            return;
        };
        if std::fs::create_dir_all(dir).is_err() {
            return;
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700));
        }

        self.rotate_if_needed(line.len() as u64);
        let file = std::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path);
        let Ok(mut file) = file else {
            return;
        };
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = file.set_permissions(std::fs::Permissions::from_mode(0o600));
        }
        let _ = file.write_all(&line);
    }

    fn rotate_if_needed(&self, next_write_bytes: u64) {
        let Ok(meta) = std::fs::metadata(&self.path) else {
            return;
        };

        let rotate_by_size =
            self.max_bytes > 0 && meta.len() + next_write_bytes > self.max_bytes;
        let rotate_by_age = !self.rotate_interval.is_zero()
            && meta.len() > 0
            && file_age(&meta, (self.now)())
                .map(|age| age >= self.rotate_interval)
                .unwrap_or(false);

        if !rotate_by_size && !rotate_by_age {
            self.prune_by_age();
            return;
        }

        let limit = self.max_files.max(1);
        let _ = std::fs::remove_file(self.rotated_path(limit));
        for i in (1..limit).rev() {
            let _ = std::fs::rename(self.rotated_path(i), self.rotated_path(i + 1));
        }
        let _ = std::fs::rename(&self.path, self.rotated_path(1));
        self.prune_by_age();
    }

    fn rotated_path(&self, i: u32) -> PathBuf {
        let mut os = self.path.as_os_str().to_owned();
        os.push(format!(".{i}"));
        PathBuf::from(os)
    }

    fn prune_by_age(&self) {
        if self.retention_days == 0 {
            return;
        }
        let cutoff = (self.now)() - chrono::Duration::days(i64::from(self.retention_days));
        for i in 1..=self.max_files.max(1) {
            let path = self.rotated_path(i);
            let Ok(meta) = std::fs::metadata(&path) else {
                continue;
            };
            let Ok(modified) = meta.modified() else {
                continue;
            };
            let modified: DateTime<Utc> = modified.into();
            if modified < cutoff {
                let _ = std::fs::remove_file(&path);
            }
        }
    }
}

fn file_age(meta: &std::fs::Metadata, now: DateTime<Utc>) -> Option<Duration> {
    let modified: DateTime<Utc> = meta.modified().ok()?.into();
    (now - modified).to_std().ok()
}

fn env_u64(name: &str, fallback: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(fallback)
}

fn env_u32(name: &str, fallback: u32) -> u32 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(fallback)
}

fn env_duration_secs(name: &str, fallback: Duration) -> Duration {
    // Accepts plain seconds or 24h/30m style suffixes.
    let Ok(raw) = std::env::var(name) else {
        return fallback;
    };
    let raw = raw.trim();
    if let Ok(secs) = raw.parse::<u64>() {
        return Duration::from_secs(secs);
    }
    let (num, unit) = raw.split_at(raw.find(|c: char| !c.is_ascii_digit()).unwrap_or(raw.len()));
    let Ok(num) = num.parse::<u64>() else {
        return fallback;
    };
    match unit {
        "s" => Duration::from_secs(num),
        "m" => Duration::from_secs(num * 60),
        "h" => Duration::from_secs(num * 3600),
        _ => fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn logger(dir: &Path) -> AuditLog {
        AuditLog::new(dir.join("audit.log"), PathBuf::from("/work")).with_limits(
            DEFAULT_MAX_BYTES,
            DEFAULT_MAX_FILES,
            DEFAULT_ROTATE_INTERVAL,
            DEFAULT_RETENTION_DAYS,
        )
    }

    fn read_lines(path: &Path) -> Vec<Value> {
        std::fs::read_to_string(path)
            .unwrap_or_default()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn writes_one_json_line_per_event() {
        let dir = tempfile::tempdir().unwrap();
        let log = logger(dir.path());
        log.log("set", None, serde_json::json!({"key": "TOKEN", "version": 1}));
        log.log("push", None, serde_json::json!({"project": "api"}));

        let lines = read_lines(log.path());
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["action"], "set");
        assert_eq!(lines[0]["key"], "TOKEN");
        assert_eq!(lines[0]["cwd"], "/work");
        assert!(lines[0]["ts"].as_str().unwrap().ends_with('Z'));
        assert_eq!(lines[1]["action"], "push");
    }

    #[test]
    fn context_fields_are_merged() {
        let dir = tempfile::tempdir().unwrap();
        let log = logger(dir.path());
        let ctx = AuditContext {
            actor: "alice".into(),
            device_id: "dev1".into(),
            team: "core".into(),
            project: "api".into(),
            environment: "dev".into(),
        };
        log.log("rotate", Some(&ctx), serde_json::json!({"key": "DB"}));

        let lines = read_lines(log.path());
        assert_eq!(lines[0]["actor"], "alice");
        assert_eq!(lines[0]["device_id"], "dev1");
        assert_eq!(lines[0]["team"], "core");
        assert_eq!(lines[0]["project"], "api");
        assert_eq!(lines[0]["environment"], "dev");
    }

    #[test]
    fn empty_context_strings_are_omitted() {
        let dir = tempfile::tempdir().unwrap();
        let log = logger(dir.path());
        let ctx = AuditContext {
            actor: "alice".into(),
            device_id: "dev1".into(),
            ..Default::default()
        };
        log.log("init", Some(&ctx), Value::Null);

        let lines = read_lines(log.path());
        assert!(lines[0].get("team").is_none());
        assert!(lines[0].get("project").is_none());
    }

    #[test]
    fn rotates_by_size() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::new(dir.path().join("audit.log"), PathBuf::from("/w"))
            .with_limits(200, 3, DEFAULT_ROTATE_INTERVAL, DEFAULT_RETENTION_DAYS);

        for i in 0..10 {
            log.log("set", None, serde_json::json!({"key": format!("K{i}")}));
        }

        assert!(log.path().exists());
        assert!(dir.path().join("audit.log.1").exists());
        // Cap honored: no rotation beyond .3.
        assert!(!dir.path().join("audit.log.4").exists());
        let size = std::fs::metadata(log.path()).unwrap().len();
        assert!(size <= 200, "live log kept under the cap, got {size}");
    }

    #[test]
    fn rotation_shifts_files_up() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        std::fs::write(&path, "old-live\n").unwrap();
        std::fs::write(dir.path().join("audit.log.1"), "old-1\n").unwrap();

        let log = AuditLog::new(path.clone(), PathBuf::from("/w")).with_limits(
            1, // every append rotates
            3,
            DEFAULT_ROTATE_INTERVAL,
            DEFAULT_RETENTION_DAYS,
        );
        log.log("set", None, Value::Null);

        assert_eq!(
            std::fs::read_to_string(dir.path().join("audit.log.2")).unwrap(),
            "old-1\n"
        );
        assert_eq!(
            std::fs::read_to_string(dir.path().join("audit.log.1")).unwrap(),
            "old-live\n"
        );
        let live = std::fs::read_to_string(&path).unwrap();
        assert!(live.contains("\"action\":\"set\""));
    }

    #[test]
    fn failures_are_swallowed() {
        // Point at an unwritable location; logging must not panic.
        let log = AuditLog::new(
            PathBuf::from("/proc/definitely/not/writable/audit.log"),
            PathBuf::from("/w"),
        );
        log.log("set", None, Value::Null);
    }
}
