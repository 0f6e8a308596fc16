//! Vault data model, state persistence, sync engine and RBAC for envsync.
//!
//! Everything here is synchronous and filesystem/JSON based. The CLI wires
//! these pieces to a remote transport; the servers only ever see the
//! [`RemoteStore`] wire type.

mod error;
mod expiry;
mod rbac;
mod state;
mod sync;
mod types;
mod vault;

pub use error::CoreError;
pub use expiry::{parse_duration, parse_expiry};
pub use rbac::{actor_id, require_project_role, team_role, Role};
pub use state::{
    create_private_dir, current_env_name, detect_project_from_marker, load_state, migrate_state,
    require_env, resolve_project_name, save_state, state_exists, write_private_atomic,
    CURRENT_STATE_SCHEMA_VERSION, DEFAULT_ENV,
};
pub use sync::{
    attach_crypto_metadata, diff_env, mark_synced_versions, pull_env, push_env,
    validate_remote_crypto, DiffClass, DiffEntry,
};
pub use types::{Environment, Project, RemoteStore, SecretRecord, SecretVersion, State, Team};
pub use vault::{
    current_version, decrypt_current, delete_version, is_expired, rollback_version,
    shell_export_line, version_status, write_version,
};
