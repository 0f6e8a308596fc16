use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use envsync_core::{create_private_dir, CoreError, State, DEFAULT_ENV};

use crate::app::{App, CliResult};

pub fn run(app: &App) -> CliResult {
    if envsync_core::state_exists(&app.state_path) {
        return Err(CoreError::AlreadyInitialized.into());
    }
    create_private_dir(&app.config_dir)?;

    let phrase = envsync_crypto::generate_phrase(12);
    let salt = envsync_crypto::random_bytes(16);
    let key = envsync_crypto::derive_vault_key(&phrase, &salt)?;
    let check = envsync_crypto::key_check(&key);
    let device_id = envsync_crypto::random_hex(8);

    let state = State {
        version: envsync_core::CURRENT_STATE_SCHEMA_VERSION,
        device_id: device_id.clone(),
        salt_b64: BASE64.encode(salt),
        key_check_b64: BASE64.encode(check),
        current_team: String::new(),
        current_project: String::new(),
        current_env: DEFAULT_ENV.to_string(),
        project_bindings: BTreeMap::new(),
        teams: BTreeMap::new(),
        projects: BTreeMap::new(),
    };
    app.save_state(&state)?;
    app.cache_phrase(&phrase);

    app.audit.log(
        "init",
        Some(&app.audit_ctx(&state)),
        serde_json::json!({"device_id": device_id}),
    );
    println!("envsync initialized\n");
    println!("Recovery phrase (save this now; it is not stored):\n{phrase}");
    Ok(())
}
