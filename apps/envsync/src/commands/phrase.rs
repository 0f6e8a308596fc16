use envsync_remote::phrase_sink;

use crate::app::{derive_checked_key, App, CliResult};

pub fn save(app: &App) -> CliResult {
    let state = app.load_state()?;
    let phrase = app.read_phrase()?;
    // Refuse to store a phrase that does not open this vault.
    derive_checked_key(&phrase, &state)?;

    let sink = phrase_sink();
    sink.put(&phrase)?;
    app.cache_phrase(&phrase);
    println!("saved recovery phrase to keychain");
    app.audit.log(
        "phrase_save",
        Some(&app.audit_ctx(&state)),
        serde_json::json!({"service": sink.service()}),
    );
    Ok(())
}

pub fn clear(app: &App) -> CliResult {
    let sink = phrase_sink();
    sink.clear()?;
    println!("cleared recovery phrase from keychain");
    app.audit.log(
        "phrase_clear",
        None,
        serde_json::json!({"service": sink.service()}),
    );
    Ok(())
}
