use std::io::{BufRead, Write};

use envsync_remote::{cloud_me, CloudSession, RemoteError};

use crate::app::{App, CliResult};

fn cloud_url(app: &App) -> Result<String, RemoteError> {
    if app.settings.cloud_url.is_empty() {
        return Err(RemoteError::CloudUrlMissing);
    }
    Ok(app.settings.cloud_url.clone())
}

fn json_str(value: &serde_json::Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn login(app: &App) -> CliResult {
    let base_url = cloud_url(app)?;

    let mut token = std::env::var("ENVSYNC_CLOUD_ACCESS_TOKEN")
        .map(|t| t.trim().to_string())
        .unwrap_or_default();
    if token.is_empty() {
        eprint!("Cloud access token: ");
        std::io::stderr().flush()?;
        let mut line = String::new();
        std::io::stdin().lock().read_line(&mut line)?;
        token = line.trim().to_string();
    }
    if token.is_empty() {
        return Err("access token cannot be empty".into());
    }

    let me = cloud_me(&base_url, &token)?;
    let session = CloudSession {
        access_token: token,
        refresh_token: None,
        expires_at: None,
        user_id: json_str(&me, "id"),
        email: json_str(&me, "email"),
    };
    app.sessions.save(&session)?;

    match &session.email {
        Some(email) => println!("logged in as {email}"),
        None => println!("login successful"),
    }
    app.audit.log(
        "login",
        None,
        serde_json::json!({
            "email": session.email.clone().unwrap_or_default(),
            "user_id": session.user_id.clone().unwrap_or_default(),
        }),
    );
    Ok(())
}

pub fn logout(app: &App) -> CliResult {
    app.sessions.clear();
    println!("logged out");
    app.audit.log("logout", None, serde_json::Value::Null);
    Ok(())
}

pub fn whoami(app: &App) -> CliResult {
    let session = app
        .sessions
        .load()
        .ok_or("not logged in; run `envsync login`")?;
    let base_url = cloud_url(app)?;
    let me = cloud_me(&base_url, &session.access_token)?;

    let email = json_str(&me, "email").or(session.email);
    let id = json_str(&me, "id").or(session.user_id);
    if email.is_none() && id.is_none() {
        println!("{}", serde_json::to_string_pretty(&me)?);
        return Ok(());
    }
    if let Some(email) = email {
        println!("email: {email}");
    }
    if let Some(id) = id {
        println!("id: {id}");
    }
    Ok(())
}
