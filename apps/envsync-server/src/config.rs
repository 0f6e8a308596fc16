//! Environment-driven server configuration.

use std::path::PathBuf;

/// How `/v1/store` requests are authenticated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthMode {
    Off,
    Token,
    Header,
    TokenOrHeader,
}

impl AuthMode {
    pub fn as_str(self) -> &'static str {
        match self {
            AuthMode::Off => "off",
            AuthMode::Token => "token",
            AuthMode::Header => "header",
            AuthMode::TokenOrHeader => "token_or_header",
        }
    }
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub addr: String,
    pub store_path: PathBuf,
    pub token: String,
    pub auth_mode: AuthMode,
    pub auth_header: String,
    pub auth_proxy_secret: String,
    pub rate_limit_rpm: u32,
    pub rate_limit_burst: u32,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let token = env_trimmed("ENVSYNC_SERVER_TOKEN");
        let mut addr = env_or("ENVSYNC_SERVER_ADDR", "0.0.0.0:8080");
        // `:8080` style addresses bind every interface.
        if addr.starts_with(':') {
            addr = format!("0.0.0.0{addr}");
        }
        Self {
            addr,
            store_path: PathBuf::from(env_or("ENVSYNC_SERVER_STORE", "./remote_store.json")),
            auth_mode: auth_mode_from(&env_trimmed("ENVSYNC_SERVER_AUTH_MODE"), &token),
            token,
            auth_header: {
                let header = env_trimmed("ENVSYNC_SERVER_AUTH_HEADER");
                if header.is_empty() {
                    "X-Auth-Request-User".to_string()
                } else {
                    header
                }
            },
            auth_proxy_secret: env_trimmed("ENVSYNC_SERVER_AUTH_PROXY_SECRET"),
            rate_limit_rpm: env_u32("ENVSYNC_SERVER_RATE_LIMIT_RPM", 240),
            rate_limit_burst: env_u32("ENVSYNC_SERVER_RATE_LIMIT_BURST", 40),
        }
    }
}

/// Default is `token` when a token is configured, otherwise `off`; unknown
/// values fall back to `off`.
pub fn auth_mode_from(raw: &str, token: &str) -> AuthMode {
    match raw.to_lowercase().as_str() {
        "" | "auto" => {
            if token.is_empty() {
                AuthMode::Off
            } else {
                AuthMode::Token
            }
        }
        "off" => AuthMode::Off,
        "token" => AuthMode::Token,
        "header" => AuthMode::Header,
        "token_or_header" => AuthMode::TokenOrHeader,
        _ => AuthMode::Off,
    }
}

fn env_or(name: &str, fallback: &str) -> String {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => fallback.to_string(),
    }
}

fn env_trimmed(name: &str) -> String {
    std::env::var(name)
        .map(|v| v.trim().to_string())
        .unwrap_or_default()
}

fn env_u32(name: &str, fallback: u32) -> u32 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_mode_defaults() {
        assert_eq!(auth_mode_from("", ""), AuthMode::Off);
        assert_eq!(auth_mode_from("", "secret"), AuthMode::Token);
        assert_eq!(auth_mode_from("auto", "secret"), AuthMode::Token);
    }

    #[test]
    fn auth_mode_explicit() {
        assert_eq!(auth_mode_from("off", "secret"), AuthMode::Off);
        assert_eq!(auth_mode_from("token", ""), AuthMode::Token);
        assert_eq!(auth_mode_from("HEADER", ""), AuthMode::Header);
        assert_eq!(auth_mode_from("token_or_header", ""), AuthMode::TokenOrHeader);
    }

    #[test]
    fn unknown_auth_mode_falls_back_to_off() {
        assert_eq!(auth_mode_from("mtls", "secret"), AuthMode::Off);
    }
}
