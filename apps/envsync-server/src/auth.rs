//! Request authentication for `/v1/store`.

use axum::http::HeaderMap;
use subtle::ConstantTimeEq;

use crate::config::{AuthMode, ServerConfig};

fn constant_time_eq(a: &str, b: &str) -> bool {
    // ct_eq on unequal lengths short-circuits inside subtle, which is fine:
    // length is not secret here, only content.
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .trim()
}

fn valid_token(config: &ServerConfig, headers: &HeaderMap) -> bool {
    if config.token.is_empty() {
        return false;
    }
    let want = format!("Bearer {}", config.token);
    let got = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    constant_time_eq(got, &want)
}

fn valid_header_auth(config: &ServerConfig, headers: &HeaderMap) -> bool {
    if !config.auth_proxy_secret.is_empty() {
        let got = header_str(headers, "x-envsync-proxy-secret");
        if got.is_empty() || !constant_time_eq(got, &config.auth_proxy_secret) {
            return false;
        }
    }
    !header_str(headers, &config.auth_header).is_empty()
}

/// `Ok(())` when the request may touch the store.
pub fn authorize(config: &ServerConfig, headers: &HeaderMap) -> Result<(), &'static str> {
    let ok = match config.auth_mode {
        AuthMode::Off => true,
        AuthMode::Token => valid_token(config, headers),
        AuthMode::Header => valid_header_auth(config, headers),
        AuthMode::TokenOrHeader => {
            valid_token(config, headers) || valid_header_auth(config, headers)
        }
    };
    if ok {
        Ok(())
    } else {
        Err("unauthorized")
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn config(mode: AuthMode) -> ServerConfig {
        ServerConfig {
            addr: String::new(),
            store_path: "./store.json".into(),
            token: "test-token".into(),
            auth_mode: mode,
            auth_header: "X-Auth-Request-User".into(),
            auth_proxy_secret: "proxy-secret".into(),
            rate_limit_rpm: 0,
            rate_limit_burst: 0,
        }
    }

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(
                axum::http::HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    #[test]
    fn off_mode_allows_everything() {
        assert!(authorize(&config(AuthMode::Off), &HeaderMap::new()).is_ok());
    }

    #[test]
    fn token_mode_checks_bearer() {
        let cfg = config(AuthMode::Token);
        assert!(authorize(&cfg, &headers(&[("authorization", "Bearer test-token")])).is_ok());
        assert!(authorize(&cfg, &headers(&[("authorization", "Bearer wrong")])).is_err());
        assert!(authorize(&cfg, &HeaderMap::new()).is_err());
    }

    #[test]
    fn header_mode_needs_user_and_proxy_secret() {
        let cfg = config(AuthMode::Header);
        assert!(authorize(
            &cfg,
            &headers(&[
                ("x-auth-request-user", "alice"),
                ("x-envsync-proxy-secret", "proxy-secret"),
            ])
        )
        .is_ok());
        // Missing proxy secret.
        assert!(authorize(&cfg, &headers(&[("x-auth-request-user", "alice")])).is_err());
        // Missing user header.
        assert!(
            authorize(&cfg, &headers(&[("x-envsync-proxy-secret", "proxy-secret")])).is_err()
        );
        // Wrong secret.
        assert!(authorize(
            &cfg,
            &headers(&[
                ("x-auth-request-user", "alice"),
                ("x-envsync-proxy-secret", "nope"),
            ])
        )
        .is_err());
    }

    #[test]
    fn header_mode_without_proxy_secret_config() {
        let mut cfg = config(AuthMode::Header);
        cfg.auth_proxy_secret = String::new();
        assert!(authorize(&cfg, &headers(&[("x-auth-request-user", "alice")])).is_ok());
        assert!(authorize(&cfg, &HeaderMap::new()).is_err());
    }

    #[test]
    fn token_or_header_accepts_either() {
        let cfg = config(AuthMode::TokenOrHeader);
        assert!(authorize(&cfg, &headers(&[("authorization", "Bearer test-token")])).is_ok());
        assert!(authorize(
            &cfg,
            &headers(&[
                ("x-auth-request-user", "alice"),
                ("x-envsync-proxy-secret", "proxy-secret"),
            ])
        )
        .is_ok());
        assert!(authorize(&cfg, &HeaderMap::new()).is_err());
    }
}
