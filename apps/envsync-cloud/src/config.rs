//! Environment-driven configuration.

#[derive(Clone, Debug)]
pub struct CloudConfig {
    pub addr: String,
    pub database_url: String,
    pub in_memory: bool,
    pub pat_pepper: String,
    pub dev_token: String,
    pub jwt_issuer: String,
    pub jwt_audience: String,
    pub jwt_skip_aud_check: bool,
    pub rate_limit_rpm: u32,
    pub rate_limit_burst: u32,
    pub max_body_bytes: usize,
}

impl CloudConfig {
    pub fn from_env() -> Self {
        let addr = match env_trimmed("ENVSYNC_CLOUD_ADDR") {
            addr if !addr.is_empty() => addr,
            _ => match env_trimmed("PORT") {
                port if !port.is_empty() => format!(":{port}"),
                _ => ":8081".to_string(),
            },
        };
        let mut burst = env_u32("ENVSYNC_CLOUD_RATE_LIMIT_BURST", 40);
        if burst == 0 {
            burst = 40;
        }
        let mut max_body = env_usize("ENVSYNC_CLOUD_MAX_BODY_BYTES", 1 << 20);
        if max_body == 0 {
            max_body = 1 << 20;
        }
        Self {
            addr,
            database_url: env_trimmed("ENVSYNC_CLOUD_DATABASE_URL"),
            in_memory: env_bool("ENVSYNC_CLOUD_INMEMORY"),
            pat_pepper: env_trimmed("ENVSYNC_CLOUD_PAT_PEPPER"),
            dev_token: env_trimmed("ENVSYNC_CLOUD_DEV_TOKEN"),
            jwt_issuer: env_trimmed("ENVSYNC_CLOUD_JWT_ISSUER"),
            jwt_audience: env_trimmed("ENVSYNC_CLOUD_JWT_AUDIENCE"),
            jwt_skip_aud_check: env_bool("ENVSYNC_CLOUD_JWT_SKIP_AUD_CHECK"),
            rate_limit_rpm: env_u32("ENVSYNC_CLOUD_RATE_LIMIT_RPM", 240),
            rate_limit_burst: burst,
            max_body_bytes: max_body,
        }
    }

    /// `:8081` style addresses bind every interface.
    pub fn bind_addr(&self) -> String {
        if self.addr.starts_with(':') {
            format!("0.0.0.0{}", self.addr)
        } else {
            self.addr.clone()
        }
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

fn env_usize(name: &str, fallback: usize) -> usize {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(fallback)
}

fn env_bool(name: &str) -> bool {
    matches!(
        std::env::var(name)
            .unwrap_or_default()
            .trim()
            .to_lowercase()
            .as_str(),
        "1" | "true" | "yes" | "y" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_addr_expands_bare_port() {
        let mut config = CloudConfig {
            addr: ":8081".into(),
            database_url: String::new(),
            in_memory: true,
            pat_pepper: String::new(),
            dev_token: String::new(),
            jwt_issuer: String::new(),
            jwt_audience: String::new(),
            jwt_skip_aud_check: false,
            rate_limit_rpm: 240,
            rate_limit_burst: 40,
            max_body_bytes: 1 << 20,
        };
        assert_eq!(config.bind_addr(), "0.0.0.0:8081");
        config.addr = "127.0.0.1:9000".into();
        assert_eq!(config.bind_addr(), "127.0.0.1:9000");
    }
}
