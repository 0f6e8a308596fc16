mod auth;
mod config;
mod limiter;
mod oidc;
mod repo;
mod server;
#[cfg(test)]
mod tests;
mod tokens;

use std::net::SocketAddr;
use std::sync::Arc;

use chrono::Utc;
use regex::Regex;
use sqlx::postgres::PgPoolOptions;

use auth::AuthVerifier;
use config::CloudConfig;
use limiter::RateLimiter;
use oidc::OidcVerifier;
use repo::{MemoryRepo, PgRepo, StoreRepo};
use server::CloudState;

const MIGRATION_SQL: &str = include_str!("../migrations/001_init.sql");

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "envsync_cloud=info".into()),
        )
        .init();

    let config = CloudConfig::from_env();

    let mut pool = None;
    let repo: Box<dyn StoreRepo> = if config.in_memory {
        tracing::info!("envsync-cloud: using in-memory store");
        Box::new(MemoryRepo::new())
    } else {
        if config.database_url.is_empty() {
            tracing::error!(
                "ENVSYNC_CLOUD_DATABASE_URL is required unless ENVSYNC_CLOUD_INMEMORY=true"
            );
            std::process::exit(1);
        }
        let connected = match PgPoolOptions::new()
            .max_connections(10)
            .connect(&config.database_url)
            .await
        {
            Ok(pool) => pool,
            Err(err) => {
                tracing::error!("open db: {err}");
                std::process::exit(1);
            }
        };
        if let Err(err) = sqlx::raw_sql(MIGRATION_SQL).execute(&connected).await {
            tracing::error!("run migrations: {err}");
            std::process::exit(1);
        }
        tracing::info!("envsync-cloud: connected to postgres");
        pool = Some(connected.clone());
        Box::new(PgRepo::new(connected))
    };

    if pool.is_some() && config.pat_pepper.is_empty() {
        tracing::warn!("ENVSYNC_CLOUD_PAT_PEPPER is empty; PAT authentication is disabled");
    }

    let oidc = if config.jwt_issuer.is_empty() {
        None
    } else {
        match OidcVerifier::discover(
            &config.jwt_issuer,
            &config.jwt_audience,
            config.jwt_skip_aud_check,
        )
        .await
        {
            Ok(verifier) => Some(verifier),
            Err(err) => {
                tracing::error!("init oidc provider: {err}");
                std::process::exit(1);
            }
        }
    };

    let verifier = AuthVerifier {
        pool,
        pat_pepper: config.pat_pepper.clone(),
        dev_token: config.dev_token.clone(),
        oidc,
        now: Utc::now,
    };

    let state = Arc::new(CloudState {
        repo,
        verifier,
        limiter: RateLimiter::new(config.rate_limit_rpm, config.rate_limit_burst),
        max_body_bytes: config.max_body_bytes,
        project_re: Regex::new(server::PROJECT_NAME_PATTERN)
            .unwrap_or_else(|_| std::process::exit(1)),
    });

    let addr = config.bind_addr();
    tracing::info!("envsync-cloud listening on {addr}");
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!("bind {addr}: {err}");
            std::process::exit(1);
        }
    };
    let app = server::router(state);
    if let Err(err) = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    {
        tracing::error!("serve: {err}");
        std::process::exit(1);
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        if let Ok(mut sig) = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            sig.recv().await;
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
