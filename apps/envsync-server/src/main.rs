mod auth;
mod config;
mod limiter;
mod metrics;
mod server;
mod store;

use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use config::ServerConfig;
use limiter::RateLimiter;
use metrics::ServerMetrics;
use server::AppState;
use store::BlobStore;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "envsync_server=info".into()),
        )
        .init();

    let config = ServerConfig::from_env();
    let store = match BlobStore::open(config.store_path.clone()) {
        Ok(store) => store,
        Err(err) => {
            tracing::error!("load store: {err}");
            std::process::exit(1);
        }
    };

    let limiter = RateLimiter::new(config.rate_limit_rpm, config.rate_limit_burst);
    tracing::info!("envsync-server listening on {}", config.addr);
    tracing::info!("store file: {}", config.store_path.display());
    tracing::info!("auth mode: {}", config.auth_mode.as_str());
    if limiter.enabled() {
        tracing::info!(
            "rate limit: {} rpm, burst {}",
            config.rate_limit_rpm,
            config.rate_limit_burst
        );
    } else {
        tracing::info!("rate limit: disabled");
    }

    let addr = config.addr.clone();
    let state = Arc::new(AppState {
        config,
        store: RwLock::new(store),
        limiter,
        metrics: ServerMetrics::default(),
    });

    // Periodic sweep keeps the limiter map bounded.
    {
        let state = state.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(300));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                state.limiter.sweep(Instant::now());
            }
        });
    }

    let app = server::router(state);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!("bind {addr}: {err}");
            std::process::exit(1);
        }
    };
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
    tracing::info!("shutdown signal received");
}
