//! Router, handlers and middleware.

use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use axum::body::Body;
use axum::extract::{ConnectInfo, DefaultBodyLimit, Request, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;

use crate::auth::authorize;
use crate::config::ServerConfig;
use crate::limiter::RateLimiter;
use crate::metrics::ServerMetrics;
use crate::store::{BlobStore, StoreError};

/// Request body cap for PUT /v1/store.
const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

pub struct AppState {
    pub config: ServerConfig,
    pub store: RwLock<BlobStore>,
    pub limiter: RateLimiter,
    pub metrics: ServerMetrics,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(handle_health))
        .route("/metrics", get(handle_metrics))
        .route("/v1/store", get(handle_store_get).put(handle_store_put))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            request_middleware,
        ))
        .with_state(state)
}

/// Request id + rate limiting + metrics + access log, outermost first.
async fn request_middleware(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let request_id = request_id_from(request.headers());
    let ip = client_ip(request.headers(), addr);

    let mut response = if path == "/v1/store"
        && state.limiter.enabled()
        && !state.limiter.allow(&ip, Instant::now())
    {
        state.metrics.record_rate_limited();
        let mut resp = (StatusCode::TOO_MANY_REQUESTS, "rate limit exceeded\n").into_response();
        resp.headers_mut()
            .insert("Retry-After", HeaderValue::from_static("1"));
        resp
    } else {
        next.run(request).await
    };

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("X-Request-Id", value);
    }
    let status = response.status().as_u16();
    state.metrics.record_status(status);
    tracing::info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        status,
        duration_ms = start.elapsed().as_millis() as u64,
        remote = %ip,
        "request"
    );
    response
}

async fn handle_health() -> &'static str {
    "ok"
}

async fn handle_metrics(State(state): State<Arc<AppState>>) -> Response {
    (
        [("Content-Type", "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
        .into_response()
}

async fn handle_store_get(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if authorize(&state.config, &headers).is_err() {
        state.metrics.record_unauthorized();
        return (StatusCode::UNAUTHORIZED, "unauthorized\n").into_response();
    }
    let snapshot = state
        .store
        .read()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .snapshot();
    axum::Json(snapshot).into_response()
}

async fn handle_store_put(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    if authorize(&state.config, &headers).is_err() {
        state.metrics.record_unauthorized();
        return (StatusCode::UNAUTHORIZED, "unauthorized\n").into_response();
    }

    let next: serde_json::Value = match serde_json::from_str(&body) {
        Ok(value) => value,
        Err(_) => return (StatusCode::BAD_REQUEST, "invalid json\n").into_response(),
    };
    let Some(next) = next.as_object().cloned() else {
        return (StatusCode::BAD_REQUEST, "invalid json\n").into_response();
    };

    let expected = match headers.get("if-match") {
        None => 0,
        Some(raw) => match raw.to_str().ok().and_then(|v| v.trim().parse::<i64>().ok()) {
            Some(v) => v,
            None => return (StatusCode::BAD_REQUEST, "invalid If-Match\n").into_response(),
        },
    };

    let result = state
        .store
        .write()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .replace(next, expected);
    match result {
        Ok(_) => StatusCode::OK.into_response(),
        Err(StoreError::Conflict { expected, got }) => (
            StatusCode::CONFLICT,
            format!("revision conflict: expected {expected}, got {got}\n"),
        )
            .into_response(),
        Err(StoreError::MissingProjects) => {
            (StatusCode::BAD_REQUEST, "missing projects\n").into_response()
        }
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, format!("{err}\n")).into_response(),
    }
}

pub fn request_id_from(headers: &HeaderMap) -> String {
    if let Some(existing) = headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return existing.to_string();
    }
    hex::encode(random_bytes_8())
}

fn random_bytes_8() -> [u8; 8] {
    let mut bytes = [0u8; 8];
    rand::fill(&mut bytes);
    bytes
}

/// First `X-Forwarded-For` hop, else the socket peer address.
pub fn client_ip(headers: &HeaderMap, addr: SocketAddr) -> String {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    addr.ip().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

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
    fn request_id_echoes_valid_header() {
        let id = request_id_from(&headers(&[("x-request-id", "abc-123")]));
        assert_eq!(id, "abc-123");
    }

    #[test]
    fn request_id_generated_when_missing_or_blank() {
        let generated = request_id_from(&HeaderMap::new());
        assert_eq!(generated.len(), 16);
        let blank = request_id_from(&headers(&[("x-request-id", "   ")]));
        assert_eq!(blank.len(), 16);
    }

    #[test]
    fn client_ip_prefers_first_forwarded_hop() {
        let addr: SocketAddr = "10.0.0.9:1234".parse().unwrap();
        assert_eq!(
            client_ip(
                &headers(&[("x-forwarded-for", "203.0.113.7, 10.0.0.1")]),
                addr
            ),
            "203.0.113.7"
        );
        assert_eq!(client_ip(&HeaderMap::new(), addr), "10.0.0.9");
    }
}
