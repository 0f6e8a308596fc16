//! Routes, handlers and middleware for the control plane.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::body::{Body, Bytes};
use axum::extract::{ConnectInfo, DefaultBodyLimit, Path, Query, Request, State};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use chrono::{DateTime, SecondsFormat, Utc};
use regex::Regex;
use serde::Deserialize;
use sqlx::Row;

use crate::auth::{AuthVerifier, Principal};
use crate::limiter::RateLimiter;
use crate::repo::{RepoError, StoreDoc, StoreRepo};
use crate::tokens::{generate_pat, validate_scopes, DEFAULT_SCOPES};

pub const PROJECT_NAME_PATTERN: &str = "^[a-z0-9][a-z0-9_-]{0,62}$";

pub struct CloudState {
    pub repo: Box<dyn StoreRepo>,
    pub verifier: AuthVerifier,
    pub limiter: RateLimiter,
    pub max_body_bytes: usize,
    pub project_re: Regex,
}

#[derive(Clone)]
pub struct RequestId(pub String);

pub fn router(state: Arc<CloudState>) -> Router {
    let max_body = state.max_body_bytes;
    Router::new()
        .route("/healthz", get(handle_health))
        .route("/v1/me", get(handle_me))
        .route("/v1/store", get(handle_store_get).put(handle_store_put))
        .route("/v1/tokens", post(handle_token_create))
        .route("/v1/tokens/{id}", axum::routing::delete(handle_token_delete))
        .layer(DefaultBodyLimit::max(max_body))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            request_middleware,
        ))
        .with_state(state)
}

/// Request id, rate limiting (healthz exempt), body-size precheck, access
/// log. Every response carries `X-Request-Id`.
async fn request_middleware(
    State(state): State<Arc<CloudState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let request_id = request_id_from(request.headers());
    let ip = client_ip(request.headers(), addr);

    request
        .extensions_mut()
        .insert(RequestId(request_id.clone()));

    let mut response = if path != "/healthz"
        && state.limiter.enabled()
        && !state.limiter.allow(&ip, Instant::now())
    {
        api_error(
            StatusCode::TOO_MANY_REQUESTS,
            "too_many_requests",
            "rate limit exceeded",
            &request_id,
        )
    } else if content_length_over(request.headers(), state.max_body_bytes) {
        api_error(
            StatusCode::PAYLOAD_TOO_LARGE,
            "payload_too_large",
            "request body exceeds maximum allowed size",
            &request_id,
        )
    } else {
        next.run(request).await
    };

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("X-Request-Id", value);
    }
    tracing::info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        duration_ms = start.elapsed().as_millis() as u64,
        remote = %ip,
        "request"
    );
    response
}

fn content_length_over(headers: &HeaderMap, max: usize) -> bool {
    headers
        .get("content-length")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok())
        .map(|len| len > max)
        .unwrap_or(false)
}

pub fn api_error(status: StatusCode, code: &str, message: &str, request_id: &str) -> Response {
    (
        status,
        Json(serde_json::json!({
            "error": code,
            "message": message,
            "request_id": request_id,
        })),
    )
        .into_response()
}

async fn handle_health() -> Response {
    Json(serde_json::json!({"ok": true})).into_response()
}

fn auth_header(headers: &HeaderMap) -> Option<&str> {
    headers.get("authorization").and_then(|v| v.to_str().ok())
}

async fn authenticate_or_error(
    state: &CloudState,
    headers: &HeaderMap,
    request_id: &str,
) -> Result<Principal, Response> {
    state
        .verifier
        .authenticate(auth_header(headers))
        .await
        .map_err(|err| {
            api_error(
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                &err.to_string(),
                request_id,
            )
        })
}

async fn handle_me(
    State(state): State<Arc<CloudState>>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    headers: HeaderMap,
) -> Response {
    // Identity is visible to every authenticated principal; no scope check.
    let principal = match authenticate_or_error(&state, &headers, &request_id).await {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    Json(serde_json::json!({
        "user": {"id": principal.user_id, "email": principal.email},
        "organizations": principal.orgs,
        "teams": principal.teams,
    }))
    .into_response()
}

#[derive(Deserialize)]
pub struct StoreQuery {
    #[serde(default)]
    project: String,
    #[serde(default)]
    organization_id: String,
    #[serde(default)]
    team_id: String,
}

#[derive(Debug)]
enum OwnerError {
    BadRequest(String),
    Forbidden(String),
}

fn role_allows(role: &str, required: &str) -> bool {
    fn rank(role: &str) -> u8 {
        match role.trim().to_lowercase().as_str() {
            "reader" => 1,
            "maintainer" => 2,
            "admin" => 3,
            _ => 0,
        }
    }
    let need = rank(required);
    need > 0 && rank(role) >= need
}

/// Owner key: `user:<id>` implicit, or `org:`/`team:` when the principal
/// holds a sufficient membership (`reader` to read, `maintainer` to write).
fn resolve_owner(
    principal: &Principal,
    query: &StoreQuery,
    method: &Method,
) -> Result<String, OwnerError> {
    let org_id = query.organization_id.trim();
    let team_id = query.team_id.trim();
    if !org_id.is_empty() && !team_id.is_empty() {
        return Err(OwnerError::BadRequest(
            "organization_id and team_id are mutually exclusive".into(),
        ));
    }
    if org_id.is_empty() && team_id.is_empty() {
        return Ok(format!("user:{}", principal.user_id));
    }
    if principal.all {
        return Ok(if team_id.is_empty() {
            format!("org:{org_id}")
        } else {
            format!("team:{team_id}")
        });
    }
    let required = if method == Method::PUT {
        "maintainer"
    } else {
        "reader"
    };
    if !team_id.is_empty() {
        for membership in &principal.teams {
            if membership.team_id.trim().eq_ignore_ascii_case(team_id)
                && role_allows(&membership.role, required)
            {
                return Ok(format!("team:{team_id}"));
            }
        }
        return Err(OwnerError::Forbidden("team access denied".into()));
    }
    for membership in &principal.orgs {
        if membership
            .organization_id
            .trim()
            .eq_ignore_ascii_case(org_id)
            && role_allows(&membership.role, required)
        {
            return Ok(format!("org:{org_id}"));
        }
    }
    Err(OwnerError::Forbidden("organization access denied".into()))
}

/// Lowercase, trim, default `default`, validate against the project pattern.
fn normalize_project(re: &Regex, raw: &str) -> Result<String, String> {
    let project = raw.trim().to_lowercase();
    let project = if project.is_empty() {
        "default".to_string()
    } else {
        project
    };
    if !re.is_match(&project) {
        return Err(format!("project must match {PROJECT_NAME_PATTERN}"));
    }
    Ok(project)
}

struct StoreRequestContext {
    principal: Principal,
    owner_key: String,
    project: String,
}

async fn store_context(
    state: &CloudState,
    headers: &HeaderMap,
    query: &StoreQuery,
    method: Method,
    request_id: &str,
) -> Result<StoreRequestContext, Response> {
    let principal = authenticate_or_error(state, headers, request_id).await?;
    let owner_key = resolve_owner(&principal, query, &method).map_err(|err| match err {
        OwnerError::BadRequest(msg) => {
            api_error(StatusCode::BAD_REQUEST, "bad_request", &msg, request_id)
        }
        OwnerError::Forbidden(msg) => {
            api_error(StatusCode::FORBIDDEN, "forbidden", &msg, request_id)
        }
    })?;
    let project = normalize_project(&state.project_re, &query.project).map_err(|msg| {
        api_error(StatusCode::BAD_REQUEST, "invalid_project", &msg, request_id)
    })?;
    Ok(StoreRequestContext {
        principal,
        owner_key,
        project,
    })
}

async fn handle_store_get(
    State(state): State<Arc<CloudState>>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    Query(query): Query<StoreQuery>,
    headers: HeaderMap,
) -> Response {
    let ctx = match store_context(&state, &headers, &query, Method::GET, &request_id).await {
        Ok(ctx) => ctx,
        Err(resp) => return resp,
    };
    if !ctx.principal.has_scope("store:read") {
        return api_error(
            StatusCode::FORBIDDEN,
            "forbidden",
            "token missing scope store:read",
            &request_id,
        );
    }
    match state.repo.get(&ctx.owner_key, &ctx.project).await {
        Ok(doc) => Json(doc).into_response(),
        Err(err) => {
            tracing::error!("read store failed: {err}");
            api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "read store failed",
                &request_id,
            )
        }
    }
}

async fn handle_store_put(
    State(state): State<Arc<CloudState>>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    Query(query): Query<StoreQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let ctx = match store_context(&state, &headers, &query, Method::PUT, &request_id).await {
        Ok(ctx) => ctx,
        Err(resp) => return resp,
    };
    if !ctx.principal.has_scope("store:write") {
        return api_error(
            StatusCode::FORBIDDEN,
            "forbidden",
            "token missing scope store:write",
            &request_id,
        );
    }
    let Some(if_match) = headers
        .get("if-match")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    else {
        return api_error(
            StatusCode::PRECONDITION_REQUIRED,
            "precondition_required",
            "If-Match required",
            &request_id,
        );
    };
    let Ok(expected_revision) = if_match.parse::<i64>() else {
        return api_error(
            StatusCode::BAD_REQUEST,
            "bad_request",
            "invalid If-Match",
            &request_id,
        );
    };
    let next: StoreDoc = match serde_json::from_slice(&body) {
        Ok(doc) => doc,
        Err(_) => {
            return api_error(
                StatusCode::BAD_REQUEST,
                "bad_request",
                "invalid JSON payload",
                &request_id,
            )
        }
    };

    match state
        .repo
        .put(
            &ctx.owner_key,
            &ctx.principal.user_id,
            &ctx.project,
            &next,
            expected_revision,
        )
        .await
    {
        Ok(saved) => Json(saved).into_response(),
        Err(RepoError::Conflict { expected, got }) => api_error(
            StatusCode::CONFLICT,
            "conflict",
            &format!("revision conflict: expected {expected}, got {got}"),
            &request_id,
        ),
        Err(err) => {
            tracing::error!("write store failed: {err}");
            api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "write store failed",
                &request_id,
            )
        }
    }
}

#[derive(Deserialize)]
struct CreateTokenRequest {
    #[serde(default)]
    scopes: Vec<String>,
    #[serde(default)]
    expires_at: Option<String>,
}

async fn handle_token_create(
    State(state): State<Arc<CloudState>>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let principal = match authenticate_or_error(&state, &headers, &request_id).await {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    if !principal.has_scope("tokens:write") {
        return api_error(
            StatusCode::FORBIDDEN,
            "forbidden",
            "token missing scope tokens:write",
            &request_id,
        );
    }
    let Some(pool) = state.verifier.pool.clone() else {
        return api_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "unavailable",
            "token management requires postgres mode",
            &request_id,
        );
    };
    if state.verifier.pat_pepper.is_empty() {
        return api_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "unavailable",
            "ENVSYNC_CLOUD_PAT_PEPPER is required",
            &request_id,
        );
    }

    let req: CreateTokenRequest = match serde_json::from_slice(&body) {
        Ok(req) => req,
        Err(_) => {
            return api_error(
                StatusCode::BAD_REQUEST,
                "bad_request",
                "invalid JSON payload",
                &request_id,
            )
        }
    };
    let scopes = if req.scopes.is_empty() {
        DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect()
    } else {
        req.scopes
    };
    if let Err(msg) = validate_scopes(&scopes) {
        return api_error(StatusCode::BAD_REQUEST, "bad_request", &msg, &request_id);
    }
    let expires_at: Option<DateTime<Utc>> = match req.expires_at.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => match DateTime::parse_from_rfc3339(raw) {
            Ok(ts) => Some(ts.with_timezone(&Utc)),
            Err(_) => {
                return api_error(
                    StatusCode::BAD_REQUEST,
                    "bad_request",
                    "expires_at must be RFC3339",
                    &request_id,
                )
            }
        },
    };

    let user_id = match ensure_user(&pool, &principal).await {
        Ok(id) => id,
        Err(err) => {
            tracing::error!("ensure user failed: {err}");
            return api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "failed to issue token",
                &request_id,
            );
        }
    };

    let (raw_token, prefix) = generate_pat();
    let token_hash = state.verifier.hash_token(&raw_token);
    let inserted = sqlx::query(
        "INSERT INTO personal_access_tokens (user_id, token_prefix, token_hash, scopes, expires_at) \
         VALUES ($1::uuid, $2, $3, $4, $5) RETURNING id::text AS id",
    )
    .bind(&user_id)
    .bind(&prefix)
    .bind(&token_hash)
    .bind(&scopes)
    .bind(expires_at)
    .fetch_one(&pool)
    .await;
    let token_id: String = match inserted.and_then(|row| row.try_get("id")) {
        Ok(id) => id,
        Err(err) => {
            tracing::error!("insert token failed: {err}");
            return api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "failed to issue token",
                &request_id,
            );
        }
    };

    let mut out = serde_json::json!({
        "id": token_id,
        "token": raw_token,
        "token_prefix": prefix,
        "scopes": scopes,
    });
    if let Some(expiry) = expires_at {
        out["expires_at"] =
            serde_json::json!(expiry.to_rfc3339_opts(SecondsFormat::Secs, true));
    }
    (StatusCode::CREATED, Json(out)).into_response()
}

async fn handle_token_delete(
    State(state): State<Arc<CloudState>>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    Path(token_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let principal = match authenticate_or_error(&state, &headers, &request_id).await {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    if !principal.has_scope("tokens:write") {
        return api_error(
            StatusCode::FORBIDDEN,
            "forbidden",
            "token missing scope tokens:write",
            &request_id,
        );
    }
    let Some(pool) = state.verifier.pool.clone() else {
        return api_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "unavailable",
            "token management requires postgres mode",
            &request_id,
        );
    };
    let token_id = token_id.trim().to_string();
    if token_id.is_empty() {
        return api_error(
            StatusCode::BAD_REQUEST,
            "bad_request",
            "token id is required",
            &request_id,
        );
    }

    let result = sqlx::query(
        "UPDATE personal_access_tokens SET revoked_at = NOW() \
         WHERE id = $1::uuid AND user_id = $2::uuid AND revoked_at IS NULL",
    )
    .bind(&token_id)
    .bind(&principal.user_id)
    .execute(&pool)
    .await;
    match result {
        Ok(done) if done.rows_affected() > 0 => StatusCode::NO_CONTENT.into_response(),
        Ok(_) => api_error(
            StatusCode::NOT_FOUND,
            "not_found",
            "token not found",
            &request_id,
        ),
        Err(err) => {
            tracing::error!("revoke token failed: {err}");
            api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "failed to revoke token",
                &request_id,
            )
        }
    }
}

/// Map the principal onto a users row, creating one keyed by the external
/// subject when the id is not already a uuid.
async fn ensure_user(pool: &sqlx::PgPool, principal: &Principal) -> Result<String, sqlx::Error> {
    if uuid::Uuid::parse_str(&principal.user_id).is_ok() {
        sqlx::query(
            "INSERT INTO users (id, email) VALUES ($1::uuid, NULLIF($2, '')) \
             ON CONFLICT (id) DO UPDATE SET \
               updated_at = NOW(), \
               email = COALESCE(NULLIF(EXCLUDED.email, ''), users.email)",
        )
        .bind(&principal.user_id)
        .bind(&principal.email)
        .execute(pool)
        .await?;
        return Ok(principal.user_id.clone());
    }

    if let Some(row) = sqlx::query("SELECT id::text AS id FROM users WHERE external_id = $1")
        .bind(&principal.subject)
        .fetch_optional(pool)
        .await?
    {
        return row.try_get("id");
    }
    let row = sqlx::query(
        "INSERT INTO users (external_id, email) VALUES ($1, NULLIF($2, '')) \
         RETURNING id::text AS id",
    )
    .bind(&principal.subject)
    .bind(&principal.email)
    .fetch_one(pool)
    .await?;
    row.try_get("id")
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
    let mut bytes = [0u8; 12];
    rand::fill(&mut bytes);
    format!("req-{}", hex::encode(bytes))
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
