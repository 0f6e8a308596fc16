//! Router-level tests against the in-memory repo with the dev token.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::connect_info::ConnectInfo;
use axum::http::{Request, StatusCode};
use chrono::Utc;
use regex::Regex;
use tower::ServiceExt;

use crate::auth::AuthVerifier;
use crate::limiter::RateLimiter;
use crate::repo::MemoryRepo;
use crate::server::{router, CloudState, PROJECT_NAME_PATTERN};

fn test_state(rpm: u32) -> Arc<CloudState> {
    Arc::new(CloudState {
        repo: Box::new(MemoryRepo::new()),
        verifier: AuthVerifier {
            pool: None,
            pat_pepper: String::new(),
            dev_token: "dev-secret".into(),
            oidc: None,
            now: Utc::now,
        },
        limiter: RateLimiter::new(rpm, 0),
        max_body_bytes: 1 << 20,
        project_re: Regex::new(PROJECT_NAME_PATTERN).unwrap(),
    })
}

fn request(method: &str, path: &str, headers: &[(&str, &str)], body: &str) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(path);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let mut req = builder.body(Body::from(body.to_string())).unwrap();
    let addr: SocketAddr = "127.0.0.1:9999".parse().unwrap();
    req.extensions_mut().insert(ConnectInfo(addr));
    req
}

fn authed(method: &str, path: &str, extra: &[(&str, &str)], body: &str) -> Request<Body> {
    let mut headers = vec![("authorization", "Bearer dev-secret")];
    headers.extend_from_slice(extra);
    request(method, path, &headers, body)
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), 1 << 20)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn healthz_reports_ok() {
    let app = router(test_state(0));
    let resp = app
        .oneshot(request("GET", "/healthz", &[], ""))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(json_body(resp).await, serde_json::json!({"ok": true}));
}

#[tokio::test]
async fn me_requires_auth_and_reports_identity() {
    let app = router(test_state(0));

    let resp = app
        .clone()
        .oneshot(request("GET", "/v1/me", &[], ""))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body = json_body(resp).await;
    assert_eq!(body["error"], "unauthorized");
    assert!(body["request_id"].is_string());

    let resp = app
        .oneshot(authed("GET", "/v1/me", &[], ""))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await;
    assert_eq!(body["user"]["id"], "dev-user");
    assert_eq!(body["user"]["email"], "dev@example.com");
}

#[tokio::test]
async fn store_get_defaults_to_empty() {
    let app = router(test_state(0));
    let resp = app
        .oneshot(authed("GET", "/v1/store?project=api", &[], ""))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await;
    assert_eq!(body["version"], 1);
    assert_eq!(body["revision"], 0);
}

#[tokio::test]
async fn store_put_requires_if_match() {
    let app = router(test_state(0));
    let resp = app
        .oneshot(authed(
            "PUT",
            "/v1/store?project=api",
            &[],
            r#"{"version":1,"revision":1,"projects":{}}"#,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::PRECONDITION_REQUIRED);
    assert_eq!(json_body(resp).await["error"], "precondition_required");
}

#[tokio::test]
async fn store_put_round_trip_and_conflict() {
    let app = router(test_state(0));

    // Matching If-Match succeeds and bumps the revision.
    let resp = app
        .clone()
        .oneshot(authed(
            "PUT",
            "/v1/store?project=api",
            &[("if-match", "0")],
            r#"{"version":1,"revision":1,"projects":{"api":{"name":"api"}},"salt_b64":"c2FsdA=="}"#,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await;
    assert_eq!(body["revision"], 1);
    assert_eq!(body["salt_b64"], "c2FsdA==");

    // GET sees the saved copy.
    let resp = app
        .clone()
        .oneshot(authed("GET", "/v1/store?project=api", &[], ""))
        .await
        .unwrap();
    let body = json_body(resp).await;
    assert_eq!(body["revision"], 1);
    assert!(body["projects"]["api"].is_object());

    // Any stale If-Match conflicts.
    let resp = app
        .oneshot(authed(
            "PUT",
            "/v1/store?project=api",
            &[("if-match", "0")],
            r#"{"projects":{}}"#,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    assert_eq!(json_body(resp).await["error"], "conflict");
}

#[tokio::test]
async fn project_names_are_normalized_and_validated() {
    let app = router(test_state(0));

    // Case-insensitive: PUT under API lands on api.
    let resp = app
        .clone()
        .oneshot(authed(
            "PUT",
            "/v1/store?project=API",
            &[("if-match", "0")],
            r#"{"projects":{}}"#,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let resp = app
        .clone()
        .oneshot(authed("GET", "/v1/store?project=api", &[], ""))
        .await
        .unwrap();
    assert_eq!(json_body(resp).await["revision"], 1);

    // Invalid names are rejected.
    for bad in ["-bad", "_bad", "has%20space", "bad!"] {
        let resp = app
            .clone()
            .oneshot(authed(
                "GET",
                &format!("/v1/store?project={bad}"),
                &[],
                "",
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "project {bad}");
        assert_eq!(json_body(resp).await["error"], "invalid_project");
    }
}

#[tokio::test]
async fn org_and_team_params_are_mutually_exclusive() {
    let app = router(test_state(0));
    let resp = app
        .oneshot(authed(
            "GET",
            "/v1/store?project=api&organization_id=o&team_id=t",
            &[],
            "",
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn owner_scoping_separates_stores() {
    let app = router(test_state(0));
    let resp = app
        .clone()
        .oneshot(authed(
            "PUT",
            "/v1/store?project=api&organization_id=org-1",
            &[("if-match", "0")],
            r#"{"projects":{"api":{}}}"#,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    // The personal store of the same principal is untouched.
    let resp = app
        .oneshot(authed("GET", "/v1/store?project=api", &[], ""))
        .await
        .unwrap();
    assert_eq!(json_body(resp).await["revision"], 0);
}

#[tokio::test]
async fn tokens_need_postgres() {
    let app = router(test_state(0));
    let resp = app
        .clone()
        .oneshot(authed(
            "POST",
            "/v1/tokens",
            &[],
            r#"{"scopes":["store:read"]}"#,
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

    let resp = app
        .oneshot(authed(
            "DELETE",
            "/v1/tokens/11111111-2222-3333-4444-555555555555",
            &[],
            "",
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn rate_limit_exempts_healthz() {
    let app = router(test_state(1));

    // Capacity is rpm + burst = 1.
    let resp = app
        .clone()
        .oneshot(authed("GET", "/v1/me", &[], ""))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = app
        .clone()
        .oneshot(authed("GET", "/v1/me", &[], ""))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(json_body(resp).await["error"], "too_many_requests");

    let resp = app
        .oneshot(request("GET", "/healthz", &[], ""))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn oversized_bodies_are_rejected() {
    let app = router(test_state(0));
    let resp = app
        .oneshot(authed(
            "PUT",
            "/v1/store?project=api",
            &[("if-match", "0"), ("content-length", "10485760")],
            "",
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(json_body(resp).await["error"], "payload_too_large");
}

#[tokio::test]
async fn request_id_is_echoed_everywhere() {
    let app = router(test_state(0));
    let resp = app
        .oneshot(request(
            "GET",
            "/healthz",
            &[("x-request-id", "trace-9")],
            "",
        ))
        .await
        .unwrap();
    assert_eq!(resp.headers().get("X-Request-Id").unwrap(), "trace-9");
}
