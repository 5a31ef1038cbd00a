//! End-to-end HTTP tests: the auth endpoints, the identity gate and the
//! workspace context attachment, driven in-process via tower.

use anyhow::Result;
use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tempfile::tempdir;
use tower::ServiceExt;

use ragdock::config::Config;
use ragdock::server::{build_router, AppState};

fn test_config(root: &std::path::Path) -> Config {
    Config {
        http_port: 0,
        token_secret: "test-secret".into(),
        token_ttl_hours: 48,
        api_key: None,
        auth_required: false,
        seed_accounts: Vec::new(),
        working_dir: root.join("workspaces"),
        users_file: root.join("users.json"),
        persist_on_login: true,
    }
}

async fn send(
    app: &Router,
    method: Method,
    path: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(path);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

async fn register_alice(app: &Router) -> Value {
    let (status, body) = send(
        app,
        Method::POST,
        "/auth/register",
        None,
        Some(json!({"username": "alice", "email": "alice@example.com", "password": "secret1"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    body
}

async fn login_alice(app: &Router) -> String {
    let (status, body) = send(
        app,
        Method::POST,
        "/auth/login",
        None,
        Some(json!({"username": "alice", "password": "secret1"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    body["access_token"].as_str().expect("token present").to_string()
}

#[tokio::test]
async fn register_login_me_end_to_end() -> Result<()> {
    let tmp = tempdir()?;
    let state = AppState::new(test_config(tmp.path()));
    let app = build_router(state.clone());

    let registered = register_alice(&app).await;
    assert_eq!(registered["username"], "alice");
    assert_eq!(registered["workspace"], "user_alice");
    assert_eq!(registered["is_active"], true);

    let (status, body) = send(
        &app,
        Method::POST,
        "/auth/login",
        None,
        Some(json!({"username": "alice", "password": "secret1"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["token_type"], "bearer");
    assert_eq!(body["username"], "alice");
    assert_eq!(body["email"], "alice@example.com");
    assert_eq!(body["workspace"], "user_alice");

    // The issued token decodes to the expected claims.
    let token = body["access_token"].as_str().unwrap();
    let claims = state.tokens.validate(token).expect("token validates");
    assert_eq!(claims.sub, "alice");
    assert_eq!(claims.workspace.as_deref(), Some("user_alice"));
    assert_eq!(claims.email.as_deref(), Some("alice@example.com"));

    let (status, me) = send(&app, Method::GET, "/auth/me", Some(token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["email"], "alice@example.com");
    assert_eq!(me["workspace"], "user_alice");

    // Login persisted the user file.
    assert!(tmp.path().join("users.json").exists());
    Ok(())
}

#[tokio::test]
async fn login_failures_are_generic_and_identical() -> Result<()> {
    let tmp = tempdir()?;
    let app = build_router(AppState::new(test_config(tmp.path())));
    register_alice(&app).await;

    let (s1, wrong_password) = send(
        &app,
        Method::POST,
        "/auth/login",
        None,
        Some(json!({"username": "alice", "password": "nope"})),
    )
    .await;
    let (s2, unknown_user) = send(
        &app,
        Method::POST,
        "/auth/login",
        None,
        Some(json!({"username": "mallory", "password": "secret1"})),
    )
    .await;

    assert_eq!(s1, StatusCode::UNAUTHORIZED);
    assert_eq!(s2, StatusCode::UNAUTHORIZED);
    assert_eq!(wrong_password, unknown_user, "caller cannot tell the cases apart");
    assert_eq!(wrong_password["code"], "invalid_credentials");
    Ok(())
}

#[tokio::test]
async fn register_validates_and_conflicts() -> Result<()> {
    let tmp = tempdir()?;
    let app = build_router(AppState::new(test_config(tmp.path())));
    register_alice(&app).await;

    let (status, body) = send(
        &app,
        Method::POST,
        "/auth/register",
        None,
        Some(json!({"username": "alice", "email": "other@example.com", "password": "pw"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "user_exists");

    let (status, body) = send(
        &app,
        Method::POST,
        "/auth/register",
        None,
        Some(json!({"username": "", "email": "x@example.com", "password": "pw"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "empty_username");
    Ok(())
}

#[tokio::test]
async fn change_password_rejects_wrong_old_and_keeps_hash() -> Result<()> {
    let tmp = tempdir()?;
    let state = AppState::new(test_config(tmp.path()));
    let app = build_router(state.clone());
    register_alice(&app).await;
    let token = login_alice(&app).await;

    let hash_before = state.credentials.get("alice").unwrap().password_hash;
    let (status, body) = send(
        &app,
        Method::PUT,
        "/auth/change-password",
        Some(&token),
        Some(json!({"old_password": "wrong", "new_password": "secret2"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "invalid_credentials");
    assert_eq!(
        state.credentials.get("alice").unwrap().password_hash,
        hash_before,
        "stored hash unchanged on rejection"
    );

    let (status, _) = send(
        &app,
        Method::PUT,
        "/auth/change-password",
        Some(&token),
        Some(json!({"old_password": "secret1", "new_password": "secret2"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(state.credentials.authenticate("alice", "secret1").is_none());
    assert!(state.credentials.authenticate("alice", "secret2").is_some());
    Ok(())
}

#[tokio::test]
async fn me_returns_404_after_account_deletion() -> Result<()> {
    let tmp = tempdir()?;
    let state = AppState::new(test_config(tmp.path()));
    let app = build_router(state.clone());
    register_alice(&app).await;
    let token = login_alice(&app).await;

    assert!(state.credentials.delete("alice"));
    let (status, body) = send(&app, Method::GET, "/auth/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "user_not_found");
    Ok(())
}

#[tokio::test]
async fn logout_and_verify_require_a_valid_token() -> Result<()> {
    let tmp = tempdir()?;
    let app = build_router(AppState::new(test_config(tmp.path())));
    register_alice(&app).await;
    let token = login_alice(&app).await;

    let (status, body) = send(&app, Method::GET, "/auth/verify", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], true);
    assert_eq!(body["username"], "alice");
    assert_eq!(body["workspace"], "user_alice");

    let (status, _) = send(&app, Method::POST, "/auth/logout", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    // Stateless tokens stay valid after logout.
    let (status, _) = send(&app, Method::GET, "/auth/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app, Method::POST, "/auth/logout", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "missing_bearer");

    let (status, body) = send(&app, Method::GET, "/auth/verify", Some("garbage"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "token_malformed");
    Ok(())
}

#[tokio::test]
async fn workspace_route_reflects_resolved_identity() -> Result<()> {
    let tmp = tempdir()?;
    let config = test_config(tmp.path());
    let working_dir = config.working_dir.clone();
    let app = build_router(AppState::new(config));
    register_alice(&app).await;
    let token = login_alice(&app).await;

    let (status, body) = send(&app, Method::GET, "/workspace", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["username"], "alice");
    assert_eq!(body["authenticated"], true);
    assert_eq!(body["workspace"], "user_alice");
    assert!(body["request_id"].as_str().is_some());
    assert!(working_dir.join("user_alice").is_dir(), "workspace storage created");
    assert!(
        working_dir.join("user_alice").join("documents").is_dir(),
        "engine initialized its directory skeleton"
    );

    // Anonymous callers share the default namespace when enforcement is off.
    let (status, body) = send(&app, Method::GET, "/workspace", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["username"], "anonymous");
    assert_eq!(body["authenticated"], false);
    assert_eq!(body["workspace"], "default");
    Ok(())
}

#[tokio::test]
async fn enforcement_rejects_unauthenticated_and_accepts_api_key() -> Result<()> {
    let tmp = tempdir()?;
    let mut config = test_config(tmp.path());
    config.api_key = Some("k-123".into());
    config.auth_required = true;
    let app = build_router(AppState::new(config));

    let (status, body) = send(&app, Method::GET, "/workspace", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "auth_required");

    // Bad bearer token under enforcement: rejected with the token code.
    let (status, body) = send(&app, Method::GET, "/workspace", Some("garbage"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "token_malformed");

    // Matching API key lands in the shared default workspace.
    let request = Request::builder()
        .method(Method::GET)
        .uri("/workspace")
        .header("x-api-key", "k-123")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&bytes)?;
    assert_eq!(body["username"], "api_user");
    assert_eq!(body["workspace"], "default");

    // Wrong API key is rejected.
    let request = Request::builder()
        .method(Method::GET)
        .uri("/workspace")
        .header("x-api-key", "wrong")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Bypass paths skip resolution even under enforcement.
    let (status, _) = send(&app, Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn invalid_token_degrades_to_anonymous_when_enforcement_off() -> Result<()> {
    let tmp = tempdir()?;
    let app = build_router(AppState::new(test_config(tmp.path())));

    let (status, body) = send(&app, Method::GET, "/workspace", Some("garbage"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["username"], "anonymous");
    assert_eq!(body["workspace"], "default");
    Ok(())
}

#[tokio::test]
async fn seeded_accounts_can_login() -> Result<()> {
    let tmp = tempdir()?;
    let mut config = test_config(tmp.path());
    config.seed_accounts = ragdock::config::parse_accounts("admin:admin123,demo:demo123");
    let app = build_router(AppState::new(config));

    let (status, body) = send(
        &app,
        Method::POST,
        "/auth/login",
        None,
        Some(json!({"username": "admin", "password": "admin123"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["workspace"], "user_admin");
    Ok(())
}
