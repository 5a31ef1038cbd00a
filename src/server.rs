//!
//! ragdock HTTP server
//! -------------------
//! This module defines the Axum-based HTTP API for the gateway.
//!
//! Responsibilities:
//! - Login/register/logout/change-password endpoints backed by the
//!   `identity` module.
//! - Bearer-token verification for the `/auth/*` self-service endpoints.
//! - The identity gate middleware attaching a typed request context (resolved
//!   identity + workspace engine handle) to every non-bypass request.
//! - Liveness endpoint and startup logs.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::http::HeaderMap;
use axum::middleware;
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Extension, Json, Router, extract::State};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::config::Config;
use crate::engine::LocalEngineFactory;
use crate::error::AppError;
use crate::identity::{
    bearer_token, identity_gate, CredentialRecord, CredentialStore, CredentialUpdate,
    RequestContext, SessionClaims, SessionTokenService,
};
use crate::workspace::WorkspaceInstanceRegistry;

/// Shared server state injected into all handlers.
///
/// Each component is constructed explicitly here and torn down with the
/// process; nothing is a module-level singleton.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub credentials: Arc<CredentialStore>,
    pub tokens: Arc<SessionTokenService>,
    pub registry: Arc<WorkspaceInstanceRegistry>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let credentials = Arc::new(CredentialStore::open(&config.users_file, &config.seed_accounts));
        let tokens = Arc::new(SessionTokenService::new(&config.token_secret, config.token_ttl_hours));
        let registry = Arc::new(WorkspaceInstanceRegistry::new(
            &config.working_dir,
            Arc::new(LocalEngineFactory),
        ));
        Self {
            config: Arc::new(config),
            credentials,
            tokens,
            registry,
        }
    }
}

/// Mount all routes and the identity gate. Split out from [`run_with_config`]
/// so integration tests can drive the app in-process.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(|| async { "ragdock ok" }))
        .route("/health", get(health))
        .route("/auth/login", post(login))
        .route("/auth/register", post(register))
        .route("/auth/me", get(me))
        .route("/auth/logout", post(logout))
        .route("/auth/verify", get(verify))
        .route("/auth/change-password", put(change_password))
        .route("/workspace", get(workspace_info))
        .layer(middleware::from_fn_with_state(state.clone(), identity_gate))
        .with_state(state)
}

/// Start the gateway bound to the configured port.
pub async fn run_with_config(config: Config) -> anyhow::Result<()> {
    std::fs::create_dir_all(&config.working_dir)
        .with_context(|| format!("Failed to create or access working dir: {}", config.working_dir.display()))?;
    let port = config.http_port;
    let state = AppState::new(config);
    info!(
        users = state.credentials.list().len(),
        auth_required = state.config.auth_required,
        "identity components initialized"
    );

    let app = build_router(state);
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// Convenience entry point reading configuration from the environment.
pub async fn run() -> anyhow::Result<()> {
    run_with_config(Config::from_env()).await
}

#[derive(Debug, Deserialize)]
struct LoginPayload {
    username: String,
    password: String,
}

#[derive(Debug, Serialize)]
struct LoginResponse {
    access_token: String,
    token_type: &'static str,
    username: String,
    email: String,
    workspace: String,
}

#[derive(Debug, Deserialize)]
struct RegisterPayload {
    username: String,
    email: String,
    password: String,
}

#[derive(Debug, Serialize)]
struct UserResponse {
    username: String,
    email: String,
    workspace: String,
    is_active: bool,
}

#[derive(Debug, Deserialize)]
struct ChangePasswordPayload {
    old_password: String,
    new_password: String,
}

fn user_response(record: &CredentialRecord) -> UserResponse {
    UserResponse {
        username: record.username.clone(),
        email: record.email.clone(),
        workspace: record.workspace.clone(),
        is_active: record.is_active,
    }
}

/// Validate the bearer token on a self-service `/auth/*` request. These
/// paths sit on the gate's bypass list, so they check credentials here.
fn claims_from_headers(state: &AppState, headers: &HeaderMap) -> Result<SessionClaims, AppError> {
    let token = bearer_token(headers)
        .ok_or_else(|| AppError::auth("missing_bearer", "authorization required"))?;
    Ok(state.tokens.validate(token)?)
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginPayload>,
) -> Result<Json<LoginResponse>, AppError> {
    let Some(user) = state.credentials.authenticate(&payload.username, &payload.password) else {
        // Unknown user and wrong password render identically.
        return Err(AppError::auth("invalid_credentials", "invalid username or password"));
    };
    let token = state.tokens.issue(
        &user.username,
        "user",
        Some(user.email.clone()),
        Some(user.workspace.clone()),
        Default::default(),
    )?;
    if state.config.persist_on_login {
        state.credentials.persist().await?;
    }
    info!(username = %user.username, workspace = %user.workspace, "login");
    Ok(Json(LoginResponse {
        access_token: token,
        token_type: "bearer",
        username: user.username,
        email: user.email,
        workspace: user.workspace,
    }))
}

async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterPayload>,
) -> Result<Json<UserResponse>, AppError> {
    let user = state.credentials.create(&payload.username, &payload.email, &payload.password)?;
    state.credentials.persist().await?;
    info!(username = %user.username, workspace = %user.workspace, "registered");
    Ok(Json(user_response(&user)))
}

async fn me(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<UserResponse>, AppError> {
    let claims = claims_from_headers(&state, &headers)?;
    let user = state
        .credentials
        .get(&claims.sub)
        .ok_or_else(|| AppError::not_found("user_not_found", "user not found"))?;
    Ok(Json(user_response(&user)))
}

async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<serde_json::Value>, AppError> {
    claims_from_headers(&state, &headers)?;
    // Stateless tokens: nothing to invalidate server-side.
    Ok(Json(json!({"message": "logged out; discard the token client-side"})))
}

async fn verify(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<serde_json::Value>, AppError> {
    let claims = claims_from_headers(&state, &headers)?;
    Ok(Json(json!({
        "valid": true,
        "username": claims.sub,
        "workspace": claims.workspace,
        "email": claims.email,
    })))
}

async fn change_password(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<ChangePasswordPayload>,
) -> Result<Json<serde_json::Value>, AppError> {
    let claims = claims_from_headers(&state, &headers)?;
    if state.credentials.authenticate(&claims.sub, &payload.old_password).is_none() {
        return Err(AppError::auth("invalid_credentials", "invalid password"));
    }
    state
        .credentials
        .update(
            &claims.sub,
            CredentialUpdate { password: Some(payload.new_password), ..Default::default() },
        )?
        .ok_or_else(|| AppError::not_found("user_not_found", "user not found"))?;
    state.credentials.persist().await?;
    info!(username = %claims.sub, "password changed");
    Ok(Json(json!({"message": "password changed"})))
}

/// Report the resolved identity and workspace for this request. Exercises
/// the full gate -> registry -> context attachment path.
async fn workspace_info(Extension(context): Extension<RequestContext>) -> Json<serde_json::Value> {
    Json(json!({
        "request_id": context.request_id,
        "username": context.username(),
        "authenticated": context.authenticated(),
        "workspace": context.workspace(),
        "working_dir": context.instance.working_dir.display().to_string(),
        "created_at": context.instance.created_at.to_rfc3339(),
    }))
}
