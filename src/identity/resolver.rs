//! Per-request identity classification.
//!
//! Evaluated once per inbound request, in strict priority order:
//! 1. bypass paths skip resolution entirely;
//! 2. a bearer token is validated, falling back to the credential store for
//!    the workspace when the claims omit it;
//! 3. the static API key maps to the shared default namespace;
//! 4. with enforcement on, everything else is rejected with 401;
//! 5. otherwise the caller is anonymous.

use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::{debug, error};
use uuid::Uuid;

use super::request_context::RequestContext;
use crate::error::AppError;
use crate::server::AppState;

/// Paths exempt from identity resolution: health checks, the auth endpoints
/// themselves, docs and static assets.
pub const BYPASS_PATHS: &[&str] = &[
    "/health",
    "/auth/",
    "/docs",
    "/openapi.json",
    "/webui",
    "/static",
    "/favicon",
];

/// Ephemeral per-request identity outcome. Never persisted.
#[derive(Debug, Clone)]
pub enum Identity {
    Authenticated { username: String, workspace: String },
    ApiKey,
    Anonymous,
    Rejected { error: AppError },
}

pub fn path_is_bypassed(path: &str) -> bool {
    BYPASS_PATHS.iter().any(|p| path.starts_with(p))
}

/// Extract the token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

fn api_key_header(headers: &HeaderMap) -> Option<&str> {
    headers.get("x-api-key")?.to_str().ok()
}

/// Classify the caller. Consults the token service on every bearer request
/// and the credential store only for the workspace fallback.
pub fn resolve_identity(state: &AppState, headers: &HeaderMap) -> Identity {
    if let Some(token) = bearer_token(headers) {
        return match state.tokens.validate(token) {
            Ok(claims) => {
                let workspace = claims
                    .workspace
                    .clone()
                    .or_else(|| state.credentials.get(&claims.sub).map(|u| u.workspace));
                match workspace {
                    Some(workspace) => Identity::Authenticated { username: claims.sub, workspace },
                    // Claims carry no workspace and the account is gone.
                    None => reject_or_anonymous(
                        state,
                        AppError::auth("unknown_subject", "invalid authentication"),
                    ),
                }
            }
            Err(e) => {
                debug!("bearer token rejected: {}", e);
                reject_or_anonymous(state, e.into())
            }
        };
    }

    if let Some(provided) = api_key_header(headers) {
        if state.config.api_key.as_deref() == Some(provided) {
            return Identity::ApiKey;
        }
    }

    if state.config.auth_required {
        return Identity::Rejected {
            error: AppError::auth("auth_required", "authentication required"),
        };
    }
    Identity::Anonymous
}

fn reject_or_anonymous(state: &AppState, error: AppError) -> Identity {
    if state.config.auth_required {
        Identity::Rejected { error }
    } else {
        Identity::Anonymous
    }
}

/// Middleware layer: resolves identity, obtains the workspace engine handle
/// and attaches a [`RequestContext`] to the request before dispatch.
pub async fn identity_gate(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    if path_is_bypassed(request.uri().path()) {
        return next.run(request).await;
    }

    let identity = resolve_identity(&state, request.headers());
    let workspace = match &identity {
        Identity::Authenticated { workspace, .. } => Some(workspace.clone()),
        Identity::ApiKey | Identity::Anonymous => None,
        Identity::Rejected { error } => return error.clone().into_response(),
    };

    let instance = match state.registry.get_or_create(workspace.as_deref()).await {
        Ok(instance) => instance,
        Err(e) => {
            error!("workspace initialization failed: {:#}", e);
            return AppError::internal("workspace_init_failed", "workspace initialization failed")
                .into_response();
        }
    };

    let context = RequestContext {
        request_id: Uuid::new_v4().to_string(),
        identity,
        instance,
    };
    request.extensions_mut().insert(context);
    next.run(request).await
}
