//! Environment-sourced server configuration.
//!
//! All knobs live under the `RAGDOCK_` prefix and are read once at startup
//! into an explicit [`Config`] value that is passed to the components that
//! need it. Nothing here reads the environment after startup.

use std::path::PathBuf;

use tracing::warn;

use crate::identity::DEFAULT_TOKEN_TTL_HOURS;

/// Development-only fallback signing secret. Deployments must set
/// `RAGDOCK_TOKEN_SECRET`.
pub const DEV_TOKEN_SECRET: &str = "ragdock-dev-secret";

const DEFAULT_HTTP_PORT: u16 = 9622;
const DEFAULT_WORKING_DIR: &str = "workspaces";
const DEFAULT_USERS_FILE: &str = "users.json";

/// A bootstrap account from `RAGDOCK_AUTH_ACCOUNTS`, applied only when no
/// durable user file exists yet.
#[derive(Debug, Clone)]
pub struct SeedAccount {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    /// Process-wide token signing secret.
    pub token_secret: String,
    pub token_ttl_hours: i64,
    /// Static API key granting access to the shared default workspace.
    pub api_key: Option<String>,
    /// Global auth enforcement: when on, requests that resolve to neither a
    /// valid bearer token nor the API key are rejected with 401.
    pub auth_required: bool,
    pub seed_accounts: Vec<SeedAccount>,
    /// Base directory under which per-workspace storage directories live.
    pub working_dir: PathBuf,
    /// Durable user-record file.
    pub users_file: PathBuf,
    /// When on (the default), a successful login persists the updated
    /// last_login before responding; when off the stamp is in-memory only
    /// until the next explicit persist.
    pub persist_on_login: bool,
}

impl Config {
    pub fn from_env() -> Self {
        let api_key = std::env::var("RAGDOCK_API_KEY").ok().filter(|s| !s.is_empty());
        // Enforcement defaults to on exactly when an API key is configured,
        // matching the behavior callers of the static key expect.
        let auth_required = std::env::var("RAGDOCK_AUTH_REQUIRED")
            .map(|v| parse_bool(&v))
            .unwrap_or(api_key.is_some());
        let token_secret = std::env::var("RAGDOCK_TOKEN_SECRET")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| {
                warn!("RAGDOCK_TOKEN_SECRET not set; using the development fallback secret");
                DEV_TOKEN_SECRET.to_string()
            });
        let seed_accounts = std::env::var("RAGDOCK_AUTH_ACCOUNTS")
            .map(|raw| parse_accounts(&raw))
            .unwrap_or_default();

        Self {
            http_port: std::env::var("RAGDOCK_HTTP_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_HTTP_PORT),
            token_secret,
            token_ttl_hours: std::env::var("RAGDOCK_TOKEN_TTL_HOURS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_TOKEN_TTL_HOURS),
            api_key,
            auth_required,
            seed_accounts,
            working_dir: PathBuf::from(
                std::env::var("RAGDOCK_WORKING_DIR").unwrap_or_else(|_| DEFAULT_WORKING_DIR.to_string()),
            ),
            users_file: PathBuf::from(
                std::env::var("RAGDOCK_USERS_FILE").unwrap_or_else(|_| DEFAULT_USERS_FILE.to_string()),
            ),
            persist_on_login: std::env::var("RAGDOCK_PERSIST_ON_LOGIN")
                .map(|v| parse_bool(&v))
                .unwrap_or(true),
        }
    }
}

fn parse_bool(v: &str) -> bool {
    matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

/// Parse a `username:password[,username:password...]` seed list. An entry
/// whose username is a full mailbox (`alice@corp.example:pw`) keeps the
/// mailbox as email and the local part as username; otherwise the email
/// defaults to `<username>@example.com`. Malformed entries are skipped with
/// a warning.
pub fn parse_accounts(raw: &str) -> Vec<SeedAccount> {
    let mut out = Vec::new();
    for entry in raw.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let Some((name, password)) = entry.split_once(':') else {
            warn!("skipping malformed seed account entry (expected username:password)");
            continue;
        };
        let (username, email) = match name.split_once('@') {
            Some((local, _domain)) => (local.to_string(), name.to_string()),
            None => (name.to_string(), format!("{}@example.com", name)),
        };
        if username.is_empty() || password.is_empty() {
            warn!("skipping seed account with empty username or password");
            continue;
        }
        out.push(SeedAccount { username, email, password: password.to_string() });
    }
    out
}
