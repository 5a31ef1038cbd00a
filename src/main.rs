use tracing_subscriber::{EnvFilter, fmt};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Init logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    fmt().with_env_filter(filter).init();

    // Startup banner at info level so something always prints at default verbosity
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string());
    let http_port = std::env::var("RAGDOCK_HTTP_PORT").unwrap_or_else(|_| "9622".to_string());
    let working_dir = std::env::var("RAGDOCK_WORKING_DIR").unwrap_or_else(|_| "workspaces".to_string());
    let users_file = std::env::var("RAGDOCK_USERS_FILE").unwrap_or_else(|_| "users.json".to_string());
    let auth_required = std::env::var("RAGDOCK_AUTH_REQUIRED").unwrap_or_else(|_| "<unset>".to_string());
    info!(
        target: "ragdock",
        "ragdock starting: RUST_LOG='{}', http_port={}, working_dir='{}', users_file='{}', auth_required={}",
        rust_log, http_port, working_dir, users_file, auth_required
    );

    ragdock::server::run().await
}
