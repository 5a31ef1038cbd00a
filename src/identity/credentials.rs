//! Durable username -> credential mapping with salted password hashing.
//!
//! The store owns every [`CredentialRecord`] and keeps them in one in-memory
//! map behind a coarse lock; mutations are in-memory side effects and become
//! durable only when a caller invokes [`CredentialStore::persist`]. Load
//! failures degrade to an empty store so a corrupt file never takes the
//! service down; save failures always propagate.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use password_hash::{PasswordHash, SaltString};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::SeedAccount;
use crate::error::{AppError, AppResult};

/// One user account. `username` and `workspace` are fixed for the life of
/// the account; `workspace` is derived from the username at creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub salt: String,
    pub workspace: String,
    #[serde(default = "default_active")]
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_login: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

fn default_active() -> bool {
    true
}

/// Whitelisted mutable fields for [`CredentialStore::update`]. A `password`
/// regenerates both salt and hash.
#[derive(Debug, Default)]
pub struct CredentialUpdate {
    pub email: Option<String>,
    pub is_active: Option<bool>,
    pub metadata: Option<HashMap<String, serde_json::Value>>,
    pub password: Option<String>,
}

pub fn derive_workspace(username: &str) -> String {
    format!("user_{}", username)
}

fn fresh_salt() -> AppResult<SaltString> {
    let mut salt_bytes = [0u8; 16];
    getrandom::getrandom(&mut salt_bytes)
        .map_err(|e| AppError::internal("salt_entropy".to_string(), e.to_string()))?;
    SaltString::encode_b64(&salt_bytes)
        .map_err(|e| AppError::internal("salt_encode".to_string(), e.to_string()))
}

fn hash_password(password: &str, salt: &SaltString) -> AppResult<String> {
    let argon2 = Argon2::default();
    let phc = argon2
        .hash_password(password.as_bytes(), salt)
        .map_err(|e| AppError::internal("hash_failed".to_string(), e.to_string()))?
        .to_string();
    Ok(phc)
}

fn verify_password(hash: &str, password: &str) -> bool {
    if let Ok(parsed) = PasswordHash::new(hash) {
        let argon2 = Argon2::default();
        argon2.verify_password(password.as_bytes(), &parsed).is_ok()
    } else {
        false
    }
}

fn new_record(username: &str, email: &str, password: &str) -> AppResult<CredentialRecord> {
    let username = username.trim();
    if username.is_empty() {
        return Err(AppError::user("empty_username", "username must not be empty"));
    }
    if password.is_empty() {
        return Err(AppError::user("empty_password", "password must not be empty"));
    }
    let salt = fresh_salt()?;
    let password_hash = hash_password(password, &salt)?;
    Ok(CredentialRecord {
        username: username.to_string(),
        email: email.to_string(),
        password_hash,
        salt: salt.as_str().to_string(),
        workspace: derive_workspace(username),
        is_active: true,
        created_at: Utc::now(),
        last_login: None,
        metadata: HashMap::new(),
    })
}

pub struct CredentialStore {
    path: PathBuf,
    users: RwLock<HashMap<String, CredentialRecord>>,
}

impl CredentialStore {
    /// Load the user map from `path`. A missing file bootstraps the seed
    /// accounts; a broken file starts empty with a warning.
    pub fn open(path: impl Into<PathBuf>, seeds: &[SeedAccount]) -> Self {
        let path = path.into();
        let users = match load_users(&path) {
            Ok(Some(map)) => {
                info!(users = map.len(), file = %path.display(), "loaded user store");
                map
            }
            Ok(None) => seed_users(seeds),
            Err(e) => {
                warn!("failed to load user store {}: {}; starting empty", path.display(), e);
                HashMap::new()
            }
        };
        Self { path, users: RwLock::new(users) }
    }

    /// Create a new account. The record is held in memory only; call
    /// [`persist`](Self::persist) to make it durable.
    pub fn create(&self, username: &str, email: &str, password: &str) -> AppResult<CredentialRecord> {
        let record = new_record(username, email, password)?;
        let mut users = self.users.write();
        if users.contains_key(&record.username) {
            return Err(AppError::conflict(
                "user_exists".to_string(),
                format!("user {} already exists", record.username),
            ));
        }
        users.insert(record.username.clone(), record.clone());
        Ok(record)
    }

    /// Verify a username/password pair. Unknown username, inactive account
    /// and hash mismatch are indistinguishable to the caller. On success the
    /// record's `last_login` is stamped in memory.
    pub fn authenticate(&self, username: &str, password: &str) -> Option<CredentialRecord> {
        let mut users = self.users.write();
        let record = users.get_mut(username)?;
        if !record.is_active {
            return None;
        }
        if !verify_password(&record.password_hash, password) {
            return None;
        }
        record.last_login = Some(Utc::now());
        Some(record.clone())
    }

    pub fn get(&self, username: &str) -> Option<CredentialRecord> {
        self.users.read().get(username).cloned()
    }

    pub fn list(&self) -> Vec<CredentialRecord> {
        self.users.read().values().cloned().collect()
    }

    /// Apply whitelisted field changes. Returns `None` if the user is absent.
    pub fn update(&self, username: &str, changes: CredentialUpdate) -> AppResult<Option<CredentialRecord>> {
        let mut users = self.users.write();
        let Some(record) = users.get_mut(username) else {
            return Ok(None);
        };
        if let Some(email) = changes.email {
            record.email = email;
        }
        if let Some(active) = changes.is_active {
            record.is_active = active;
        }
        if let Some(metadata) = changes.metadata {
            record.metadata = metadata;
        }
        if let Some(password) = changes.password {
            if password.is_empty() {
                return Err(AppError::user("empty_password", "password must not be empty"));
            }
            let salt = fresh_salt()?;
            record.password_hash = hash_password(&password, &salt)?;
            record.salt = salt.as_str().to_string();
        }
        Ok(Some(record.clone()))
    }

    pub fn delete(&self, username: &str) -> bool {
        self.users.write().remove(username).is_some()
    }

    /// Serialize the full user map to disk atomically (write to a temporary
    /// file, then rename over the target). Save errors propagate; they are
    /// never swallowed.
    pub async fn persist(&self) -> AppResult<()> {
        let body = {
            let users = self.users.read();
            serde_json::to_string_pretty(&*users)
                .map_err(|e| AppError::persistence("serialize_failed".to_string(), e.to_string()))?
        };
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                tokio::fs::create_dir_all(dir)
                    .await
                    .map_err(|e| AppError::persistence("save_failed".to_string(), e.to_string()))?;
            }
        }
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, body.as_bytes())
            .await
            .map_err(|e| AppError::persistence("save_failed".to_string(), e.to_string()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| AppError::persistence("save_failed".to_string(), e.to_string()))?;
        Ok(())
    }
}

fn load_users(path: &Path) -> anyhow::Result<Option<HashMap<String, CredentialRecord>>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(path)?;
    let map: HashMap<String, CredentialRecord> = serde_json::from_str(&raw)?;
    Ok(Some(map))
}

fn seed_users(seeds: &[SeedAccount]) -> HashMap<String, CredentialRecord> {
    let mut users = HashMap::new();
    for seed in seeds {
        match new_record(&seed.username, &seed.email, &seed.password) {
            Ok(record) => {
                info!(username = %record.username, workspace = %record.workspace, "seeded account");
                users.insert(record.username.clone(), record);
            }
            Err(e) => warn!("skipping seed account: {}", e),
        }
    }
    users
}
