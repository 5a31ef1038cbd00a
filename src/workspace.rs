//! Lazy per-workspace engine instance cache with single-flight construction.
//!
//! Invariants:
//! - at most one live instance per workspace key;
//! - N concurrent calls during construction share one build and one handle;
//! - an instance is published only after construction fully completes;
//! - a failed build removes its slot so the next call retries;
//! - the slot lock is never held across an await.
//!
//! Construction runs in a spawned task, so cancelling the request that
//! triggered it cannot abort a build other callers are waiting on.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use futures_util::future::{BoxFuture, Shared};
use futures_util::FutureExt;
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::engine::{EngineFactory, ProcessingEngine};

/// Workspace key used when a request resolves no workspace of its own.
pub const DEFAULT_WORKSPACE: &str = "default";

/// One live workspace: the engine handle plus its storage directory. Owned
/// by the registry; handlers only ever borrow it for a request's duration.
pub struct WorkspaceInstance {
    pub workspace: String,
    pub working_dir: PathBuf,
    pub engine: Arc<dyn ProcessingEngine>,
    pub created_at: DateTime<Utc>,
}

type BuildResult = Result<Arc<WorkspaceInstance>, Arc<anyhow::Error>>;
type BuildFuture = Shared<BoxFuture<'static, BuildResult>>;

enum Slot {
    Ready(Arc<WorkspaceInstance>),
    Building(BuildFuture),
}

pub struct WorkspaceInstanceRegistry {
    base_dir: PathBuf,
    factory: Arc<dyn EngineFactory>,
    slots: Mutex<HashMap<String, Slot>>,
}

impl WorkspaceInstanceRegistry {
    pub fn new(base_dir: impl Into<PathBuf>, factory: Arc<dyn EngineFactory>) -> Self {
        Self {
            base_dir: base_dir.into(),
            factory,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Return the instance for `workspace`, constructing it on first use.
    /// `None` maps to [`DEFAULT_WORKSPACE`]. A cached instance returns
    /// without suspending.
    pub async fn get_or_create(&self, workspace: Option<&str>) -> Result<Arc<WorkspaceInstance>> {
        let key = workspace.unwrap_or(DEFAULT_WORKSPACE).to_string();

        let build = {
            let mut slots = self.slots.lock();
            match slots.get(&key) {
                Some(Slot::Ready(instance)) => return Ok(instance.clone()),
                Some(Slot::Building(build)) => build.clone(),
                None => {
                    let build = self.spawn_build(&key);
                    slots.insert(key.clone(), Slot::Building(build.clone()));
                    build
                }
            }
        };

        match build.clone().await {
            Ok(instance) => {
                let mut slots = self.slots.lock();
                if let Some(Slot::Building(current)) = slots.get(&key) {
                    if current.ptr_eq(&build) {
                        slots.insert(key.clone(), Slot::Ready(instance.clone()));
                    }
                }
                Ok(instance)
            }
            Err(e) => {
                // Drop the failed slot so a later call can retry, but only if
                // it is still ours; a concurrent retry may have replaced it.
                let mut slots = self.slots.lock();
                let ours = matches!(slots.get(&key), Some(Slot::Building(current)) if current.ptr_eq(&build));
                if ours {
                    slots.remove(&key);
                }
                warn!(workspace = %key, "workspace construction failed: {:#}", e);
                Err(anyhow!("workspace '{}' failed to initialize: {}", key, e))
            }
        }
    }

    fn spawn_build(&self, key: &str) -> BuildFuture {
        let workspace = key.to_string();
        let working_dir = self.base_dir.join(key);
        let factory = self.factory.clone();

        let task = tokio::spawn(async move {
            tokio::fs::create_dir_all(&working_dir)
                .await
                .with_context(|| format!("creating workspace directory {}", working_dir.display()))?;
            let engine = factory.build(workspace.clone(), working_dir.clone()).await?;
            info!(workspace = %workspace, dir = %working_dir.display(), "workspace instance ready");
            Ok::<_, anyhow::Error>(Arc::new(WorkspaceInstance {
                workspace,
                working_dir,
                engine,
                created_at: Utc::now(),
            }))
        });

        async move {
            match task.await {
                Ok(Ok(instance)) => Ok(instance),
                Ok(Err(e)) => Err(Arc::new(e)),
                Err(join) => Err(Arc::new(anyhow!("workspace build task aborted: {}", join))),
            }
        }
        .boxed()
        .shared()
    }
}
