//! External processing-engine seam.
//!
//! The gateway treats the document engine as an opaque collaborator: the
//! registry hands a factory a workspace key plus its storage directory and
//! awaits asynchronous initialization. [`LocalEngineFactory`] is the disk
//! stand-in used when no real engine is wired in.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tracing::info;

/// Opaque handle to an initialized per-workspace engine instance.
pub trait ProcessingEngine: Send + Sync + 'static {
    fn workspace(&self) -> &str;
    fn working_dir(&self) -> &Path;
}

/// Constructs engine instances. `build` is awaited to completion before the
/// instance becomes visible to any caller.
pub trait EngineFactory: Send + Sync + 'static {
    fn build(&self, workspace: String, working_dir: PathBuf) -> BoxFuture<'static, Result<Arc<dyn ProcessingEngine>>>;
}

pub struct LocalEngineFactory;

struct LocalEngine {
    workspace: String,
    working_dir: PathBuf,
}

impl ProcessingEngine for LocalEngine {
    fn workspace(&self) -> &str {
        &self.workspace
    }

    fn working_dir(&self) -> &Path {
        &self.working_dir
    }
}

impl EngineFactory for LocalEngineFactory {
    fn build(&self, workspace: String, working_dir: PathBuf) -> BoxFuture<'static, Result<Arc<dyn ProcessingEngine>>> {
        async move {
            for sub in ["documents", "index", "graph"] {
                tokio::fs::create_dir_all(working_dir.join(sub))
                    .await
                    .with_context(|| format!("creating {} under {}", sub, working_dir.display()))?;
            }
            let manifest = serde_json::json!({
                "workspace": workspace,
                "initialized_at": chrono::Utc::now().to_rfc3339(),
            });
            tokio::fs::write(working_dir.join("engine.json"), serde_json::to_vec_pretty(&manifest)?)
                .await
                .with_context(|| format!("writing engine manifest under {}", working_dir.display()))?;
            info!(workspace = %workspace, dir = %working_dir.display(), "engine initialized");
            Ok(Arc::new(LocalEngine { workspace, working_dir }) as Arc<dyn ProcessingEngine>)
        }
        .boxed()
    }
}
