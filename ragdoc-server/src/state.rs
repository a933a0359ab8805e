use std::path::{Path, PathBuf};
use std::sync::Arc;

use ragdoc_core::RagPipeline;
use tokio::sync::{OwnedRwLockReadGuard, RwLock, RwLockWriteGuard};

/// Shared state handed to every request handler.
///
/// Queries share the index through a read lock; a rebuild takes the write lock, so
/// it waits for in-flight answers and blocks new ones until it is done.
#[derive(Clone)]
pub struct AppState {
    pipeline: Arc<RagPipeline>,
    index_lock: Arc<RwLock<()>>,
    source_dir: Arc<PathBuf>,
}

impl AppState {
    pub fn new(pipeline: RagPipeline, source_dir: impl Into<PathBuf>) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            index_lock: Arc::new(RwLock::new(())),
            source_dir: Arc::new(source_dir.into()),
        }
    }

    pub fn pipeline(&self) -> &RagPipeline {
        &self.pipeline
    }

    pub fn source_dir(&self) -> &Path {
        &self.source_dir
    }

    /// Shared access to the index, held for the lifetime of a streamed answer.
    pub async fn read_index(&self) -> OwnedRwLockReadGuard<()> {
        Arc::clone(&self.index_lock).read_owned().await
    }

    /// Exclusive access to the index for a rebuild.
    pub async fn write_index(&self) -> RwLockWriteGuard<'_, ()> {
        self.index_lock.write().await
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState").field("source_dir", &self.source_dir).finish_non_exhaustive()
    }
}
