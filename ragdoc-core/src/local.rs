//! Persistent vector store backed by JSON files in a local directory.
//!
//! Each collection lives in `<dir>/<collection>.json`. Every collection in the
//! directory is read when the store is opened and served from memory afterwards;
//! every mutation rewrites the collection file through a temporary file and a rename,
//! so readers of the directory never see a half-written index.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::document::{Chunk, SearchResult};
use crate::error::{RagError, Result};
use crate::inmemory::{CollectionData, ensure_collection};
use crate::vectorstore::VectorStore;

const BACKEND: &str = "local";

/// A [`VectorStore`] persisted as one JSON file per collection.
///
/// # Example
///
/// ```rust,ignore
/// use ragdoc_core::{LocalVectorStore, VectorStore};
///
/// let store = LocalVectorStore::open("index").await?;
/// store.create_collection("documents", 768).await?;
/// ```
#[derive(Debug)]
pub struct LocalVectorStore {
    dir: PathBuf,
    collections: RwLock<HashMap<String, CollectionData>>,
}

impl LocalVectorStore {
    /// Open (creating if needed) the index directory and load every collection in it.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::IndexUnavailable`] if the directory cannot be created or a
    /// collection file cannot be read or parsed.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| io_err(&dir, e))?;

        let mut collections = HashMap::new();
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| io_err(&dir, e))?;
        while let Some(entry) = entries.next_entry().await.map_err(|e| io_err(&dir, e))? {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            let Some(name) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .map(str::to_string)
            else {
                continue;
            };
            let bytes = tokio::fs::read(&path).await.map_err(|e| io_err(&path, e))?;
            let data: CollectionData =
                serde_json::from_slice(&bytes).map_err(|e| RagError::IndexUnavailable {
                    backend: BACKEND.to_string(),
                    message: format!("corrupt collection file '{}': {e}", path.display()),
                })?;
            debug!(collection = %name, chunks = data.chunks.len(), "loaded collection");
            collections.insert(name, data);
        }

        info!(dir = %dir.display(), collections = collections.len(), "opened local vector store");
        Ok(Self {
            dir,
            collections: RwLock::new(collections),
        })
    }

    /// The index directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn collection_path(&self, name: &str) -> Result<PathBuf> {
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(RagError::ConfigError(format!(
                "collection name '{name}' may only contain ASCII letters, digits, '-' and '_'"
            )));
        }
        Ok(self.dir.join(format!("{name}.json")))
    }

    async fn persist(&self, name: &str, data: &CollectionData) -> Result<()> {
        let path = self.collection_path(name)?;
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec(data).map_err(|e| RagError::IndexUnavailable {
            backend: BACKEND.to_string(),
            message: format!("failed to serialize collection '{name}': {e}"),
        })?;
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| io_err(&tmp, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| io_err(&path, e))?;
        debug!(
            collection = name,
            chunks = data.chunks.len(),
            "persisted collection"
        );
        Ok(())
    }

    fn missing(collection: &str) -> RagError {
        RagError::IndexUnavailable {
            backend: BACKEND.to_string(),
            message: format!("collection '{collection}' does not exist"),
        }
    }
}

fn io_err(path: &Path, e: std::io::Error) -> RagError {
    RagError::IndexUnavailable {
        backend: BACKEND.to_string(),
        message: format!("'{}': {e}", path.display()),
    }
}

#[async_trait]
impl VectorStore for LocalVectorStore {
    async fn create_collection(&self, name: &str, dimensions: usize) -> Result<()> {
        self.collection_path(name)?;
        let mut collections = self.collections.write().await;
        let existed = collections.contains_key(name);
        ensure_collection(&mut collections, name, dimensions)?;
        if !existed {
            if let Some(data) = collections.get(name) {
                self.persist(name, data).await?;
            }
        }
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        let path = self.collection_path(name)?;
        let mut collections = self.collections.write().await;
        collections.remove(name);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_err(&path, e)),
        }
    }

    async fn collection_exists(&self, name: &str) -> Result<bool> {
        Ok(self.collections.read().await.contains_key(name))
    }

    async fn upsert(&self, collection: &str, chunks: &[Chunk]) -> Result<()> {
        let mut collections = self.collections.write().await;
        let data = collections
            .get_mut(collection)
            .ok_or_else(|| Self::missing(collection))?;
        data.upsert(collection, chunks)?;
        self.persist(collection, data).await
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        let collections = self.collections.read().await;
        Ok(collections.get(collection).map_or(0, |c| c.chunks.len()))
    }

    async fn search(
        &self,
        collection: &str,
        embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<SearchResult>> {
        let collections = self.collections.read().await;
        match collections.get(collection) {
            Some(data) => data.search(collection, embedding, top_k),
            None => {
                warn!(
                    collection,
                    "search against a collection that does not exist"
                );
                Ok(Vec::new())
            }
        }
    }
}
