//! In-memory vector store using cosine similarity.
//!
//! This module provides [`InMemoryVectorStore`], a vector store backed by a map
//! protected by a `tokio::sync::RwLock`. It is suitable for development, testing,
//! and small collections that are rebuilt on every start.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::warn;

use crate::document::{Chunk, SearchResult};
use crate::error::{RagError, Result};
use crate::vectorstore::{VectorStore, check_dimensions, rank};

/// The contents of one collection: its fixed dimensionality and its chunks by id.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub(crate) struct CollectionData {
    pub(crate) dimensions: usize,
    pub(crate) chunks: BTreeMap<String, Chunk>,
}

impl CollectionData {
    pub(crate) fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            chunks: BTreeMap::new(),
        }
    }

    /// Validate and insert chunks, replacing any with the same id.
    pub(crate) fn upsert(&mut self, name: &str, chunks: &[Chunk]) -> Result<()> {
        check_dimensions(name, self.dimensions, chunks)?;
        for chunk in chunks {
            self.chunks.insert(chunk.id.clone(), chunk.clone());
        }
        Ok(())
    }

    pub(crate) fn search(
        &self,
        name: &str,
        embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<SearchResult>> {
        if embedding.len() != self.dimensions {
            return Err(RagError::DimensionMismatch {
                collection: name.to_string(),
                expected: self.dimensions,
                actual: embedding.len(),
            });
        }
        Ok(rank(self.chunks.values(), embedding, top_k))
    }
}

/// Register a collection, refusing to silently change its dimensionality.
pub(crate) fn ensure_collection(
    collections: &mut HashMap<String, CollectionData>,
    name: &str,
    dimensions: usize,
) -> Result<()> {
    match collections.get(name) {
        Some(existing) if existing.dimensions != dimensions => Err(RagError::DimensionMismatch {
            collection: name.to_string(),
            expected: existing.dimensions,
            actual: dimensions,
        }),
        Some(_) => Ok(()),
        None => {
            collections.insert(name.to_string(), CollectionData::new(dimensions));
            Ok(())
        }
    }
}

/// An in-memory vector store using cosine similarity for search.
///
/// Collections are stored as maps: collection name → chunk ID → chunk.
/// All operations are async-safe via `tokio::sync::RwLock`.
///
/// # Example
///
/// ```rust,ignore
/// use ragdoc_core::{InMemoryVectorStore, VectorStore};
///
/// let store = InMemoryVectorStore::new();
/// store.create_collection("docs", 768).await?;
/// ```
#[derive(Debug, Default)]
pub struct InMemoryVectorStore {
    collections: RwLock<HashMap<String, CollectionData>>,
}

impl InMemoryVectorStore {
    /// Create a new empty in-memory vector store.
    pub fn new() -> Self {
        Self::default()
    }

    fn missing(collection: &str) -> RagError {
        RagError::IndexUnavailable {
            backend: "InMemory".to_string(),
            message: format!("collection '{collection}' does not exist"),
        }
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn create_collection(&self, name: &str, dimensions: usize) -> Result<()> {
        let mut collections = self.collections.write().await;
        ensure_collection(&mut collections, name, dimensions)
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        let mut collections = self.collections.write().await;
        collections.remove(name);
        Ok(())
    }

    async fn collection_exists(&self, name: &str) -> Result<bool> {
        Ok(self.collections.read().await.contains_key(name))
    }

    async fn upsert(&self, collection: &str, chunks: &[Chunk]) -> Result<()> {
        let mut collections = self.collections.write().await;
        let store = collections
            .get_mut(collection)
            .ok_or_else(|| Self::missing(collection))?;
        store.upsert(collection, chunks)
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
            Some(store) => store.search(collection, embedding, top_k),
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
