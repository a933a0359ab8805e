//! RAG pipeline orchestrator.
//!
//! The [`RagPipeline`] wires the ingestion path (load → chunk → embed → store)
//! and the query path (embed → search → gate → generate) together. Every
//! collaborator is injected through [`RagPipeline::builder()`].
//!
//! # Example
//!
//! ```rust,ignore
//! use ragdoc_core::{RagPipeline, RagConfig, InMemoryVectorStore};
//!
//! let pipeline = RagPipeline::builder()
//!     .config(RagConfig::default())
//!     .embedding_provider(Arc::new(my_embedder))
//!     .vector_store(Arc::new(InMemoryVectorStore::new()))
//!     .language_model(Arc::new(my_model))
//!     .build()?;
//!
//! let report = pipeline.ingest_directory("data/".as_ref()).await?;
//! match pipeline.ask("What is the capital of France?").await? {
//!     QueryResponse::Answered(answer) => println!("{}", answer.text),
//!     QueryResponse::NotFound { message, .. } => println!("{message}"),
//! }
//! ```

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::answer::{Answer, AnswerAssembler, AnswerStream, NOT_FOUND_MESSAGE};
use crate::chunking::{Chunker, chunker_for};
use crate::config::{IngestMode, RagConfig};
use crate::document::{Chunk, Document, SearchResult};
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result, with_timeout};
use crate::llm::LanguageModel;
use crate::loader::{DirectoryLoader, SkippedFile};
use crate::prompt::PromptTemplate;
use crate::retriever::{Retrieval, Retriever};
use crate::vectorstore::VectorStore;

/// Counts produced by one ingestion run.
#[derive(Debug, Clone, Serialize)]
pub struct IngestionReport {
    /// Documents (pages) that produced at least one chunk.
    pub documents: usize,
    /// Files that loaded successfully.
    pub files: usize,
    /// Chunks written to the index.
    pub chunks: usize,
    /// Files that were discovered but could not be loaded.
    pub skipped: Vec<SkippedFile>,
    /// How the index was updated.
    pub mode: IngestMode,
}

/// The complete answer to a question, or the not-found response.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum QueryResponse {
    /// Retrieval found nothing relevant; the model was not called.
    NotFound {
        /// The user-facing message.
        message: String,
        /// Score of the best match, if there was one.
        best_score: Option<f32>,
    },
    /// A grounded answer.
    Answered(Answer),
}

/// The streamed counterpart of [`QueryResponse`].
pub enum QueryStream {
    /// Retrieval found nothing relevant; the model was not called.
    NotFound {
        /// The user-facing message.
        message: String,
        /// Score of the best match, if there was one.
        best_score: Option<f32>,
    },
    /// Answer fragments, then the end-of-answer marker, then the sources block.
    Answer(AnswerStream),
}

impl std::fmt::Debug for QueryStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound {
                message,
                best_score,
            } => f
                .debug_struct("NotFound")
                .field("message", message)
                .field("best_score", best_score)
                .finish(),
            Self::Answer(_) => f.write_str("Answer(..)"),
        }
    }
}

/// The RAG pipeline orchestrator.
///
/// Holds no per-query state: a single instance serves concurrent queries.
/// Construct one via [`RagPipeline::builder()`].
pub struct RagPipeline {
    config: RagConfig,
    embedding_provider: Arc<dyn EmbeddingProvider>,
    vector_store: Arc<dyn VectorStore>,
    chunker: Arc<dyn Chunker>,
    loader: Arc<DirectoryLoader>,
    retriever: Retriever,
    assembler: AnswerAssembler,
}

impl RagPipeline {
    /// Create a new [`RagPipelineBuilder`].
    pub fn builder() -> RagPipelineBuilder {
        RagPipelineBuilder::default()
    }

    /// Return a reference to the pipeline configuration.
    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    /// Return a reference to the embedding provider.
    pub fn embedding_provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedding_provider
    }

    /// Return a reference to the vector store.
    pub fn vector_store(&self) -> &Arc<dyn VectorStore> {
        &self.vector_store
    }

    /// Number of chunks currently in the configured collection.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::IndexUnavailable`] if the store cannot be read.
    pub async fn indexed_chunks(&self) -> Result<usize> {
        self.vector_store.count(&self.config.collection).await
    }

    /// Discover, load, chunk, embed and store every supported file under `dir`.
    ///
    /// Unreadable files are skipped and listed in the report.
    ///
    /// # Errors
    ///
    /// - [`RagError::LoadError`] if `dir` is not a readable directory.
    /// - [`RagError::NoDocumentsFound`] if no chunk was produced; the index is untouched.
    /// - [`RagError::EmbeddingFailed`], [`RagError::IndexUnavailable`] or
    ///   [`RagError::DimensionMismatch`] from the collaborators.
    pub async fn ingest_directory(&self, dir: &Path) -> Result<IngestionReport> {
        let loader = Arc::clone(&self.loader);
        let root = dir.to_path_buf();
        let loaded = tokio::task::spawn_blocking(move || loader.load_directory(&root))
            .await
            .map_err(|e| RagError::LoadError {
                path: dir.to_path_buf(),
                message: format!("loader task failed: {e}"),
            })??;

        info!(
            dir = %dir.display(),
            files = loaded.files_loaded,
            documents = loaded.documents.len(),
            skipped = loaded.skipped.len(),
            "loaded source directory"
        );

        let mut report = self.ingest_documents(dir, &loaded.documents).await?;
        report.files = loaded.files_loaded;
        report.skipped = loaded.skipped;
        Ok(report)
    }

    /// Chunk, embed and store already loaded documents.
    ///
    /// `source` names where the documents came from, for errors and logs.
    ///
    /// # Errors
    ///
    /// Same as [`ingest_directory`](Self::ingest_directory), minus loading.
    pub async fn ingest_documents(
        &self,
        source: &Path,
        documents: &[Document],
    ) -> Result<IngestionReport> {
        let mut chunks: Vec<Chunk> = documents
            .iter()
            .flat_map(|document| self.chunker.chunk(document))
            .collect();

        if chunks.is_empty() {
            warn!(source = %source.display(), "no usable text found, index left untouched");
            return Err(RagError::NoDocumentsFound {
                path: source.to_path_buf(),
            });
        }

        let embeddings = self.embed_chunks(&chunks).await?;
        for (chunk, embedding) in chunks.iter_mut().zip(embeddings) {
            chunk.embedding = embedding;
        }

        let dimensions = self.measured_dimensions(&chunks)?;
        self.write_chunks(&chunks, dimensions).await?;

        let documents = chunks
            .iter()
            .map(|c| c.document_id.as_str())
            .collect::<HashSet<_>>();

        let report = IngestionReport {
            documents: documents.len(),
            files: 0,
            chunks: chunks.len(),
            skipped: Vec::new(),
            mode: self.config.ingest_mode,
        };
        info!(
            source = %source.display(),
            chunk_count = report.chunks,
            mode = %report.mode,
            "ingestion complete"
        );
        Ok(report)
    }

    async fn embed_chunks(&self, chunks: &[Chunk]) -> Result<Vec<Vec<f32>>> {
        let embedder = &self.embedding_provider;
        let timeout = self.config.request_timeout();

        let batch_futures: Vec<_> = chunks
            .chunks(self.config.embedding_batch_size)
            .map(|batch: &[Chunk]| async move {
                let texts: Vec<&str> = batch.iter().map(|c| c.text.as_str()).collect();
                let provider = embedder.name().to_string();
                let embeddings = with_timeout(timeout, embedder.embed_batch(&texts), |d| {
                    RagError::EmbeddingFailed {
                        provider: provider.clone(),
                        message: format!("batch embedding timed out after {}s", d.as_secs()),
                    }
                })
                .await?;
                if embeddings.len() != texts.len() {
                    return Err(RagError::EmbeddingFailed {
                        provider,
                        message: format!(
                            "expected {} embeddings, got {}",
                            texts.len(),
                            embeddings.len()
                        ),
                    });
                }
                Ok::<_, RagError>(embeddings)
            })
            .collect();
        let batches: Vec<Vec<Vec<f32>>> = stream::iter(batch_futures)
            .buffered(self.config.embedding_concurrency)
            .try_collect()
            .await
            .inspect_err(|e| error!(error = %e, "embedding failed during ingestion"))?;

        Ok(batches.into_iter().flatten().collect())
    }

    /// Length shared by every computed embedding.
    ///
    /// Checked before the index is touched.
    fn measured_dimensions(&self, chunks: &[Chunk]) -> Result<usize> {
        let provider = self.embedding_provider.name();
        let dimensions = chunks.first().map_or(0, |c| c.embedding.len());
        if dimensions == 0 {
            return Err(RagError::EmbeddingFailed {
                provider: provider.to_string(),
                message: "provider returned empty embeddings".to_string(),
            });
        }
        if let Some(odd) = chunks.iter().find(|c| c.embedding.len() != dimensions) {
            return Err(RagError::EmbeddingFailed {
                provider: provider.to_string(),
                message: format!(
                    "inconsistent embedding lengths: {dimensions} and {} (chunk {})",
                    odd.embedding.len(),
                    odd.id
                ),
            });
        }
        let reported = self.embedding_provider.dimensions();
        if reported != dimensions {
            warn!(
                provider,
                reported,
                measured = dimensions,
                "provider dimensionality differs from its embeddings, using measured length"
            );
        }
        Ok(dimensions)
    }

    async fn write_chunks(&self, chunks: &[Chunk], dimensions: usize) -> Result<()> {
        let collection = self.config.collection.as_str();
        let store = &self.vector_store;

        let written = async {
            match self.config.ingest_mode {
                IngestMode::Replace => {
                    store.delete_collection(collection).await?;
                    store.create_collection(collection, dimensions).await?;
                }
                IngestMode::Append => {
                    if !store.collection_exists(collection).await? {
                        store.create_collection(collection, dimensions).await?;
                    }
                }
            }
            store.upsert(collection, chunks).await
        }
        .await;

        written.inspect_err(|e| error!(collection, error = %e, "writing to the index failed"))
    }

    /// Return the ungated top-`k` matches for `question`, best first.
    ///
    /// # Errors
    ///
    /// See [`Retriever::search`].
    pub async fn search(&self, question: &str) -> Result<Vec<SearchResult>> {
        self.retriever.search(question).await
    }

    /// Retrieve and gate context for `question`.
    ///
    /// # Errors
    ///
    /// See [`Retriever::retrieve`].
    pub async fn retrieve(&self, question: &str) -> Result<Retrieval> {
        self.retriever.retrieve(question).await
    }

    /// Answer `question` from the indexed documents.
    ///
    /// When retrieval finds nothing relevant the model is not called and
    /// [`QueryResponse::NotFound`] is returned.
    ///
    /// # Errors
    ///
    /// - [`RagError::EmptyQuery`] for a blank question; nothing is called.
    /// - Dependency errors from embedding, search or generation.
    pub async fn ask(&self, question: &str) -> Result<QueryResponse> {
        let retrieval = self.retriever.retrieve(question).await?;
        self.answer(question, retrieval).await
    }

    /// Answer `question` from an already gated retrieval.
    ///
    /// Lets callers inspect the search results (see [`search`](Self::search) and
    /// [`Retrieval::gate`]) before generating.
    ///
    /// # Errors
    ///
    /// [`RagError::GenerationFailed`] if the model call fails.
    pub async fn answer(&self, question: &str, retrieval: Retrieval) -> Result<QueryResponse> {
        match retrieval {
            Retrieval::Relevant(context) => {
                let answer = self.assembler.answer(question.trim(), &context).await?;
                Ok(QueryResponse::Answered(answer))
            }
            Retrieval::NoRelevantContext { best_score } => Ok(QueryResponse::NotFound {
                message: NOT_FOUND_MESSAGE.to_string(),
                best_score,
            }),
        }
    }

    /// Answer `question` as a stream of answer events.
    ///
    /// # Errors
    ///
    /// Same as [`ask`](Self::ask).
    pub async fn ask_stream(&self, question: &str) -> Result<QueryStream> {
        match self.retriever.retrieve(question).await? {
            Retrieval::Relevant(context) => {
                let stream = self
                    .assembler
                    .answer_stream(question.trim(), context)
                    .await?;
                Ok(QueryStream::Answer(stream))
            }
            Retrieval::NoRelevantContext { best_score } => Ok(QueryStream::NotFound {
                message: NOT_FOUND_MESSAGE.to_string(),
                best_score,
            }),
        }
    }
}

/// Builder for constructing a [`RagPipeline`].
///
/// `config`, `embedding_provider`, `vector_store` and `language_model` are
/// required. The chunker defaults to the strategy named in the config, the
/// loader to [`DirectoryLoader::default()`] and the prompt to
/// [`PromptTemplate::default()`].
#[derive(Default)]
pub struct RagPipelineBuilder {
    config: Option<RagConfig>,
    embedding_provider: Option<Arc<dyn EmbeddingProvider>>,
    vector_store: Option<Arc<dyn VectorStore>>,
    chunker: Option<Arc<dyn Chunker>>,
    loader: Option<DirectoryLoader>,
    language_model: Option<Arc<dyn LanguageModel>>,
    prompt: Option<PromptTemplate>,
}

impl RagPipelineBuilder {
    /// Set the pipeline configuration.
    pub fn config(mut self, config: RagConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the embedding provider.
    pub fn embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedding_provider = Some(provider);
        self
    }

    /// Set the vector store backend.
    pub fn vector_store(mut self, store: Arc<dyn VectorStore>) -> Self {
        self.vector_store = Some(store);
        self
    }

    /// Override the document chunker.
    pub fn chunker(mut self, chunker: Arc<dyn Chunker>) -> Self {
        self.chunker = Some(chunker);
        self
    }

    /// Override the directory loader.
    pub fn loader(mut self, loader: DirectoryLoader) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Set the language model.
    pub fn language_model(mut self, model: Arc<dyn LanguageModel>) -> Self {
        self.language_model = Some(model);
        self
    }

    /// Override the prompt template.
    pub fn prompt(mut self, prompt: PromptTemplate) -> Self {
        self.prompt = Some(prompt);
        self
    }

    /// Build the [`RagPipeline`], validating that all required fields are set.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if any required field is missing or the
    /// configuration fails [`RagConfigBuilder::build`] validation.
    pub fn build(self) -> Result<RagPipeline> {
        let config = self
            .config
            .ok_or_else(|| RagError::ConfigError("config is required".to_string()))?
            .into_builder()
            .build()?;
        let embedding_provider = self
            .embedding_provider
            .ok_or_else(|| RagError::ConfigError("embedding_provider is required".to_string()))?;
        let vector_store = self
            .vector_store
            .ok_or_else(|| RagError::ConfigError("vector_store is required".to_string()))?;
        let language_model = self
            .language_model
            .ok_or_else(|| RagError::ConfigError("language_model is required".to_string()))?;

        let chunker = self.chunker.unwrap_or_else(|| chunker_for(&config));
        let loader = Arc::new(self.loader.unwrap_or_default());
        let retriever = Retriever::new(
            &config,
            Arc::clone(&embedding_provider),
            Arc::clone(&vector_store),
        );
        let assembler = AnswerAssembler::new(&config, language_model)
            .with_template(self.prompt.unwrap_or_default());

        Ok(RagPipeline {
            config,
            embedding_provider,
            vector_store,
            chunker,
            loader,
            retriever,
            assembler,
        })
    }
}

impl std::fmt::Debug for RagPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RagPipeline")
            .field("config", &self.config)
            .field("embedder", &self.embedding_provider.name())
            .field("loader", &self.loader)
            .finish_non_exhaustive()
    }
}
