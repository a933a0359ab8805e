//! Configuration for the ingestion and question-answering pipeline.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};

/// How text is split into chunks.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStrategy {
    /// Character-based, breaking on paragraph, line and word boundaries before
    /// falling back to single characters. Sizes are measured in characters.
    #[default]
    Recursive,
    /// Character-based fixed windows. Sizes are measured in characters.
    Fixed,
    /// Whitespace-delimited word windows. Sizes are measured in words.
    Words,
}

impl fmt::Display for ChunkStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Recursive => write!(f, "recursive"),
            Self::Fixed => write!(f, "fixed"),
            Self::Words => write!(f, "words"),
        }
    }
}

impl FromStr for ChunkStrategy {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "recursive" => Ok(Self::Recursive),
            "fixed" => Ok(Self::Fixed),
            "words" | "word" => Ok(Self::Words),
            other => Err(RagError::ConfigError(format!(
                "unknown chunk strategy '{other}' (expected recursive, fixed or words)"
            ))),
        }
    }
}

/// What ingestion does with an existing collection of the same name.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IngestMode {
    /// Delete the collection and rebuild it from scratch.
    #[default]
    Replace,
    /// Upsert into the existing collection. Chunk ids are content-derived, so
    /// unchanged chunks overwrite themselves instead of duplicating.
    Append,
}

impl fmt::Display for IngestMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Replace => write!(f, "replace"),
            Self::Append => write!(f, "append"),
        }
    }
}

impl FromStr for IngestMode {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "replace" => Ok(Self::Replace),
            "append" => Ok(Self::Append),
            other => Err(RagError::ConfigError(format!(
                "unknown ingest mode '{other}' (expected replace or append)"
            ))),
        }
    }
}

/// Configuration parameters for the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RagConfig {
    /// Maximum chunk size, in characters or words depending on `chunk_strategy`.
    pub chunk_size: usize,
    /// Overlap between consecutive chunks, in the same unit as `chunk_size`.
    pub chunk_overlap: usize,
    /// Chunking strategy.
    pub chunk_strategy: ChunkStrategy,
    /// Number of nearest neighbours requested from the index.
    pub top_k: usize,
    /// Minimum cosine similarity of the best match before context is trusted.
    pub relevance_threshold: f32,
    /// Embedding model identity. Must be the same at ingestion and query time.
    pub embedding_model: String,
    /// Language model identity.
    pub llm_model: String,
    /// Sampling temperature passed to the language model.
    pub temperature: f32,
    /// Length, in characters, of each streamed answer fragment.
    pub answer_fragment_size: usize,
    /// Length, in characters, of each source preview in the sources block.
    pub source_preview_chars: usize,
    /// Rebuild policy for ingestion.
    pub ingest_mode: IngestMode,
    /// Name of the collection in the vector index.
    pub collection: String,
    /// Maximum number of embedding batches in flight during ingestion.
    pub embedding_concurrency: usize,
    /// Number of chunks sent per embedding batch.
    pub embedding_batch_size: usize,
    /// Timeout applied to every embedding and generation call, in seconds.
    pub request_timeout_secs: u64,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            chunk_strategy: ChunkStrategy::Recursive,
            top_k: 3,
            relevance_threshold: 0.5,
            embedding_model: "text-embedding-004".to_string(),
            llm_model: "gemini-2.5-flash".to_string(),
            temperature: 0.2,
            answer_fragment_size: 50,
            source_preview_chars: 200,
            ingest_mode: IngestMode::Replace,
            collection: "documents".to_string(),
            embedding_concurrency: 4,
            embedding_batch_size: 32,
            request_timeout_secs: 60,
        }
    }
}

impl RagConfig {
    /// Create a new builder for constructing a [`RagConfig`].
    pub fn builder() -> RagConfigBuilder {
        RagConfigBuilder::default()
    }

    /// Start a builder from this configuration, to override some fields and revalidate.
    pub fn into_builder(self) -> RagConfigBuilder {
        RagConfigBuilder { config: self }
    }

    /// Timeout for a single embedding or generation call.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Load configuration from `RAGDOC_*` environment variables on top of the defaults.
    ///
    /// `GEMINI_EMBEDDING_MODEL` and `GEMINI_LLM_MODEL` are honoured as fallbacks for the
    /// model identities. The result is validated.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if a variable cannot be parsed or the resulting
    /// configuration is invalid.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) but reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut builder = Self::builder();

        if let Some(v) = parse_var(&lookup, "RAGDOC_CHUNK_SIZE")? {
            builder = builder.chunk_size(v);
        }
        if let Some(v) = parse_var(&lookup, "RAGDOC_CHUNK_OVERLAP")? {
            builder = builder.chunk_overlap(v);
        }
        if let Some(v) = parse_var(&lookup, "RAGDOC_CHUNK_STRATEGY")? {
            builder = builder.chunk_strategy(v);
        }
        if let Some(v) = parse_var(&lookup, "RAGDOC_TOP_K")? {
            builder = builder.top_k(v);
        }
        if let Some(v) = parse_var(&lookup, "RAGDOC_RELEVANCE_THRESHOLD")? {
            builder = builder.relevance_threshold(v);
        }
        if let Some(v) =
            lookup("RAGDOC_EMBEDDING_MODEL").or_else(|| lookup("GEMINI_EMBEDDING_MODEL"))
        {
            builder = builder.embedding_model(v);
        }
        if let Some(v) = lookup("RAGDOC_LLM_MODEL").or_else(|| lookup("GEMINI_LLM_MODEL")) {
            builder = builder.llm_model(v);
        }
        if let Some(v) = parse_var(&lookup, "RAGDOC_TEMPERATURE")? {
            builder = builder.temperature(v);
        }
        if let Some(v) = parse_var(&lookup, "RAGDOC_ANSWER_FRAGMENT_SIZE")? {
            builder = builder.answer_fragment_size(v);
        }
        if let Some(v) = parse_var(&lookup, "RAGDOC_INGEST_MODE")? {
            builder = builder.ingest_mode(v);
        }
        if let Some(v) = lookup("RAGDOC_COLLECTION") {
            builder = builder.collection(v);
        }
        if let Some(v) = parse_var(&lookup, "RAGDOC_EMBEDDING_CONCURRENCY")? {
            builder = builder.embedding_concurrency(v);
        }
        if let Some(v) = parse_var(&lookup, "RAGDOC_EMBEDDING_BATCH_SIZE")? {
            builder = builder.embedding_batch_size(v);
        }
        if let Some(v) = parse_var(&lookup, "RAGDOC_SOURCE_PREVIEW_CHARS")? {
            builder = builder.source_preview_chars(v);
        }
        if let Some(v) = parse_var(&lookup, "RAGDOC_REQUEST_TIMEOUT_SECS")? {
            builder = builder.request_timeout_secs(v);
        }

        builder.build()
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => {
            raw.trim().parse::<T>().map(Some).map_err(|e| {
                RagError::ConfigError(format!("invalid value for {name} ('{raw}'): {e}"))
            })
        }
    }
}

/// Builder for constructing a validated [`RagConfig`].
#[derive(Debug, Clone, Default)]
pub struct RagConfigBuilder {
    config: RagConfig,
}

impl RagConfigBuilder {
    /// Start from an existing configuration instead of the defaults.
    pub fn from_config(config: RagConfig) -> Self {
        Self { config }
    }

    /// Set the maximum chunk size.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.config.chunk_size = size;
        self
    }

    /// Set the overlap between consecutive chunks.
    pub fn chunk_overlap(mut self, overlap: usize) -> Self {
        self.config.chunk_overlap = overlap;
        self
    }

    /// Set the chunking strategy.
    pub fn chunk_strategy(mut self, strategy: ChunkStrategy) -> Self {
        self.config.chunk_strategy = strategy;
        self
    }

    /// Set the number of nearest neighbours to request.
    pub fn top_k(mut self, k: usize) -> Self {
        self.config.top_k = k;
        self
    }

    /// Set the relevance threshold for the best match.
    pub fn relevance_threshold(mut self, threshold: f32) -> Self {
        self.config.relevance_threshold = threshold;
        self
    }

    /// Set the embedding model identity.
    pub fn embedding_model(mut self, model: impl Into<String>) -> Self {
        self.config.embedding_model = model.into();
        self
    }

    /// Set the language model identity.
    pub fn llm_model(mut self, model: impl Into<String>) -> Self {
        self.config.llm_model = model.into();
        self
    }

    /// Set the generation temperature.
    pub fn temperature(mut self, temperature: f32) -> Self {
        self.config.temperature = temperature;
        self
    }

    /// Set the streamed answer fragment length.
    pub fn answer_fragment_size(mut self, size: usize) -> Self {
        self.config.answer_fragment_size = size;
        self
    }

    /// Set the source preview length.
    pub fn source_preview_chars(mut self, chars: usize) -> Self {
        self.config.source_preview_chars = chars;
        self
    }

    /// Set the ingestion rebuild policy.
    pub fn ingest_mode(mut self, mode: IngestMode) -> Self {
        self.config.ingest_mode = mode;
        self
    }

    /// Set the collection name.
    pub fn collection(mut self, name: impl Into<String>) -> Self {
        self.config.collection = name.into();
        self
    }

    /// Set the number of embedding batches allowed in flight.
    pub fn embedding_concurrency(mut self, concurrency: usize) -> Self {
        self.config.embedding_concurrency = concurrency;
        self
    }

    /// Set the number of chunks per embedding batch.
    pub fn embedding_batch_size(mut self, size: usize) -> Self {
        self.config.embedding_batch_size = size;
        self
    }

    /// Set the per-call timeout in seconds.
    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = secs;
        self
    }

    /// Build the [`RagConfig`], validating that parameters are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if:
    /// - `chunk_size == 0` or `chunk_overlap >= chunk_size`
    /// - `top_k == 0`
    /// - `relevance_threshold` is outside `[0, 1]`
    /// - `temperature` is outside `[0, 2]`
    /// - `answer_fragment_size`, `embedding_concurrency`, `embedding_batch_size` or
    ///   `request_timeout_secs` is zero
    /// - `collection` is blank
    pub fn build(self) -> Result<RagConfig> {
        let c = &self.config;
        if c.chunk_size == 0 {
            return Err(RagError::ConfigError(
                "chunk_size must be greater than zero".to_string(),
            ));
        }
        if c.chunk_overlap >= c.chunk_size {
            return Err(RagError::ConfigError(format!(
                "chunk_overlap ({}) must be less than chunk_size ({})",
                c.chunk_overlap, c.chunk_size
            )));
        }
        if c.top_k == 0 {
            return Err(RagError::ConfigError(
                "top_k must be greater than zero".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&c.relevance_threshold) {
            return Err(RagError::ConfigError(format!(
                "relevance_threshold ({}) must be within [0, 1]",
                c.relevance_threshold
            )));
        }
        if !(0.0..=2.0).contains(&c.temperature) {
            return Err(RagError::ConfigError(format!(
                "temperature ({}) must be within [0, 2]",
                c.temperature
            )));
        }
        if c.answer_fragment_size == 0 {
            return Err(RagError::ConfigError(
                "answer_fragment_size must be greater than zero".to_string(),
            ));
        }
        if c.embedding_concurrency == 0 || c.embedding_batch_size == 0 {
            return Err(RagError::ConfigError(
                "embedding_concurrency and embedding_batch_size must be greater than zero"
                    .to_string(),
            ));
        }
        if c.request_timeout_secs == 0 {
            return Err(RagError::ConfigError(
                "request_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if c.collection.trim().is_empty() {
            return Err(RagError::ConfigError(
                "collection must not be empty".to_string(),
            ));
        }
        Ok(self.config)
    }
}
