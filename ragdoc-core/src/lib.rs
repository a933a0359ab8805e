//! Retrieval-augmented question answering over local document collections.
//!
//! This crate provides:
//! - Directory discovery and PDF/text loading
//! - Boundary-aware, fixed-size and word-window chunking
//! - In-memory and on-disk vector stores with cosine search
//! - Relevance-gated retrieval and grounded answer assembly with a streamed payload
//! - Gemini (and optionally OpenAI) embedding and generation backends
//!
//! Everything is composed through [`RagPipeline::builder()`].

pub mod answer;
pub mod chunking;
pub mod config;
pub mod document;
pub mod embedding;
pub mod error;
pub mod inmemory;
pub mod llm;
pub mod loader;
pub mod local;
pub mod pipeline;
pub mod prompt;
pub mod retriever;
pub mod vectorstore;

#[cfg(feature = "gemini")]
pub mod gemini;
#[cfg(feature = "openai")]
pub mod openai;

pub use answer::{
    Answer, AnswerAssembler, AnswerEvent, AnswerStream, END_OF_ANSWER, NOT_FOUND_MESSAGE,
    SOURCES_TAG, SourceCitation, fragment, render_sources,
};
pub use chunking::{Chunker, FixedSizeChunker, RecursiveChunker, WordChunker, chunker_for};
pub use config::{ChunkStrategy, IngestMode, RagConfig, RagConfigBuilder};
pub use document::{Chunk, Document, SearchResult};
pub use embedding::EmbeddingProvider;
pub use error::{RagError, Result};
pub use inmemory::InMemoryVectorStore;
pub use llm::{LanguageModel, TextStream};
#[cfg(feature = "pdf")]
pub use loader::PdfLoader;
pub use loader::{DirectoryLoader, DocumentLoader, LoadedDirectory, SkippedFile, TextLoader};
pub use local::LocalVectorStore;
pub use pipeline::{IngestionReport, QueryResponse, QueryStream, RagPipeline, RagPipelineBuilder};
pub use prompt::{DEFAULT_TEMPLATE, PromptTemplate};
pub use retriever::{CONTEXT_SEPARATOR, Retrieval, RetrievedContext, Retriever};
pub use vectorstore::{VectorStore, cosine_similarity};
