//! Data types for documents, chunks, and search results.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Metadata key holding the source file path.
pub const META_SOURCE: &str = "source";
/// Metadata key holding the source file name.
pub const META_FILE_NAME: &str = "file_name";
/// Metadata key holding the 1-based page number.
pub const META_PAGE: &str = "page";
/// Metadata key holding the chunk's position within its document.
pub const META_CHUNK_INDEX: &str = "chunk_index";

/// One source unit: a single page of a PDF, or a whole plain-text file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    /// Stable identifier derived from the source path and page number.
    pub id: String,
    /// The file this document was read from.
    pub source_path: PathBuf,
    /// 1-based page number, if the source is paginated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_number: Option<u32>,
    /// The extracted text.
    pub text: String,
    /// Source metadata inherited by every chunk of this document.
    pub metadata: HashMap<String, String>,
}

impl Document {
    /// Create a document for one page (or the whole content) of a file.
    ///
    /// The id is a truncated SHA-256 of the path and page, so re-loading the same file
    /// yields the same ids.
    pub fn new(
        source_path: impl AsRef<Path>,
        page_number: Option<u32>,
        text: impl Into<String>,
    ) -> Self {
        let source_path = source_path.as_ref().to_path_buf();
        let source = source_path.to_string_lossy().to_string();

        let mut hasher = Sha256::new();
        hasher.update(source.as_bytes());
        if let Some(page) = page_number {
            hasher.update(page.to_le_bytes());
        }
        let hash = format!("{:x}", hasher.finalize());
        let id = hash.chars().take(16).collect::<String>();

        let mut metadata = HashMap::from([(META_SOURCE.to_string(), source)]);
        if let Some(name) = source_path.file_name() {
            metadata.insert(
                META_FILE_NAME.to_string(),
                name.to_string_lossy().to_string(),
            );
        }
        if let Some(page) = page_number {
            metadata.insert(META_PAGE.to_string(), page.to_string());
        }

        Self {
            id,
            source_path,
            page_number,
            text: text.into(),
            metadata,
        }
    }

    /// Add a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A segment of a [`Document`] with its vector embedding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    /// Unique identifier, `{document_id}_{chunk_index}`.
    pub id: String,
    /// The text content of the chunk.
    pub text: String,
    /// Character offset of the chunk within the parent document text, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_offset: Option<usize>,
    /// The vector embedding for this chunk's text. Empty until the pipeline embeds it.
    #[serde(default)]
    pub embedding: Vec<f32>,
    /// Metadata inherited from the parent document plus `chunk_index`.
    pub metadata: HashMap<String, String>,
    /// The ID of the parent [`Document`].
    pub document_id: String,
}

impl Chunk {
    /// Build the `index`-th chunk of `document`, inheriting its metadata.
    pub fn from_document(
        document: &Document,
        index: usize,
        text: String,
        start_offset: Option<usize>,
    ) -> Self {
        let mut metadata = document.metadata.clone();
        metadata.insert(META_CHUNK_INDEX.to_string(), index.to_string());
        Self {
            id: format!("{}_{index}", document.id),
            text,
            start_offset,
            embedding: Vec::new(),
            metadata,
            document_id: document.id.clone(),
        }
    }

    /// The source path recorded in the metadata, if any.
    pub fn source(&self) -> Option<&str> {
        self.metadata.get(META_SOURCE).map(String::as_str)
    }

    /// The page number recorded in the metadata, if any.
    pub fn page(&self) -> Option<u32> {
        self.metadata.get(META_PAGE).and_then(|p| p.parse().ok())
    }
}

/// A retrieved [`Chunk`] paired with a relevance score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    /// The retrieved chunk.
    pub chunk: Chunk,
    /// Cosine similarity between the query and the chunk (higher is more relevant).
    pub score: f32,
}
