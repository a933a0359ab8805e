//! Source document discovery and text extraction.
//!
//! A [`DirectoryLoader`] walks a directory tree, hands every file to the first
//! [`DocumentLoader`] that accepts it, and collects page-level [`Document`]s.
//! Files that fail to load are skipped and reported, never fatal.

use std::any::Any;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::document::Document;
use crate::error::{RagError, Result};

/// Extracts documents from a single file.
pub trait DocumentLoader: Send + Sync {
    /// Load every document (page) contained in the file at `path`.
    fn load(&self, path: &Path) -> Result<Vec<Document>>;

    /// Whether this loader handles the given file.
    fn can_load(&self, path: &Path) -> bool;
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| extensions.iter().any(|e| ext.eq_ignore_ascii_case(e)))
}

/// Loads PDF files, producing one [`Document`] per page.
#[cfg(feature = "pdf")]
#[derive(Debug, Clone, Copy, Default)]
pub struct PdfLoader;

#[cfg(feature = "pdf")]
impl DocumentLoader for PdfLoader {
    fn load(&self, path: &Path) -> Result<Vec<Document>> {
        let pages = pdf_extract::extract_text_by_pages(path).map_err(|e| RagError::LoadError {
            path: path.to_path_buf(),
            message: format!("failed to extract text from PDF: {e}"),
        })?;

        debug!(path = %path.display(), pages = pages.len(), "extracted PDF pages");

        Ok(pages
            .into_iter()
            .enumerate()
            .map(|(i, text)| Document::new(path, Some(i as u32 + 1), text))
            .collect())
    }

    fn can_load(&self, path: &Path) -> bool {
        has_extension(path, &["pdf"])
    }
}

/// Loads plain-text and Markdown files as a single unpaginated [`Document`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TextLoader;

impl DocumentLoader for TextLoader {
    fn load(&self, path: &Path) -> Result<Vec<Document>> {
        let content = fs::read_to_string(path).map_err(|e| RagError::LoadError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Ok(vec![Document::new(path, None, content)])
    }

    fn can_load(&self, path: &Path) -> bool {
        has_extension(path, &["txt", "md", "markdown"])
    }
}

/// A file that was discovered but could not be loaded.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SkippedFile {
    /// The file path.
    pub path: PathBuf,
    /// Why it was skipped.
    pub reason: String,
}

/// The outcome of loading a directory.
#[derive(Debug, Clone, Default)]
pub struct LoadedDirectory {
    /// Documents from every file that loaded successfully, in path order.
    pub documents: Vec<Document>,
    /// Number of files that loaded successfully.
    pub files_loaded: usize,
    /// Files that failed to load.
    pub skipped: Vec<SkippedFile>,
}

/// Recursively loads every supported file under a directory.
pub struct DirectoryLoader {
    loaders: Vec<Box<dyn DocumentLoader>>,
}

impl DirectoryLoader {
    /// A loader with no file handlers registered.
    pub fn empty() -> Self {
        Self {
            loaders: Vec::new(),
        }
    }

    /// Register an additional file handler. Earlier handlers take precedence.
    pub fn with_loader(mut self, loader: impl DocumentLoader + 'static) -> Self {
        self.loaders.push(Box::new(loader));
        self
    }

    fn loader_for(&self, path: &Path) -> Option<&dyn DocumentLoader> {
        self.loaders
            .iter()
            .find(|l| l.can_load(path))
            .map(|l| l.as_ref())
    }

    /// List every supported file under `root`, sorted.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::LoadError`] if `root` is not a readable directory.
    pub fn discover(&self, root: &Path) -> Result<Vec<PathBuf>> {
        if !root.is_dir() {
            return Err(RagError::LoadError {
                path: root.to_path_buf(),
                message: "not a directory".to_string(),
            });
        }

        let mut files = WalkDir::new(root)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(error = %e, "skipping unreadable directory entry");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| self.loader_for(entry.path()).is_some())
            .map(|entry| entry.into_path())
            .collect::<Vec<_>>();

        files.sort();
        Ok(files)
    }

    /// Load every supported file under `root`.
    ///
    /// A file that fails to load is logged and recorded in
    /// [`LoadedDirectory::skipped`]; it does not abort the walk.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::LoadError`] only if `root` itself cannot be walked.
    pub fn load_directory(&self, root: &Path) -> Result<LoadedDirectory> {
        let mut loaded = LoadedDirectory::default();

        for path in self.discover(root)? {
            let Some(loader) = self.loader_for(&path) else {
                continue;
            };
            match panic::catch_unwind(AssertUnwindSafe(|| loader.load(&path))) {
                Ok(Ok(documents)) => {
                    loaded.files_loaded += 1;
                    loaded.documents.extend(documents);
                }
                Ok(Err(e)) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable file");
                    loaded.skipped.push(SkippedFile {
                        path,
                        reason: e.to_string(),
                    });
                }
                Err(payload) => {
                    let reason = format!("loader panicked: {}", panic_message(payload.as_ref()));
                    warn!(path = %path.display(), %reason, "skipping file that crashed its loader");
                    loaded.skipped.push(SkippedFile { path, reason });
                }
            }
        }

        Ok(loaded)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

impl Default for DirectoryLoader {
    /// PDF files only, when the `pdf` feature is enabled.
    fn default() -> Self {
        let loader = Self::empty();
        #[cfg(feature = "pdf")]
        let loader = loader.with_loader(PdfLoader);
        loader
    }
}

impl std::fmt::Debug for DirectoryLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryLoader")
            .field("loaders", &self.loaders.len())
            .finish()
    }
}
