//! Document chunking strategies.
//!
//! This module provides the [`Chunker`] trait and three implementations:
//!
//! - [`RecursiveChunker`]: character budget, breaking on paragraphs, lines, words, then characters
//! - [`FixedSizeChunker`]: fixed character windows with exact overlap
//! - [`WordChunker`]: fixed word windows with exact overlap
//!
//! All lengths are counted in Unicode scalar values, never bytes. Every chunker trims
//! the document text first, returns a single chunk when the trimmed text fits in
//! `chunk_size`, and drops chunks that are empty or whitespace-only.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::config::{ChunkStrategy, RagConfig};
use crate::document::{Chunk, Document};

/// A strategy for splitting documents into chunks.
///
/// Implementations produce [`Chunk`]s with text and metadata but no embeddings.
/// Embeddings are attached later by the pipeline.
pub trait Chunker: Send + Sync {
    /// Split a document into chunks, in document order.
    fn chunk(&self, document: &Document) -> Vec<Chunk>;
}

/// Build the chunker selected by `config.chunk_strategy`.
pub fn chunker_for(config: &RagConfig) -> Arc<dyn Chunker> {
    match config.chunk_strategy {
        ChunkStrategy::Recursive => Arc::new(RecursiveChunker::new(
            config.chunk_size,
            config.chunk_overlap,
        )),
        ChunkStrategy::Fixed => Arc::new(FixedSizeChunker::new(
            config.chunk_size,
            config.chunk_overlap,
        )),
        ChunkStrategy::Words => Arc::new(WordChunker::new(config.chunk_size, config.chunk_overlap)),
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// The trimmed document text and its character offset within the untrimmed text.
fn trimmed(document: &Document) -> (&str, usize) {
    let text = document.text.trim_start();
    let lead = char_len(&document.text[..document.text.len() - text.len()]);
    (text.trim_end(), lead)
}

/// Turn raw pieces into chunks, dropping blank ones and numbering the rest.
fn into_chunks(document: &Document, pieces: Vec<(String, Option<usize>)>) -> Vec<Chunk> {
    pieces
        .into_iter()
        .filter(|(text, _)| !text.trim().is_empty())
        .enumerate()
        .map(|(i, (text, offset))| Chunk::from_document(document, i, text, offset))
        .collect()
}

/// Start positions of overlapping windows over a sequence of `len` units.
///
/// The last window ends exactly at `len`; no window is fully contained in its
/// predecessor.
fn window_starts(len: usize, size: usize, overlap: usize) -> Vec<usize> {
    let step = size.saturating_sub(overlap).max(1);
    let mut starts = Vec::new();
    let mut start = 0;
    loop {
        starts.push(start);
        if start + size >= len {
            break;
        }
        start += step;
    }
    starts
}

/// Splits text into fixed-size chunks by character count with configurable overlap.
///
/// Consecutive chunks share exactly `chunk_overlap` characters; only the last chunk
/// may be shorter than `chunk_size`.
///
/// # Example
///
/// ```rust,ignore
/// use ragdoc_core::FixedSizeChunker;
///
/// let chunker = FixedSizeChunker::new(300, 100);
/// let chunks = chunker.chunk(&document);
/// ```
#[derive(Debug, Clone)]
pub struct FixedSizeChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl FixedSizeChunker {
    /// Create a new `FixedSizeChunker`.
    ///
    /// # Arguments
    ///
    /// * `chunk_size`: maximum number of characters per chunk
    /// * `chunk_overlap`: number of overlapping characters between consecutive chunks
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            chunk_overlap,
        }
    }
}

impl Chunker for FixedSizeChunker {
    fn chunk(&self, document: &Document) -> Vec<Chunk> {
        let (text, lead) = trimmed(document);
        let chars: Vec<char> = text.chars().collect();
        if chars.len() <= self.chunk_size {
            return into_chunks(document, vec![(text.to_string(), Some(lead))]);
        }

        let pieces = window_starts(chars.len(), self.chunk_size, self.chunk_overlap)
            .into_iter()
            .map(|start| {
                let end = (start + self.chunk_size).min(chars.len());
                (
                    chars[start..end].iter().collect::<String>(),
                    Some(lead + start),
                )
            })
            .collect();

        into_chunks(document, pieces)
    }
}

/// Splits text into windows of whole words.
///
/// Words are whitespace-delimited and re-joined with single spaces, so a chunk never
/// starts or ends inside a word. Consecutive chunks share exactly `chunk_overlap` words.
#[derive(Debug, Clone)]
pub struct WordChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl WordChunker {
    /// Create a new `WordChunker`.
    ///
    /// # Arguments
    ///
    /// * `chunk_size`: maximum number of words per chunk
    /// * `chunk_overlap`: number of overlapping words between consecutive chunks
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            chunk_overlap,
        }
    }
}

impl Chunker for WordChunker {
    fn chunk(&self, document: &Document) -> Vec<Chunk> {
        let (text, lead) = trimmed(document);
        let words: Vec<&str> = text.split_whitespace().collect();
        if words.len() <= self.chunk_size {
            return into_chunks(document, vec![(text.to_string(), Some(lead))]);
        }

        let pieces = window_starts(words.len(), self.chunk_size, self.chunk_overlap)
            .into_iter()
            .map(|start| {
                let end = (start + self.chunk_size).min(words.len());
                (words[start..end].join(" "), None)
            })
            .collect();

        into_chunks(document, pieces)
    }
}

/// Splits text hierarchically: paragraphs → lines → words → characters.
///
/// The text is split on the first separator it contains. Pieces shorter than
/// `chunk_size` are merged greedily into chunks; when a chunk is emitted, pieces
/// are dropped from its front until at most `chunk_overlap` characters remain, and
/// those carry over into the next chunk. Pieces that are still too long are split
/// again with the next separator. Chunks are trimmed, so the overlap between
/// neighbours is at most `chunk_overlap` characters and always falls on a boundary.
///
/// # Example
///
/// ```rust,ignore
/// use ragdoc_core::RecursiveChunker;
///
/// let chunker = RecursiveChunker::new(1000, 200);
/// let chunks = chunker.chunk(&document);
/// ```
#[derive(Debug, Clone)]
pub struct RecursiveChunker {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Vec<String>,
}

impl RecursiveChunker {
    /// Create a new `RecursiveChunker` with the default separators.
    ///
    /// # Arguments
    ///
    /// * `chunk_size`: maximum number of characters per chunk
    /// * `chunk_overlap`: maximum number of overlapping characters between consecutive chunks
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            chunk_overlap,
            separators: ["\n\n", "\n", " ", ""]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }

    /// Replace the separator hierarchy. An empty string means "split into characters"
    /// and is appended automatically if missing.
    pub fn with_separators(mut self, separators: &[&str]) -> Self {
        self.separators = separators.iter().map(|s| s.to_string()).collect();
        if self.separators.last().is_none_or(|s| !s.is_empty()) {
            self.separators.push(String::new());
        }
        self
    }

    fn split_recursive(&self, text: &str, separators: &[String]) -> Vec<String> {
        let mut separator = "";
        let mut remaining: &[String] = &[];
        for (i, sep) in separators.iter().enumerate() {
            if sep.is_empty() {
                break;
            }
            if text.contains(sep.as_str()) {
                separator = sep;
                remaining = &separators[i + 1..];
                break;
            }
        }

        let splits: Vec<&str> = if separator.is_empty() {
            text.char_indices()
                .map(|(i, c)| &text[i..i + c.len_utf8()])
                .collect()
        } else {
            split_keeping_separator(text, separator)
        };

        let mut chunks = Vec::new();
        let mut good: Vec<&str> = Vec::new();
        for split in splits {
            if char_len(split) < self.chunk_size {
                good.push(split);
                continue;
            }
            if !good.is_empty() {
                chunks.extend(self.merge(&good));
                good.clear();
            }
            if remaining.is_empty() {
                chunks.push(split.trim().to_string());
            } else {
                chunks.extend(self.split_recursive(split, remaining));
            }
        }
        if !good.is_empty() {
            chunks.extend(self.merge(&good));
        }

        chunks
    }

    /// Greedily merge small pieces into chunks of at most `chunk_size` characters,
    /// carrying up to `chunk_overlap` characters of trailing pieces into the next chunk.
    fn merge(&self, splits: &[&str]) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut current: VecDeque<&str> = VecDeque::new();
        let mut total = 0;

        for split in splits {
            let len = char_len(split);
            if total + len > self.chunk_size && !current.is_empty() {
                let chunk = current.iter().copied().collect::<String>();
                let chunk = chunk.trim();
                if !chunk.is_empty() {
                    chunks.push(chunk.to_string());
                }
                while total > self.chunk_overlap || (total + len > self.chunk_size && total > 0) {
                    match current.pop_front() {
                        Some(first) => total -= char_len(first),
                        None => break,
                    }
                }
            }
            current.push_back(split);
            total += len;
        }

        let chunk = current.iter().copied().collect::<String>();
        let chunk = chunk.trim();
        if !chunk.is_empty() {
            chunks.push(chunk.to_string());
        }

        chunks
    }
}

/// Split text at a separator while keeping the separator attached to the preceding segment.
fn split_keeping_separator<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    let mut result = Vec::new();
    let mut start = 0;

    while let Some(pos) = text[start..].find(separator) {
        let end = start + pos + separator.len();
        result.push(&text[start..end]);
        start = end;
    }

    if start < text.len() {
        result.push(&text[start..]);
    }

    result
}

/// Locate each chunk in the source text, searching forward from the previous hit.
fn locate(text: &str, lead: usize, chunks: Vec<String>) -> Vec<(String, Option<usize>)> {
    let mut from = 0;
    chunks
        .into_iter()
        .map(|chunk| match text[from..].find(chunk.as_str()) {
            Some(pos) => {
                let byte = from + pos;
                let offset = lead + char_len(&text[..byte]);
                from = byte + text[byte..].chars().next().map_or(1, char::len_utf8);
                (chunk, Some(offset))
            }
            None => (chunk, None),
        })
        .collect()
}

impl Chunker for RecursiveChunker {
    fn chunk(&self, document: &Document) -> Vec<Chunk> {
        let (text, lead) = trimmed(document);
        if char_len(text) <= self.chunk_size {
            return into_chunks(document, vec![(text.to_string(), Some(lead))]);
        }

        let raw = self.split_recursive(text, &self.separators);
        into_chunks(document, locate(text, lead, raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(text: &str) -> Document {
        Document::new("data/books/sample.pdf", Some(1), text)
    }

    #[test]
    fn short_document_yields_one_trimmed_chunk() {
        let d = doc("  The capital of France is Paris.\n");
        for chunker in [
            Box::new(FixedSizeChunker::new(100, 10)) as Box<dyn Chunker>,
            Box::new(RecursiveChunker::new(100, 10)),
            Box::new(WordChunker::new(100, 10)),
        ] {
            let chunks = chunker.chunk(&d);
            assert_eq!(chunks.len(), 1);
            assert_eq!(chunks[0].text, "The capital of France is Paris.");
        }
    }

    #[test]
    fn blank_document_yields_nothing() {
        let d = doc(" \n\t \n");
        assert!(FixedSizeChunker::new(10, 2).chunk(&d).is_empty());
        assert!(RecursiveChunker::new(10, 2).chunk(&d).is_empty());
        assert!(WordChunker::new(10, 2).chunk(&d).is_empty());
    }

    #[test]
    fn fixed_chunks_overlap_exactly() {
        let d = doc("abcdefghijklmnopqrstuvwxyz");
        let chunks = FixedSizeChunker::new(10, 4).chunk(&d);
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();

        assert_eq!(
            texts,
            vec!["abcdefghij", "ghijklmnop", "mnopqrstuv", "stuvwxyz"]
        );
        assert_eq!(chunks[1].start_offset, Some(6));
        assert_eq!(
            chunks[3].metadata.get("chunk_index").map(String::as_str),
            Some("3")
        );
    }

    #[test]
    fn fixed_chunker_is_utf8_safe() {
        let d = doc("àéîõüàéîõüàéîõü");
        let chunks = FixedSizeChunker::new(4, 1).chunk(&d);
        assert!(chunks.iter().all(|c| c.text.chars().count() <= 4));
        assert_eq!(chunks[0].text, "àéîõ");
        assert_eq!(chunks[1].text, "õüàé");
    }

    #[test]
    fn word_chunks_overlap_by_whole_words() {
        let d = doc("one two three four five six seven");
        let chunks = WordChunker::new(3, 1).chunk(&d);
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(
            texts,
            vec!["one two three", "three four five", "five six seven"]
        );
    }

    #[test]
    fn recursive_prefers_paragraph_boundaries() {
        let text = "First paragraph is here.\n\nSecond paragraph is here.\n\nThird one.";
        let chunks = RecursiveChunker::new(30, 0).chunk(&doc(text));
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(
            texts,
            vec![
                "First paragraph is here.",
                "Second paragraph is here.",
                "Third one."
            ]
        );
        assert_eq!(chunks[1].start_offset, Some(26));
    }

    #[test]
    fn recursive_chunks_respect_size_and_carry_overlap() {
        let text = "alpha beta gamma delta epsilon zeta eta theta iota kappa lambda mu";
        let chunks = RecursiveChunker::new(20, 8).chunk(&doc(text));

        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.text.chars().count() <= 20));
        for pair in chunks.windows(2) {
            let last_word = pair[0].text.split(' ').next_back().unwrap();
            assert!(
                pair[1].text.starts_with(last_word),
                "expected '{}' to start with '{last_word}'",
                pair[1].text
            );
        }
    }

    #[test]
    fn recursive_falls_back_to_characters() {
        let text = "x".repeat(25);
        let chunks = RecursiveChunker::new(10, 0).chunk(&doc(&text));
        let lens: Vec<usize> = chunks.iter().map(|c| c.text.len()).collect();
        assert_eq!(lens, vec![10, 10, 5]);
    }

    #[test]
    fn chunker_for_follows_strategy() {
        let config = RagConfig::builder()
            .chunk_size(3)
            .chunk_overlap(0)
            .chunk_strategy(ChunkStrategy::Words);
        let chunker = chunker_for(&config.build().unwrap());
        let chunks = chunker.chunk(&doc("a b c d e f g"));
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2].text, "g");
    }
}
