//! Query-time retrieval with relevance gating.
//!
//! The [`Retriever`] embeds a question, asks the vector store for the `top_k`
//! nearest chunks and decides whether the best of them is relevant enough to
//! ground an answer. When it is not, callers get
//! [`Retrieval::NoRelevantContext`] and must not call the language model.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info};

use crate::config::RagConfig;
use crate::document::SearchResult;
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result, with_timeout};
use crate::vectorstore::VectorStore;

/// Separator placed between chunk texts in the grounding context.
pub const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";

/// Context that passed the relevance gate.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedContext {
    /// The retrieved chunks, best first.
    pub results: Vec<SearchResult>,
    /// The chunk texts joined with [`CONTEXT_SEPARATOR`], best first.
    pub context: String,
}

/// The outcome of a retrieval.
#[derive(Debug, Clone)]
pub enum Retrieval {
    /// The best match reached the relevance threshold.
    Relevant(RetrievedContext),
    /// Nothing was found, or the best match scored below the threshold.
    NoRelevantContext {
        /// Score of the best match, if there was any match at all.
        best_score: Option<f32>,
    },
}

impl Retrieval {
    /// Apply the relevance gate to an ordered search result.
    ///
    /// The gate passes iff the result is non-empty and its first (best) score is
    /// `>= threshold`. All results are kept when it passes.
    pub fn gate(results: Vec<SearchResult>, threshold: f32) -> Self {
        match results.first().map(|r| r.score) {
            Some(best) if best >= threshold => {
                let context = assemble_context(&results);
                Self::Relevant(RetrievedContext { results, context })
            }
            best_score => Self::NoRelevantContext { best_score },
        }
    }

    /// Whether the gate passed.
    pub fn is_relevant(&self) -> bool {
        matches!(self, Self::Relevant(_))
    }
}

/// Join chunk texts, in the given order, with [`CONTEXT_SEPARATOR`].
pub fn assemble_context(results: &[SearchResult]) -> String {
    results
        .iter()
        .map(|r| r.chunk.text.as_str())
        .collect::<Vec<_>>()
        .join(CONTEXT_SEPARATOR)
}

/// Embeds questions, searches the index and applies the relevance gate.
///
/// A retriever holds no mutable state; one instance can serve concurrent queries.
pub struct Retriever {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    collection: String,
    top_k: usize,
    threshold: f32,
    timeout: Duration,
}

impl Retriever {
    /// Create a retriever using the collection, `top_k`, threshold and timeout from `config`.
    pub fn new(
        config: &RagConfig,
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
    ) -> Self {
        Self {
            embedder,
            store,
            collection: config.collection.clone(),
            top_k: config.top_k,
            threshold: config.relevance_threshold,
            timeout: config.request_timeout(),
        }
    }

    /// The configured relevance threshold.
    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Embed `query` and return the ungated top-`k` matches, best first.
    ///
    /// # Errors
    ///
    /// - [`RagError::EmptyQuery`] if `query` is blank; nothing is called.
    /// - [`RagError::EmbeddingFailed`] if embedding fails or times out.
    /// - [`RagError::IndexUnavailable`] / [`RagError::DimensionMismatch`] from the store.
    pub async fn search(&self, query: &str) -> Result<Vec<SearchResult>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(RagError::EmptyQuery);
        }

        let provider = self.embedder.name().to_string();
        let embedding = with_timeout(self.timeout, self.embedder.embed_query(query), |d| {
            RagError::EmbeddingFailed {
                provider,
                message: format!("query embedding timed out after {}s", d.as_secs()),
            }
        })
        .await
        .inspect_err(|e| error!(error = %e, "embedding failed during query"))?;

        let results = self
            .store
            .search(&self.collection, &embedding, self.top_k)
            .await
            .inspect_err(
                |e| error!(collection = %self.collection, error = %e, "vector store search failed"),
            )?;

        for (i, r) in results.iter().enumerate() {
            debug!(rank = i + 1, score = r.score, chunk.id = %r.chunk.id, "retrieved chunk");
        }
        Ok(results)
    }

    /// Embed `query`, search, and apply the relevance gate.
    ///
    /// # Errors
    ///
    /// Same as [`search`](Self::search). A weak or empty result is not an error.
    pub async fn retrieve(&self, query: &str) -> Result<Retrieval> {
        let results = self.search(query).await?;
        let retrieval = Retrieval::gate(results, self.threshold);
        match &retrieval {
            Retrieval::Relevant(ctx) => {
                info!(
                    result_count = ctx.results.len(),
                    "retrieval passed relevance gate"
                )
            }
            Retrieval::NoRelevantContext { best_score } => {
                info!(
                    ?best_score,
                    threshold = self.threshold,
                    "no relevant context found"
                )
            }
        }
        Ok(retrieval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Chunk, Document};

    fn result(text: &str, score: f32) -> SearchResult {
        let doc = Document::new("doc.pdf", Some(1), text);
        SearchResult {
            chunk: Chunk::from_document(&doc, 0, text.to_string(), None),
            score,
        }
    }

    #[test]
    fn gate_rejects_score_just_below_threshold() {
        let retrieval = Retrieval::gate(vec![result("a", 0.49)], 0.5);
        assert!(
            matches!(retrieval, Retrieval::NoRelevantContext { best_score: Some(s) } if s == 0.49)
        );
    }

    #[test]
    fn gate_accepts_score_equal_to_threshold() {
        assert!(Retrieval::gate(vec![result("a", 0.5)], 0.5).is_relevant());
    }

    #[test]
    fn gate_rejects_empty_result() {
        let retrieval = Retrieval::gate(Vec::new(), 0.0);
        assert!(matches!(
            retrieval,
            Retrieval::NoRelevantContext { best_score: None }
        ));
    }

    #[test]
    fn gate_only_looks_at_the_best_match() {
        let retrieval = Retrieval::gate(vec![result("best", 0.8), result("weak", 0.1)], 0.5);
        let Retrieval::Relevant(ctx) = retrieval else {
            panic!("expected relevant context");
        };
        assert_eq!(ctx.results.len(), 2);
        assert_eq!(ctx.context, format!("best{CONTEXT_SEPARATOR}weak"));
    }
}
