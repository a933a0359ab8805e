//! Grounded answer generation and the streamed answer payload.
//!
//! The [`AnswerAssembler`] renders the grounding prompt, calls the
//! [`LanguageModel`] and turns the answer into a sequence of [`AnswerEvent`]s:
//!
//! ```text
//! Fragment* EndOfAnswer Sources
//! ```
//!
//! For models without token streaming the complete answer is cut into
//! `answer_fragment_size`-character fragments after generation. Models that
//! advertise token streaming have their pieces forwarded as they arrive.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, BoxStream, StreamExt};
use serde::Serialize;
use tracing::{debug, error, info};

use crate::config::RagConfig;
use crate::document::SearchResult;
use crate::error::{RagError, Result, with_timeout};
use crate::llm::LanguageModel;
use crate::prompt::PromptTemplate;
use crate::retriever::RetrievedContext;

/// Marker emitted once, between the last answer fragment and the sources block.
pub const END_OF_ANSWER: &str = "\n<END_OF_ANSWER>\n";

/// Tag that opens the sources block.
pub const SOURCES_TAG: &str = "<SOURCES>";

/// User-facing reply when retrieval finds nothing relevant.
pub const NOT_FOUND_MESSAGE: &str = "Unable to find matching results in the documents.";

/// One cited source chunk.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SourceCitation {
    /// 1-based position in the retrieval result.
    pub index: usize,
    /// Single-line, truncated preview of the chunk text.
    pub preview: String,
    /// Similarity score of the chunk.
    pub score: f32,
    /// Source file, if recorded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Page number, if recorded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
}

impl SourceCitation {
    /// The line written for this source in the sources block.
    pub fn line(&self) -> String {
        format!(
            "Source {}: {} (Score: {:.4})",
            self.index, self.preview, self.score
        )
    }
}

/// A complete answer with the sources that grounded it.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    /// The model's answer text.
    pub text: String,
    /// The cited sources, best first.
    pub sources: Vec<SourceCitation>,
}

/// One element of the streamed answer payload.
#[derive(Debug, Clone, PartialEq)]
pub enum AnswerEvent {
    /// A piece of the answer text, in order.
    Fragment(String),
    /// End of the answer text. Emitted exactly once.
    EndOfAnswer,
    /// The sources block. Emitted exactly once, last.
    Sources(Vec<SourceCitation>),
}

impl AnswerEvent {
    /// Render the event in the plain-text wire format.
    pub fn to_wire(&self) -> String {
        match self {
            Self::Fragment(text) => text.clone(),
            Self::EndOfAnswer => END_OF_ANSWER.to_string(),
            Self::Sources(sources) => render_sources(sources),
        }
    }
}

/// A stream of answer events.
pub type AnswerStream = BoxStream<'static, Result<AnswerEvent>>;

/// Render the sources block: the tag, then one line per source.
pub fn render_sources(sources: &[SourceCitation]) -> String {
    let lines = sources
        .iter()
        .map(SourceCitation::line)
        .collect::<Vec<_>>()
        .join("\n");
    format!("{SOURCES_TAG}{lines}\n")
}

/// Cut `text` into consecutive pieces of `size` characters; the last may be shorter.
///
/// Concatenating the pieces gives back `text`. An empty text yields no pieces.
pub fn fragment(text: &str, size: usize) -> Vec<String> {
    let size = size.max(1);
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(size)
        .map(|piece| piece.iter().collect())
        .collect()
}

fn preview(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        flat
    } else {
        let mut cut: String = flat.chars().take(max_chars).collect();
        cut.push_str("...");
        cut
    }
}

fn generation_failed(model: &str, e: RagError) -> RagError {
    match e {
        RagError::GenerationFailed { .. } => e,
        other => RagError::GenerationFailed {
            model: model.to_string(),
            message: other.to_string(),
        },
    }
}

/// Renders the grounding prompt, invokes the model and structures the answer.
pub struct AnswerAssembler {
    model: Arc<dyn LanguageModel>,
    template: PromptTemplate,
    fragment_size: usize,
    preview_chars: usize,
    timeout: Duration,
}

impl AnswerAssembler {
    /// Create an assembler with the default prompt template.
    pub fn new(config: &RagConfig, model: Arc<dyn LanguageModel>) -> Self {
        Self {
            model,
            template: PromptTemplate::default(),
            fragment_size: config.answer_fragment_size,
            preview_chars: config.source_preview_chars,
            timeout: config.request_timeout(),
        }
    }

    /// Replace the prompt template.
    pub fn with_template(mut self, template: PromptTemplate) -> Self {
        self.template = template;
        self
    }

    /// Render the prompt for `question` grounded in `context`.
    pub fn render_prompt(&self, question: &str, context: &str) -> String {
        self.template.render(context, question)
    }

    /// Build the citation list for the retrieved chunks, in order.
    pub fn citations(&self, results: &[SearchResult]) -> Vec<SourceCitation> {
        results
            .iter()
            .enumerate()
            .map(|(i, r)| SourceCitation {
                index: i + 1,
                preview: preview(&r.chunk.text, self.preview_chars),
                score: r.score,
                source: r.chunk.source().map(str::to_string),
                page: r.chunk.page(),
            })
            .collect()
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let model = self.model.model_name().to_string();
        with_timeout(self.timeout, self.model.generate(prompt), |d| {
            RagError::GenerationFailed {
                model: model.clone(),
                message: format!("generation timed out after {}s", d.as_secs()),
            }
        })
        .await
        .map_err(|e| generation_failed(&model, e))
        .inspect_err(|e| error!(error = %e, "language model call failed"))
    }

    /// Generate the complete answer for `question` from the retrieved context.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::GenerationFailed`] if the model call fails or times out.
    /// There is no retry.
    pub async fn answer(&self, question: &str, retrieved: &RetrievedContext) -> Result<Answer> {
        let prompt = self.render_prompt(question, &retrieved.context);
        debug!(prompt_len = prompt.len(), "invoking language model");
        let text = self.generate(&prompt).await?;
        info!(
            answer_len = text.len(),
            sources = retrieved.results.len(),
            "answer generated"
        );
        Ok(Answer {
            text,
            sources: self.citations(&retrieved.results),
        })
    }

    /// Generate the answer as a stream of [`AnswerEvent`]s.
    ///
    /// Without token streaming, the model is called to completion before this
    /// returns, so a failed call surfaces here rather than mid-stream.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::GenerationFailed`] if the model call (or, with token
    /// streaming, opening the model stream) fails or times out. A failure while a
    /// token stream is running is yielded as the stream's last item.
    pub async fn answer_stream(
        &self,
        question: &str,
        retrieved: RetrievedContext,
    ) -> Result<AnswerStream> {
        let prompt = self.render_prompt(question, &retrieved.context);
        let sources = self.citations(&retrieved.results);
        let model = self.model.model_name().to_string();

        if !self.model.supports_token_streaming() {
            let text = self.generate(&prompt).await?;
            let events = fragment(&text, self.fragment_size)
                .into_iter()
                .map(AnswerEvent::Fragment)
                .chain([AnswerEvent::EndOfAnswer, AnswerEvent::Sources(sources)])
                .map(Ok);
            return Ok(stream::iter(events).boxed());
        }

        let mut tokens = with_timeout(self.timeout, self.model.generate_stream(&prompt), |d| {
            RagError::GenerationFailed {
                model: model.clone(),
                message: format!("opening the model stream timed out after {}s", d.as_secs()),
            }
        })
        .await
        .map_err(|e| generation_failed(&model, e))?;

        let stream = async_stream::stream! {
            while let Some(piece) = tokens.next().await {
                match piece {
                    Ok(piece) if piece.is_empty() => {}
                    Ok(piece) => yield Ok(AnswerEvent::Fragment(piece)),
                    Err(e) => {
                        let e = generation_failed(&model, e);
                        error!(error = %e, "model stream failed");
                        yield Err(e);
                        return;
                    }
                }
            }
            yield Ok(AnswerEvent::EndOfAnswer);
            yield Ok(AnswerEvent::Sources(sources));
        };
        Ok(stream.boxed())
    }
}
