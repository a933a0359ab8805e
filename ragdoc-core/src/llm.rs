//! Language model trait used to generate grounded answers.

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};

use crate::error::Result;

/// A stream of answer text pieces produced by a model.
pub type TextStream = BoxStream<'static, Result<String>>;

/// A language model that turns a fully rendered prompt into answer text.
///
/// [`generate`](LanguageModel::generate) is the required, synchronous-style call:
/// it resolves once the complete answer is available. Models that can deliver
/// tokens incrementally advertise it through
/// [`supports_token_streaming`](LanguageModel::supports_token_streaming) and
/// override [`generate_stream`](LanguageModel::generate_stream).
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Generate the complete answer for `prompt`.
    async fn generate(&self, prompt: &str) -> Result<String>;

    /// Whether [`generate_stream`](LanguageModel::generate_stream) yields real
    /// incremental output.
    fn supports_token_streaming(&self) -> bool {
        false
    }

    /// Generate the answer as a stream of text pieces.
    ///
    /// The default implementation awaits [`generate`](LanguageModel::generate) and
    /// yields the whole answer as a single item.
    async fn generate_stream(&self, prompt: &str) -> Result<TextStream> {
        let text = self.generate(prompt).await?;
        Ok(stream::once(async move { Ok(text) }).boxed())
    }

    /// The model identity, used in logs and errors.
    fn model_name(&self) -> &str;
}
