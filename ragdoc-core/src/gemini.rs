//! Google Gemini embedding provider and language model.
//!
//! Talks to the Generative Language REST API directly with `reqwest`.
//! Available with the `gemini` feature (on by default).

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::stream::{StreamExt, TryStreamExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error, instrument};

use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::llm::{LanguageModel, TextStream};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const PROVIDER: &str = "Gemini";
/// `batchEmbedContents` accepts at most this many requests.
const MAX_BATCH: usize = 100;

/// Strip the `models/` prefix the API uses in resource names.
fn model_id(model: &str) -> &str {
    model.strip_prefix("models/").unwrap_or(model)
}

/// Native dimensionality of the known Gemini embedding models.
fn native_dimensions(model: &str) -> usize {
    match model_id(model) {
        "gemini-embedding-001" => 3072,
        _ => 768,
    }
}

/// A shared HTTP client bound to one API key.
#[derive(Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl std::fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl GeminiClient {
    /// Create a client for `api_key`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if the key is empty.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(RagError::ConfigError(
                "Gemini API key must not be empty".to_string(),
            ));
        }
        Ok(Self {
            http: reqwest::Client::new(),
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    /// Create a client from `GOOGLE_API_KEY`, falling back to `GEMINI_API_KEY`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if neither variable is set.
    pub fn from_env() -> Result<Self> {
        let key = std::env::var("GOOGLE_API_KEY")
            .or_else(|_| std::env::var("GEMINI_API_KEY"))
            .map_err(|_| {
                RagError::ConfigError(
                    "set GOOGLE_API_KEY (or GEMINI_API_KEY) to use Gemini".to_string(),
                )
            })?;
        Self::new(key)
    }

    /// Use another API root, e.g. a proxy or a local mock.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn method_url(&self, model: &str, method: &str) -> String {
        format!("{}/models/{}:{method}", self.base_url, model_id(model))
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
    ) -> std::result::Result<reqwest::Response, String> {
        let response = request
            .header("x-goog-api-key", &self.api_key)
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let detail = serde_json::from_str::<ErrorResponse>(&body)
            .map(|e| e.error.message)
            .unwrap_or(body);
        Err(format!("API returned {status}: {detail}"))
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        url: String,
        body: &serde_json::Value,
    ) -> std::result::Result<T, String> {
        let response = self.send(self.http.post(url).json(body)).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| format!("failed to parse response: {e}"))
    }

    /// List the models reachable with this key, at most `limit` of them.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::GenerationFailed`] if the listing call fails.
    #[instrument(skip(self))]
    pub async fn list_models(&self, limit: usize) -> Result<Vec<ModelInfo>> {
        let url = format!("{}/models", self.base_url);
        let request = self
            .http
            .get(url)
            .query(&[("pageSize", limit.max(1).to_string())]);
        let failure = |message: String| RagError::GenerationFailed {
            model: "models.list".into(),
            message,
        };

        let response = self.send(request).await.map_err(failure)?;
        let listing: ModelList = response
            .json()
            .await
            .map_err(|e| failure(format!("failed to parse response: {e}")))?;

        Ok(listing.models.into_iter().take(limit).collect())
    }
}

/// One entry of the model listing.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    /// Resource name, e.g. `models/gemini-2.5-flash`.
    pub name: String,
    /// Human-readable name.
    #[serde(default)]
    pub display_name: String,
    /// Model description.
    #[serde(default)]
    pub description: String,
    /// API methods the model supports, e.g. `generateContent`.
    #[serde(default)]
    pub supported_generation_methods: Vec<String>,
}

#[derive(Deserialize)]
struct ModelList {
    #[serde(default)]
    models: Vec<ModelInfo>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

// ── Embeddings ──────────────────────────────────────────────────────

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: Values,
}

#[derive(Deserialize)]
struct BatchEmbedResponse {
    #[serde(default)]
    embeddings: Vec<Values>,
}

#[derive(Deserialize)]
struct Values {
    values: Vec<f32>,
}

/// An [`EmbeddingProvider`] backed by Gemini `embedContent`.
///
/// Documents are embedded with task type `RETRIEVAL_DOCUMENT` and questions with
/// `RETRIEVAL_QUERY`.
pub struct GeminiEmbeddingProvider {
    client: GeminiClient,
    model: String,
    dimensions: usize,
    requested_dimensions: Option<usize>,
}

impl GeminiEmbeddingProvider {
    /// Create a provider for `model` (e.g. `text-embedding-004`).
    pub fn new(client: GeminiClient, model: impl Into<String>) -> Self {
        let model = model.into();
        let dimensions = native_dimensions(&model);
        Self {
            client,
            model,
            dimensions,
            requested_dimensions: None,
        }
    }

    /// Ask the API to shorten the vectors to `dims`.
    pub fn with_dimensions(mut self, dims: usize) -> Self {
        self.dimensions = dims;
        self.requested_dimensions = Some(dims);
        self
    }

    fn request(&self, text: &str, task_type: &str) -> serde_json::Value {
        let mut request = json!({
            "model": format!("models/{}", model_id(&self.model)),
            "content": { "parts": [{ "text": text }] },
            "taskType": task_type,
        });
        if let Some(dims) = self.requested_dimensions {
            request["outputDimensionality"] = json!(dims);
        }
        request
    }

    fn failure(&self, message: String) -> RagError {
        error!(provider = PROVIDER, model = %self.model, %message, "embedding call failed");
        RagError::EmbeddingFailed {
            provider: PROVIDER.to_string(),
            message,
        }
    }

    async fn embed_one(&self, text: &str, task_type: &str) -> Result<Vec<f32>> {
        let url = self.client.method_url(&self.model, "embedContent");
        let response: EmbedResponse = self
            .client
            .post_json(url, &self.request(text, task_type))
            .await
            .map_err(|m| self.failure(m))?;
        Ok(response.embedding.values)
    }
}

#[async_trait]
impl EmbeddingProvider for GeminiEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_one(text, "RETRIEVAL_DOCUMENT").await
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let url = self.client.method_url(&self.model, "batchEmbedContents");
        let mut vectors = Vec::with_capacity(texts.len());

        for batch in texts.chunks(MAX_BATCH) {
            debug!(
                provider = PROVIDER,
                batch_size = batch.len(),
                "embedding batch"
            );
            let requests: Vec<_> = batch
                .iter()
                .map(|t| self.request(t, "RETRIEVAL_DOCUMENT"))
                .collect();
            let response: BatchEmbedResponse = self
                .client
                .post_json(url.clone(), &json!({ "requests": requests }))
                .await
                .map_err(|m| self.failure(m))?;

            if response.embeddings.len() != batch.len() {
                return Err(self.failure(format!(
                    "expected {} embeddings, got {}",
                    batch.len(),
                    response.embeddings.len()
                )));
            }
            vectors.extend(response.embeddings.into_iter().map(|v| v.values));
        }
        Ok(vectors)
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_one(text, "RETRIEVAL_QUERY").await
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        PROVIDER
    }
}

// ── Generation ──────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

impl GenerateResponse {
    /// Concatenated text of the first candidate.
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Why the response carries no text, if the API said.
    fn refusal(&self) -> Option<String> {
        if let Some(reason) = self
            .prompt_feedback
            .as_ref()
            .and_then(|f| f.block_reason.as_ref())
        {
            return Some(format!("prompt blocked: {reason}"));
        }
        self.candidates
            .first()
            .and_then(|c| c.finish_reason.as_ref())
            .filter(|reason| reason.as_str() != "STOP")
            .map(|reason| format!("generation stopped: {reason}"))
    }
}

/// A [`LanguageModel`] backed by Gemini `generateContent`.
pub struct GeminiModel {
    client: GeminiClient,
    model: String,
    temperature: f32,
    streaming: bool,
}

impl GeminiModel {
    /// Create a model handle for `model` (e.g. `gemini-2.5-flash`).
    pub fn new(client: GeminiClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
            temperature: 0.2,
            streaming: false,
        }
    }

    /// Set the sampling temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Forward tokens from `streamGenerateContent` instead of fragmenting the full answer.
    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    fn request(&self, prompt: &str) -> serde_json::Value {
        json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
            "generationConfig": { "temperature": self.temperature },
        })
    }

    fn failure(&self, message: String) -> RagError {
        RagError::GenerationFailed {
            model: self.model.clone(),
            message,
        }
    }
}

#[async_trait]
impl LanguageModel for GeminiModel {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let url = self.client.method_url(&self.model, "generateContent");
        debug!(model = %self.model, prompt_len = prompt.len(), "calling generateContent");

        let response: GenerateResponse = self
            .client
            .post_json(url, &self.request(prompt))
            .await
            .map_err(|m| self.failure(m))?;

        let text = response.text();
        if text.is_empty() {
            let reason = response
                .refusal()
                .unwrap_or_else(|| "empty response".to_string());
            return Err(self.failure(reason));
        }
        Ok(text)
    }

    fn supports_token_streaming(&self) -> bool {
        self.streaming
    }

    async fn generate_stream(&self, prompt: &str) -> Result<TextStream> {
        let url = format!(
            "{}?alt=sse",
            self.client.method_url(&self.model, "streamGenerateContent")
        );
        let request = self.client.http.post(url).json(&self.request(prompt));
        let response = self
            .client
            .send(request)
            .await
            .map_err(|m| self.failure(m))?;

        let model = self.model.clone();
        let stream = response
            .bytes_stream()
            .eventsource()
            .map_err(|e| e.to_string())
            .and_then(|event| async move {
                serde_json::from_str::<GenerateResponse>(&event.data)
                    .map(|r| r.text())
                    .map_err(|e| format!("failed to parse stream event: {e}"))
            })
            .map_err(move |message| RagError::GenerationFailed {
                model: model.clone(),
                message,
            });
        Ok(stream.boxed())
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
