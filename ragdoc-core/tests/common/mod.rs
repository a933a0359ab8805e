//! Deterministic fakes shared by the integration tests.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use ragdoc_core::{
    DirectoryLoader, EmbeddingProvider, InMemoryVectorStore, LanguageModel, RagConfig, RagError,
    RagPipeline, Result, TextLoader, TextStream, VectorStore,
};

pub const DIMS: usize = 512;

/// Hashes lowercase words into buckets and L2-normalizes the counts.
#[derive(Default)]
pub struct BagOfWordsEmbedder {
    pub calls: AtomicUsize,
}

impl BagOfWordsEmbedder {
    pub fn vector(text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; DIMS];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
            for byte in word.to_lowercase().bytes() {
                hash ^= u64::from(byte);
                hash = hash.wrapping_mul(0x0100_0000_01b3);
            }
            v[(hash % DIMS as u64) as usize] += 1.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            v.iter_mut().for_each(|x| *x /= norm);
        }
        v
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for BagOfWordsEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Self::vector(text))
    }

    fn dimensions(&self) -> usize {
        DIMS
    }

    fn name(&self) -> &str {
        "bag-of-words"
    }
}

/// Always fails.
pub struct FailingEmbedder;

#[async_trait]
impl EmbeddingProvider for FailingEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(RagError::EmbeddingFailed {
            provider: "failing".into(),
            message: "quota exceeded".into(),
        })
    }

    fn dimensions(&self) -> usize {
        DIMS
    }
}

/// Bag-of-words vectors behind a wrong `dimensions()` value.
pub struct MisreportingEmbedder {
    pub reported: usize,
}

#[async_trait]
impl EmbeddingProvider for MisreportingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(BagOfWordsEmbedder::vector(text))
    }

    fn dimensions(&self) -> usize {
        self.reported
    }
}

/// Returns half-length vectors for any text mentioning Berlin.
pub struct RaggedEmbedder;

#[async_trait]
impl EmbeddingProvider for RaggedEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut v = BagOfWordsEmbedder::vector(text);
        if text.contains("Berlin") {
            v.truncate(DIMS / 2);
        }
        Ok(v)
    }

    fn dimensions(&self) -> usize {
        DIMS
    }
}

/// Never answers.
pub struct StalledModel;

#[async_trait]
impl LanguageModel for StalledModel {
    async fn generate(&self, _prompt: &str) -> Result<String> {
        futures::future::pending().await
    }

    fn model_name(&self) -> &str {
        "stalled"
    }
}

/// Returns a fixed answer and records every prompt it sees.
pub struct ScriptedModel {
    pub answer: String,
    pub streaming: bool,
    pub fail: bool,
    pub calls: AtomicUsize,
    pub prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn new(answer: impl Into<String>) -> Self {
        Self {
            answer: answer.into(),
            streaming: false,
            fail: false,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn streaming(mut self) -> Self {
        self.streaming = true;
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.prompts.lock().unwrap().last().cloned()
    }

    fn record(&self, prompt: &str) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        if self.fail {
            return Err(RagError::GenerationFailed {
                model: "scripted".into(),
                message: "upstream returned 503".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.record(prompt)?;
        Ok(self.answer.clone())
    }

    fn supports_token_streaming(&self) -> bool {
        self.streaming
    }

    async fn generate_stream(&self, prompt: &str) -> Result<TextStream> {
        self.record(prompt)?;
        let pieces: Vec<Result<String>> = self
            .answer
            .split_inclusive(' ')
            .map(|piece| Ok(piece.to_string()))
            .collect();
        Ok(stream::iter(pieces).boxed())
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

/// Everything a test needs to inspect after driving a pipeline.
pub struct Harness {
    pub pipeline: RagPipeline,
    pub embedder: Arc<BagOfWordsEmbedder>,
    pub model: Arc<ScriptedModel>,
    pub store: Arc<InMemoryVectorStore>,
}

pub fn harness(config: RagConfig, model: ScriptedModel) -> Harness {
    let embedder = Arc::new(BagOfWordsEmbedder::default());
    let model = Arc::new(model);
    let store = Arc::new(InMemoryVectorStore::new());
    let pipeline = RagPipeline::builder()
        .config(config)
        .embedding_provider(embedder.clone())
        .vector_store(store.clone() as Arc<dyn VectorStore>)
        .language_model(model.clone())
        .loader(DirectoryLoader::empty().with_loader(TextLoader))
        .build()
        .unwrap();
    Harness {
        pipeline,
        embedder,
        model,
        store,
    }
}

/// Write `files` (name, content) under `dir`.
pub fn write_corpus(dir: &Path, files: &[(&str, &str)]) {
    for (name, content) in files {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }
}

pub const FRANCE: &str = "The capital of France is Paris.";
pub const GERMANY: &str = "Berlin is the capital city of Germany.";
