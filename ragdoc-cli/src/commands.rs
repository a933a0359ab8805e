use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use futures::StreamExt;
use ragdoc_core::gemini::{GeminiClient, GeminiEmbeddingProvider, GeminiModel};
use ragdoc_core::{
    AnswerEvent, DirectoryLoader, EmbeddingProvider, IngestMode, LocalVectorStore, QueryResponse,
    QueryStream, RagConfig, RagPipeline, Retrieval, SearchResult, SourceCitation, TextLoader,
};
use ragdoc_server::{AppState, ServerConfig, run_server};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tracing::{info, warn};

use crate::cli::{ChunkingArgs, Embedder, GlobalArgs, RetrievalArgs};

const LISTING_PREVIEW_CHARS: usize = 150;
const EXIT_WORDS: [&str; 3] = ["exit", "quit", "fine"];

/// Configuration resolved from the environment and the command line.
#[derive(Debug, Clone)]
pub struct Settings {
    config: RagConfig,
    index_dir: PathBuf,
    embedder: Embedder,
    #[cfg_attr(not(feature = "openai"), allow(dead_code))]
    embedding_model_override: bool,
    stream: bool,
}

impl Settings {
    pub fn from_args(args: &GlobalArgs) -> Result<Self> {
        let mut builder = RagConfig::from_env()?.into_builder();
        if let Some(model) = &args.embedding_model {
            builder = builder.embedding_model(model.clone());
        }
        if let Some(model) = &args.llm_model {
            builder = builder.llm_model(model.clone());
        }
        Ok(Self {
            config: builder.build()?,
            index_dir: args.index_dir.clone(),
            embedder: args.embedder,
            embedding_model_override: args.embedding_model.is_some(),
            stream: false,
        })
    }

    pub fn with_chunking(mut self, args: &ChunkingArgs, mode: Option<IngestMode>) -> Result<Self> {
        let mut builder = self.config.into_builder();
        if let Some(size) = args.chunk_size {
            builder = builder.chunk_size(size);
        }
        if let Some(overlap) = args.chunk_overlap {
            builder = builder.chunk_overlap(overlap);
        }
        if let Some(strategy) = args.strategy {
            builder = builder.chunk_strategy(strategy);
        }
        if let Some(mode) = mode {
            builder = builder.ingest_mode(mode);
        }
        self.config = builder.build()?;
        Ok(self)
    }

    pub fn with_retrieval(mut self, args: &RetrievalArgs) -> Result<Self> {
        let mut builder = self.config.into_builder();
        if let Some(top_k) = args.top_k {
            builder = builder.top_k(top_k);
        }
        if let Some(threshold) = args.threshold {
            builder = builder.relevance_threshold(threshold);
        }
        self.config = builder.build()?;
        self.stream = args.stream;
        Ok(self)
    }

    fn embedding_provider(&self, client: &GeminiClient) -> Result<Arc<dyn EmbeddingProvider>> {
        match self.embedder {
            Embedder::Gemini => Ok(Arc::new(GeminiEmbeddingProvider::new(
                client.clone(),
                self.config.embedding_model.clone(),
            ))),
            Embedder::Openai => self.openai_embedder(),
        }
    }

    #[cfg(feature = "openai")]
    fn openai_embedder(&self) -> Result<Arc<dyn EmbeddingProvider>> {
        let mut provider = ragdoc_core::openai::OpenAIEmbeddingProvider::from_env()?;
        if self.embedding_model_override {
            provider = provider.with_model(self.config.embedding_model.clone());
        }
        Ok(Arc::new(provider))
    }

    #[cfg(not(feature = "openai"))]
    fn openai_embedder(&self) -> Result<Arc<dyn EmbeddingProvider>> {
        anyhow::bail!("ragdoc was built without the `openai` feature")
    }

    async fn pipeline(&self, loader: DirectoryLoader) -> Result<RagPipeline> {
        let client = GeminiClient::from_env().context("a Gemini API key is required")?;
        let embedder = self.embedding_provider(&client)?;
        let model = GeminiModel::new(client, self.config.llm_model.clone())
            .with_temperature(self.config.temperature)
            .with_streaming(self.stream);
        let store = LocalVectorStore::open(&self.index_dir)
            .await
            .with_context(|| format!("failed to open index at {}", self.index_dir.display()))?;

        let pipeline = RagPipeline::builder()
            .config(self.config.clone())
            .embedding_provider(embedder)
            .vector_store(Arc::new(store))
            .language_model(Arc::new(model))
            .loader(loader)
            .build()?;
        Ok(pipeline)
    }
}

fn loader(include_text: bool) -> DirectoryLoader {
    let loader = DirectoryLoader::default();
    if include_text {
        loader.with_loader(TextLoader)
    } else {
        loader
    }
}

fn listing_preview(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    flat.chars().take(LISTING_PREVIEW_CHARS).collect()
}

fn print_listing(results: &[SearchResult]) {
    if results.is_empty() {
        return;
    }
    println!("\n--- Retrieved chunks ---");
    for r in results {
        println!("Score: {:.3} | {}...\n", r.score, listing_preview(&r.chunk.text));
    }
    println!("------------------------\n");
}

fn print_sources(sources: &[SourceCitation]) {
    println!("Sources:");
    for s in sources {
        match (&s.source, s.page) {
            (Some(path), Some(page)) => println!("  {} [{path}, page {page}]", s.line()),
            (Some(path), None) => println!("  {} [{path}]", s.line()),
            _ => println!("  {}", s.line()),
        }
    }
}

pub async fn ingest(settings: &Settings, dir: &Path, include_text: bool) -> Result<()> {
    let pipeline = settings.pipeline(loader(include_text)).await?;
    info!(dir = %dir.display(), mode = %settings.config.ingest_mode, "ingesting");

    let report = pipeline
        .ingest_directory(dir)
        .await
        .with_context(|| format!("failed to ingest {}", dir.display()))?;

    println!(
        "Indexed {} chunks from {} pages in {} files ({} mode) into {}",
        report.chunks,
        report.documents,
        report.files,
        report.mode,
        settings.index_dir.display()
    );
    for skipped in &report.skipped {
        println!("  skipped {}: {}", skipped.path.display(), skipped.reason);
    }
    Ok(())
}

pub async fn query(settings: &Settings, question: &str, json: bool) -> Result<()> {
    let pipeline = settings.pipeline(DirectoryLoader::empty()).await?;

    let results = pipeline.search(question).await?;
    if !json {
        print_listing(&results);
    }

    let retrieval = Retrieval::gate(results, settings.config.relevance_threshold);
    let response = pipeline.answer(question, retrieval).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }
    match response {
        QueryResponse::NotFound { message, .. } => println!("{message}"),
        QueryResponse::Answered(answer) => {
            println!("Response: {}\n", answer.text);
            print_sources(&answer.sources);
        }
    }
    Ok(())
}

async fn answer_streamed(pipeline: &RagPipeline, question: &str) -> Result<()> {
    let mut events = match pipeline.ask_stream(question).await? {
        QueryStream::NotFound { message, .. } => {
            println!("{message}");
            return Ok(());
        }
        QueryStream::Answer(events) => events,
    };

    let mut stdout = std::io::stdout();
    while let Some(event) = events.next().await {
        match event? {
            AnswerEvent::Fragment(text) => {
                print!("{text}");
                stdout.flush()?;
            }
            AnswerEvent::EndOfAnswer => println!("\n"),
            AnswerEvent::Sources(sources) => print_sources(&sources),
        }
    }
    Ok(())
}

pub async fn chat(settings: &Settings) -> Result<()> {
    let pipeline = settings.pipeline(DirectoryLoader::empty()).await?;
    let mut editor = DefaultEditor::new()?;
    println!("Ask a question about your documents ({} to leave).", EXIT_WORDS.join("/"));

    loop {
        let line = match editor.readline("you> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        };
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if EXIT_WORDS.contains(&question.to_lowercase().as_str()) {
            break;
        }
        editor.add_history_entry(question)?;

        if let Err(e) = answer_streamed(&pipeline, question).await {
            warn!(error = %e, "question failed");
            eprintln!("error: {e}");
        }
    }
    Ok(())
}

pub async fn serve(
    settings: &Settings,
    host: String,
    port: u16,
    dir: &Path,
    include_text: bool,
    ingest_first: bool,
) -> Result<()> {
    let pipeline = settings.pipeline(loader(include_text)).await?;
    if ingest_first {
        let report = pipeline
            .ingest_directory(dir)
            .await
            .with_context(|| format!("failed to ingest {}", dir.display()))?;
        info!(chunks = report.chunks, files = report.files, "index rebuilt");
    }

    run_server(ServerConfig { host, port }, AppState::new(pipeline, dir)).await
}

pub async fn models(limit: usize) -> Result<()> {
    let client = GeminiClient::from_env().context("a Gemini API key is required")?;
    let models = client.list_models(limit).await?;

    println!("Available models:");
    for model in models {
        println!("Name: {}", model.name);
        println!("Description: {}", model.description);
        println!("Supported methods: {}", model.supported_generation_methods.join(", "));
        println!();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn global(embedder: Embedder) -> GlobalArgs {
        GlobalArgs {
            verbose: false,
            index_dir: PathBuf::from("index"),
            embedder,
            embedding_model: Some("text-embedding-004".into()),
            llm_model: None,
        }
    }

    #[test]
    fn listing_preview_is_flattened_and_bounded() {
        let text = format!("first\n\nsecond {}", "x".repeat(400));
        let preview = listing_preview(&text);
        assert!(preview.starts_with("first second "));
        assert_eq!(preview.chars().count(), LISTING_PREVIEW_CHARS);
    }

    #[test]
    fn retrieval_flags_override_config() {
        let settings = Settings::from_args(&global(Embedder::Gemini)).unwrap();
        let args = RetrievalArgs { top_k: Some(7), threshold: Some(0.25), stream: true };
        let settings = settings.with_retrieval(&args).unwrap();
        assert_eq!(settings.config.top_k, 7);
        assert_eq!(settings.config.relevance_threshold, 0.25);
        assert!(settings.stream);
    }

    #[test]
    fn invalid_chunking_flags_are_rejected() {
        let settings = Settings::from_args(&global(Embedder::Gemini)).unwrap();
        let args = ChunkingArgs { chunk_size: Some(100), chunk_overlap: Some(100), strategy: None };
        assert!(settings.with_chunking(&args, None).is_err());
    }
}
