use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use ragdoc_core::{ChunkStrategy, IngestMode};

#[derive(Debug, Parser)]
#[command(name = "ragdoc")]
#[command(about = "Ask questions about a folder of PDF documents", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Args)]
pub struct GlobalArgs {
    /// Log at debug level unless RUST_LOG is set
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Directory holding the persisted index
    #[arg(long, env = "RAGDOC_INDEX_DIR", default_value = "index", global = true)]
    pub index_dir: PathBuf,

    /// Embedding backend
    #[arg(long, env = "RAGDOC_EMBEDDER", value_enum, default_value_t = Embedder::Gemini, global = true)]
    pub embedder: Embedder,

    /// Embedding model (overrides RAGDOC_EMBEDDING_MODEL)
    #[arg(long, global = true)]
    pub embedding_model: Option<String>,

    /// Language model (overrides RAGDOC_LLM_MODEL)
    #[arg(long, global = true)]
    pub llm_model: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Embedder {
    Gemini,
    /// Needs the `openai` feature and OPENAI_API_KEY
    Openai,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Load, chunk and embed every PDF under a directory
    Ingest {
        /// Directory to index
        #[arg(short, long, env = "RAGDOC_DATA_DIR", default_value = "data")]
        dir: PathBuf,

        /// replace rebuilds the index, append upserts into it
        #[arg(long)]
        mode: Option<IngestMode>,

        #[command(flatten)]
        chunking: ChunkingArgs,

        /// Also index .txt and .md files
        #[arg(long)]
        text: bool,
    },

    /// Answer one question, listing the retrieved chunks first
    Query {
        /// The question
        question: String,

        #[command(flatten)]
        retrieval: RetrievalArgs,

        /// Print the answer as JSON
        #[arg(long)]
        json: bool,
    },

    /// Ask questions interactively until exit, quit or fine
    Chat {
        #[command(flatten)]
        retrieval: RetrievalArgs,
    },

    /// Serve the HTTP API
    Serve {
        /// Address to bind
        #[arg(long, env = "RAGDOC_HOST", default_value = "127.0.0.1")]
        host: String,

        /// Port to listen on
        #[arg(short, long, env = "RAGDOC_PORT", default_value_t = 5000)]
        port: u16,

        /// Directory rebuilt by POST /ingest
        #[arg(short, long, env = "RAGDOC_DATA_DIR", default_value = "data")]
        dir: PathBuf,

        /// Also index .txt and .md files
        #[arg(long)]
        text: bool,

        /// Rebuild the index before accepting requests
        #[arg(long)]
        ingest: bool,

        #[command(flatten)]
        retrieval: RetrievalArgs,
    },

    /// List the Gemini models available to GOOGLE_API_KEY
    Models {
        /// How many models to show
        #[arg(long, default_value_t = 5)]
        limit: usize,
    },
}

#[derive(Debug, Clone, Default, Args)]
pub struct ChunkingArgs {
    /// Chunk size in characters (words for --strategy words)
    #[arg(long)]
    pub chunk_size: Option<usize>,

    /// Overlap between consecutive chunks
    #[arg(long)]
    pub chunk_overlap: Option<usize>,

    /// recursive, fixed or words
    #[arg(long)]
    pub strategy: Option<ChunkStrategy>,
}

#[derive(Debug, Clone, Default, Args)]
pub struct RetrievalArgs {
    /// Number of chunks to retrieve
    #[arg(short = 'k', long)]
    pub top_k: Option<usize>,

    /// Minimum score of the best chunk, in [0, 1]
    #[arg(long)]
    pub threshold: Option<f32>,

    /// Stream tokens from the model as they are generated
    #[arg(long)]
    pub stream: bool,
}
