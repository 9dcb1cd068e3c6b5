use async_trait::async_trait;
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use docrag_core::config::{
    DEFAULT_CHAT_MODEL, DEFAULT_CHUNK_SIZE, DEFAULT_EMBEDDING_DIMENSIONS, DEFAULT_EMBEDDING_MODEL,
    DEFAULT_OVERLAP, DEFAULT_SIMILARITY_THRESHOLD, DEFAULT_TOP_K,
};
use docrag_core::providers::ngram::DEFAULT_NGRAM_DIMENSIONS;
use docrag_core::providers::openai::DEFAULT_BASE_URL;
use docrag_core::{
    fingerprint, load_pages, AnswerStatus, CharacterNgramEmbedder, ChunkingConfig, DocumentSession,
    EmbeddingProvider, ExtractionSchema, GenerationRequest, LanguageModel, OpenAiClient,
    OpenAiSettings, PageScope, ProviderError, RagConfig, RetrievalResult, RetryPolicy,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "docrag", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// API key for the OpenAI-compatible provider.
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true, global = true)]
    api_key: Option<String>,

    /// Base URL of the OpenAI-compatible provider.
    #[arg(long, env = "OPENAI_BASE_URL", default_value = DEFAULT_BASE_URL, global = true)]
    base_url: String,

    /// Embedding backend; `ngram` runs locally and needs no key.
    #[arg(long, value_enum, env = "DOCRAG_EMBEDDER", default_value = "openai", global = true)]
    embedder: EmbedderKind,

    #[arg(long, env = "DOCRAG_EMBEDDING_MODEL", default_value = DEFAULT_EMBEDDING_MODEL, global = true)]
    embedding_model: String,

    /// Vector dimension of the OpenAI embedding model.
    #[arg(long, env = "DOCRAG_EMBEDDING_DIMENSIONS", default_value_t = DEFAULT_EMBEDDING_DIMENSIONS, global = true)]
    embedding_dimensions: usize,

    #[arg(long, env = "DOCRAG_CHAT_MODEL", default_value = DEFAULT_CHAT_MODEL, global = true)]
    chat_model: String,

    /// Maximum chunk length in characters.
    #[arg(long, env = "DOCRAG_CHUNK_SIZE", default_value_t = DEFAULT_CHUNK_SIZE, global = true)]
    chunk_size: usize,

    /// Characters shared between consecutive chunks.
    #[arg(long, env = "DOCRAG_OVERLAP", default_value_t = DEFAULT_OVERLAP, global = true)]
    overlap: usize,

    #[arg(long, env = "DOCRAG_TOP_K", default_value_t = DEFAULT_TOP_K, global = true)]
    top_k: usize,

    /// Minimum cosine similarity for a semantic candidate.
    #[arg(long, env = "DOCRAG_SIMILARITY_THRESHOLD", default_value_t = DEFAULT_SIMILARITY_THRESHOLD, global = true)]
    similarity_threshold: f32,

    /// Per-request timeout for provider calls, in seconds.
    #[arg(long, env = "DOCRAG_REQUEST_TIMEOUT", default_value_t = 60, global = true)]
    request_timeout: u64,

    /// Attempts per provider call, including the first.
    #[arg(long, env = "DOCRAG_MAX_ATTEMPTS", default_value_t = 3, global = true)]
    max_attempts: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum EmbedderKind {
    Openai,
    Ngram,
}

#[derive(Subcommand)]
enum Command {
    /// Load a document, chunk and embed it, and report the index.
    Index {
        /// PDF, or UTF-8 text with form feeds between pages.
        #[arg(long)]
        file: PathBuf,
    },
    /// Answer a question from the document.
    Ask {
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        question: String,
        /// Print ranked evidence without calling the language model.
        #[arg(long, default_value_t = false)]
        retrieve_only: bool,
        /// Print per-chunk scores and matched terms.
        #[arg(long, default_value_t = false)]
        explain: bool,
        /// Restrict evidence to a page or range, e.g. `3` or `2-5` (only with --retrieve-only).
        #[arg(long)]
        pages: Option<PageScope>,
    },
    /// Extract schema fields as JSON.
    Extract {
        #[arg(long)]
        file: PathBuf,
        /// JSON object, JSON array, or a comma/semicolon/newline separated list of field names.
        #[arg(long)]
        schema: String,
        /// Page or range to extract from, e.g. `3` or `2-5`.
        #[arg(long)]
        pages: Option<PageScope>,
    },
}

/// Stands in when no API key is configured; every call fails without retrying.
struct UnconfiguredModel;

#[async_trait]
impl LanguageModel for UnconfiguredModel {
    async fn generate(&self, _request: &GenerationRequest) -> Result<String, ProviderError> {
        Err(ProviderError::fatal(
            "no language model configured: set OPENAI_API_KEY or pass --api-key",
        ))
    }
}

type Session = DocumentSession<Box<dyn EmbeddingProvider>, Box<dyn LanguageModel>>;

impl Cli {
    fn file(&self) -> &PathBuf {
        match &self.command {
            Command::Index { file } | Command::Ask { file, .. } | Command::Extract { file, .. } => file,
        }
    }

    fn config(&self) -> RagConfig {
        let retry = RetryPolicy {
            max_attempts: self.max_attempts,
            request_timeout_secs: self.request_timeout,
            ..RetryPolicy::default()
        };

        let mut config = RagConfig::default();
        config.chunking = ChunkingConfig {
            chunk_size: self.chunk_size,
            overlap: self.overlap,
        };
        config.retrieval.top_k = self.top_k;
        config.retrieval.similarity_threshold = self.similarity_threshold;
        config.embedding.retry = retry;
        config.generation.retry = retry;
        config.generation.model = self.chat_model.clone();
        match self.embedder {
            EmbedderKind::Openai => {
                config.embedding.model = self.embedding_model.clone();
                config.embedding.dimensions = self.embedding_dimensions;
            }
            EmbedderKind::Ngram => {
                config.embedding.model = "character-ngram".to_string();
                config.embedding.dimensions = DEFAULT_NGRAM_DIMENSIONS;
            }
        }
        config
    }

    fn openai_settings(&self, api_key: &str) -> OpenAiSettings {
        // Only the text-embedding-3 family accepts a shortened output dimension.
        let dimensions = (self.embedder == EmbedderKind::Openai
            && self.embedding_model.starts_with("text-embedding-3"))
        .then_some(self.embedding_dimensions);

        OpenAiSettings {
            api_key: api_key.to_string(),
            base_url: self.base_url.clone(),
            embedding_model: self.embedding_model.clone(),
            chat_model: self.chat_model.clone(),
            dimensions,
            request_timeout: Duration::from_secs(self.request_timeout),
        }
    }

    fn session(&self, document_id: String) -> anyhow::Result<Session> {
        let config = self.config();
        let client = match self.api_key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() => Some(Arc::new(OpenAiClient::new(self.openai_settings(key))?)),
            _ => None,
        };

        let embeddings: Box<dyn EmbeddingProvider> = match (self.embedder, &client) {
            (EmbedderKind::Ngram, _) => Box::new(CharacterNgramEmbedder::new(DEFAULT_NGRAM_DIMENSIONS)),
            (EmbedderKind::Openai, Some(client)) => Box::new(Arc::clone(client)),
            (EmbedderKind::Openai, None) => anyhow::bail!(
                "the openai embedder needs OPENAI_API_KEY; use --embedder ngram to run offline"
            ),
        };
        let llm: Box<dyn LanguageModel> = match client {
            Some(client) => Box::new(client),
            None => {
                warn!("no API key configured, answering and extraction are unavailable");
                Box::new(UnconfiguredModel)
            }
        };

        Ok(DocumentSession::new(config, document_id, embeddings, llm)?)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "docrag boot"
    );

    let path = cli.file().clone();
    let (document, pages) = tokio::task::spawn_blocking(move || {
        let document = fingerprint(&path)?;
        let pages = load_pages(&path)?;
        Ok::<_, docrag_core::RagError>((document, pages))
    })
    .await??;
    info!(
        document_id = %document.document_id,
        title = %document.title,
        page_count = pages.len(),
        "document loaded"
    );

    let session = cli.session(document.document_id.clone())?;
    let snapshot = session.build_index(&pages).await?;

    match &cli.command {
        Command::Index { .. } => {
            println!("document: {} ({})", document.title, document.source_path);
            println!("checksum: {}", document.checksum);
            println!("pages: {}", snapshot.pages().len());
            println!("chunks: {}", snapshot.chunk_count());
            println!("build: {} at {}", snapshot.build_id, snapshot.built_at.to_rfc3339());
        }
        Command::Ask {
            question,
            retrieve_only,
            explain,
            pages,
            ..
        } => {
            if *retrieve_only {
                let evidence = session.retrieve(question, *pages).await?;
                print_evidence(&evidence, true);
            } else {
                if pages.is_some() {
                    warn!("--pages only applies with --retrieve-only; answering from the whole document");
                }
                let answer = session.ask(question).await?;
                println!("{}", answer.text);
                if answer.status == AnswerStatus::Answered {
                    print_evidence(&answer.evidence, *explain);
                }
            }
        }
        Command::Extract { schema, pages, .. } => {
            let schema = ExtractionSchema::parse(schema)?;
            let result = session.extract(&schema, *pages).await?;
            for field in &result.fields {
                info!(
                    field = %field.name,
                    confidence = ?field.confidence,
                    pages = ?field.pages,
                    "extracted"
                );
            }
            println!("{}", serde_json::to_string_pretty(&result.to_json())?);
        }
    }

    Ok(())
}

fn print_evidence(evidence: &RetrievalResult, explain: bool) {
    println!("sources:");
    for (position, hit) in evidence.hits.iter().enumerate() {
        println!(
            "  [{}] page={} chunk={} score={:.4}{}",
            position + 1,
            hit.chunk.page,
            hit.chunk.index,
            hit.combined_score,
            if hit.high_confidence { " high_confidence" } else { "" }
        );
        if explain {
            println!(
                "      semantic={:.4} keyword={:.4} semantic_rank={} matched={:?}",
                hit.semantic_score,
                hit.keyword_score,
                hit.semantic_rank
                    .map_or_else(|| "-".to_string(), |rank| (rank + 1).to_string()),
                hit.matched_terms
            );
            println!("      {}", hit.chunk.text.trim());
        }
    }
}
