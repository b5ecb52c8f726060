//! kb CLI - Command-line interface for the local knowledge base.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::warn;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use kb_chunk::chunker_for;
use kb_core::{
    ChunkStrategy, DocumentSource, Embedder, EmbeddingConfig, KbConfig, RagError, Result,
    SearchResult, Store,
};
use kb_embed::{HashingEmbedder, OnnxEmbedder};
use kb_query::{HybridWeights, KnowledgeBase, QueryConfig};
use kb_store::SqliteStore;
use kb_sync::{sync_sources, FileSource, NotionSource};

type Kb = KnowledgeBase<SqliteStore, dyn Embedder>;

/// kb - Local retrieval-augmented knowledge base
#[derive(Parser)]
#[command(name = "kb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Database path (overrides config and KB_DATABASE_PATH)
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    /// Configuration file (default: ~/.config/kb/config.toml, then ./kb.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    Init,

    /// Re-fetch sources and replace their chunks
    Sync {
        /// Source ids (default: notion.default_page_id / NOTION_PAGE_ID)
        ids: Vec<String>,

        /// Where the documents come from
        #[arg(long, value_enum, default_value = "notion")]
        source: SourceKind,

        /// Chunking strategy (paragraph or headers)
        #[arg(long)]
        strategy: Option<ChunkStrategy>,

        /// Target characters per chunk
        #[arg(long)]
        chunk_size: Option<usize>,
    },

    /// Search the knowledge base
    Search {
        /// Search query
        query: String,

        /// Maximum number of results
        #[arg(short = 'k', long)]
        top_k: Option<u32>,

        /// Ranking to use
        #[arg(long, value_enum, default_value = "hybrid")]
        mode: SearchMode,

        /// Weight of the lexical score in hybrid mode
        #[arg(long)]
        bm25_weight: Option<f32>,

        /// Weight of the semantic score in hybrid mode
        #[arg(long)]
        semantic_weight: Option<f32>,
    },

    /// Print the formatted context for a query
    Context {
        /// Query
        query: String,

        /// Maximum number of results
        #[arg(short = 'k', long)]
        top_k: Option<u32>,

        /// Character budget
        #[arg(long)]
        max_chars: Option<usize>,
    },

    /// Remove every chunk of a source
    Clear {
        /// Source id
        source_id: String,
    },

    /// List indexed sources
    Sources,

    /// Show statistics
    Stats,
}

#[derive(Clone, Copy, ValueEnum)]
enum SourceKind {
    Notion,
    File,
}

#[derive(Clone, Copy, ValueEnum)]
enum SearchMode {
    Hybrid,
    Bm25,
    Semantic,
}

fn setup_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();
}

fn load_config(cli: &Cli) -> Result<KbConfig> {
    let mut config = match &cli.config {
        Some(path) => KbConfig::load(path)?,
        None => KbConfig::load_default()?,
    };
    config.apply_env();
    if let Some(path) = &cli.database {
        config.database.path = path.clone();
    }
    config.validate()?;
    Ok(config)
}

/// ONNX model when installed, feature hashing otherwise.
fn build_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    if config.model_file().exists() && config.tokenizer_file().exists() {
        return Ok(Arc::new(OnnxEmbedder::from_config(config)?));
    }

    warn!(
        "No ONNX model found in {:?}; falling back to feature-hashing embeddings",
        config.model_path
    );
    Ok(Arc::new(HashingEmbedder::with_dimension(config.dimension)))
}

fn open_store(config: &KbConfig) -> Result<SqliteStore> {
    SqliteStore::open_with_config(&config.database, config.embedding.dimension)
}

fn open_kb(config: &KbConfig) -> Result<Kb> {
    let store = Arc::new(open_store(config)?);
    let embedder = build_embedder(&config.embedding)?;
    KnowledgeBase::new(store, embedder, QueryConfig::from_config(config))
}

/// Release the embedder and close the store.
fn close_kb(kb: Kb) -> Result<()> {
    let (store, _embedder) = kb.into_parts();
    let store = Arc::try_unwrap(store)
        .map_err(|_| RagError::internal("store still shared at shutdown"))?;
    store.close()
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("Error [{}]: {}", e.error_code(), e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;

    match cli.command {
        Commands::Init => {
            let store = open_store(&config)?;
            println!(
                "Initialized database at: {} (dimension {})",
                config.database.path.display(),
                store.dimension()
            );
            store.close()
        }
        Commands::Sync {
            ids,
            source,
            strategy,
            chunk_size,
        } => {
            let kb = open_kb(&config)?;
            sync(&kb, &config, ids, source, strategy, chunk_size).await?;
            close_kb(kb)
        }
        Commands::Search {
            query,
            top_k,
            mode,
            bm25_weight,
            semantic_weight,
        } => {
            let kb = open_kb(&config)?;
            let top_k = top_k.unwrap_or(config.search.top_k);
            let weights = HybridWeights {
                bm25: bm25_weight.unwrap_or(config.search.bm25_weight),
                semantic: semantic_weight.unwrap_or(config.search.semantic_weight),
            };
            search(&kb, &query, top_k, mode, weights).await?;
            close_kb(kb)
        }
        Commands::Context {
            query,
            top_k,
            max_chars,
        } => {
            let kb = open_kb(&config)?;
            let retrieved = kb
                .retrieve_context(
                    &query,
                    top_k.unwrap_or(config.search.top_k),
                    max_chars.unwrap_or(config.search.max_context_chars),
                )
                .await?;
            println!("{}", retrieved.context);
            eprintln!(
                "({} results in {}ms)",
                retrieved.results.len(),
                retrieved.latency_ms
            );
            close_kb(kb)
        }
        Commands::Clear { source_id } => {
            let kb = open_kb(&config)?;
            let removed = kb.clear_source(&source_id).await?;
            println!("Removed {} chunks for {}", removed, source_id);
            close_kb(kb)
        }
        Commands::Sources => {
            let store = open_store(&config)?;
            let sources = store.list_sources().await?;
            if sources.is_empty() {
                println!("No sources indexed.");
            }
            for source in &sources {
                println!(
                    "{}  [{}]  {} chunks  (indexed at {})",
                    source.source_id, source.source_type, source.chunks, source.last_indexed_at
                );
            }
            store.close()
        }
        Commands::Stats => {
            let store = open_store(&config)?;
            let stats = store.get_stats().await?;
            println!("Database:      {}", config.database.path.display());
            println!("Sources:       {}", stats.sources);
            println!("Chunks:        {}", stats.counts.chunks);
            println!("Embeddings:    {}", stats.counts.embeddings);
            println!("FTS entries:   {}", stats.counts.fts_entries);
            println!(
                "Consistent:    {}",
                if stats.counts.is_consistent() { "yes" } else { "NO" }
            );
            println!("Dimension:     {}", stats.dimension);
            println!("Storage:       {:.1} KiB", stats.storage_bytes as f64 / 1024.0);
            store.close()
        }
    }
}

async fn sync(
    kb: &Kb,
    config: &KbConfig,
    ids: Vec<String>,
    kind: SourceKind,
    strategy: Option<ChunkStrategy>,
    chunk_size: Option<usize>,
) -> Result<()> {
    let ids = if ids.is_empty() {
        match (&config.notion.default_page_id, kind) {
            (Some(page_id), SourceKind::Notion) => vec![page_id.clone()],
            _ => return Err(RagError::invalid_argument("no source id given")),
        }
    } else {
        ids
    };

    let source: Box<dyn DocumentSource> = match kind {
        SourceKind::Notion => Box::new(NotionSource::from_config(&config.notion)?),
        SourceKind::File => Box::new(FileSource::new()),
    };
    let chunker = chunker_for(strategy.unwrap_or(config.chunking.strategy));
    let target = chunk_size.unwrap_or(config.chunking.target_chunk_size);

    let report = sync_sources(kb, source.as_ref(), chunker.as_ref(), target, &ids).await;

    for (id, count) in &report.synced {
        println!("  {} - {} chunks", id, count);
    }
    for (id, err) in &report.failed {
        eprintln!("  {} - Error [{}]: {}", id, err.error_code(), err);
    }
    println!(
        "\nComplete: {} succeeded, {} failed, {} chunks stored",
        report.synced.len(),
        report.failed.len(),
        report.total_chunks()
    );

    if report.is_success() {
        Ok(())
    } else {
        Err(RagError::fetch(format!(
            "{} of {} sources failed to sync",
            report.failed.len(),
            ids.len()
        )))
    }
}

async fn search(
    kb: &Kb,
    query: &str,
    top_k: u32,
    mode: SearchMode,
    weights: HybridWeights,
) -> Result<()> {
    let results = match mode {
        SearchMode::Bm25 => kb.bm25_search(query, top_k).await?,
        SearchMode::Semantic => kb.semantic_search_text(query, top_k).await?,
        SearchMode::Hybrid => {
            let embedding = kb.embedder().embed(query).await?;
            kb.hybrid_search(query, &embedding, top_k, weights).await?
        }
    };

    if results.is_empty() {
        println!("No results for: {}", query);
        return Ok(());
    }

    for (rank, result) in results.iter().enumerate() {
        print_result(rank + 1, result);
    }
    Ok(())
}

fn print_result(rank: usize, result: &SearchResult) {
    let mut details = Vec::new();
    if let Some(score) = result.bm25_score {
        details.push(format!("bm25 {:.3}", score));
    }
    if let Some(score) = result.semantic_score {
        details.push(format!("semantic {:.3}", score));
    }

    println!(
        "{}. [{}:{}] score {:.3} ({})",
        rank,
        result.chunk.source_type,
        result.chunk.source_id,
        result.final_score,
        details.join(", ")
    );

    let preview: String = result
        .chunk
        .content
        .chars()
        .take(200)
        .map(|c| if c == '\n' { ' ' } else { c })
        .collect();
    println!("   {}\n", preview);
}
