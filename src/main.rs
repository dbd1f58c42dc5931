//! # Snaphunt CLI
//!
//! The `snaphunt` binary drives the CV search and analysis engine:
//! database initialization, PDF ingestion, semantic queries, LLM
//! suitability analysis, model listing, and full reset.
//!
//! ## Usage
//!
//! ```bash
//! snaphunt --config ./config/snaphunt.toml <command>
//! ```
//!
//! The AI provider is inferred from the API key's shape (`AIza…` is
//! Google, `sk-…` is OpenAI). The key comes from `--api-key` or the
//! `SNAPHUNT_API_KEY` environment variable.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `snaphunt init` | Create the SQLite registry and run migrations |
//! | `snaphunt ingest <location>` | Index PDFs from a file, directory, ZIP, or URL |
//! | `snaphunt query "<text>"` | Ranked source list for a query |
//! | `snaphunt analyze "<text>"` | LLM suitability analysis of the top matches |
//! | `snaphunt models` | List models the provider currently serves |
//! | `snaphunt sources` | List ingested sources, `--remove <id>` to delete one |
//! | `snaphunt reset` | Drop all vectors and derived state |

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use snaphunt::analyze::{AnalysisOrchestrator, Tier};
use snaphunt::config::{self, Config};
use snaphunt::db;
use snaphunt::embedding::HttpEmbeddingClient;
use snaphunt::extract::PdfExtractor;
use snaphunt::ingest::{DocumentStatus, IngestionPipeline};
use snaphunt::llm::{CompletionClient, HttpCompletionClient};
use snaphunt::rate::RateGate;
use snaphunt::registry::ChecksumRegistry;
use snaphunt::search::RetrievalEngine;
use snaphunt::system;
use snaphunt::vector::QdrantStore;

/// Snaphunt — CV ingestion, semantic retrieval, and LLM analysis.
#[derive(Parser)]
#[command(
    name = "snaphunt",
    about = "CV search and analysis: ingest resume PDFs, query them semantically, analyze with an LLM",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/snaphunt.toml")]
    config: PathBuf,

    /// AI provider API key. Falls back to `SNAPHUNT_API_KEY`.
    #[arg(long, global = true)]
    api_key: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the SQLite registry.
    ///
    /// Creates the database file and all tables. Idempotent.
    Init,

    /// Ingest PDFs from a location.
    ///
    /// The location may be a PDF file, a directory tree, a ZIP archive,
    /// a direct PDF URL, or a bucket/listing URL. Documents whose bytes
    /// were already indexed are skipped.
    Ingest {
        /// File path, directory, ZIP archive, or URL.
        location: String,
    },

    /// Query indexed documents and print ranked sources.
    Query {
        /// The search query.
        query: String,

        /// Maximum number of chunk hits to retrieve.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Analyze the top matches for a query with an LLM.
    ///
    /// Results are cached per document and job description; a repeat
    /// analysis with the same inputs makes no LLM call.
    Analyze {
        /// The search query.
        query: String,

        /// Job description to judge candidates against.
        #[arg(long)]
        job: Option<String>,

        /// Analysis tier: `basic` or `pro`. Overrides config.
        #[arg(long)]
        tier: Option<String>,

        /// Model override. Overrides config and the provider default.
        #[arg(long)]
        model: Option<String>,
    },

    /// List the models the provider currently serves.
    Models,

    /// List ingested sources, or remove one with its documents.
    Sources {
        /// Remove this source id and every document discovered from it.
        #[arg(long)]
        remove: Option<String>,
    },

    /// Drop all vectors and derived registry state.
    ///
    /// Documents and sources are kept, so re-ingesting the same
    /// locations rebuilds the index.
    Reset,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg.db.path).await?;
            ChecksumRegistry::open(pool).await?;
            println!("Database initialized at {}", cfg.db.path.display());
        }
        Commands::Ingest { location } => {
            run_ingest(&cfg, &resolve_api_key(&cli.api_key)?, &location).await?;
        }
        Commands::Query { query, limit } => {
            run_query(&cfg, &resolve_api_key(&cli.api_key)?, &query, limit).await?;
        }
        Commands::Analyze {
            query,
            job,
            tier,
            model,
        } => {
            run_analyze(
                &cfg,
                &resolve_api_key(&cli.api_key)?,
                &query,
                job.as_deref(),
                tier.as_deref(),
                model,
            )
            .await?;
        }
        Commands::Models => {
            let client = HttpCompletionClient::from_api_key(&resolve_api_key(&cli.api_key)?)?;
            let models = client
                .list_models()
                .await
                .map_err(snaphunt::errors::EngineError::from)?;
            println!("Models served by {}:", client.provider());
            for model in models {
                println!("  {}", model);
            }
        }
        Commands::Sources { remove } => {
            let pool = db::connect(&cfg.db.path).await?;
            let registry = ChecksumRegistry::open(pool).await?;
            match remove {
                Some(id) => {
                    let deleted = registry.remove_source(&id).await?;
                    println!("Removed source {} ({} documents)", id, deleted);
                    println!("Note: vectors for removed documents remain until `reset`.");
                }
                None => {
                    let sources = registry.list_sources().await?;
                    if sources.is_empty() {
                        println!("No sources ingested yet.");
                    }
                    for source in sources {
                        let docs = registry.documents_by_source(&source.id).await?;
                        let indexed = docs.iter().filter(|d| d.indexed).count();
                        println!(
                            "{}  [{}] {}  ({} documents, {} indexed)",
                            source.id,
                            source.kind,
                            source.value,
                            docs.len(),
                            indexed
                        );
                    }
                }
            }
        }
        Commands::Reset => {
            let pool = db::connect(&cfg.db.path).await?;
            let registry = ChecksumRegistry::open(pool).await?;
            let store = QdrantStore::new(&cfg.vector);
            system::reset(&store, &registry).await?;
            println!("Vectors and derived state cleared.");
        }
    }

    Ok(())
}

fn resolve_api_key(flag: &Option<String>) -> anyhow::Result<String> {
    flag.clone()
        .or_else(|| std::env::var("SNAPHUNT_API_KEY").ok())
        .filter(|k| !k.trim().is_empty())
        .context("No API key. Pass --api-key or set SNAPHUNT_API_KEY.")
}

async fn run_ingest(cfg: &Config, api_key: &str, location: &str) -> anyhow::Result<()> {
    let pool = db::connect(&cfg.db.path).await?;
    let registry = Arc::new(ChecksumRegistry::open(pool).await?);
    let store = Arc::new(QdrantStore::new(&cfg.vector));
    let embedder = Arc::new(HttpEmbeddingClient::from_api_key(api_key)?);
    let gate = Arc::new(RateGate::new(cfg.rate.clone()));

    let pipeline = IngestionPipeline::new(
        registry,
        store,
        embedder,
        Arc::new(PdfExtractor),
        gate,
        cfg.chunking.clone(),
    );

    let report = pipeline.ingest_location(location).await?;
    println!(
        "Ingested {}: {} indexed, {} duplicates",
        report.origin,
        report.indexed_count(),
        report.duplicate_count()
    );
    for outcome in &report.outcomes {
        match &outcome.status {
            DocumentStatus::Indexed { chunks } => {
                println!("  indexed    {} ({} chunks)", outcome.location, chunks)
            }
            DocumentStatus::Duplicate => println!("  duplicate  {}", outcome.location),
            DocumentStatus::Failed { reason } => {
                println!("  FAILED     {} — {}", outcome.location, reason)
            }
        }
    }
    for (location, reason) in &report.skipped {
        println!("  skipped    {} — {}", location, reason);
    }
    Ok(())
}

async fn run_query(
    cfg: &Config,
    api_key: &str,
    query: &str,
    limit: Option<usize>,
) -> anyhow::Result<()> {
    let store = Arc::new(QdrantStore::new(&cfg.vector));
    let embedder = Arc::new(HttpEmbeddingClient::from_api_key(api_key)?);
    let gate = Arc::new(RateGate::new(cfg.rate.clone()));
    let engine = RetrievalEngine::new(
        store,
        embedder,
        gate,
        limit.unwrap_or(cfg.retrieval.top_k),
    );

    let ranked = engine.ranked(query).await?;
    if ranked.is_empty() {
        println!("No matches.");
        return Ok(());
    }

    println!("{} matching sources:\n", ranked.len());
    for (i, source) in ranked.iter().enumerate() {
        println!(
            "{:>3}. {}  avg {:.3}  ({} chunks)",
            i + 1,
            source.file_name,
            source.average_score,
            source.matched_chunks
        );
        println!("     {}", source.source);
    }
    Ok(())
}

async fn run_analyze(
    cfg: &Config,
    api_key: &str,
    query: &str,
    job: Option<&str>,
    tier_flag: Option<&str>,
    model_flag: Option<String>,
) -> anyhow::Result<()> {
    let pool = db::connect(&cfg.db.path).await?;
    let registry = Arc::new(ChecksumRegistry::open(pool).await?);
    let store = Arc::new(QdrantStore::new(&cfg.vector));
    let embedder = Arc::new(HttpEmbeddingClient::from_api_key(api_key)?);
    let completer = Arc::new(HttpCompletionClient::from_api_key(api_key)?);
    let gate = Arc::new(RateGate::new(cfg.rate.clone()));
    let retrieval = Arc::new(RetrievalEngine::new(
        store,
        embedder,
        gate.clone(),
        cfg.retrieval.top_k,
    ));

    let tier = Tier::from_str(tier_flag.unwrap_or(&cfg.analysis.tier))?;
    let model_override = model_flag.or_else(|| cfg.analysis.model.clone());
    let orchestrator =
        AnalysisOrchestrator::new(registry, retrieval, completer, gate, tier, model_override);

    let outcome = orchestrator.analyze(query, job).await?;

    match &outcome.answered_by {
        Some(model) => println!(
            "Analysis by {} ({} fresh, {} from cache):\n",
            model, outcome.fresh_sources, outcome.cached_sources
        ),
        None => println!(
            "Analysis served entirely from cache ({} sources):\n",
            outcome.cached_sources
        ),
    }

    for candidate in &outcome.report.candidates {
        println!(
            "  [{}] {:.2}  {}",
            if candidate.suitable { "fit" } else { " - " },
            candidate.score,
            candidate.source
        );
        println!("        {}", candidate.justification);
    }
    if !outcome.report.summary.is_empty() {
        println!("\nSummary: {}", outcome.report.summary);
    }
    Ok(())
}
