//! # Anchorage CLI
//!
//! The `anchorage` binary drives the document grounding engine: database
//! initialization, document ingestion, status polling, hybrid search,
//! grounding-context assembly, and temporal-column corrections.
//!
//! ## Usage
//!
//! ```bash
//! anchorage --config ./anchorage.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `anchorage init` | Create the SQLite database and run schema migrations |
//! | `anchorage ingest <file>` | Register and process a document |
//! | `anchorage sources` | List an owner's documents and their status |
//! | `anchorage status <id>` | Show a document's processing status |
//! | `anchorage search "<query>"` | Hybrid retrieval over indexed chunks |
//! | `anchorage context "<query>"` | Print the assembled grounding context |
//! | `anchorage check "<query>"` | Validate citations in a model answer |
//! | `anchorage temporal get <id>` | Show a document's temporal analysis |
//! | `anchorage temporal set <id>` | Override detected date columns |
//! | `anchorage delete <id>` | Remove a document and its index records |
//! | `anchorage purge` | Reclaim expired index records |

use std::path::PathBuf;

use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use anchorage::config::{self, Config};
use anchorage::models::SeasonalityOutcome;
use anchorage::search::SearchRequest;
use anchorage::{catalog, context, db, embedding, index, migrate, pipeline, search};

#[derive(Parser)]
#[command(
    name = "anchorage",
    about = "Anchorage — a temporally-aware document grounding engine",
    version,
    long_about = "Anchorage ingests business documents (xlsx, pdf, docx, pptx, csv, txt) into \
    addressable chunks, analyzes their date columns for lead times and seasonality, and serves \
    hybrid keyword + semantic retrieval with cell-level citations."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./anchorage.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent — running it multiple times is safe.
    Init,

    /// Register a document and run the ingestion pipeline on it.
    Ingest {
        /// Path to the document (kind is detected from the extension).
        file: PathBuf,

        /// Owner the document belongs to; retrieval never crosses owners.
        #[arg(long, default_value = "default")]
        owner: String,
    },

    /// List an owner's documents and their processing status.
    Sources {
        #[arg(long, default_value = "default")]
        owner: String,
    },

    /// Show one document's processing status and temporal summary.
    Status {
        /// Source document id.
        id: String,

        #[arg(long, default_value = "default")]
        owner: String,
    },

    /// Hybrid retrieval over the owner's indexed chunks.
    Search {
        /// The search query string.
        query: String,

        #[arg(long, default_value = "default")]
        owner: String,

        /// Restrict retrieval to a single source document.
        #[arg(long)]
        source: Option<String>,
    },

    /// Assemble and print the grounding context for a query.
    Context {
        /// The query to ground.
        query: String,

        #[arg(long, default_value = "default")]
        owner: String,

        /// Restrict retrieval to a single source document.
        #[arg(long)]
        source: Option<String>,
    },

    /// Validate the citations in a model answer against the grounding
    /// context that would be assembled for a query.
    Check {
        /// The query the answer was produced for.
        query: String,

        /// The model answer to check; reads stdin when omitted.
        #[arg(long)]
        answer: Option<String>,

        #[arg(long, default_value = "default")]
        owner: String,

        /// Restrict retrieval to a single source document.
        #[arg(long)]
        source: Option<String>,
    },

    /// Inspect or correct a document's temporal analysis.
    Temporal {
        #[command(subcommand)]
        action: TemporalAction,
    },

    /// Remove a document and all of its index records.
    Delete {
        /// Source document id.
        id: String,

        #[arg(long, default_value = "default")]
        owner: String,
    },

    /// Reclaim expired index records and cache entries.
    Purge,
}

#[derive(Subcommand)]
enum TemporalAction {
    /// Show the detected date columns, lead times, and seasonality.
    Get {
        /// Source document id.
        id: String,

        #[arg(long, default_value = "default")]
        owner: String,
    },

    /// Override the detected date columns and re-run the pipeline.
    ///
    /// The override is permanent for this document: re-detection never
    /// replaces it.
    Set {
        /// Source document id.
        id: String,

        #[arg(long, default_value = "default")]
        owner: String,

        /// Date columns to use, comma-separated (e.g. `order_date,delivery_date`).
        #[arg(long, value_delimiter = ',')]
        columns: Vec<String>,

        /// Lead-time pairs as `start=end`, repeatable.
        #[arg(long = "pair", value_parser = parse_pair)]
        pairs: Vec<(String, String)>,
    },
}

fn parse_pair(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid START=END: no '=' found in '{}'", s))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest { file, owner } => {
            run_ingest(&cfg, &file, &owner).await?;
        }
        Commands::Sources { owner } => {
            let pool = db::connect(&cfg).await?;
            let sources = catalog::list_sources(&pool, &owner).await?;
            if sources.is_empty() {
                println!("No documents.");
            }
            for s in sources {
                println!(
                    "{}  [{}]  {}  ({})",
                    s.id,
                    s.status.as_str(),
                    s.filename,
                    s.kind.as_str()
                );
            }
        }
        Commands::Status { id, owner } => {
            let pool = db::connect(&cfg).await?;
            match catalog::get_source(&pool, &owner, &id).await? {
                Some(s) => {
                    println!("{}  [{}]  {}", s.id, s.status.as_str(), s.filename);
                    if let Some(err) = s.error_message {
                        println!("error: {}", err);
                    }
                    if let Some(meta) = s.temporal {
                        println!("date columns: {}", meta.effective_columns().join(", "));
                    }
                }
                None => println!("Unknown document: {}", id),
            }
        }
        Commands::Search {
            query,
            owner,
            source,
        } => {
            run_search(&cfg, &query, &owner, source.as_deref()).await?;
        }
        Commands::Context {
            query,
            owner,
            source,
        } => {
            let pool = db::connect(&cfg).await?;
            let results = run_retrieval(&pool, &cfg, &query, &owner, source.as_deref()).await?;
            let assembled = context::build_context(&results, Utc::now(), cfg.context.max_tokens);
            println!("{}", assembled.text);
        }
        Commands::Check {
            query,
            answer,
            owner,
            source,
        } => {
            let answer = match answer {
                Some(text) => text,
                None => {
                    let mut buf = String::new();
                    std::io::Read::read_to_string(&mut std::io::stdin(), &mut buf)?;
                    buf
                }
            };
            let pool = db::connect(&cfg).await?;
            let results = run_retrieval(&pool, &cfg, &query, &owner, source.as_deref()).await?;
            let assembled = context::build_context(&results, Utc::now(), cfg.context.max_tokens);
            let citations = context::extract_citations(&answer, &assembled);
            if citations.is_empty() {
                println!("No valid citations found.");
            }
            for c in citations {
                println!("[{}] {}, {}", c.label, c.filename, c.locator.describe());
                println!("    \"{}\"", c.excerpt.replace('\n', " "));
            }
        }
        Commands::Temporal { action } => match action {
            TemporalAction::Get { id, owner } => {
                let pool = db::connect(&cfg).await?;
                print_temporal(&pool, &owner, &id).await?;
            }
            TemporalAction::Set {
                id,
                owner,
                columns,
                pairs,
            } => {
                let pool = db::connect(&cfg).await?;
                migrate::run_migrations(&pool).await?;
                let columns = (!columns.is_empty()).then_some(columns);
                let pairs = (!pairs.is_empty()).then_some(pairs);
                match catalog::set_temporal_override(&pool, &owner, &id, columns, pairs, Utc::now())
                    .await?
                {
                    Some(_) => {
                        let outcome = pipeline::reprocess_source(&pool, &cfg, &owner, &id).await?;
                        println!(
                            "Override applied; re-indexed {} chunks using columns: {}",
                            outcome.chunks_indexed,
                            outcome.temporal_columns.join(", ")
                        );
                    }
                    None => println!("Unknown document: {}", id),
                }
            }
        },
        Commands::Delete { id, owner } => {
            let pool = db::connect(&cfg).await?;
            let records = index::delete_source_records(&pool, &owner, &id).await?;
            let existed = catalog::delete_source(&pool, &owner, &id).await?;
            if existed {
                println!("Deleted {} ({} index records removed).", id, records);
            } else {
                println!("Unknown document: {}", id);
            }
        }
        Commands::Purge => {
            let pool = db::connect(&cfg).await?;
            let purged = index::purge_expired(&pool, Utc::now()).await?;
            println!("Purged {} expired records.", purged);
        }
    }

    Ok(())
}

async fn run_ingest(cfg: &Config, file: &PathBuf, owner: &str) -> Result<()> {
    let filename = file
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow::anyhow!("invalid filename: {}", file.display()))?;
    let bytes = std::fs::read(file)?;

    let pool = db::connect(cfg).await?;
    migrate::run_migrations(&pool).await?;

    let source = catalog::register_source(&pool, owner, filename, &bytes, Utc::now()).await?;
    println!("Registered {} as {}.", filename, source.id);

    let outcome = pipeline::process_source(&pool, cfg, owner, &source.id).await?;
    println!("Indexed {} chunks.", outcome.chunks_indexed);
    if outcome.temporal_columns.is_empty() {
        println!("No date columns detected.");
    } else {
        println!("Date columns: {}", outcome.temporal_columns.join(", "));
    }
    Ok(())
}

async fn run_retrieval(
    pool: &sqlx::SqlitePool,
    cfg: &Config,
    query: &str,
    owner: &str,
    source: Option<&str>,
) -> Result<Vec<anchorage::models::RetrievalResult>> {
    let provider = if cfg.embedding.is_enabled() {
        Some(embedding::create_provider(&cfg.embedding)?)
    } else {
        None
    };
    search::hybrid_search(
        pool,
        cfg,
        provider.as_deref(),
        &SearchRequest {
            owner_id: owner,
            query,
            source_id: source,
        },
        Utc::now(),
    )
    .await
}

async fn run_search(cfg: &Config, query: &str, owner: &str, source: Option<&str>) -> Result<()> {
    let pool = db::connect(cfg).await?;
    let results = run_retrieval(&pool, cfg, query, owner, source).await?;

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, result) in results.iter().enumerate() {
        println!(
            "{}. [{:.2}] {}, {}",
            i + 1,
            result.score,
            result.filename,
            result.locator.describe()
        );
        if let Some(tc) = &result.temporal {
            println!("    temporal: {}", tc.summary());
        }
        println!(
            "    excerpt: \"{}\"",
            result.content.replace('\n', " ").trim()
        );
        println!("    chunk: {}", result.chunk_id);
        println!();
    }
    Ok(())
}

async fn print_temporal(pool: &sqlx::SqlitePool, owner: &str, id: &str) -> Result<()> {
    let Some(source) = catalog::get_source(pool, owner, id).await? else {
        println!("Unknown document: {}", id);
        return Ok(());
    };
    let Some(meta) = source.temporal else {
        println!("No temporal analysis for {}.", source.filename);
        return Ok(());
    };

    println!("{}", source.filename);
    println!(
        "detected columns: {}",
        if meta.detected_date_columns.is_empty() {
            "(none)".to_string()
        } else {
            meta.detected_date_columns.join(", ")
        }
    );
    if let Some(cols) = &meta.user_overridden_columns {
        println!("override: {}", cols.join(", "));
    }
    if let Some(range) = meta.time_range {
        println!("time range: {} to {}", range.earliest, range.latest);
    }
    for pair in &meta.lead_time_stats {
        println!(
            "lead time {} -> {}: mean {:.1}d, median {:.1}d, min {:.0}d, max {:.0}d ({} records, {} outliers)",
            pair.start_column,
            pair.end_column,
            pair.stats.mean_days,
            pair.stats.median_days,
            pair.stats.min_days,
            pair.stats.max_days,
            pair.stats.total_records,
            pair.stats.outliers.len()
        );
    }
    if meta.ambiguous_pairing {
        println!("note: date columns could not be paired unambiguously; use `temporal set --pair`");
    }
    match meta.seasonality {
        Some(SeasonalityOutcome::Pattern { description, .. }) => {
            println!("seasonality: {}", description);
        }
        Some(SeasonalityOutcome::InsufficientHistory { months_covered }) => {
            println!(
                "seasonality: insufficient history ({:.1} months covered)",
                months_covered
            );
        }
        Some(SeasonalityOutcome::NoMaterialPattern) => {
            println!("seasonality: no material pattern");
        }
        None => {}
    }
    Ok(())
}
