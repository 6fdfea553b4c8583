//! scicorpus - Scientific article harvesting and analytics pipeline
//!
//! Harvests arXiv, PubMed and Crossref, deduplicates into one corpus and
//! computes the aggregate tables served by the read-only API.
//!
//! ## Usage
//!
//! ### Full run
//! ```bash
//! scicorpus run --query "federated learning" --max-results 50
//! ```
//!
//! ### HTTP Server Mode
//! ```bash
//! scicorpus serve --port 5000
//! ```

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use scicorpus::{
    analytics::{AnalysisOutcome, AnalyticsRunner},
    api::{self, ApiState},
    article::Article,
    config::split_list,
    dedup::MergePolicy,
    export::{self, ExportSummary},
    harvest,
    pipeline::{IngestPipeline, IngestSummary},
    store::{open_store, ArticleStore, SqliteStore},
    Settings,
};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, EnvFilter};

// ============================================================================
// CLI Definition
// ============================================================================

/// Scientific article harvesting, deduplication and analytics
#[derive(Parser)]
#[command(name = "scicorpus")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// JSON settings file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct IngestArgs {
    /// Comma-separated sources (arxiv,pubmed,crossref)
    #[arg(long)]
    sources: Option<String>,

    /// Search query; repeat for several
    #[arg(short, long)]
    query: Vec<String>,

    /// Results per query
    #[arg(long)]
    max_results: Option<usize>,

    /// SQLite database path
    #[arg(long)]
    db: Option<PathBuf>,

    /// Ingest into memory only
    #[arg(long)]
    dry_run: bool,

    /// What to do on identity match
    #[arg(long, default_value = "overwrite", value_parser = ["overwrite", "fill-missing"])]
    merge: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Harvest sources into the article store
    Ingest(IngestArgs),

    /// Write the deduplicated corpus as JSON
    Export {
        /// SQLite database path
        #[arg(long)]
        db: Option<PathBuf>,

        /// Output file (default: <output_dir>/all_articles.json)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Compute the analysis tables from an exported corpus
    Analyze {
        /// Corpus JSON (default: <output_dir>/all_articles.json)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Directory receiving the CSV tables
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },

    /// Ingest, export and analyze in one go
    Run {
        #[command(flatten)]
        ingest: IngestArgs,

        /// Directory receiving the corpus and tables
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },

    /// Serve the analysis tables over HTTP
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "5000")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Directory holding the CSV tables
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },

    /// Show store statistics
    Stats {
        /// SQLite database path
        #[arg(long)]
        db: Option<PathBuf>,

        /// Full-text search over title, abstract and keywords
        #[arg(short, long)]
        search: Option<String>,

        /// Maximum search hits
        #[arg(long, default_value = "10")]
        limit: usize,
    },
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.debug { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    let subscriber = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false);
    if cli.json_logs {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    let mut settings = Settings::load(cli.config.as_deref()).context("Failed to load settings")?;

    match cli.command {
        Commands::Ingest(args) => {
            apply_ingest_args(&mut settings, &args)?;
            run_ingest(&settings, &args).await?;
            Ok(())
        }
        Commands::Export { db, output } => {
            if let Some(db) = db {
                settings.database = Some(db);
            }
            let store = SqliteStore::open(&settings.database_path()).context("Failed to open article store")?;
            let output = output.unwrap_or_else(|| settings.corpus_path());
            run_export(&store, &output)?;
            Ok(())
        }
        Commands::Analyze { input, output_dir } => {
            if let Some(dir) = output_dir {
                settings.output_dir = dir;
            }
            let input = input.unwrap_or_else(|| settings.corpus_path());
            let corpus = export::read_corpus_json(&input)
                .with_context(|| format!("Failed to read corpus {}", input.display()))?;
            run_analyze(&settings, &corpus)?;
            Ok(())
        }
        Commands::Run { ingest, output_dir } => {
            if let Some(dir) = output_dir {
                settings.output_dir = dir;
            }
            apply_ingest_args(&mut settings, &ingest)?;
            run_all(&settings, &ingest).await
        }
        Commands::Serve {
            port,
            host,
            output_dir,
        } => {
            if let Some(dir) = output_dir {
                settings.output_dir = dir;
            }
            run_server(host, port, settings.output_dir.clone()).await
        }
        Commands::Stats { db, search, limit } => {
            if let Some(db) = db {
                settings.database = Some(db);
            }
            show_stats(&settings, search.as_deref(), limit)
        }
    }
}

/// Fold CLI flags over the loaded settings
fn apply_ingest_args(settings: &mut Settings, args: &IngestArgs) -> Result<()> {
    if let Some(sources) = &args.sources {
        settings.sources = split_list(sources);
    }
    if !args.query.is_empty() {
        settings.queries = args.query.clone();
    }
    if let Some(max_results) = args.max_results {
        settings.max_results = max_results;
    }
    if let Some(db) = &args.db {
        settings.database = Some(db.clone());
    }
    settings.validate().context("Invalid settings")?;
    Ok(())
}

// ============================================================================
// Pipeline Stages
// ============================================================================

async fn run_ingest(
    settings: &Settings,
    args: &IngestArgs,
) -> Result<(IngestSummary, Box<dyn ArticleStore>)> {
    println!("\n--- Stage 1: Ingestion ---");
    let merge: MergePolicy = args.merge.parse()?;
    let db_path = settings.database_path();
    let store = open_store(if args.dry_run { None } else { Some(db_path.as_path()) })
        .context("Failed to open article store")?;
    if args.dry_run {
        println!("Dry run: records are kept in memory only");
    } else {
        println!("Store: {}", db_path.display());
    }

    let harvesters = harvest::build_harvesters(settings)?;
    println!(
        "Harvesting {} source(s) for {} quer(y/ies)...",
        harvesters.len(),
        settings.queries.len()
    );

    let pipeline = IngestPipeline::new(store).with_merge_policy(merge);
    let summary = pipeline.run(&harvesters).await;
    print_ingest_summary(&summary);

    let store = pipeline.into_store()?;
    println!("Articles in store: {}", store.count_all()?);
    Ok((summary, store))
}

fn print_ingest_summary(summary: &IngestSummary) {
    for report in &summary.sources {
        let name = report.source.map(|s| s.to_string()).unwrap_or_default();
        match &report.error {
            Some(e) => println!("  {:10}: FAILED ({})", name, e),
            None => println!(
                "  {:10}: {} read, {} skipped, {} new, {} updated, {} failed",
                name, report.read, report.skipped, report.inserted, report.updated, report.failed
            ),
        }
    }
    println!(
        "Total read: {} | normalized: {} | deduplicated: {} | upserted: {} | failed: {}",
        summary.total_read, summary.normalized, summary.deduplicated, summary.upserted, summary.failed
    );
    if summary.is_partial() {
        warn!(failed = ?summary.failed_sources(), "Partial ingestion");
        println!("Partial success: some sources were unavailable");
    }
}

fn run_export<S: ArticleStore + ?Sized>(store: &S, output: &Path) -> Result<Vec<Article>> {
    println!("\n--- Stage 2: Corpus Export ---");
    let (corpus, summary) = export::export_corpus(store)?;
    let size = export::write_corpus_json(output, &corpus)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    print_export_summary(&summary);
    println!("Created: {} ({:.2} MB)", output.display(), size as f64 / (1024.0 * 1024.0));
    Ok(corpus)
}

fn print_export_summary(summary: &ExportSummary) {
    println!("Total read: {}", summary.total_read);
    println!("Unique articles: {}", summary.unique_emitted);
    println!("Duplicates removed: {}", summary.duplicates_removed);
    println!("Breakdown by source:");
    for (source, count) in &summary.by_source {
        println!("  {:10}: {:5} articles", source, count);
    }
}

fn run_analyze(settings: &Settings, corpus: &[Article]) -> Result<Vec<AnalysisOutcome>> {
    println!("\n--- Stage 3: Analytics ---");
    let runner = AnalyticsRunner::new(&settings.output_dir, settings.into());
    let outcomes = runner.run(corpus)?;
    for outcome in &outcomes {
        match &outcome.error {
            None => println!("  ✓ {} ({} rows)", outcome.name, outcome.rows),
            Some(e) => println!("  ✗ {}: {}", outcome.name, e),
        }
    }
    let failed = outcomes.iter().filter(|o| !o.succeeded()).count();
    if failed > 0 {
        println!("{} of {} analyses failed", failed, outcomes.len());
    }
    println!("Tables in: {}", settings.output_dir.display());
    Ok(outcomes)
}

async fn run_all(settings: &Settings, args: &IngestArgs) -> Result<()> {
    let (_, store) = run_ingest(settings, args).await?;
    let corpus = run_export(&*store, &settings.corpus_path())?;
    run_analyze(settings, &corpus)?;
    println!("\n✓ Pipeline complete. Results in: {}", settings.output_dir.display());
    Ok(())
}

fn show_stats(settings: &Settings, search: Option<&str>, limit: usize) -> Result<()> {
    let store = SqliteStore::open(&settings.database_path()).context("Failed to open article store")?;
    println!("Store: {}", settings.database_path().display());
    println!("Total articles: {}", store.count_all()?);
    for (source, count) in store.count_by_source()? {
        println!("  {:10}: {:5} articles", source, count);
    }

    if let Some(query) = search {
        let hits = store.search(query, limit).context("Full-text search failed")?;
        println!("\n{} match(es) for {:?}:", hits.len(), query);
        for hit in hits {
            let year = hit.article.year.map(|y| y.to_string()).unwrap_or_default();
            println!("  [{}] {} ({})", hit.key, hit.article.title, year);
        }
    }
    Ok(())
}

// ============================================================================
// HTTP Server
// ============================================================================

async fn run_server(host: String, port: u16, output_dir: PathBuf) -> Result<()> {
    info!(host = %host, port = port, tables = %output_dir.display(), "Starting HTTP server");
    println!("Starting server at http://{}:{}", host, port);

    let app = api::router(ApiState::new(output_dir));

    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .context("Invalid host:port")?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    println!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .await
        .context("Server error")?;

    Ok(())
}
