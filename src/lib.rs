//! # scicorpus
//!
//! Scientific article harvesting, deduplication and co-occurrence analytics.
//!
//! ## Modules
//!
//! - [`arxiv`], [`pubmed`], [`crossref`] - Source clients and adapters to the canonical [`article::Article`]
//! - [`normalize`] - Field-level cleanup
//! - [`dedup`] - Identity resolution
//! - [`store`] - Persistence gateway (in-memory and SQLite)
//! - [`pipeline`] - Concurrent ingestion runs
//! - [`export`] - Deduplicated corpus snapshot
//! - [`analytics`] - Aggregations, co-author network, weak signals
//! - [`api`] - Read-only HTTP API over the result tables
//! - [`error`] - Custom error types
//!
//! ## Usage
//!
//! ```rust,no_run
//! use scicorpus::{analytics, export, harvest, pipeline::IngestPipeline, store::SqliteStore, Settings};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = Settings::load(None)?;
//!     let pipeline = IngestPipeline::new(SqliteStore::open(&settings.database_path())?);
//!     let summary = pipeline.run(&harvest::build_harvesters(&settings)?).await;
//!     println!("Upserted {} articles", summary.upserted);
//!
//!     let store = pipeline.into_store()?;
//!     let (corpus, _) = export::export_corpus(&store)?;
//!     let runner = analytics::AnalyticsRunner::new(&settings.output_dir, (&settings).into());
//!     runner.run(&corpus)?;
//!     Ok(())
//! }
//! ```

pub mod analytics;
pub mod api;
pub mod article;
pub mod arxiv;
pub mod config;
pub mod crossref;
pub mod dedup;
pub mod error;
pub mod export;
pub mod harvest;
pub mod normalize;
pub mod pipeline;
pub mod pubmed;
pub mod store;

pub use article::{Article, Source};
pub use config::Settings;
pub use error::{CorpusError, Result};
