//! Ingestion run.
//!
//! Sources are harvested concurrently. Each source's records flow, in
//! source order, through normalization and then through identity
//! resolution and upsert. Resolve + upsert is a single critical section so
//! two records with the same identity can never interleave.

use futures::future::join_all;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

use crate::article::{Article, Source};
use crate::dedup::{DedupStats, Deduplicator, MergePolicy, Resolution};
use crate::error::{CorpusError, Result};
use crate::harvest::{Harvester, SourceBatch};
use crate::normalize::Normalizer;
use crate::store::{ArticleStore, UpsertOutcome};

/// Per-source outcome of a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SourceReport {
    pub source: Option<Source>,
    /// Raw records received, including unparseable ones
    pub read: usize,
    pub skipped: usize,
    pub normalized: usize,
    pub inserted: usize,
    pub updated: usize,
    pub failed: usize,
    /// Set when the whole source could not be harvested
    pub error: Option<String>,
}

impl SourceReport {
    fn new(source: Source) -> Self {
        Self {
            source: Some(source),
            ..Default::default()
        }
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Batch summary for one ingestion run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    pub total_read: usize,
    /// Records the adapters could not map
    pub skipped: usize,
    pub normalized: usize,
    pub inserted: usize,
    /// Records that resolved to an existing identity
    pub deduplicated: usize,
    pub upserted: usize,
    /// Persistence failures
    pub failed: usize,
    pub sources: Vec<SourceReport>,
}

impl IngestSummary {
    pub fn absorb(&mut self, report: SourceReport) {
        self.total_read += report.read;
        self.skipped += report.skipped;
        self.normalized += report.normalized;
        self.inserted += report.inserted;
        self.deduplicated += report.updated;
        self.upserted += report.inserted + report.updated;
        self.failed += report.failed;
        self.sources.push(report);
    }

    /// True when at least one source failed outright
    pub fn is_partial(&self) -> bool {
        self.sources.iter().any(|s| !s.succeeded())
    }

    pub fn failed_sources(&self) -> Vec<Source> {
        self.sources
            .iter()
            .filter(|s| !s.succeeded())
            .filter_map(|s| s.source)
            .collect()
    }
}

struct IngestState<S> {
    dedup: Deduplicator,
    store: S,
}

/// Drives one ingestion run against a store
pub struct IngestPipeline<S: ArticleStore> {
    state: Mutex<IngestState<S>>,
    normalizer: Normalizer,
    merge: MergePolicy,
}

impl<S: ArticleStore> IngestPipeline<S> {
    pub fn new(store: S) -> Self {
        Self {
            state: Mutex::new(IngestState {
                dedup: Deduplicator::default(),
                store,
            }),
            normalizer: Normalizer::default(),
            merge: MergePolicy::default(),
        }
    }

    pub fn with_merge_policy(mut self, merge: MergePolicy) -> Self {
        self.merge = merge;
        self
    }

    pub fn with_normalizer(mut self, normalizer: Normalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    fn lock(&self) -> Result<MutexGuard<'_, IngestState<S>>> {
        self.state
            .lock()
            .map_err(|_| CorpusError::StoreUnavailable("ingest state lock poisoned".to_string()))
    }

    /// Dedup counters accumulated so far in this run
    pub fn dedup_stats(&self) -> Result<DedupStats> {
        Ok(self.lock()?.dedup.stats().clone())
    }

    pub fn count_stored(&self) -> Result<usize> {
        self.lock()?.store.count_all()
    }

    /// Hand the store back once the run is over
    pub fn into_store(self) -> Result<S> {
        let state = self
            .state
            .into_inner()
            .map_err(|_| CorpusError::StoreUnavailable("ingest state lock poisoned".to_string()))?;
        Ok(state.store)
    }

    /// Harvest every source concurrently and ingest what each one yields
    pub async fn run(&self, harvesters: &[Arc<dyn Harvester>]) -> IngestSummary {
        let reports = join_all(harvesters.iter().map(|harvester| async move {
            let source = harvester.source();
            info!(source = %source, "Harvesting");
            match harvester.harvest().await {
                Ok(batch) => self.ingest_batch(source, batch),
                Err(e) => {
                    warn!(source = %source, error = %e, "Source unavailable, continuing without it");
                    SourceReport {
                        error: Some(e.to_string()),
                        ..SourceReport::new(source)
                    }
                }
            }
        }))
        .await;

        let mut summary = IngestSummary::default();
        for report in reports {
            summary.absorb(report);
        }
        info!(
            total_read = summary.total_read,
            inserted = summary.inserted,
            deduplicated = summary.deduplicated,
            failed = summary.failed,
            "Ingestion run complete"
        );
        summary
    }

    /// Ingest already-fetched records from one source, in order
    pub fn ingest_batch(&self, source: Source, batch: SourceBatch) -> SourceReport {
        let mut report = SourceReport::new(source);
        report.read = batch.articles.len() + batch.skipped;
        report.skipped = batch.skipped;

        for article in batch.articles {
            let article = self.normalizer.normalize(article);
            report.normalized += 1;
            match self.persist(&article) {
                Ok(UpsertOutcome::Inserted) => report.inserted += 1,
                Ok(UpsertOutcome::Replaced) => report.updated += 1,
                Err(e) => {
                    error!(
                        source = %source,
                        article_id = %article.article_id,
                        error = %e,
                        "Failed to persist record"
                    );
                    report.failed += 1;
                }
            }
        }

        info!(
            source = %source,
            read = report.read,
            inserted = report.inserted,
            updated = report.updated,
            failed = report.failed,
            "Source ingested"
        );
        report
    }

    /// Convenience wrapper over [`ingest_batch`](Self::ingest_batch)
    pub fn ingest_articles(&self, source: Source, articles: Vec<Article>) -> SourceReport {
        self.ingest_batch(
            source,
            SourceBatch {
                articles,
                skipped: 0,
            },
        )
    }

    /// Resolve identity and upsert while holding the state lock
    fn persist(&self, article: &Article) -> Result<UpsertOutcome> {
        let mut guard = self.lock()?;
        let state = &mut *guard;

        let resolution = state.dedup.resolve(article, &state.store)?;
        let record = match (&resolution, self.merge) {
            (Resolution::Existing { matched_by, .. }, MergePolicy::FillMissing) => {
                match state.store.find_by_identity(matched_by)? {
                    Some(stored) => self.merge.merge(stored.article, article.clone()),
                    None => article.clone(),
                }
            }
            _ => article.clone(),
        };

        let outcome = state.store.upsert(resolution.key(), &record)?;
        debug!(key = %resolution.key(), outcome = ?outcome, "Upserted");
        Ok(outcome)
    }
}
