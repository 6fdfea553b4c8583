//! Corpus export.
//!
//! Materializes every stored record as one ordered, deduplicated snapshot.
//! Identity is re-resolved across all runs with the full strategy list
//! (DOI, source id, title); the first record seen for an identity wins.

use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

use crate::article::Article;
use crate::dedup::{probes, IdentityProbe, EXPORT_RESOLVERS};
use crate::error::Result;
use crate::store::ArticleStore;

/// Counts reported by an export
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExportSummary {
    pub total_read: usize,
    pub unique_emitted: usize,
    pub duplicates_removed: usize,
    /// Emitted records per source
    pub by_source: BTreeMap<String, usize>,
}

/// Deduplicate `records`, keeping input order and the first record per identity.
///
/// A record is a duplicate when any of its identity signals was already
/// claimed by an emitted record. Records without any signal are always kept.
pub fn dedupe_corpus(records: Vec<Article>) -> (Vec<Article>, ExportSummary) {
    let mut summary = ExportSummary {
        total_read: records.len(),
        ..Default::default()
    };
    let mut claimed: HashSet<IdentityProbe> = HashSet::new();
    let mut unique = Vec::with_capacity(records.len());

    for article in records {
        let signals = probes(&article, EXPORT_RESOLVERS);
        if let Some(hit) = signals.iter().find(|p| claimed.contains(*p)) {
            debug!(matched_by = hit.kind(), article_id = %article.article_id, "Dropping duplicate");
            summary.duplicates_removed += 1;
            continue;
        }
        claimed.extend(signals);
        *summary
            .by_source
            .entry(article.source.to_string())
            .or_default() += 1;
        unique.push(article);
    }

    summary.unique_emitted = unique.len();
    (unique, summary)
}

/// Read the whole store and deduplicate it
pub fn export_corpus<S>(store: &S) -> Result<(Vec<Article>, ExportSummary)>
where
    S: ArticleStore + ?Sized,
{
    let total = store.count_all()?;
    info!(total = total, "Exporting corpus");
    let records = store.all()?.into_iter().map(|s| s.article).collect();
    let (corpus, summary) = dedupe_corpus(records);
    info!(
        unique = summary.unique_emitted,
        duplicates = summary.duplicates_removed,
        "Corpus export complete"
    );
    Ok((corpus, summary))
}

/// Write the snapshot as a pretty-printed JSON array, replacing any previous file.
/// Returns the file size in bytes.
pub fn write_corpus_json(path: &Path, corpus: &[Article]) -> Result<u64> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(corpus)?;
    fs::write(path, json.as_bytes())?;
    Ok(fs::metadata(path)?.len())
}

pub fn read_corpus_json(path: &Path) -> Result<Vec<Article>> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}
