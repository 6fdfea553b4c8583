//! Identity resolution.
//!
//! An article's identity is tried against the store through an ordered list
//! of resolver strategies (DOI, then source + source-local id, then title).
//! The first strategy that finds a stored record wins.

use std::collections::HashSet;
use tracing::debug;

use crate::article::{Article, Source};
use crate::error::Result;
use crate::normalize::title_key;
use crate::store::ArticleStore;

/// One identity signal extracted from a record
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IdentityProbe {
    Doi(String),
    SourceId { source: Source, article_id: String },
    Title(String),
}

impl IdentityProbe {
    /// Storage key for a record first seen through this signal
    pub fn key(&self) -> String {
        match self {
            IdentityProbe::Doi(doi) => format!("doi:{}", doi),
            IdentityProbe::SourceId { source, article_id } => format!("{}:{}", source, article_id),
            IdentityProbe::Title(title) => format!("title:{}", title),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            IdentityProbe::Doi(_) => "doi",
            IdentityProbe::SourceId { .. } => "source_id",
            IdentityProbe::Title(_) => "title",
        }
    }
}

/// A resolver strategy: extract one identity signal, if the record has it
pub type Resolver = fn(&Article) -> Option<IdentityProbe>;

pub fn by_doi(article: &Article) -> Option<IdentityProbe> {
    article.doi().map(|d| IdentityProbe::Doi(d.to_string()))
}

pub fn by_source_id(article: &Article) -> Option<IdentityProbe> {
    let id = article.article_id.trim();
    if id.is_empty() {
        return None;
    }
    Some(IdentityProbe::SourceId {
        source: article.source,
        article_id: id.to_string(),
    })
}

/// Best-effort fallback; distinct short titles can collide and reworded
/// republications are missed.
pub fn by_title(article: &Article) -> Option<IdentityProbe> {
    let key = title_key(&article.title);
    if key.is_empty() {
        None
    } else {
        Some(IdentityProbe::Title(key))
    }
}

/// Strategies used while ingesting into the store
pub const INGEST_RESOLVERS: &[Resolver] = &[by_doi, by_source_id];

/// Strategies used when exporting the corpus across all runs
pub const EXPORT_RESOLVERS: &[Resolver] = &[by_doi, by_source_id, by_title];

/// All identity signals of a record, strongest first
pub fn probes(article: &Article, resolvers: &[Resolver]) -> Vec<IdentityProbe> {
    resolvers.iter().filter_map(|r| r(article)).collect()
}

/// Key for a record that matched nothing stored.
///
/// Derived from the DOI or the source-local id; a record with neither gets
/// a random key and forfeits dedup until export.
pub fn fresh_key(article: &Article) -> String {
    by_doi(article)
        .or_else(|| by_source_id(article))
        .map(|probe| probe.key())
        .unwrap_or_else(unresolved_key)
}

fn unresolved_key() -> String {
    format!("unresolved:{}", uuid::Uuid::new_v4())
}

/// Outcome of resolving one incoming record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Matches a stored record
    Existing { key: String, matched_by: IdentityProbe },
    /// Not seen before
    New { key: String },
}

impl Resolution {
    pub fn key(&self) -> &str {
        match self {
            Resolution::Existing { key, .. } | Resolution::New { key } => key,
        }
    }

    pub fn is_existing(&self) -> bool {
        matches!(self, Resolution::Existing { .. })
    }
}

/// How an incoming record is combined with the stored one on identity match
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MergePolicy {
    /// Incoming record replaces the stored one entirely
    #[default]
    Overwrite,
    /// Incoming fields win, but stored values fill fields the incoming record leaves empty
    FillMissing,
}

impl std::str::FromStr for MergePolicy {
    type Err = crate::error::CorpusError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "overwrite" => Ok(MergePolicy::Overwrite),
            "fill-missing" => Ok(MergePolicy::FillMissing),
            other => Err(crate::error::CorpusError::Config(format!(
                "Unknown merge policy: {}",
                other
            ))),
        }
    }
}

impl MergePolicy {
    pub fn merge(&self, stored: Article, incoming: Article) -> Article {
        match self {
            MergePolicy::Overwrite => incoming,
            MergePolicy::FillMissing => fill_missing(stored, incoming),
        }
    }
}

fn fill_missing(stored: Article, mut incoming: Article) -> Article {
    fn opt<T>(slot: &mut Option<T>, fallback: Option<T>) {
        if slot.is_none() {
            *slot = fallback;
        }
    }
    fn list(slot: &mut Vec<String>, fallback: Vec<String>) {
        if slot.is_empty() {
            *slot = fallback;
        }
    }

    if incoming.doi().is_none() {
        incoming.doi = stored.doi;
    }
    if incoming.abstract_text.is_empty() {
        incoming.abstract_text = stored.abstract_text;
    }
    list(&mut incoming.authors, stored.authors);
    list(&mut incoming.affiliations, stored.affiliations);
    list(&mut incoming.keywords, stored.keywords);
    list(&mut incoming.subjects, stored.subjects);
    list(&mut incoming.categories, stored.categories);
    opt(&mut incoming.journal, stored.journal);
    opt(&mut incoming.publisher, stored.publisher);
    opt(&mut incoming.issn, stored.issn);
    opt(&mut incoming.isbn, stored.isbn);
    opt(&mut incoming.year, stored.year);
    opt(&mut incoming.month, stored.month);
    opt(&mut incoming.date_published, stored.date_published);
    opt(&mut incoming.citations, stored.citations);
    opt(&mut incoming.views, stored.views);
    opt(&mut incoming.quartile, stored.quartile);
    opt(&mut incoming.h_index, stored.h_index);
    opt(&mut incoming.url, stored.url);
    opt(&mut incoming.pdf_url, stored.pdf_url);
    opt(&mut incoming.language, stored.language);
    incoming
}

/// Counters for one run's dedup decisions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DedupStats {
    pub new_records: usize,
    pub matched_existing: usize,
    /// Matches against a record first written during this same run
    pub repeated_in_run: usize,
    /// Records stored under a random key (no identity signal)
    pub unresolved: usize,
    /// New records whose derived key was already held by another record
    pub key_collisions: usize,
    /// Titles seen more than once in the run (logged only, never merged)
    pub repeated_titles: usize,
}

/// Run-scoped deduplication stage.
///
/// Owns the "seen this run" state; create one per ingestion run.
#[derive(Debug)]
pub struct Deduplicator {
    resolvers: Vec<Resolver>,
    seen_keys: HashSet<String>,
    seen_titles: HashSet<String>,
    stats: DedupStats,
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self::new(INGEST_RESOLVERS)
    }
}

impl Deduplicator {
    pub fn new(resolvers: &[Resolver]) -> Self {
        Self {
            resolvers: resolvers.to_vec(),
            seen_keys: HashSet::new(),
            seen_titles: HashSet::new(),
            stats: DedupStats::default(),
        }
    }

    pub fn stats(&self) -> &DedupStats {
        &self.stats
    }

    /// Decide whether `article` is new or an update of a stored record
    pub fn resolve<S>(&mut self, article: &Article, store: &S) -> Result<Resolution>
    where
        S: ArticleStore + ?Sized,
    {
        if let Some(title) = by_title(article) {
            if !self.seen_titles.insert(title.key()) {
                self.stats.repeated_titles += 1;
                debug!(title = %article.title, "Title already seen in this run");
            }
        }

        for resolver in &self.resolvers {
            let Some(probe) = resolver(article) else {
                continue;
            };
            if let Some(stored) = store.find_by_identity(&probe)? {
                debug!(key = %stored.key, matched_by = probe.kind(), "Resolved to stored record");
                self.stats.matched_existing += 1;
                if !self.seen_keys.insert(stored.key.clone()) {
                    self.stats.repeated_in_run += 1;
                }
                return Ok(Resolution::Existing {
                    key: stored.key,
                    matched_by: probe,
                });
            }
        }

        let mut key = fresh_key(article);
        if key.starts_with("unresolved:") {
            self.stats.unresolved += 1;
        } else if store.contains_key(&key)? {
            // The stored record under this key has since changed its identity
            debug!(key = %key, "Derived key already taken, allocating a distinct one");
            self.stats.key_collisions += 1;
            key = format!("{}#{}", key, uuid::Uuid::new_v4());
        }
        self.stats.new_records += 1;
        self.seen_keys.insert(key.clone());
        Ok(Resolution::New { key })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ArticleStore, MemoryStore};

    fn article(source: Source, id: &str, doi: Option<&str>, title: &str) -> Article {
        let mut a = Article::new(source, id, title);
        a.doi = doi.map(str::to_string);
        a
    }

    #[test]
    fn test_resolver_strategies() {
        let a = article(Source::Arxiv, "2301.0001", None, "Some Title");
        assert_eq!(by_doi(&a), None);
        assert_eq!(
            by_source_id(&a),
            Some(IdentityProbe::SourceId {
                source: Source::Arxiv,
                article_id: "2301.0001".to_string()
            })
        );
        assert_eq!(by_title(&a), Some(IdentityProbe::Title("Some Title".to_string())));
    }

    #[test]
    fn test_fresh_key_priority() {
        assert_eq!(fresh_key(&article(Source::Crossref, "10.1_X", Some("10.1/X"), "T")), "doi:10.1/X");
        assert_eq!(fresh_key(&article(Source::Arxiv, "2301.0001", None, "T")), "arxiv:2301.0001");
        let k1 = fresh_key(&article(Source::Crossref, "", None, "Editorial"));
        let k2 = fresh_key(&article(Source::Crossref, "", None, "Editorial"));
        assert!(k1.starts_with("unresolved:"));
        assert_ne!(k1, k2);
    }

    #[test]
    fn test_doi_wins_over_source_id() -> Result<()> {
        let mut store = MemoryStore::new();
        store.upsert("doi:10.1/X", &article(Source::Crossref, "10.1_X", Some("10.1/X"), "A"))?;
        store.upsert("pubmed:999", &article(Source::Pubmed, "999", None, "B"))?;

        // DOI matches the first record, (source, id) matches the second
        let incoming = article(Source::Pubmed, "999", Some("10.1/X"), "C");
        let mut dedup = Deduplicator::default();
        let resolution = dedup.resolve(&incoming, &store)?;
        assert_eq!(
            resolution,
            Resolution::Existing {
                key: "doi:10.1/X".to_string(),
                matched_by: IdentityProbe::Doi("10.1/X".to_string())
            }
        );
        Ok(())
    }

    #[test]
    fn test_falls_back_to_source_id() -> Result<()> {
        let mut store = MemoryStore::new();
        store.upsert("arxiv:2301.0001", &article(Source::Arxiv, "2301.0001", None, "A"))?;

        let incoming = article(Source::Arxiv, "2301.0001", Some("10.9/new"), "A v2");
        let mut dedup = Deduplicator::default();
        let resolution = dedup.resolve(&incoming, &store)?;
        assert_eq!(resolution.key(), "arxiv:2301.0001");
        assert!(resolution.is_existing());
        Ok(())
    }

    #[test]
    fn test_same_id_other_source_is_new() -> Result<()> {
        let mut store = MemoryStore::new();
        store.upsert("arxiv:123", &article(Source::Arxiv, "123", None, "A"))?;

        let mut dedup = Deduplicator::default();
        let resolution = dedup.resolve(&article(Source::Pubmed, "123", None, "A"), &store)?;
        assert_eq!(resolution, Resolution::New { key: "pubmed:123".to_string() });
        assert_eq!(dedup.stats().new_records, 1);
        Ok(())
    }

    #[test]
    fn test_title_is_not_used_at_ingestion() -> Result<()> {
        let mut store = MemoryStore::new();
        store.upsert("arxiv:1", &article(Source::Arxiv, "1", None, "Shared Title"))?;

        let mut dedup = Deduplicator::default();
        let resolution = dedup.resolve(&article(Source::Pubmed, "2", None, "Shared Title"), &store)?;
        assert!(!resolution.is_existing());
        assert_eq!(dedup.stats().repeated_titles, 0);
        Ok(())
    }

    #[test]
    fn test_taken_key_is_never_reused() -> Result<()> {
        let mut store = MemoryStore::new();
        // Stored under doi:10.1/X, but the record now carries another DOI
        store.upsert(
            "doi:10.1/X",
            &article(Source::Arxiv, "2301.0001", Some("10.1/Y"), "Preprint"),
        )?;

        let mut dedup = Deduplicator::default();
        let incoming = article(Source::Crossref, "10.1_X", Some("10.1/X"), "Unrelated");
        let resolution = dedup.resolve(&incoming, &store)?;
        assert!(!resolution.is_existing());
        assert!(resolution.key().starts_with("doi:10.1/X#"));
        assert_eq!(dedup.stats().key_collisions, 1);
        Ok(())
    }

    #[test]
    fn test_no_identity_is_stored_as_new() -> Result<()> {
        let store = MemoryStore::new();
        let mut dedup = Deduplicator::default();
        let resolution = dedup.resolve(&article(Source::Crossref, "", None, ""), &store)?;
        assert!(resolution.key().starts_with("unresolved:"));
        assert_eq!(dedup.stats().unresolved, 1);
        Ok(())
    }

    #[test]
    fn test_fill_missing_keeps_stored_values() {
        let mut stored = article(Source::Arxiv, "1", None, "A");
        stored.categories = vec!["cs.LG".to_string()];
        stored.pdf_url = Some("https://arxiv.org/pdf/1".to_string());
        stored.year = Some(2022);

        let mut incoming = article(Source::Crossref, "10.1_x", Some("10.1/x"), "A");
        incoming.year = Some(2023);
        incoming.journal = Some("Nature".to_string());

        let merged = MergePolicy::FillMissing.merge(stored.clone(), incoming.clone());
        assert_eq!(merged.source, Source::Crossref);
        assert_eq!(merged.year, Some(2023));
        assert_eq!(merged.journal.as_deref(), Some("Nature"));
        assert_eq!(merged.categories, vec!["cs.LG"]);
        assert_eq!(merged.pdf_url, stored.pdf_url);

        assert_eq!(MergePolicy::Overwrite.merge(stored, incoming.clone()), incoming);
    }
}
