//! Batch analyses over a corpus snapshot.
//!
//! Every analysis is a pure function of the corpus. Counting runs over
//! rayon partitions that are merged before ranking. [`AnalyticsRunner`]
//! writes one CSV table per analysis and reports each one's outcome
//! independently.

pub mod coauthor;
pub mod signals;

pub use coauthor::{coauthor_network, CoauthorEdge};
pub use signals::{weak_signals, WeakSignal};

use rayon::prelude::*;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::Hash;
use std::path::{Path, PathBuf};
use tracing::{error, info};

use crate::article::Article;
use crate::config::Settings;
use crate::error::Result;

// ============================================================================
// Result tables
// ============================================================================

/// One result table consumed by the presentation layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    PublicationsByYear,
    TopAuthors,
    CoauthorNetwork,
    TopAffiliations,
    BySource,
    QuartileDistribution,
    KeywordsByYear,
    WeakSignals,
    SummaryStats,
}

impl Table {
    pub const ALL: [Table; 9] = [
        Table::PublicationsByYear,
        Table::TopAuthors,
        Table::CoauthorNetwork,
        Table::TopAffiliations,
        Table::BySource,
        Table::QuartileDistribution,
        Table::KeywordsByYear,
        Table::WeakSignals,
        Table::SummaryStats,
    ];

    /// Analysis name, also the CSV file stem
    pub fn name(&self) -> &'static str {
        match self {
            Table::PublicationsByYear => "publications_by_year",
            Table::TopAuthors => "top_authors",
            Table::CoauthorNetwork => "coauthor_network",
            Table::TopAffiliations => "top_affiliations",
            Table::BySource => "by_source",
            Table::QuartileDistribution => "quartile_distribution",
            Table::KeywordsByYear => "keywords_by_year",
            Table::WeakSignals => "weak_signals",
            Table::SummaryStats => "summary_stats",
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}.csv", self.name())
    }

    /// URL path segment under `/api/`
    pub fn slug(&self) -> String {
        self.name().replace('_', "-")
    }

    pub fn from_slug(slug: &str) -> Option<Table> {
        Table::ALL.into_iter().find(|t| t.slug() == slug)
    }

    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            Table::PublicationsByYear => &["year", "count"],
            Table::TopAuthors => &["author", "publications"],
            Table::CoauthorNetwork => &["author1", "author2", "collaborations"],
            Table::TopAffiliations => &["affiliation", "count"],
            Table::BySource => &["source", "count"],
            Table::QuartileDistribution => &["quartile", "count"],
            Table::KeywordsByYear => &["year", "keyword", "frequency"],
            Table::WeakSignals => &["term", "occurrences"],
            Table::SummaryStats => &[
                "total_articles",
                "unique_dois",
                "earliest_year",
                "latest_year",
                "unique_journals",
            ],
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearCount {
    pub year: Option<i32>,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorCount {
    pub author: String,
    pub publications: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AffiliationCount {
    pub affiliation: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceCount {
    pub source: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuartileCount {
    pub quartile: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordYearCount {
    pub year: Option<i32>,
    pub keyword: String,
    pub frequency: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryStats {
    pub total_articles: u64,
    pub unique_dois: u64,
    pub earliest_year: Option<i32>,
    pub latest_year: Option<i32>,
    pub unique_journals: u64,
}

// ============================================================================
// Counting
// ============================================================================

/// Count keys emitted per article, partition by partition
fn count_by<'a, K, I, F>(corpus: &'a [Article], keys: F) -> HashMap<K, u64>
where
    K: Eq + Hash + Send,
    I: IntoIterator<Item = K>,
    F: Fn(&'a Article) -> I + Sync + Send,
{
    corpus
        .par_iter()
        .fold(HashMap::new, |mut acc, article| {
            for key in keys(article) {
                *acc.entry(key).or_insert(0) += 1;
            }
            acc
        })
        .reduce(HashMap::new, |mut left, right| {
            for (key, n) in right {
                *left.entry(key).or_insert(0) += n;
            }
            left
        })
}

/// Counts descending, ties by key ascending
fn ranked<K: Ord>(counts: HashMap<K, u64>, limit: Option<usize>) -> Vec<(K, u64)> {
    let mut rows: Vec<(K, u64)> = counts.into_iter().collect();
    rows.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    if let Some(limit) = limit {
        rows.truncate(limit);
    }
    rows
}

/// Distinct non-empty values of one list field, so a value repeated within
/// an article counts once
fn distinct(values: &[String]) -> HashSet<&str> {
    values
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .collect()
}

/// Articles per year, years ascending with unknown years first
pub fn publications_by_year(corpus: &[Article]) -> Vec<YearCount> {
    let mut rows: Vec<YearCount> = count_by(corpus, |a| Some(a.year))
        .into_iter()
        .map(|(year, count)| YearCount { year, count })
        .collect();
    rows.sort_by_key(|r| r.year);
    rows
}

pub fn top_authors(corpus: &[Article], limit: usize) -> Vec<AuthorCount> {
    ranked(count_by(corpus, |a| distinct(&a.authors)), Some(limit))
        .into_iter()
        .map(|(author, publications)| AuthorCount {
            author: author.to_string(),
            publications,
        })
        .collect()
}

pub fn top_affiliations(corpus: &[Article], limit: usize) -> Vec<AffiliationCount> {
    ranked(count_by(corpus, |a| distinct(&a.affiliations)), Some(limit))
        .into_iter()
        .map(|(affiliation, count)| AffiliationCount {
            affiliation: affiliation.to_string(),
            count,
        })
        .collect()
}

pub fn by_source(corpus: &[Article]) -> Vec<SourceCount> {
    ranked(count_by(corpus, |a| Some(a.source.as_str())), None)
        .into_iter()
        .map(|(source, count)| SourceCount {
            source: source.to_string(),
            count,
        })
        .collect()
}

const Q1_VENUES: &[&str] = &["nature", "science", "cell", "lancet"];
const Q2_VENUES: &[&str] = &["ieee", "acm", "plos"];

/// Stored quartile, or one estimated from the journal name
pub fn quartile_of(article: &Article) -> String {
    if let Some(q) = article.quartile.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
        return q.to_string();
    }
    let Some(journal) = article.journal.as_deref() else {
        return "Q4".to_string();
    };
    let journal = journal.to_lowercase();
    if Q1_VENUES.iter().any(|v| journal.contains(v)) {
        "Q1"
    } else if Q2_VENUES.iter().any(|v| journal.contains(v)) {
        "Q2"
    } else {
        "Q3"
    }
    .to_string()
}

/// Articles per quartile, ordered by quartile label
pub fn quartile_distribution(corpus: &[Article]) -> Vec<QuartileCount> {
    let mut rows: Vec<QuartileCount> = count_by(corpus, |a| Some(quartile_of(a)))
        .into_iter()
        .map(|(quartile, count)| QuartileCount { quartile, count })
        .collect();
    rows.sort_by(|a, b| a.quartile.cmp(&b.quartile));
    rows
}

/// Keyword frequency per year, most frequent first
pub fn keywords_by_year(corpus: &[Article]) -> Vec<KeywordYearCount> {
    let counts = count_by(corpus, |a| {
        let year = a.year;
        distinct(&a.keywords).into_iter().map(move |k| (year, k))
    });

    let mut rows: Vec<KeywordYearCount> = counts
        .into_iter()
        .map(|((year, keyword), frequency)| KeywordYearCount {
            year,
            keyword: keyword.to_string(),
            frequency,
        })
        .collect();
    rows.sort_by(|a, b| {
        b.frequency
            .cmp(&a.frequency)
            .then_with(|| a.year.cmp(&b.year))
            .then_with(|| a.keyword.cmp(&b.keyword))
    });
    rows
}

pub fn summary_stats(corpus: &[Article]) -> SummaryStats {
    let dois: HashSet<&str> = corpus.par_iter().filter_map(|a| a.doi()).collect();
    let journals: HashSet<&str> = corpus
        .par_iter()
        .filter_map(|a| a.journal.as_deref())
        .collect();
    let years = || corpus.par_iter().filter_map(|a| a.year);

    SummaryStats {
        total_articles: corpus.len() as u64,
        unique_dois: dois.len() as u64,
        earliest_year: years().min(),
        latest_year: years().max(),
        unique_journals: journals.len() as u64,
    }
}

// ============================================================================
// CSV tables
// ============================================================================

/// Write `rows` under an explicit header, replacing any previous table.
/// An empty table still gets its header line.
pub fn write_table<T: Serialize>(path: &Path, columns: &[&str], rows: &[T]) -> Result<()> {
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)?;
    wtr.write_record(columns)?;
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Read a table back; a missing file is an empty table
pub fn read_table<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut rdr = csv::ReaderBuilder::new().has_headers(true).from_path(path)?;
    let mut rows = Vec::new();
    for row in rdr.deserialize() {
        rows.push(row?);
    }
    Ok(rows)
}

/// Per-analysis result of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnalysisOutcome {
    pub name: String,
    pub rows: usize,
    pub error: Option<String>,
}

impl AnalysisOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Analysis parameters
#[derive(Debug, Clone)]
pub struct AnalyticsConfig {
    pub top_authors_limit: usize,
    pub coauthor_limit: Option<usize>,
    pub top_affiliations_limit: usize,
    pub weak_signal_terms: Vec<String>,
    pub weak_signal_cutoff_year: i32,
}

impl From<&Settings> for AnalyticsConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            top_authors_limit: settings.top_authors_limit,
            coauthor_limit: settings.coauthor_limit,
            top_affiliations_limit: settings.top_affiliations_limit,
            weak_signal_terms: settings.weak_signal_terms.clone(),
            weak_signal_cutoff_year: settings.weak_signal_cutoff_year,
        }
    }
}

/// Runs every analysis and writes its table into `output_dir`
pub struct AnalyticsRunner {
    output_dir: PathBuf,
    config: AnalyticsConfig,
}

impl AnalyticsRunner {
    pub fn new(output_dir: impl Into<PathBuf>, config: AnalyticsConfig) -> Self {
        Self {
            output_dir: output_dir.into(),
            config,
        }
    }

    pub fn table_path(&self, table: Table) -> PathBuf {
        self.output_dir.join(table.file_name())
    }

    /// Run all analyses; a failing one is reported and the rest still run
    pub fn run(&self, corpus: &[Article]) -> Result<Vec<AnalysisOutcome>> {
        std::fs::create_dir_all(&self.output_dir)?;
        info!(articles = corpus.len(), output = %self.output_dir.display(), "Running analyses");

        let outcomes = Table::ALL
            .iter()
            .map(|&table| {
                let result = self.run_one(table, corpus);
                match &result {
                    Ok(rows) => info!(analysis = %table, rows = rows, "Analysis complete"),
                    Err(e) => error!(analysis = %table, error = %e, "Analysis failed"),
                }
                AnalysisOutcome {
                    name: table.name().to_string(),
                    rows: *result.as_ref().unwrap_or(&0),
                    error: result.err().map(|e| e.to_string()),
                }
            })
            .collect();
        Ok(outcomes)
    }

    /// Compute and write one table, returning its row count
    pub fn run_one(&self, table: Table, corpus: &[Article]) -> Result<usize> {
        let path = self.table_path(table);
        let columns = table.columns();
        let cfg = &self.config;

        match table {
            Table::PublicationsByYear => save(&path, columns, &publications_by_year(corpus)),
            Table::TopAuthors => save(&path, columns, &top_authors(corpus, cfg.top_authors_limit)),
            Table::CoauthorNetwork => save(&path, columns, &coauthor_network(corpus, cfg.coauthor_limit)),
            Table::TopAffiliations => save(
                &path,
                columns,
                &top_affiliations(corpus, cfg.top_affiliations_limit),
            ),
            Table::BySource => save(&path, columns, &by_source(corpus)),
            Table::QuartileDistribution => save(&path, columns, &quartile_distribution(corpus)),
            Table::KeywordsByYear => save(&path, columns, &keywords_by_year(corpus)),
            Table::WeakSignals => save(
                &path,
                columns,
                &weak_signals(corpus, &cfg.weak_signal_terms, cfg.weak_signal_cutoff_year),
            ),
            Table::SummaryStats => save(&path, columns, &[summary_stats(corpus)]),
        }
    }
}

fn save<T: Serialize>(path: &Path, columns: &[&str], rows: &[T]) -> Result<usize> {
    write_table(path, columns, rows)?;
    Ok(rows.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::article::Source;
    use tempfile::tempdir;

    fn article(source: Source, year: Option<i32>, authors: &[&str], journal: Option<&str>) -> Article {
        let mut a = Article::new(source, "id", "Title");
        a.year = year;
        a.authors = authors.iter().map(|s| s.to_string()).collect();
        a.journal = journal.map(str::to_string);
        a
    }

    fn corpus() -> Vec<Article> {
        let mut first = article(Source::Arxiv, Some(2023), &["Bob", "Alice"], Some("arXiv preprint"));
        first.keywords = vec!["ml".to_string(), "graphs".to_string()];
        first.doi = Some("10.1/a".to_string());
        let mut second = article(Source::Crossref, Some(2021), &["Alice"], Some("Nature Medicine"));
        second.keywords = vec!["ml".to_string()];
        second.affiliations = vec!["MIT".to_string(), "MIT".to_string()];
        let mut third = article(Source::Crossref, None, &["Carol"], None);
        third.keywords = vec!["ml".to_string()];
        third.doi = Some("10.1/a".to_string());
        let fourth = article(Source::Pubmed, Some(2023), &[], Some("IEEE Access"));
        vec![first, second, third, fourth]
    }

    #[test]
    fn test_publications_by_year_orders_null_first() {
        assert_eq!(
            publications_by_year(&corpus()),
            vec![
                YearCount { year: None, count: 1 },
                YearCount { year: Some(2021), count: 1 },
                YearCount { year: Some(2023), count: 2 },
            ]
        );
    }

    #[test]
    fn test_top_authors_ranking_and_limit() {
        let rows = top_authors(&corpus(), 2);
        assert_eq!(
            rows,
            vec![
                AuthorCount { author: "Alice".to_string(), publications: 2 },
                AuthorCount { author: "Bob".to_string(), publications: 1 },
            ]
        );
    }

    #[test]
    fn test_affiliation_counted_once_per_article() {
        assert_eq!(
            top_affiliations(&corpus(), 30),
            vec![AffiliationCount { affiliation: "MIT".to_string(), count: 1 }]
        );
    }

    #[test]
    fn test_by_source() {
        let rows = by_source(&corpus());
        assert_eq!(rows[0], SourceCount { source: "crossref".to_string(), count: 2 });
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1].source, "arxiv");
    }

    #[test]
    fn test_quartile_rules() {
        let rows = quartile_distribution(&corpus());
        let labels: Vec<(&str, u64)> = rows.iter().map(|r| (r.quartile.as_str(), r.count)).collect();
        assert_eq!(labels, vec![("Q1", 1), ("Q2", 1), ("Q3", 1), ("Q4", 1)]);

        let mut rated = article(Source::Crossref, None, &[], Some("Nature"));
        rated.quartile = Some("Q2".to_string());
        assert_eq!(quartile_of(&rated), "Q2");
    }

    #[test]
    fn test_keywords_by_year() {
        let rows = keywords_by_year(&corpus());
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0].frequency, 1);
        // all tied: year ascending with unknown first, then keyword
        assert_eq!(rows[0].year, None);
        assert_eq!((rows[2].year, rows[2].keyword.as_str()), (Some(2023), "graphs"));
    }

    #[test]
    fn test_summary_stats() {
        assert_eq!(
            summary_stats(&corpus()),
            SummaryStats {
                total_articles: 4,
                unique_dois: 1,
                earliest_year: Some(2021),
                latest_year: Some(2023),
                unique_journals: 3,
            }
        );
        assert_eq!(summary_stats(&[]), SummaryStats::default());
    }

    #[test]
    fn test_table_slugs() {
        assert_eq!(Table::from_slug("coauthor-network"), Some(Table::CoauthorNetwork));
        assert_eq!(Table::SummaryStats.file_name(), "summary_stats.csv");
        assert_eq!(Table::from_slug("lda-topics"), None);
    }

    #[test]
    fn test_runner_writes_every_table() -> Result<()> {
        let dir = tempdir()?;
        let config = AnalyticsConfig::from(&Settings::default());
        let runner = AnalyticsRunner::new(dir.path(), config);

        let outcomes = runner.run(&corpus())?;
        assert_eq!(outcomes.len(), Table::ALL.len());
        assert!(outcomes.iter().all(|o| o.succeeded()));

        for table in Table::ALL {
            assert!(runner.table_path(table).exists(), "{} missing", table);
        }
        let years: Vec<YearCount> = read_table(&runner.table_path(Table::PublicationsByYear))?;
        assert_eq!(years, publications_by_year(&corpus()));
        let signals: Vec<WeakSignal> = read_table(&runner.table_path(Table::WeakSignals))?;
        assert_eq!(signals.len(), 8);
        Ok(())
    }

    #[test]
    fn test_empty_table_keeps_header() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("top_authors.csv");
        write_table::<AuthorCount>(&path, Table::TopAuthors.columns(), &[])?;
        assert_eq!(std::fs::read_to_string(&path)?.trim(), "author,publications");
        assert!(read_table::<AuthorCount>(&path)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_failing_analysis_does_not_block_others() -> Result<()> {
        let dir = tempdir()?;
        let runner = AnalyticsRunner::new(dir.path(), AnalyticsConfig::from(&Settings::default()));
        // A directory where a table file should go makes that one write fail
        std::fs::create_dir_all(runner.table_path(Table::TopAuthors))?;

        let outcomes = runner.run(&corpus())?;
        let failed: Vec<&str> = outcomes
            .iter()
            .filter(|o| !o.succeeded())
            .map(|o| o.name.as_str())
            .collect();
        assert_eq!(failed, vec!["top_authors"]);
        Ok(())
    }
}
