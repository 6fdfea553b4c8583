//! Canonical article schema shared by every source adapter.
//!
//! Adapters translate their source-specific raw records into [`Article`];
//! nothing downstream of an adapter ever sees a source-shaped record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CorpusError;

/// Origin of a canonical record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Arxiv,
    Pubmed,
    Crossref,
}

impl Source {
    /// All supported sources, in default harvesting order
    pub const ALL: [Source; 3] = [Source::Arxiv, Source::Pubmed, Source::Crossref];

    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Arxiv => "arxiv",
            Source::Pubmed => "pubmed",
            Source::Crossref => "crossref",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = CorpusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "arxiv" => Ok(Source::Arxiv),
            "pubmed" => Ok(Source::Pubmed),
            "crossref" => Ok(Source::Crossref),
            other => Err(CorpusError::Config(format!("Unknown source: {}", other))),
        }
    }
}

/// One scientific article in canonical form.
///
/// Optional scalar fields stay `None` when the source does not provide them;
/// list fields default to empty. Quality metrics (`citations`, `views`,
/// `quartile`, `h_index`) are never populated at ingestion time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    // Identity
    pub doi: Option<String>,
    /// Source-local identifier (arXiv id, PMID, key-safe DOI for Crossref)
    #[serde(default)]
    pub article_id: String,
    pub source: Source,

    // Content
    #[serde(default)]
    pub title: String,
    #[serde(rename = "abstract", default)]
    pub abstract_text: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub affiliations: Vec<String>,
    pub journal: Option<String>,
    pub publisher: Option<String>,
    pub issn: Option<String>,
    pub isbn: Option<String>,

    // Temporal
    pub year: Option<i32>,
    pub month: Option<u32>,
    pub date_published: Option<String>,

    // Classification
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub subjects: Vec<String>,
    #[serde(default)]
    pub categories: Vec<String>,

    // Quality / metrics
    pub citations: Option<u64>,
    pub views: Option<u64>,
    pub quartile: Option<String>,
    pub h_index: Option<u32>,

    // Provenance
    pub url: Option<String>,
    pub pdf_url: Option<String>,
    pub language: Option<String>,
    pub scraped_at: DateTime<Utc>,
}

impl Article {
    /// Create a record with every optional field empty
    pub fn new(source: Source, article_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            doi: None,
            article_id: article_id.into(),
            source,
            title: title.into(),
            abstract_text: String::new(),
            authors: Vec::new(),
            affiliations: Vec::new(),
            journal: None,
            publisher: None,
            issn: None,
            isbn: None,
            year: None,
            month: None,
            date_published: None,
            keywords: Vec::new(),
            subjects: Vec::new(),
            categories: Vec::new(),
            citations: None,
            views: None,
            quartile: None,
            h_index: None,
            url: None,
            pdf_url: None,
            language: None,
            scraped_at: Utc::now(),
        }
    }

    /// DOI if present and non-blank
    pub fn doi(&self) -> Option<&str> {
        self.doi.as_deref().map(str::trim).filter(|d| !d.is_empty())
    }
}

/// Map an empty or whitespace-only string to `None`
pub(crate) fn non_empty(value: impl Into<String>) -> Option<String> {
    let value = value.into();
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}
