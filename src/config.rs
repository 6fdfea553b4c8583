//! Runtime configuration.
//!
//! Resolution order: built-in defaults, then an optional JSON settings file,
//! then environment variables. CLI flags are applied last by the binary.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::article::Source;
use crate::error::{CorpusError, Result};

/// Default search queries (shared by arXiv and PubMed)
pub const DEFAULT_QUERIES: &[&str] = &[
    "machine learning",
    "deep learning",
    "artificial intelligence",
    "data mining",
    "big data",
    "blockchain",
];

/// Default emerging-term vocabulary for weak-signal detection
pub const DEFAULT_WEAK_SIGNAL_TERMS: &[&str] = &[
    "federated learning",
    "quantum ml",
    "quantum machine learning",
    "explainable ai",
    "edge computing",
    "neuromorphic",
    "gpt",
    "llm",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Base directory for the database and default artifacts
    pub data_dir: PathBuf,
    /// SQLite database path; `None` means `<data_dir>/articles.db`
    pub database: Option<PathBuf>,
    /// Directory receiving the corpus export and analysis tables
    pub output_dir: PathBuf,

    // Harvesting
    pub sources: Vec<String>,
    pub queries: Vec<String>,
    pub max_results: usize,
    pub crossref_rows: usize,
    pub crossref_from_year: i32,
    pub ncbi_api_key: Option<String>,
    pub contact_email: String,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    /// In-flight request cap per source client
    pub max_concurrent_requests: usize,

    // Analytics
    pub weak_signal_terms: Vec<String>,
    pub weak_signal_cutoff_year: i32,
    pub top_authors_limit: usize,
    pub coauthor_limit: Option<usize>,
    pub top_affiliations_limit: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            database: None,
            output_dir: PathBuf::from("./output"),
            sources: Source::ALL.iter().map(|s| s.as_str().to_string()).collect(),
            queries: DEFAULT_QUERIES.iter().map(|q| q.to_string()).collect(),
            max_results: 100,
            crossref_rows: 150,
            crossref_from_year: 2020,
            ncbi_api_key: None,
            contact_email: "research@example.com".to_string(),
            request_timeout_secs: 30,
            max_retries: 3,
            max_concurrent_requests: 3,
            weak_signal_terms: DEFAULT_WEAK_SIGNAL_TERMS.iter().map(|t| t.to_string()).collect(),
            weak_signal_cutoff_year: 2023,
            top_authors_limit: 50,
            coauthor_limit: Some(100),
            top_affiliations_limit: 30,
        }
    }
}

/// `~/.scicorpus`, or `./.scicorpus` when no home directory is known
fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|p| p.join(".scicorpus"))
        .unwrap_or_else(|| PathBuf::from(".scicorpus"))
}

impl Settings {
    /// Load settings from defaults, an optional JSON file and the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|e| {
                    CorpusError::Config(format!("Cannot read {}: {}", path.display(), e))
                })?;
                let parsed: Settings = serde_json::from_str(&content)?;
                info!(path = %path.display(), "Loaded settings file");
                parsed
            }
            None => Settings::default(),
        };
        settings.apply_env(|key| std::env::var(key).ok());
        settings.validate()?;
        Ok(settings)
    }

    /// Apply environment overrides through `lookup`
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = lookup("SCICORPUS_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(db) = lookup("SCICORPUS_DB") {
            self.database = Some(PathBuf::from(db));
        }
        if let Some(dir) = lookup("SCICORPUS_OUTPUT_DIR") {
            self.output_dir = PathBuf::from(dir);
        }
        if let Some(sources) = lookup("SCICORPUS_SOURCES") {
            self.sources = split_list(&sources);
        }
        if let Some(key) = lookup("NCBI_API_KEY").filter(|k| !k.trim().is_empty()) {
            self.ncbi_api_key = Some(key);
        }
        if let Some(email) = lookup("SCICORPUS_EMAIL") {
            self.contact_email = email;
        }
        debug!(sources = ?self.sources, "Applied environment overrides");
    }

    pub fn validate(&self) -> Result<()> {
        self.enabled_sources()?;
        if self.max_concurrent_requests == 0 {
            return Err(CorpusError::Config("max_concurrent_requests must be positive".to_string()));
        }
        if self.max_results == 0 {
            return Err(CorpusError::Config("max_results must be positive".to_string()));
        }
        if self.weak_signal_terms.is_empty() {
            return Err(CorpusError::Config("weak_signal_terms must not be empty".to_string()));
        }
        Ok(())
    }

    /// Enabled sources, in configured order, without repeats
    pub fn enabled_sources(&self) -> Result<Vec<Source>> {
        let mut sources: Vec<Source> = Vec::new();
        for name in &self.sources {
            let source: Source = name.parse()?;
            if !sources.contains(&source) {
                sources.push(source);
            }
        }
        Ok(sources)
    }

    pub fn database_path(&self) -> PathBuf {
        self.database
            .clone()
            .unwrap_or_else(|| self.data_dir.join("articles.db"))
    }

    pub fn corpus_path(&self) -> PathBuf {
        self.output_dir.join("all_articles.json")
    }
}

/// Split a comma-separated list, trimming and dropping empty entries
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
