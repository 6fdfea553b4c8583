//! Persistence gateway.
//!
//! The core depends on a document store only through point lookups by
//! identity, whole-record upserts, counting and a full ordered scan
//! ([`ArticleStore`]). Two stores are provided: [`MemoryStore`] for tests
//! and dry runs, and [`SqliteStore`] backed by an on-disk database with
//! secondary indexes and a full-text table.

use rusqlite::{params, Connection, OptionalExtension};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use tracing::{debug, info};

use crate::article::Article;
use crate::dedup::{by_doi, by_source_id, by_title, IdentityProbe};
use crate::error::Result;
use crate::normalize::title_key;

/// A stored record together with its identity key
#[derive(Debug, Clone, PartialEq)]
pub struct StoredArticle {
    pub key: String,
    pub article: Article,
}

/// What an upsert did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Replaced,
}

/// Document store operations the pipeline depends on
pub trait ArticleStore: Send {
    /// First stored record (in insertion order) carrying this identity signal
    fn find_by_identity(&self, probe: &IdentityProbe) -> Result<Option<StoredArticle>>;

    /// Store `article` under `key`, replacing any previous record with that key
    fn upsert(&mut self, key: &str, article: &Article) -> Result<UpsertOutcome>;

    /// Whether a record is already stored under `key`
    fn contains_key(&self, key: &str) -> Result<bool>;

    fn count_all(&self) -> Result<usize>;

    /// Every stored record in first-insertion order
    fn all(&self) -> Result<Vec<StoredArticle>>;
}

// ============================================================================
// In-memory store
// ============================================================================

/// Ordered in-memory store with hash indexes on every identity signal
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Vec<StoredArticle>,
    by_key: HashMap<String, usize>,
    index: HashMap<IdentityProbe, BTreeSet<usize>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn index_probes(article: &Article) -> Vec<IdentityProbe> {
        [by_doi(article), by_source_id(article), by_title(article)]
            .into_iter()
            .flatten()
            .collect()
    }
}

impl ArticleStore for MemoryStore {
    fn find_by_identity(&self, probe: &IdentityProbe) -> Result<Option<StoredArticle>> {
        Ok(self
            .index
            .get(probe)
            .and_then(|slots| slots.iter().next())
            .and_then(|slot| self.records.get(*slot))
            .cloned())
    }

    fn upsert(&mut self, key: &str, article: &Article) -> Result<UpsertOutcome> {
        let (slot, outcome) = match self.by_key.get(key) {
            Some(&slot) => {
                for probe in Self::index_probes(&self.records[slot].article) {
                    if let Some(slots) = self.index.get_mut(&probe) {
                        slots.remove(&slot);
                        if slots.is_empty() {
                            self.index.remove(&probe);
                        }
                    }
                }
                self.records[slot].article = article.clone();
                (slot, UpsertOutcome::Replaced)
            }
            None => {
                let slot = self.records.len();
                self.records.push(StoredArticle {
                    key: key.to_string(),
                    article: article.clone(),
                });
                self.by_key.insert(key.to_string(), slot);
                (slot, UpsertOutcome::Inserted)
            }
        };

        for probe in Self::index_probes(article) {
            self.index.entry(probe).or_default().insert(slot);
        }
        Ok(outcome)
    }

    fn contains_key(&self, key: &str) -> Result<bool> {
        Ok(self.by_key.contains_key(key))
    }

    fn count_all(&self) -> Result<usize> {
        Ok(self.records.len())
    }

    fn all(&self) -> Result<Vec<StoredArticle>> {
        Ok(self.records.clone())
    }
}

// ============================================================================
// SQLite store
// ============================================================================

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS articles (
    seq            INTEGER PRIMARY KEY AUTOINCREMENT,
    identity_key   TEXT NOT NULL UNIQUE,
    doi            TEXT,
    source         TEXT NOT NULL,
    article_id     TEXT NOT NULL,
    title_key      TEXT NOT NULL,
    year           INTEGER,
    date_published TEXT,
    document       TEXT NOT NULL,
    updated_at     TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_articles_doi ON articles(doi);
CREATE INDEX IF NOT EXISTS idx_articles_source_id ON articles(source, article_id);
CREATE INDEX IF NOT EXISTS idx_articles_source ON articles(source);
CREATE INDEX IF NOT EXISTS idx_articles_year ON articles(year DESC);
CREATE INDEX IF NOT EXISTS idx_articles_date ON articles(date_published DESC);
CREATE INDEX IF NOT EXISTS idx_articles_title ON articles(title_key);
"#;

const FTS_SCHEMA: &str = r#"
CREATE VIRTUAL TABLE IF NOT EXISTS articles_fts USING fts5(
    identity_key UNINDEXED,
    title,
    abstract,
    keywords
);
"#;

/// SQLite-backed document store
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (or create) the database at `path`
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!(journal_mode = %mode, "SQLite journal mode");
        info!(path = %path.display(), "Opened article store");
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        conn.execute_batch(FTS_SCHEMA)?;
        Ok(Self { conn })
    }

    /// Full-text search over title, abstract and keywords
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<StoredArticle>> {
        let mut stmt = self.conn.prepare(
            "SELECT a.identity_key, a.document
             FROM articles_fts JOIN articles a ON a.identity_key = articles_fts.identity_key
             WHERE articles_fts MATCH ?1
             ORDER BY rank
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![query, limit as i64], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        rows.map(|row| {
            let (key, document) = row?;
            decode(key, &document)
        })
        .collect()
    }

    /// Record counts per source
    pub fn count_by_source(&self) -> Result<Vec<(String, usize)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT source, COUNT(*) FROM articles GROUP BY source ORDER BY COUNT(*) DESC, source")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    fn first_where<P: rusqlite::Params>(&self, clause: &str, values: P) -> Result<Option<StoredArticle>> {
        let sql = format!(
            "SELECT identity_key, document FROM articles WHERE {} ORDER BY seq LIMIT 1",
            clause
        );
        let row = self
            .conn
            .query_row(&sql, values, |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .optional()?;
        row.map(|(key, document)| decode(key, &document)).transpose()
    }
}

fn key_exists(conn: &Connection, key: &str) -> Result<bool> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM articles WHERE identity_key = ?1",
            params![key],
            |_| Ok(()),
        )
        .optional()?
        .is_some())
}

fn decode(key: String, document: &str) -> Result<StoredArticle> {
    let article: Article = serde_json::from_str(document)?;
    Ok(StoredArticle { key, article })
}

impl ArticleStore for SqliteStore {
    fn find_by_identity(&self, probe: &IdentityProbe) -> Result<Option<StoredArticle>> {
        match probe {
            IdentityProbe::Doi(doi) => self.first_where("doi = ?1", params![doi]),
            IdentityProbe::SourceId { source, article_id } => {
                self.first_where("source = ?1 AND article_id = ?2", params![source.as_str(), article_id])
            }
            IdentityProbe::Title(title) => self.first_where("title_key = ?1", params![title]),
        }
    }

    fn upsert(&mut self, key: &str, article: &Article) -> Result<UpsertOutcome> {
        let document = serde_json::to_string(article)?;
        let tx = self.conn.transaction()?;
        let existed = key_exists(&tx, key)?;

        tx.execute(
            "INSERT INTO articles
                (identity_key, doi, source, article_id, title_key, year, date_published, document, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(identity_key) DO UPDATE SET
                doi = excluded.doi,
                source = excluded.source,
                article_id = excluded.article_id,
                title_key = excluded.title_key,
                year = excluded.year,
                date_published = excluded.date_published,
                document = excluded.document,
                updated_at = excluded.updated_at",
            params![
                key,
                article.doi(),
                article.source.as_str(),
                article.article_id.trim(),
                title_key(&article.title),
                article.year,
                article.date_published,
                document,
                chrono::Utc::now().to_rfc3339(),
            ],
        )?;

        tx.execute("DELETE FROM articles_fts WHERE identity_key = ?1", params![key])?;
        tx.execute(
            "INSERT INTO articles_fts (identity_key, title, abstract, keywords) VALUES (?1, ?2, ?3, ?4)",
            params![key, article.title, article.abstract_text, article.keywords.join(" ")],
        )?;
        tx.commit()?;

        let outcome = if existed {
            UpsertOutcome::Replaced
        } else {
            UpsertOutcome::Inserted
        };
        debug!(key = key, outcome = ?outcome, "Upserted article");
        Ok(outcome)
    }

    fn contains_key(&self, key: &str) -> Result<bool> {
        key_exists(&self.conn, key)
    }

    fn count_all(&self) -> Result<usize> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM articles", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    fn all(&self) -> Result<Vec<StoredArticle>> {
        let mut stmt = self
            .conn
            .prepare("SELECT identity_key, document FROM articles ORDER BY seq")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        rows.map(|row| {
            let (key, document) = row?;
            decode(key, &document)
        })
        .collect()
    }
}

/// Open the store selected by configuration
pub fn open_store(path: Option<&Path>) -> Result<Box<dyn ArticleStore>> {
    match path {
        Some(path) => Ok(Box::new(SqliteStore::open(path)?)),
        None => Ok(Box::new(MemoryStore::new())),
    }
}

impl<S: ArticleStore + ?Sized> ArticleStore for Box<S> {
    fn find_by_identity(&self, probe: &IdentityProbe) -> Result<Option<StoredArticle>> {
        (**self).find_by_identity(probe)
    }

    fn upsert(&mut self, key: &str, article: &Article) -> Result<UpsertOutcome> {
        (**self).upsert(key, article)
    }

    fn contains_key(&self, key: &str) -> Result<bool> {
        (**self).contains_key(key)
    }

    fn count_all(&self) -> Result<usize> {
        (**self).count_all()
    }

    fn all(&self) -> Result<Vec<StoredArticle>> {
        (**self).all()
    }
}
