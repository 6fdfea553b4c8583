//! arXiv source: Atom feed entries and their canonical mapping.
//!
//! arXiv exposes no keywords and no affiliations in its API feed, so the
//! adapter seeds keywords with the search query that found the entry and
//! always leaves affiliations empty.

use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::Deserialize;
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

use crate::article::{non_empty, Article, Source};
use crate::config::Settings;
use crate::error::{CorpusError, OptionExt, Result};
use crate::harvest::{Harvester, HttpFetcher, SourceBatch};

/// arXiv API query endpoint
const ARXIV_API_URL: &str = "https://export.arxiv.org/api/query";

/// arXiv asks clients to wait 3 seconds between calls
const REQUEST_INTERVAL: Duration = Duration::from_secs(3);

#[derive(Debug, Deserialize)]
struct AtomFeed {
    #[serde(rename = "entry", default)]
    entries: Vec<ArxivEntry>,
}

/// One parsed Atom `<entry>`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ArxivEntry {
    /// Identifier URL, e.g. `http://arxiv.org/abs/2301.00001v1`
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub published: String,
    #[serde(rename = "author", default)]
    pub authors: Vec<ArxivAuthor>,
    #[serde(rename = "category", default)]
    pub categories: Vec<ArxivCategory>,
    #[serde(rename = "link", default)]
    pub links: Vec<ArxivLink>,
    #[serde(rename = "arxiv:doi", alias = "doi", default)]
    pub doi: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ArxivAuthor {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ArxivCategory {
    #[serde(rename = "@term", default)]
    pub term: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ArxivLink {
    #[serde(rename = "@href", default)]
    pub href: String,
    #[serde(rename = "@title")]
    pub title: Option<String>,
}

/// Parse an Atom response body into its entries
pub fn parse_feed(xml: &str) -> Result<Vec<ArxivEntry>> {
    let feed: AtomFeed = quick_xml::de::from_str(xml)?;
    Ok(feed.entries)
}

/// Source-local id from the entry identifier URL.
///
/// `http://arxiv.org/abs/2301.00001v1` gives `2301.00001v1`; old-style ids
/// keep their archive prefix (`hep-th/9901001v1`).
pub fn article_id_from_url(id: &str) -> Result<String> {
    let url = Url::parse(id.trim())
        .map_err(|e| CorpusError::Parse(format!("Invalid arXiv identifier {:?}: {}", id, e)))?;
    let path = url.path().trim_end_matches('/');
    let article_id = match path.split_once("/abs/") {
        Some((_, rest)) => Some(rest),
        None => path.rsplit('/').next(),
    }
    .filter(|s| !s.is_empty())
    .ok_or_parse(&format!("No article id in {:?}", id))?;
    Ok(article_id.to_string())
}

/// Map one entry to a canonical article
pub fn to_article(entry: &ArxivEntry, query: &str, scraped_at: DateTime<Utc>) -> Result<Article> {
    let article_id = article_id_from_url(&entry.id)?;

    let mut article = Article::new(Source::Arxiv, article_id, entry.title.replace('\n', " ").trim());
    article.abstract_text = entry.summary.replace('\n', " ").trim().to_string();
    article.doi = entry.doi.clone().and_then(non_empty);
    article.authors = entry.authors.iter().map(|a| a.name.clone()).collect();

    let published = entry.published.trim();
    if let Some(date) = published
        .get(..10)
        .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
    {
        article.date_published = Some(date.format("%Y-%m-%d").to_string());
        article.year = Some(date.year());
        article.month = Some(date.month());
    } else {
        article.date_published = non_empty(published);
    }

    article.categories = entry
        .categories
        .iter()
        .map(|c| c.term.clone())
        .filter(|t| !t.is_empty())
        .collect();
    article.subjects = article.categories.clone();
    article.keywords = vec![query.to_string()];

    article.url = non_empty(entry.id.trim());
    article.pdf_url = entry
        .links
        .iter()
        .find(|l| l.title.as_deref() == Some("pdf"))
        .and_then(|l| non_empty(l.href.clone()));

    article.journal = Some("arXiv preprint".to_string());
    article.publisher = Some("arXiv".to_string());
    article.language = Some("en".to_string());
    article.scraped_at = scraped_at;
    Ok(article)
}

/// Harvests the configured queries from the arXiv API
pub struct ArxivHarvester {
    http: HttpFetcher,
    queries: Vec<String>,
    max_results: usize,
}

impl ArxivHarvester {
    pub fn new(settings: &Settings) -> Result<Self> {
        Ok(Self {
            http: HttpFetcher::new(settings)?,
            queries: settings.queries.clone(),
            max_results: settings.max_results,
        })
    }

    /// Fetch the newest entries matching `query`
    pub async fn fetch(&self, query: &str) -> Result<Vec<ArxivEntry>> {
        let url = search_url(query, self.max_results);
        let body = self.http.send(|c| c.get(&url)).await?.text().await?;
        parse_feed(&body)
    }
}

fn search_url(query: &str, max_results: usize) -> String {
    format!(
        "{}?search_query=all:{}&start=0&max_results={}&sortBy=submittedDate&sortOrder=descending",
        ARXIV_API_URL,
        urlencoding::encode(query),
        max_results
    )
}

#[async_trait]
impl Harvester for ArxivHarvester {
    fn source(&self) -> Source {
        Source::Arxiv
    }

    async fn harvest(&self) -> Result<SourceBatch> {
        let mut batch = SourceBatch::default();
        let mut last_error = None;

        for (idx, query) in self.queries.iter().enumerate() {
            if idx > 0 {
                tokio::time::sleep(REQUEST_INTERVAL).await;
            }
            match self.fetch(query).await {
                Ok(entries) => {
                    info!(query = %query, count = entries.len(), "Fetched arXiv entries");
                    let now = Utc::now();
                    batch.extend(
                        Source::Arxiv,
                        entries.iter().map(|e| to_article(e, query, now)),
                    );
                }
                Err(e) => {
                    warn!(query = %query, error = %e, "arXiv query failed");
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if batch.articles.is_empty() && batch.skipped == 0 => {
                Err(CorpusError::SourceUnavailable {
                    source_name: Source::Arxiv.to_string(),
                    reason: e.to_string(),
                })
            }
            _ => Ok(batch),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom"
      xmlns:opensearch="http://a9.com/-/spec/opensearch/1.1/"
      xmlns:arxiv="http://arxiv.org/schemas/atom">
  <title type="html">ArXiv Query</title>
  <id>http://arxiv.org/api/abc</id>
  <opensearch:totalResults>2</opensearch:totalResults>
  <entry>
    <id>http://arxiv.org/abs/2301.00001v2</id>
    <updated>2023-01-05T10:00:00Z</updated>
    <published>2023-01-02T18:59:59Z</published>
    <title>Federated Learning
  at Scale</title>
    <summary>  We study federated
 learning.  </summary>
    <author><name>Alice Martin</name></author>
    <author><name>Bob Chen</name></author>
    <arxiv:doi>10.1000/fl.2023</arxiv:doi>
    <link title="doi" href="http://dx.doi.org/10.1000/fl.2023" rel="related"/>
    <arxiv:comment>12 pages</arxiv:comment>
    <link href="http://arxiv.org/abs/2301.00001v2" rel="alternate" type="text/html"/>
    <link title="pdf" href="http://arxiv.org/pdf/2301.00001v2" rel="related" type="application/pdf"/>
    <arxiv:primary_category term="cs.LG" scheme="http://arxiv.org/schemas/atom"/>
    <category term="cs.LG" scheme="http://arxiv.org/schemas/atom"/>
    <category term="cs.DC" scheme="http://arxiv.org/schemas/atom"/>
  </entry>
  <entry>
    <id>http://arxiv.org/abs/hep-th/9901001v1</id>
    <published>1999-01-01T00:00:00Z</published>
    <title>Strings</title>
    <summary>Old style id.</summary>
    <author><name>Carol Diaz</name></author>
    <link href="http://arxiv.org/abs/hep-th/9901001v1" rel="alternate" type="text/html"/>
    <category term="hep-th" scheme="http://arxiv.org/schemas/atom"/>
  </entry>
</feed>"#;

    #[test]
    fn test_parse_feed() -> Result<()> {
        let entries = parse_feed(FEED)?;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].authors.len(), 2);
        assert_eq!(entries[0].links.len(), 3);
        assert_eq!(entries[0].doi.as_deref(), Some("10.1000/fl.2023"));
        assert_eq!(entries[1].doi, None);
        Ok(())
    }

    #[test]
    fn test_parse_empty_feed() -> Result<()> {
        let entries = parse_feed(r#"<feed xmlns="http://www.w3.org/2005/Atom"><title>x</title></feed>"#)?;
        assert!(entries.is_empty());
        Ok(())
    }

    #[test]
    fn test_article_id_from_url() -> Result<()> {
        assert_eq!(article_id_from_url("http://arxiv.org/abs/2301.00001v2")?, "2301.00001v2");
        assert_eq!(article_id_from_url("http://arxiv.org/abs/hep-th/9901001v1")?, "hep-th/9901001v1");
        assert_eq!(article_id_from_url("https://example.org/records/42/")?, "42");
        assert!(article_id_from_url("not a url").is_err());
        assert!(article_id_from_url("").is_err());
        Ok(())
    }

    #[test]
    fn test_to_article() -> Result<()> {
        let entries = parse_feed(FEED)?;
        let now = Utc::now();
        let article = to_article(&entries[0], "federated learning", now)?;

        assert_eq!(article.source, Source::Arxiv);
        assert_eq!(article.article_id, "2301.00001v2");
        assert_eq!(article.doi.as_deref(), Some("10.1000/fl.2023"));
        assert_eq!(article.authors, vec!["Alice Martin", "Bob Chen"]);
        assert!(article.affiliations.is_empty());
        assert_eq!(article.date_published.as_deref(), Some("2023-01-02"));
        assert_eq!(article.year, Some(2023));
        assert_eq!(article.month, Some(1));
        assert_eq!(article.categories, vec!["cs.LG", "cs.DC"]);
        assert_eq!(article.subjects, article.categories);
        assert_eq!(article.keywords, vec!["federated learning"]);
        assert_eq!(article.pdf_url.as_deref(), Some("http://arxiv.org/pdf/2301.00001v2"));
        assert_eq!(article.url.as_deref(), Some("http://arxiv.org/abs/2301.00001v2"));
        assert_eq!(article.journal.as_deref(), Some("arXiv preprint"));
        assert_eq!(article.citations, None);
        assert_eq!(article.scraped_at, now);
        Ok(())
    }

    #[test]
    fn test_unparseable_date_kept_raw() -> Result<()> {
        let entry = ArxivEntry {
            id: "http://arxiv.org/abs/2301.00002v1".to_string(),
            title: "T".to_string(),
            published: "sometime".to_string(),
            ..Default::default()
        };
        let article = to_article(&entry, "q", Utc::now())?;
        assert_eq!(article.date_published.as_deref(), Some("sometime"));
        assert_eq!(article.year, None);
        assert_eq!(article.pdf_url, None);
        Ok(())
    }

    #[test]
    fn test_search_url() {
        let url = search_url("machine learning", 50);
        assert!(url.contains("search_query=all:machine%20learning"));
        assert!(url.contains("max_results=50"));
        assert!(url.contains("sortBy=submittedDate"));
    }
}
