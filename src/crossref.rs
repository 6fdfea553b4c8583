//! Crossref works API.
//!
//! Journal articles with abstracts are listed from the `/works` endpoint and
//! each JSON item is mapped to a canonical article.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, info};

use crate::article::{non_empty, Article, Source};
use crate::config::Settings;
use crate::error::{CorpusError, Result};
use crate::harvest::{Harvester, HttpFetcher, SourceBatch};

/// Crossref API base URL
const CROSSREF_API_URL: &str = "https://api.crossref.org/works";

/// Fields requested from the API
const SELECT_FIELDS: &str =
    "DOI,title,author,abstract,container-title,ISSN,published-print,published-online,publisher,subject,URL";

// === Crossref API Response Types ===

#[derive(Debug, Deserialize)]
struct CrossrefResponse {
    message: CrossrefMessage,
}

#[derive(Debug, Deserialize)]
struct CrossrefMessage {
    /// Kept raw so one malformed item does not fail the page
    #[serde(default)]
    items: Vec<serde_json::Value>,
}

/// One work item as returned by the API
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CrossrefItem {
    #[serde(rename = "DOI")]
    pub doi: Option<String>,
    #[serde(default)]
    pub title: Vec<String>,
    #[serde(default)]
    pub author: Vec<CrossrefAuthor>,
    #[serde(rename = "abstract")]
    pub abstract_text: Option<String>,
    #[serde(rename = "container-title", default)]
    pub container_title: Vec<String>,
    #[serde(rename = "ISSN", default)]
    pub issn: Vec<String>,
    #[serde(rename = "published-print")]
    pub published_print: Option<CrossrefDate>,
    #[serde(rename = "published-online")]
    pub published_online: Option<CrossrefDate>,
    pub publisher: Option<String>,
    #[serde(default)]
    pub subject: Vec<String>,
    #[serde(rename = "URL")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CrossrefAuthor {
    #[serde(default)]
    pub given: String,
    #[serde(default)]
    pub family: String,
    #[serde(default)]
    pub affiliation: Vec<CrossrefAffiliation>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CrossrefAffiliation {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CrossrefDate {
    /// `[[year, month, day]]`, trailing parts optional
    #[serde(rename = "date-parts", default)]
    pub date_parts: Vec<Vec<Option<i32>>>,
}

impl CrossrefDate {
    fn part(&self, idx: usize) -> Option<i32> {
        self.date_parts.first().and_then(|p| p.get(idx).copied().flatten())
    }
}

/// Parse a `/works` response body.
///
/// Only a broken envelope is an error; each item is decoded on its own and
/// comes back as its own `Result`.
pub fn parse_works(json: &str) -> Result<Vec<Result<CrossrefItem>>> {
    let response: CrossrefResponse = serde_json::from_str(json)?;
    Ok(response.message.items.into_iter().map(parse_item).collect())
}

/// Decode one raw work item
pub fn parse_item(value: serde_json::Value) -> Result<CrossrefItem> {
    let doi = value.get("DOI").and_then(|d| d.as_str()).map(str::to_string);
    serde_json::from_value(value).map_err(|e| {
        CorpusError::Parse(format!(
            "Malformed Crossref item {}: {}",
            doi.as_deref().unwrap_or("<no DOI>"),
            e
        ))
    })
}

/// Strip markup tags (JATS `<jats:p>` and friends) and decode character
/// entities such as `&lt;` and `&amp;`
pub fn strip_html_tags(text: &str) -> String {
    let stripped = match Regex::new(r"<[^>]+>") {
        Ok(re) => re.replace_all(text, "").to_string(),
        Err(_) => text.to_string(),
    };
    match quick_xml::escape::unescape(&stripped) {
        Ok(decoded) => decoded.into_owned(),
        // Unknown named entity; keep the text as-is
        Err(_) => stripped,
    }
}

/// Key-safe local id: the DOI with path separators replaced
pub fn article_id_from_doi(doi: &str) -> String {
    doi.trim().replace('/', "_")
}

/// Map one work item to a canonical article
pub fn to_article(item: &CrossrefItem, scraped_at: DateTime<Utc>) -> Result<Article> {
    let doi = item.doi.clone().and_then(non_empty);
    let title = item.title.first().map(|t| t.trim()).unwrap_or_default();
    if doi.is_none() && title.is_empty() {
        return Err(CorpusError::Parse("Crossref item without DOI or title".to_string()));
    }

    let article_id = doi.as_deref().map(article_id_from_doi).unwrap_or_default();
    let mut article = Article::new(Source::Crossref, article_id, title);
    article.doi = doi.map(|d| d.trim().to_string());
    article.abstract_text = item
        .abstract_text
        .as_deref()
        .map(|s| strip_html_tags(s).trim().to_string())
        .unwrap_or_default();

    for author in &item.author {
        let name = format!("{} {}", author.given.trim(), author.family.trim());
        let name = name.trim();
        if !name.is_empty() {
            article.authors.push(name.to_string());
        }
        for affiliation in &author.affiliation {
            let affiliation = affiliation.name.trim();
            if !affiliation.is_empty() && !article.affiliations.iter().any(|a| a == affiliation) {
                article.affiliations.push(affiliation.to_string());
            }
        }
    }

    article.journal = item.container_title.first().and_then(|j| non_empty(j.trim()));
    article.issn = item.issn.first().and_then(|i| non_empty(i.trim()));
    article.publisher = item.publisher.clone().and_then(non_empty);

    if let Some(date) = item.published_print.as_ref().or(item.published_online.as_ref()) {
        article.year = date.part(0);
        article.month = date.part(1).and_then(|m| u32::try_from(m).ok());
        if let (Some(year), Some(month)) = (article.year, article.month) {
            article.date_published = Some(format!("{:04}-{:02}-01", year, month));
        }
    }

    article.keywords = item.subject.clone();
    article.subjects = item.subject.clone();
    article.url = item.url.clone().and_then(non_empty);
    article.language = Some("en".to_string());
    article.scraped_at = scraped_at;
    Ok(article)
}

/// Lists recent journal articles from Crossref
pub struct CrossrefHarvester {
    http: HttpFetcher,
    rows: usize,
    from_year: i32,
}

impl CrossrefHarvester {
    pub fn new(settings: &Settings) -> Result<Self> {
        Ok(Self {
            http: HttpFetcher::new(settings)?,
            rows: settings.crossref_rows,
            from_year: settings.crossref_from_year,
        })
    }

    pub async fn fetch(&self) -> Result<Vec<Result<CrossrefItem>>> {
        let rows = self.rows.to_string();
        let filter = format!(
            "type:journal-article,has-abstract:true,from-pub-date:{}",
            self.from_year
        );
        let response = self
            .http
            .send(|c| {
                c.get(CROSSREF_API_URL).query(&[
                    ("rows", rows.as_str()),
                    ("filter", filter.as_str()),
                    ("select", SELECT_FIELDS),
                ])
            })
            .await?;

        if let Some(limit) = response.headers().get("X-Rate-Limit-Limit") {
            debug!(limit = ?limit, "Rate limit");
        }

        parse_works(&response.text().await?)
    }
}

#[async_trait]
impl Harvester for CrossrefHarvester {
    fn source(&self) -> Source {
        Source::Crossref
    }

    async fn harvest(&self) -> Result<SourceBatch> {
        let items = self.fetch().await.map_err(|e| CorpusError::SourceUnavailable {
            source_name: Source::Crossref.to_string(),
            reason: e.to_string(),
        })?;
        info!(count = items.len(), "Fetched Crossref works");

        let now = Utc::now();
        Ok(SourceBatch::collect(
            Source::Crossref,
            items
                .into_iter()
                .map(|item| item.and_then(|item| to_article(&item, now))),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WORKS: &str = r#"{
      "status": "ok",
      "message-type": "work-list",
      "message": {
        "total-results": 2,
        "items": [
          {
            "DOI": "10.1016/j.cell.2023.01.001",
            "title": ["Single-cell atlas of the human retina"],
            "author": [
              {"given": "Jane", "family": "Doe", "sequence": "first",
               "affiliation": [{"name": "Broad Institute"}]},
              {"given": "", "family": "Roe", "affiliation": [{"name": "Broad Institute"}, {"name": "MIT"}]},
              {"name": "Retina Consortium", "affiliation": []}
            ],
            "abstract": "<jats:p>We map <jats:italic>every</jats:italic> cell.</jats:p>",
            "container-title": ["Cell"],
            "ISSN": ["0092-8674", "1097-4172"],
            "published-print": {"date-parts": [[2023, 3]]},
            "published-online": {"date-parts": [[2023, 1, 20]]},
            "publisher": "Elsevier BV",
            "subject": ["General Biochemistry", "Cell Biology"],
            "URL": "https://doi.org/10.1016/j.cell.2023.01.001"
          },
          {
            "DOI": "10.5555/minimal",
            "title": [],
            "ISSN": [],
            "published-online": {"date-parts": [[2021, null]]}
          }
        ]
      }
    }"#;

    fn items(json: &str) -> Result<Vec<CrossrefItem>> {
        parse_works(json)?.into_iter().collect()
    }

    #[test]
    fn test_strip_html_tags() {
        assert_eq!(strip_html_tags("<p>Hello</p>"), "Hello");
        assert_eq!(strip_html_tags("No tags"), "No tags");
        assert_eq!(
            strip_html_tags("<jats:p>Bold <jats:bold>claim</jats:bold></jats:p>"),
            "Bold claim"
        );
        assert_eq!(
            strip_html_tags("<jats:p>p &lt; 0.05 &amp; n&#62;10</jats:p>"),
            "p < 0.05 & n>10"
        );
        assert_eq!(strip_html_tags("AT&T &nbsp;"), "AT&T &nbsp;");
    }

    #[test]
    fn test_malformed_item_is_skipped_not_fatal() -> Result<()> {
        let page = r#"{"message": {"items": [
            {"DOI": "10.1/good", "title": ["Good item"]},
            {"DOI": "10.1/bad", "title": ["Bad item"], "publisher": 123}
        ]}}"#;
        let parsed = parse_works(page)?;
        assert_eq!(parsed.len(), 2);
        assert!(matches!(parsed[1], Err(CorpusError::Parse(_))));

        let batch = SourceBatch::collect(
            Source::Crossref,
            parsed
                .into_iter()
                .map(|item| item.and_then(|item| to_article(&item, Utc::now()))),
        );
        assert_eq!(batch.articles.len(), 1);
        assert_eq!(batch.articles[0].doi.as_deref(), Some("10.1/good"));
        assert_eq!(batch.skipped, 1);
        Ok(())
    }

    #[test]
    fn test_broken_envelope_is_an_error() {
        assert!(parse_works("{\"message\": ").is_err());
    }

    #[test]
    fn test_to_article() -> Result<()> {
        let items = items(WORKS)?;
        assert_eq!(items.len(), 2);
        let article = to_article(&items[0], Utc::now())?;

        assert_eq!(article.source, Source::Crossref);
        assert_eq!(article.doi.as_deref(), Some("10.1016/j.cell.2023.01.001"));
        assert_eq!(article.article_id, "10.1016_j.cell.2023.01.001");
        assert_eq!(article.abstract_text, "We map every cell.");
        assert_eq!(article.authors, vec!["Jane Doe", "Roe"]);
        assert_eq!(article.affiliations, vec!["Broad Institute", "MIT"]);
        assert_eq!(article.journal.as_deref(), Some("Cell"));
        assert_eq!(article.issn.as_deref(), Some("0092-8674"));
        // print date wins over online date
        assert_eq!(article.year, Some(2023));
        assert_eq!(article.month, Some(3));
        assert_eq!(article.date_published.as_deref(), Some("2023-03-01"));
        assert_eq!(article.keywords, vec!["General Biochemistry", "Cell Biology"]);
        assert_eq!(article.subjects, article.keywords);
        assert_eq!(article.publisher.as_deref(), Some("Elsevier BV"));
        assert_eq!(article.language.as_deref(), Some("en"));
        Ok(())
    }

    #[test]
    fn test_sparse_item() -> Result<()> {
        let items = items(WORKS)?;
        let article = to_article(&items[1], Utc::now())?;
        assert_eq!(article.title, "");
        assert_eq!(article.issn, None);
        assert_eq!(article.journal, None);
        assert_eq!(article.year, Some(2021));
        assert_eq!(article.month, None);
        assert_eq!(article.date_published, None);
        assert!(article.authors.is_empty());
        Ok(())
    }

    #[test]
    fn test_item_without_identity_is_rejected() {
        let item = CrossrefItem::default();
        assert!(matches!(to_article(&item, Utc::now()), Err(CorpusError::Parse(_))));
    }

    #[test]
    fn test_title_only_item_has_empty_local_id() -> Result<()> {
        let item = CrossrefItem {
            title: vec!["Untracked".to_string()],
            ..Default::default()
        };
        let article = to_article(&item, Utc::now())?;
        assert_eq!(article.article_id, "");
        assert_eq!(article.doi, None);
        Ok(())
    }
}
