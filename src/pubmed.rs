//! PubMed source via NCBI E-utilities.
//!
//! `esearch` returns PMIDs for a query, `efetch` returns Medline XML for
//! batches of them. The XML is walked with a streaming reader into
//! [`PubmedArticle`] entries which the adapter maps one at a time.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::article::{non_empty, Article, Source};
use crate::config::Settings;
use crate::error::{CorpusError, Result};
use crate::harvest::{Harvester, HttpFetcher, SourceBatch};

const ESEARCH_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils/esearch.fcgi";
const EFETCH_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils/efetch.fcgi";

/// efetch ids per request
const FETCH_BATCH_SIZE: usize = 20;

/// Keeps anonymous clients under 3 requests per second
const ANONYMOUS_INTERVAL: Duration = Duration::from_millis(340);

/// Subject-heading descriptors carried into keywords
const MAX_MESH_KEYWORDS: usize = 10;

/// Keywords mirrored into subjects
const MAX_SUBJECTS: usize = 5;

const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// One `<PubmedArticle>` element, fields kept as raw text
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PubmedArticle {
    pub pmid: String,
    pub article_title: String,
    /// One entry per `<AbstractText>` section
    pub abstract_texts: Vec<String>,
    pub authors: Vec<PubmedAuthor>,
    pub journal_title: String,
    pub issn: String,
    pub article_date: Option<PubDate>,
    pub journal_pub_date: Option<PubDate>,
    pub mesh_descriptors: Vec<String>,
    pub languages: Vec<String>,
    pub article_ids: Vec<ArticleId>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PubmedAuthor {
    pub last_name: String,
    pub fore_name: String,
    pub affiliations: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PubDate {
    pub year: String,
    pub month: String,
    pub day: String,
}

/// Alternate identifier from `PubmedData/ArticleIdList`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArticleId {
    pub id_type: String,
    pub value: String,
}

/// Which field the current text node belongs to
#[derive(Debug, Clone, Copy)]
enum Slot {
    Pmid,
    Title,
    Abstract,
    LastName,
    ForeName,
    Affiliation,
    JournalTitle,
    Issn,
    ArticleDate(DatePart),
    PubDate(DatePart),
    Mesh,
    Language,
    ArticleId,
}

#[derive(Debug, Clone, Copy)]
enum DatePart {
    Year,
    Month,
    Day,
}

fn ends_with(stack: &[String], path: &[&str]) -> bool {
    stack.len() >= path.len()
        && stack[stack.len() - path.len()..]
            .iter()
            .zip(path)
            .all(|(a, b)| a == b)
}

fn date_part(name: &str) -> Option<DatePart> {
    match name {
        "Year" => Some(DatePart::Year),
        "Month" => Some(DatePart::Month),
        "Day" => Some(DatePart::Day),
        _ => None,
    }
}

fn slot_for(stack: &[String]) -> Option<Slot> {
    // Titles and abstracts may carry inline markup (<i>, <sup>)
    if stack.iter().any(|n| n == "ArticleTitle") {
        return Some(Slot::Title);
    }
    if stack.iter().any(|n| n == "AbstractText") {
        return Some(Slot::Abstract);
    }

    let leaf = stack.last()?.as_str();
    let slot = if ends_with(stack, &["MedlineCitation", "PMID"]) {
        Slot::Pmid
    } else if ends_with(stack, &["Author", "LastName"]) {
        Slot::LastName
    } else if ends_with(stack, &["Author", "ForeName"]) {
        Slot::ForeName
    } else if ends_with(stack, &["Author", "AffiliationInfo", "Affiliation"]) {
        Slot::Affiliation
    } else if ends_with(stack, &["Journal", "Title"]) {
        Slot::JournalTitle
    } else if ends_with(stack, &["Journal", "ISSN"]) {
        Slot::Issn
    } else if ends_with(stack, &["ArticleDate", leaf]) {
        Slot::ArticleDate(date_part(leaf)?)
    } else if ends_with(stack, &["JournalIssue", "PubDate", leaf]) {
        Slot::PubDate(date_part(leaf)?)
    } else if ends_with(stack, &["MeshHeading", "DescriptorName"]) {
        Slot::Mesh
    } else if ends_with(stack, &["Article", "Language"]) {
        Slot::Language
    } else if ends_with(stack, &["PubmedData", "ArticleIdList", "ArticleId"]) {
        Slot::ArticleId
    } else {
        return None;
    };
    Some(slot)
}

fn attribute(e: &BytesStart<'_>, name: &str) -> String {
    e.try_get_attribute(name)
        .ok()
        .flatten()
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
        .unwrap_or_default()
}

fn xml_error(e: impl std::fmt::Display) -> CorpusError {
    CorpusError::Xml(e.to_string())
}

/// Open the element just pushed onto `stack`
fn on_start(article: &mut PubmedArticle, stack: &[String], e: &BytesStart<'_>) {
    if ends_with(stack, &["AuthorList", "Author"]) {
        article.authors.push(PubmedAuthor::default());
    } else if ends_with(stack, &["Author", "AffiliationInfo", "Affiliation"]) {
        if let Some(author) = article.authors.last_mut() {
            author.affiliations.push(String::new());
        }
    } else if ends_with(stack, &["Abstract", "AbstractText"]) {
        article.abstract_texts.push(String::new());
    } else if ends_with(stack, &["Article", "ArticleDate"]) && article.article_date.is_none() {
        article.article_date = Some(PubDate::default());
    } else if ends_with(stack, &["JournalIssue", "PubDate"]) {
        article.journal_pub_date = Some(PubDate::default());
    } else if ends_with(stack, &["MeshHeading", "DescriptorName"]) {
        article.mesh_descriptors.push(String::new());
    } else if ends_with(stack, &["Article", "Language"]) {
        article.languages.push(String::new());
    } else if ends_with(stack, &["PubmedData", "ArticleIdList", "ArticleId"]) {
        article.article_ids.push(ArticleId {
            id_type: attribute(e, "IdType"),
            value: String::new(),
        });
    }
}

fn append(article: &mut PubmedArticle, slot: Slot, text: &str) {
    fn push(target: Option<&mut String>, text: &str) {
        if let Some(target) = target {
            target.push_str(text);
        }
    }
    fn date_field(date: &mut PubDate, part: DatePart) -> &mut String {
        match part {
            DatePart::Year => &mut date.year,
            DatePart::Month => &mut date.month,
            DatePart::Day => &mut date.day,
        }
    }

    match slot {
        Slot::Pmid => article.pmid.push_str(text),
        Slot::Title => article.article_title.push_str(text),
        Slot::Abstract => push(article.abstract_texts.last_mut(), text),
        Slot::LastName => push(article.authors.last_mut().map(|a| &mut a.last_name), text),
        Slot::ForeName => push(article.authors.last_mut().map(|a| &mut a.fore_name), text),
        Slot::Affiliation => push(
            article
                .authors
                .last_mut()
                .and_then(|a| a.affiliations.last_mut()),
            text,
        ),
        Slot::JournalTitle => article.journal_title.push_str(text),
        Slot::Issn => article.issn.push_str(text),
        Slot::ArticleDate(part) => push(article.article_date.as_mut().map(|d| date_field(d, part)), text),
        Slot::PubDate(part) => push(article.journal_pub_date.as_mut().map(|d| date_field(d, part)), text),
        Slot::Mesh => push(article.mesh_descriptors.last_mut(), text),
        Slot::Language => push(article.languages.last_mut(), text),
        Slot::ArticleId => push(article.article_ids.last_mut().map(|a| &mut a.value), text),
    }
}

/// Parse an efetch `<PubmedArticleSet>` body
pub fn parse_article_set(xml: &str) -> Result<Vec<PubmedArticle>> {
    let mut reader = Reader::from_str(xml);
    let mut stack: Vec<String> = Vec::new();
    let mut current: Option<PubmedArticle> = None;
    let mut articles = Vec::new();

    loop {
        match reader.read_event().map_err(xml_error)? {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if name == "PubmedArticle" {
                    current = Some(PubmedArticle::default());
                }
                stack.push(name);
                if let Some(article) = current.as_mut() {
                    on_start(article, &stack, &e);
                }
            }
            Event::End(e) => {
                stack.pop();
                if e.local_name().as_ref() == b"PubmedArticle" {
                    if let Some(article) = current.take() {
                        articles.push(article);
                    }
                }
            }
            Event::Text(e) => {
                if let (Some(article), Some(slot)) = (current.as_mut(), slot_for(&stack)) {
                    let text = e.unescape().map_err(xml_error)?;
                    append(article, slot, &text);
                }
            }
            Event::CData(e) => {
                if let (Some(article), Some(slot)) = (current.as_mut(), slot_for(&stack)) {
                    append(article, slot, &String::from_utf8_lossy(&e));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(articles)
}

/// PMIDs from an esearch `<eSearchResult>` body
pub fn parse_id_list(xml: &str) -> Result<Vec<String>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut stack: Vec<String> = Vec::new();
    let mut ids = Vec::new();

    loop {
        match reader.read_event().map_err(xml_error)? {
            Event::Start(e) => {
                stack.push(String::from_utf8_lossy(e.local_name().as_ref()).into_owned());
            }
            Event::End(_) => {
                stack.pop();
            }
            Event::Text(e) if ends_with(&stack, &["IdList", "Id"]) => {
                let id = e.unescape().map_err(xml_error)?;
                if !id.trim().is_empty() {
                    ids.push(id.trim().to_string());
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(ids)
}

/// Map a month token to 1..=12. Accepts three-letter names and numerals.
pub fn month_number(month: &str) -> Option<u32> {
    let month = month.trim();
    if let Some(idx) = MONTHS.iter().position(|m| m.eq_ignore_ascii_case(month)) {
        return Some(idx as u32 + 1);
    }
    month.parse::<u32>().ok().filter(|m| (1..=12).contains(m))
}

/// Map one parsed entry to a canonical article
pub fn to_article(entry: &PubmedArticle, query: &str, scraped_at: DateTime<Utc>) -> Result<Article> {
    let pmid = entry.pmid.trim();
    if pmid.is_empty() {
        return Err(CorpusError::Parse("PubMed record without PMID".to_string()));
    }

    let mut article = Article::new(Source::Pubmed, pmid, entry.article_title.trim());
    article.doi = entry
        .article_ids
        .iter()
        .find(|id| id.id_type.eq_ignore_ascii_case("doi"))
        .and_then(|id| non_empty(id.value.trim()));

    article.abstract_text = entry
        .abstract_texts
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    for author in &entry.authors {
        let last = author.last_name.trim();
        let fore = author.fore_name.trim();
        match (fore.is_empty(), last.is_empty()) {
            (false, false) => article.authors.push(format!("{} {}", fore, last)),
            (true, false) => article.authors.push(last.to_string()),
            _ => {}
        }
        for affiliation in &author.affiliations {
            let affiliation = affiliation.trim();
            if !affiliation.is_empty() && !article.affiliations.iter().any(|a| a == affiliation) {
                article.affiliations.push(affiliation.to_string());
            }
        }
    }

    article.journal = non_empty(entry.journal_title.trim());
    article.issn = non_empty(entry.issn.trim());

    let date = entry
        .article_date
        .as_ref()
        .filter(|d| !d.year.trim().is_empty())
        .or(entry.journal_pub_date.as_ref());
    if let Some(date) = date {
        article.year = date.year.trim().parse().ok();
        article.month = month_number(&date.month);
        if let (Some(year), Some(month)) = (article.year, article.month) {
            let day = date.day.trim().parse::<u32>().unwrap_or(1);
            article.date_published = Some(format!("{:04}-{:02}-{:02}", year, month, day));
        }
    }

    article.keywords = std::iter::once(query.to_string())
        .chain(
            entry
                .mesh_descriptors
                .iter()
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty())
                .take(MAX_MESH_KEYWORDS),
        )
        .collect();
    article.subjects = article.keywords.iter().take(MAX_SUBJECTS).cloned().collect();

    article.url = Some(format!("https://pubmed.ncbi.nlm.nih.gov/{}/", pmid));
    article.language = entry
        .languages
        .iter()
        .find_map(|l| non_empty(l.trim()))
        .or_else(|| Some("en".to_string()));
    article.scraped_at = scraped_at;
    Ok(article)
}

/// Harvests the configured queries from PubMed
pub struct PubmedHarvester {
    http: HttpFetcher,
    queries: Vec<String>,
    max_results: usize,
    api_key: Option<String>,
}

impl PubmedHarvester {
    pub fn new(settings: &Settings) -> Result<Self> {
        Ok(Self {
            http: HttpFetcher::new(settings)?,
            queries: settings.queries.clone(),
            max_results: settings.max_results,
            api_key: settings.ncbi_api_key.clone(),
        })
    }

    fn params(&self, extra: Vec<(&'static str, String)>) -> Vec<(&'static str, String)> {
        let mut params = vec![("db", "pubmed".to_string()), ("retmode", "xml".to_string())];
        params.extend(extra);
        if let Some(key) = &self.api_key {
            params.push(("api_key", key.clone()));
        }
        params
    }

    /// PMIDs matching `query`
    pub async fn search(&self, query: &str) -> Result<Vec<String>> {
        let params = self.params(vec![
            ("term", query.to_string()),
            ("retmax", self.max_results.to_string()),
        ]);
        let body = self
            .http
            .send(|c| c.get(ESEARCH_URL).query(&params))
            .await?
            .text()
            .await?;
        parse_id_list(&body)
    }

    /// Full records for `ids`, fetched in batches
    pub async fn fetch(&self, ids: &[String]) -> Result<Vec<PubmedArticle>> {
        let mut entries = Vec::with_capacity(ids.len());
        for (idx, chunk) in ids.chunks(FETCH_BATCH_SIZE).enumerate() {
            if idx > 0 && self.api_key.is_none() {
                tokio::time::sleep(ANONYMOUS_INTERVAL).await;
            }
            let params = self.params(vec![("id", chunk.join(","))]);
            let body = self
                .http
                .send(|c| c.get(EFETCH_URL).query(&params))
                .await?
                .text()
                .await?;
            let parsed = parse_article_set(&body)?;
            debug!(requested = chunk.len(), parsed = parsed.len(), "Fetched PubMed batch");
            entries.extend(parsed);
        }
        Ok(entries)
    }
}

#[async_trait]
impl Harvester for PubmedHarvester {
    fn source(&self) -> Source {
        Source::Pubmed
    }

    async fn harvest(&self) -> Result<SourceBatch> {
        let mut batch = SourceBatch::default();
        let mut last_error = None;

        for query in &self.queries {
            let result = match self.search(query).await {
                Ok(ids) if ids.is_empty() => {
                    warn!(query = %query, "No PubMed results");
                    continue;
                }
                Ok(ids) => self.fetch(&ids).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(entries) => {
                    info!(query = %query, count = entries.len(), "Fetched PubMed articles");
                    let now = Utc::now();
                    batch.extend(
                        Source::Pubmed,
                        entries.iter().map(|e| to_article(e, query, now)),
                    );
                }
                Err(e) => {
                    warn!(query = %query, error = %e, "PubMed query failed");
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if batch.articles.is_empty() && batch.skipped == 0 => {
                Err(CorpusError::SourceUnavailable {
                    source_name: Source::Pubmed.to_string(),
                    reason: e.to_string(),
                })
            }
            _ => Ok(batch),
        }
    }
}
