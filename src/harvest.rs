//! Source harvesting plumbing shared by the arXiv, PubMed and Crossref clients.
//!
//! A [`Harvester`] fetches raw records from one source and runs them through
//! that source's adapter. Records the adapter cannot map are logged and
//! skipped; only a failure of the whole source is returned as an error.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::arxiv::ArxivHarvester;
use crate::article::{Article, Source};
use crate::config::Settings;
use crate::crossref::CrossrefHarvester;
use crate::error::{CorpusError, Result};
use crate::pubmed::PubmedHarvester;

/// Canonical records produced by one source, in source order
#[derive(Debug, Clone, Default)]
pub struct SourceBatch {
    pub articles: Vec<Article>,
    /// Raw records the adapter could not map
    pub skipped: usize,
}

impl SourceBatch {
    /// Collect adapter results, logging and counting the failures
    pub fn collect(source: Source, results: impl IntoIterator<Item = Result<Article>>) -> Self {
        let mut batch = SourceBatch::default();
        batch.extend(source, results);
        batch
    }

    pub fn extend(&mut self, source: Source, results: impl IntoIterator<Item = Result<Article>>) {
        for result in results {
            match result {
                Ok(article) => self.articles.push(article),
                Err(e) => {
                    warn!(source = %source, error = %e, "Skipping unparseable record");
                    self.skipped += 1;
                }
            }
        }
    }
}

/// A producer of canonical records for one source
#[async_trait]
pub trait Harvester: Send + Sync {
    fn source(&self) -> Source;

    /// Fetch and adapt every record for this run
    async fn harvest(&self) -> Result<SourceBatch>;
}

/// Build the enabled harvesters from configuration
pub fn build_harvesters(settings: &Settings) -> Result<Vec<Arc<dyn Harvester>>> {
    let mut harvesters: Vec<Arc<dyn Harvester>> = Vec::new();
    for source in settings.enabled_sources()? {
        let harvester: Arc<dyn Harvester> = match source {
            Source::Arxiv => Arc::new(ArxivHarvester::new(settings)?),
            Source::Pubmed => Arc::new(PubmedHarvester::new(settings)?),
            Source::Crossref => Arc::new(CrossrefHarvester::new(settings)?),
        };
        harvesters.push(harvester);
    }
    Ok(harvesters)
}

/// HTTP client with a polite user agent, bounded retries and a concurrency cap
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    semaphore: Arc<Semaphore>,
    max_retries: u32,
}

impl HttpFetcher {
    pub fn new(settings: &Settings) -> Result<Self> {
        let client = Client::builder()
            .user_agent(format!(
                "scicorpus/{} (mailto:{})",
                env!("CARGO_PKG_VERSION"),
                settings.contact_email
            ))
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()
            .map_err(|e| CorpusError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            semaphore: Arc::new(Semaphore::new(settings.max_concurrent_requests.max(1))),
            max_retries: settings.max_retries,
        })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Send a request, backing off exponentially on HTTP 429 and transport errors
    pub async fn send(&self, build: impl Fn(&Client) -> RequestBuilder) -> Result<Response> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| CorpusError::Config(format!("Request limiter closed: {}", e)))?;

        let mut backoff = Duration::from_millis(500);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let last = attempt > self.max_retries;

            match build(&self.client).send().await {
                Ok(response) if response.status() == StatusCode::TOO_MANY_REQUESTS => {
                    if last {
                        return Err(CorpusError::RateLimited(backoff.as_secs()));
                    }
                    warn!(attempt = attempt, wait_ms = backoff.as_millis() as u64, "Rate limited, backing off");
                }
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    let status = response.status();
                    return Err(CorpusError::Api {
                        code: status.as_u16() as i32,
                        message: format!("{} returned {}", response.url(), status),
                    });
                }
                Err(e) => {
                    if last {
                        return Err(CorpusError::Network(e));
                    }
                    debug!(attempt = attempt, error = %e, "Request failed, retrying");
                }
            }

            // Jitter so concurrent sources do not retry in lockstep
            let jitter = Duration::from_millis(rand::random::<u64>() % 250);
            tokio::time::sleep(backoff + jitter).await;
            backoff *= 2;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_collect_skips_failures() {
        let results = vec![
            Ok(Article::new(Source::Arxiv, "1", "A")),
            Err(CorpusError::Parse("missing id".to_string())),
            Ok(Article::new(Source::Arxiv, "2", "B")),
        ];
        let batch = SourceBatch::collect(Source::Arxiv, results);
        assert_eq!(batch.articles.len(), 2);
        assert_eq!(batch.skipped, 1);
        assert_eq!(batch.articles[1].article_id, "2");
    }

    #[test]
    fn test_build_harvesters_respects_enabled_sources() -> Result<()> {
        let settings = Settings {
            sources: vec!["crossref".to_string(), "arxiv".to_string()],
            ..Settings::default()
        };
        let harvesters = build_harvesters(&settings)?;
        let sources: Vec<_> = harvesters.iter().map(|h| h.source()).collect();
        assert_eq!(sources, vec![Source::Crossref, Source::Arxiv]);
        Ok(())
    }
}
