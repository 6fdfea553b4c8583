//! Field-level cleanup applied to every canonical record before dedup.
//!
//! Normalization is pure and idempotent: running it on an already
//! normalized record returns an identical record.

use chrono::{Datelike, Utc};
use std::collections::HashSet;

use crate::article::Article;

/// Earliest publication year accepted as valid
pub const MIN_YEAR: i32 = 1900;

/// Normalization stage with a fixed upper year bound
#[derive(Debug, Clone, Copy)]
pub struct Normalizer {
    max_year: i32,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self {
            max_year: Utc::now().year() + 1,
        }
    }
}

impl Normalizer {
    /// Normalizer accepting years up to `max_year` inclusive
    pub fn with_max_year(max_year: i32) -> Self {
        Self { max_year }
    }

    pub fn max_year(&self) -> i32 {
        self.max_year
    }

    /// Clean one record.
    ///
    /// Out-of-range `year`/`month` values are nulled, and `date_published`
    /// goes with a nulled year; the record itself is never rejected.
    pub fn normalize(&self, mut article: Article) -> Article {
        article.title = collapse_whitespace(&article.title);
        article.abstract_text = collapse_whitespace(&article.abstract_text);

        article.authors = dedup_preserving_order(
            article.authors.iter().map(|a| collapse_whitespace(a)),
        );
        article.affiliations = dedup_preserving_order(
            article.affiliations.iter().map(|a| collapse_whitespace(a)),
        );
        article.keywords = dedup_preserving_order(
            article.keywords.iter().map(|k| k.trim().to_lowercase()),
        );

        let had_year = article.year.is_some();
        article.year = article
            .year
            .filter(|y| (MIN_YEAR..=self.max_year).contains(y));
        if had_year && article.year.is_none() {
            article.date_published = None;
        }
        article.month = article.month.filter(|m| (1..=12).contains(m));

        article
    }
}

/// Collapse internal whitespace runs to single spaces and trim both ends
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Whitespace-collapsed title used as the weakest identity signal.
/// Case is significant: "ATP" and "atp" are different titles.
pub fn title_key(title: &str) -> String {
    collapse_whitespace(title)
}

fn dedup_preserving_order(values: impl Iterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    values
        .filter(|v| !v.is_empty())
        .filter(|v| seen.insert(v.clone()))
        .collect()
}
