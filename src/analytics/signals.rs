//! Weak-signal detection over recent articles.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::article::Article;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeakSignal {
    pub term: String,
    /// Distinct recent articles whose title or abstract contains the term
    pub occurrences: u64,
}

/// Count, per vocabulary term, the articles from `cutoff_year` onwards that
/// mention it (case-insensitive substring of title or abstract).
///
/// Every distinct term is reported, zero counts included. Output is ranked
/// by occurrences descending; ties keep vocabulary order.
pub fn weak_signals(corpus: &[Article], terms: &[String], cutoff_year: i32) -> Vec<WeakSignal> {
    let mut seen = HashSet::new();
    let vocabulary: Vec<(&str, String)> = terms
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .map(|t| (t, t.to_lowercase()))
        .filter(|(_, needle)| seen.insert(needle.clone()))
        .collect();

    let recent: Vec<(String, String)> = corpus
        .par_iter()
        .filter(|a| a.year.is_some_and(|y| y >= cutoff_year))
        .map(|a| (a.title.to_lowercase(), a.abstract_text.to_lowercase()))
        .collect();

    let mut signals: Vec<WeakSignal> = vocabulary
        .iter()
        .map(|(term, needle)| WeakSignal {
            term: term.to_string(),
            occurrences: recent
                .par_iter()
                .filter(|(title, abstract_text)| {
                    title.contains(needle.as_str()) || abstract_text.contains(needle.as_str())
                })
                .count() as u64,
        })
        .collect();

    signals.sort_by(|a, b| b.occurrences.cmp(&a.occurrences));
    signals
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::article::Source;

    fn recent(title: &str, abstract_text: &str, year: Option<i32>) -> Article {
        let mut a = Article::new(Source::Arxiv, title, title);
        a.abstract_text = abstract_text.to_string();
        a.year = year;
        a
    }

    fn vocab(terms: &[&str]) -> Vec<String> {
        terms.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_counts_recent_articles_only() {
        let corpus = vec![
            recent("Quantum advantage", "", Some(2023)),
            recent("Notes", "A QUANTUM walk", Some(2024)),
            recent("Quantum 1999", "", Some(1999)),
            recent("Undated quantum", "", None),
        ];
        assert_eq!(
            weak_signals(&corpus, &vocab(&["quantum", "gpt"]), 2023),
            vec![
                WeakSignal { term: "quantum".to_string(), occurrences: 2 },
                WeakSignal { term: "gpt".to_string(), occurrences: 0 },
            ]
        );
    }

    #[test]
    fn test_article_counted_once_per_term() {
        let corpus = vec![recent("llm for llm", "llm llm", Some(2024))];
        let signals = weak_signals(&corpus, &vocab(&["llm"]), 2023);
        assert_eq!(signals[0].occurrences, 1);
    }

    #[test]
    fn test_ties_keep_vocabulary_order() {
        let corpus = vec![recent("edge computing", "", Some(2024))];
        let signals = weak_signals(
            &corpus,
            &vocab(&["gpt", "neuromorphic", "edge computing", "llm", "GPT"]),
            2023,
        );
        let terms: Vec<&str> = signals.iter().map(|s| s.term.as_str()).collect();
        assert_eq!(terms, vec!["edge computing", "gpt", "neuromorphic", "llm"]);
    }

    #[test]
    fn test_empty_corpus_reports_every_term() {
        let signals = weak_signals(&[], &vocab(&["a", "b"]), 2023);
        assert_eq!(signals.len(), 2);
        assert!(signals.iter().all(|s| s.occurrences == 0));
    }
}
