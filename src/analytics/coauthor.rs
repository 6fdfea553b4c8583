//! Co-author network.
//!
//! Pairs are formed per article only; there is never a cross product over
//! the global author set. Per-partition pair counts are merged before the
//! final ranking.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use crate::article::Article;

/// Undirected weighted edge, `author1 < author2`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoauthorEdge {
    pub author1: String,
    pub author2: String,
    /// Distinct articles both authors appear on
    pub collaborations: u64,
}

/// Ordered author pairs of one article.
///
/// Authors are deduplicated first, so each unordered pair appears once and
/// self-pairs never appear.
pub fn article_pairs(authors: &[String]) -> Vec<(&str, &str)> {
    let distinct: Vec<&str> = authors
        .iter()
        .map(|a| a.trim())
        .filter(|a| !a.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let mut pairs = Vec::with_capacity(distinct.len() * distinct.len().saturating_sub(1) / 2);
    for (i, a) in distinct.iter().enumerate() {
        for b in &distinct[i + 1..] {
            pairs.push((*a, *b));
        }
    }
    pairs
}

/// Build the ranked edge list: collaborations descending, then `(author1, author2)`
pub fn coauthor_network(corpus: &[Article], limit: Option<usize>) -> Vec<CoauthorEdge> {
    let counts = corpus
        .par_iter()
        .fold(HashMap::<(&str, &str), u64>::new, |mut acc, article| {
            for pair in article_pairs(&article.authors) {
                *acc.entry(pair).or_insert(0) += 1;
            }
            acc
        })
        .reduce(HashMap::new, |mut left, right| {
            for (pair, n) in right {
                *left.entry(pair).or_insert(0) += n;
            }
            left
        });

    let mut edges: Vec<CoauthorEdge> = counts
        .into_iter()
        .map(|((a, b), n)| CoauthorEdge {
            author1: a.to_string(),
            author2: b.to_string(),
            collaborations: n,
        })
        .collect();

    edges.sort_by(|x, y| {
        y.collaborations
            .cmp(&x.collaborations)
            .then_with(|| x.author1.cmp(&y.author1))
            .then_with(|| x.author2.cmp(&y.author2))
    });
    if let Some(limit) = limit {
        edges.truncate(limit);
    }
    edges
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::article::Source;

    fn authored(id: &str, authors: &[&str]) -> Article {
        let mut a = Article::new(Source::Crossref, id, id);
        a.authors = authors.iter().map(|s| s.to_string()).collect();
        a
    }

    fn edge(a: &str, b: &str, n: u64) -> CoauthorEdge {
        CoauthorEdge {
            author1: a.to_string(),
            author2: b.to_string(),
            collaborations: n,
        }
    }

    #[test]
    fn test_article_pairs() {
        let authors: Vec<String> = ["z", "x", "y", "x", " "].iter().map(|s| s.to_string()).collect();
        assert_eq!(article_pairs(&authors), vec![("x", "y"), ("x", "z"), ("y", "z")]);
        assert!(article_pairs(&["solo".to_string()]).is_empty());
    }

    #[test]
    fn test_network_counts_shared_articles() {
        let corpus = vec![
            authored("1", &["Alice", "Bob"]),
            authored("2", &["Bob", "Alice", "Carol"]),
        ];
        assert_eq!(
            coauthor_network(&corpus, None),
            vec![edge("Alice", "Bob", 2), edge("Alice", "Carol", 1), edge("Bob", "Carol", 1)]
        );
    }

    #[test]
    fn test_no_reverse_edges() {
        let corpus: Vec<Article> = (0..50)
            .map(|i| {
                if i % 2 == 0 {
                    authored(&i.to_string(), &["b", "a", "c"])
                } else {
                    authored(&i.to_string(), &["c", "a"])
                }
            })
            .collect();
        let edges = coauthor_network(&corpus, None);
        for e in &edges {
            assert!(e.author1 < e.author2);
            assert!(!edges
                .iter()
                .any(|o| o.author1 == e.author2 && o.author2 == e.author1));
        }
        assert_eq!(edges[0], edge("a", "c", 50));
    }

    #[test]
    fn test_limit_applies_after_ranking() {
        let corpus = vec![
            authored("1", &["d", "e"]),
            authored("2", &["a", "b"]),
            authored("3", &["a", "b"]),
        ];
        assert_eq!(coauthor_network(&corpus, Some(1)), vec![edge("a", "b", 2)]);
    }
}
