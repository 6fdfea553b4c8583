//! Read-only HTTP surface over the finished result tables.
//!
//! Handlers only load a table, filter by `year` and cut to `limit`.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error};

use crate::analytics::{
    read_table, AffiliationCount, AuthorCount, CoauthorEdge, KeywordYearCount, QuartileCount,
    SourceCount, SummaryStats, Table, WeakSignal, YearCount,
};
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct ApiState {
    output_dir: Arc<PathBuf>,
}

impl ApiState {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: Arc::new(output_dir.into()),
        }
    }
}

/// Query parameters accepted by `/api/<table>`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TableQuery {
    pub limit: Option<usize>,
    pub year: Option<i32>,
}

/// Default row cap per table; `None` returns the whole table
pub fn default_limit(table: Table) -> Option<usize> {
    match table {
        Table::TopAuthors | Table::TopAffiliations => Some(20),
        Table::CoauthorNetwork => Some(50),
        Table::KeywordsByYear => Some(100),
        _ => None,
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/health", get(health_handler))
        .route("/api/{table}", get(table_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Debug, Serialize)]
pub struct IndexResponse {
    pub message: String,
    pub endpoints: Vec<String>,
}

pub async fn index_handler() -> Json<IndexResponse> {
    Json(IndexResponse {
        message: "Scientific corpus analysis API".to_string(),
        endpoints: Table::ALL
            .iter()
            .map(|t| format!("/api/{}", t.slug()))
            .collect(),
    })
}

/// Health check endpoint
pub async fn health_handler() -> &'static str {
    "OK"
}

pub async fn table_handler(
    State(state): State<ApiState>,
    Path(slug): Path<String>,
    Query(query): Query<TableQuery>,
) -> std::result::Result<Json<Value>, (StatusCode, Json<Value>)> {
    let Some(table) = Table::from_slug(&slug) else {
        return Err((
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("Unknown table: {}", slug) })),
        ));
    };
    debug!(table = %table, limit = ?query.limit, year = ?query.year, "Table request");

    load_table(&state.output_dir, table, &query)
        .map(Json)
        .map_err(|e| {
            error!(table = %table, error = %e, "Failed to load table");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
        })
}

fn rows_json<T: Serialize>(rows: Vec<T>) -> Result<Vec<Value>> {
    rows.into_iter()
        .map(|r| serde_json::to_value(r).map_err(Into::into))
        .collect()
}

/// Load one table as JSON, applying the query filters.
///
/// Summary stats come back as a single object (empty when missing); every
/// other table is a list, empty when the table file does not exist yet.
pub fn load_table(dir: &std::path::Path, table: Table, query: &TableQuery) -> Result<Value> {
    let path = dir.join(table.file_name());

    let rows = match table {
        Table::SummaryStats => {
            let stats: Vec<SummaryStats> = read_table(&path)?;
            return Ok(match stats.into_iter().next() {
                Some(stats) => serde_json::to_value(stats)?,
                None => json!({}),
            });
        }
        Table::PublicationsByYear => rows_json(read_table::<YearCount>(&path)?)?,
        Table::TopAuthors => rows_json(read_table::<AuthorCount>(&path)?)?,
        Table::CoauthorNetwork => rows_json(read_table::<CoauthorEdge>(&path)?)?,
        Table::TopAffiliations => rows_json(read_table::<AffiliationCount>(&path)?)?,
        Table::BySource => rows_json(read_table::<SourceCount>(&path)?)?,
        Table::QuartileDistribution => rows_json(read_table::<QuartileCount>(&path)?)?,
        Table::WeakSignals => rows_json(read_table::<WeakSignal>(&path)?)?,
        Table::KeywordsByYear => {
            let mut rows: Vec<KeywordYearCount> = read_table(&path)?;
            if let Some(year) = query.year {
                rows.retain(|r| r.year == Some(year));
            }
            rows_json(rows)?
        }
    };

    let limit = query.limit.or(default_limit(table));
    let rows: Vec<Value> = match limit {
        Some(limit) => rows.into_iter().take(limit).collect(),
        None => rows,
    };
    Ok(Value::Array(rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::write_table;
    use tempfile::tempdir;

    fn write_authors(dir: &std::path::Path, n: usize) -> Result<()> {
        let rows: Vec<AuthorCount> = (0..n)
            .map(|i| AuthorCount {
                author: format!("Author {}", i),
                publications: (n - i) as u64,
            })
            .collect();
        write_table(
            &dir.join(Table::TopAuthors.file_name()),
            Table::TopAuthors.columns(),
            &rows,
        )
    }

    #[test]
    fn test_default_and_explicit_limits() -> Result<()> {
        let dir = tempdir()?;
        write_authors(dir.path(), 30)?;

        let all = load_table(dir.path(), Table::TopAuthors, &TableQuery::default())?;
        assert_eq!(all.as_array().map(Vec::len), Some(20));

        let query = TableQuery {
            limit: Some(3),
            year: None,
        };
        let few = load_table(dir.path(), Table::TopAuthors, &query)?;
        assert_eq!(few[0]["author"], "Author 0");
        assert_eq!(few.as_array().map(Vec::len), Some(3));
        Ok(())
    }

    #[test]
    fn test_keywords_year_filter() -> Result<()> {
        let dir = tempdir()?;
        let rows = vec![
            KeywordYearCount { year: Some(2023), keyword: "ml".to_string(), frequency: 4 },
            KeywordYearCount { year: Some(2022), keyword: "ml".to_string(), frequency: 2 },
            KeywordYearCount { year: None, keyword: "ai".to_string(), frequency: 1 },
        ];
        write_table(
            &dir.path().join(Table::KeywordsByYear.file_name()),
            Table::KeywordsByYear.columns(),
            &rows,
        )?;

        let query = TableQuery { limit: None, year: Some(2022) };
        let value = load_table(dir.path(), Table::KeywordsByYear, &query)?;
        assert_eq!(value, json!([{ "year": 2022, "keyword": "ml", "frequency": 2 }]));
        Ok(())
    }

    #[test]
    fn test_missing_tables() -> Result<()> {
        let dir = tempdir()?;
        assert_eq!(load_table(dir.path(), Table::WeakSignals, &TableQuery::default())?, json!([]));
        assert_eq!(load_table(dir.path(), Table::SummaryStats, &TableQuery::default())?, json!({}));
        Ok(())
    }

    #[test]
    fn test_summary_stats_is_single_object() -> Result<()> {
        let dir = tempdir()?;
        let stats = SummaryStats {
            total_articles: 10,
            unique_dois: 7,
            earliest_year: Some(2019),
            latest_year: None,
            unique_journals: 4,
        };
        write_table(
            &dir.path().join(Table::SummaryStats.file_name()),
            Table::SummaryStats.columns(),
            &[stats],
        )?;
        let value = load_table(dir.path(), Table::SummaryStats, &TableQuery::default())?;
        assert_eq!(value["total_articles"], 10);
        assert!(value["latest_year"].is_null());
        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_table_is_not_found() {
        let state = ApiState::new("/nonexistent");
        let result = table_handler(
            State(state),
            Path("lda-topics".to_string()),
            Query(TableQuery::default()),
        )
        .await;
        assert!(matches!(result, Err((StatusCode::NOT_FOUND, _))));
    }

    #[tokio::test]
    async fn test_index_lists_every_table() {
        let Json(index) = index_handler().await;
        assert_eq!(index.endpoints.len(), Table::ALL.len());
        assert!(index.endpoints.contains(&"/api/by-source".to_string()));
    }
}
