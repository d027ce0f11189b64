//! Field-filtered catalog search with pagination.
//!
//! A search counts the matching rows first, then fetches one window ordered
//! by ascending `id` (insertion order). Callers must supply at least one
//! field; an empty request is rejected with [`SearchError::NoFilterProvided`]
//! before any SQL is built.

use anyhow::Result;
use serde::Deserialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::config::{Config, SearchConfig};
use crate::db;
use crate::migrate;
use crate::models::{CatalogEntry, ResultPage};
use crate::query::{build_query, FilterValue, SearchFilter};

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("at least one search field is required")]
    NoFilterProvided,

    #[error("unknown search field: {0}")]
    UnknownField(String),

    #[error("invalid pagination: page={page}, per_page={per_page} (both must be >= 1)")]
    InvalidPagination { page: i64, per_page: i64 },

    #[error("catalog store unavailable: {0}")]
    Store(#[from] sqlx::Error),
}

impl SearchError {
    /// True for errors caused by the request rather than the store.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, SearchError::Store(_))
    }
}

/// A search request as it arrives from the CLI or HTTP: any number of named
/// fields plus optional paging.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchRequest {
    #[serde(default)]
    pub page: Option<i64>,
    #[serde(default)]
    pub per_page: Option<i64>,
    #[serde(flatten)]
    pub fields: BTreeMap<String, Option<FilterValue>>,
}

impl SearchRequest {
    pub fn field(mut self, name: &str, value: impl Into<FilterValue>) -> Self {
        self.fields.insert(name.to_string(), Some(value.into()));
        self
    }

    /// Resolves field names and rejects requests that filter on nothing.
    pub fn filter(&self) -> Result<SearchFilter, SearchError> {
        let filter = SearchFilter::from_pairs(self.fields.iter().map(|(k, v)| (k, v.clone())))?;
        if filter.is_empty() {
            return Err(SearchError::NoFilterProvided);
        }
        Ok(filter)
    }

    /// Page defaults to 1; per_page defaults to the configured value and is
    /// capped at `max_per_page`.
    pub fn paging(&self, config: &SearchConfig) -> (i64, i64) {
        let page = self.page.unwrap_or(1);
        let per_page = self
            .per_page
            .unwrap_or(config.default_per_page)
            .min(config.max_per_page);
        (page, per_page)
    }
}

/// Validates a request, applies paging defaults and runs it.
pub async fn execute(
    pool: &SqlitePool,
    config: &SearchConfig,
    request: &SearchRequest,
) -> Result<ResultPage, SearchError> {
    let filter = request.filter()?;
    let (page, per_page) = request.paging(config);
    search(pool, &filter, page, per_page).await
}

pub async fn search(
    pool: &SqlitePool,
    filter: &SearchFilter,
    page: i64,
    per_page: i64,
) -> Result<ResultPage, SearchError> {
    if page < 1 || per_page < 1 {
        return Err(SearchError::InvalidPagination { page, per_page });
    }

    let query = build_query(filter);

    let mut count: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT COUNT(*) FROM books");
    query.push_where(&mut count);
    let total: i64 = count.build_query_scalar().fetch_one(pool).await?;

    let offset = (page - 1).saturating_mul(per_page);
    let records = if offset >= total {
        Vec::new()
    } else {
        let mut window: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT id, file_id, title, author, publisher, language, publish_year, format, source_file, created_at FROM books",
        );
        query.push_where(&mut window);
        window.push(" ORDER BY id ASC LIMIT ");
        window.push_bind(per_page);
        window.push(" OFFSET ");
        window.push_bind(offset);

        let rows = window.build().fetch_all(pool).await?;
        rows.iter().map(entry_from_row).collect::<Result<Vec<_>, _>>()?
    };

    tracing::debug!(total, page, per_page, returned = records.len(), "search");

    Ok(ResultPage {
        records,
        total,
        page,
        per_page,
        total_pages: ResultPage::total_pages_for(total, per_page),
    })
}

fn entry_from_row(row: &SqliteRow) -> Result<CatalogEntry, sqlx::Error> {
    let created_at: i64 = row.try_get("created_at")?;
    Ok(CatalogEntry {
        id: row.try_get("id")?,
        file_id: row.try_get("file_id")?,
        title: row.try_get("title")?,
        author: row.try_get("author")?,
        publisher: row.try_get("publisher")?,
        language: row.try_get("language")?,
        publish_year: row.try_get("publish_year")?,
        format: row.try_get("format")?,
        source_file: row.try_get("source_file")?,
        created_at: chrono::DateTime::from_timestamp(created_at, 0).unwrap_or_default(),
    })
}

/// CLI entry point for `bookshelf search`.
pub async fn run_search(config: &Config, request: &SearchRequest, json: bool) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate::create_schema(&pool).await?;
    let result = execute(&pool, &config.search, request).await;
    pool.close().await;
    let page = result?;

    if json {
        println!("{}", serde_json::to_string_pretty(&page)?);
        return Ok(());
    }

    if page.records.is_empty() {
        println!("No results.");
        if page.total > 0 {
            println!("(page {} of {}, {} matches)", page.page, page.total_pages, page.total);
        }
        return Ok(());
    }

    let first = (page.page - 1) * page.per_page;
    for (i, entry) in page.records.iter().enumerate() {
        println!(
            "{}. {} / {}",
            first + i as i64 + 1,
            entry.title.as_deref().unwrap_or("(untitled)"),
            entry.author.as_deref().unwrap_or("(unknown author)")
        );
        if let Some(ref publisher) = entry.publisher {
            println!("    publisher: {}", publisher);
        }
        if let Some(year) = entry.publish_year {
            println!("    year: {}", year);
        }
        if let Some(ref language) = entry.language {
            println!("    language: {}", language);
        }
        if let Some(ref format) = entry.format {
            println!("    format: {}", format);
        }
        if let Some(ref file_id) = entry.file_id {
            println!("    file id: {}", file_id);
        }
        if let Some(ref source) = entry.source_file {
            println!("    source: {}", source);
        }
        println!("    id: {}", entry.id);
        println!();
    }
    println!(
        "page {} of {} ({} matches)",
        page.page, page.total_pages, page.total
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::Field;
    use crate::load::load_directory;
    use crate::progress::NoProgress;
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn seeded(rows: &[(&str, &str, &str, i64)]) -> (TempDir, SqlitePool) {
        let tmp = TempDir::new().unwrap();
        let config = Config::minimal(tmp.path().join("shelf.sqlite"));
        let pool = db::connect(&config).await.unwrap();
        migrate::create_schema(&pool).await.unwrap();
        for (title, author, language, year) in rows {
            sqlx::query(
                "INSERT INTO books (title, author, language, publish_year, created_at) VALUES (?, ?, ?, ?, 0)",
            )
            .bind(*title)
            .bind(*author)
            .bind(*language)
            .bind(*year)
            .execute(&pool)
            .await
            .unwrap();
        }
        (tmp, pool)
    }

    fn titles(page: &ResultPage) -> Vec<&str> {
        page.records
            .iter()
            .map(|r| r.title.as_deref().unwrap_or(""))
            .collect()
    }

    #[tokio::test]
    async fn loaded_directory_is_searchable_by_author_and_year() {
        let tmp = TempDir::new().unwrap();
        let input = tmp.path().join("in");
        std::fs::create_dir(&input).unwrap();
        std::fs::write(
            input.join("books.csv"),
            "title,author,year\nGo in Action,Kennedy,2015\nRust Basics,Klabnik,2018\n",
        )
        .unwrap();
        let config = Config::minimal(tmp.path().join("shelf.sqlite"));
        load_directory(&config, &input, false, Arc::new(NoProgress))
            .await
            .unwrap();

        let pool = db::connect(&config).await.unwrap();
        let by_author = execute(
            &pool,
            &config.search,
            &SearchRequest::default().field("author", "Kennedy"),
        )
        .await
        .unwrap();
        assert_eq!(by_author.total, 1);
        assert_eq!(titles(&by_author), vec!["Go in Action"]);

        let by_year = execute(
            &pool,
            &config.search,
            &SearchRequest::default().field("year", 2018),
        )
        .await
        .unwrap();
        assert_eq!(titles(&by_year), vec!["Rust Basics"]);

        let by_language = execute(
            &pool,
            &config.search,
            &SearchRequest::default().field("language", "fr"),
        )
        .await
        .unwrap();
        assert_eq!(by_language.total, 0);
        assert!(by_language.records.is_empty());
        assert_eq!(by_language.total_pages, 0);
    }

    #[tokio::test]
    async fn pages_partition_the_matches_in_insertion_order() {
        let rows: Vec<(String, i64)> = (1..=7).map(|i| (format!("Vol {}", i), 2000 + i)).collect();
        let seed: Vec<(&str, &str, &str, i64)> = rows
            .iter()
            .map(|(t, y)| (t.as_str(), "Someone", "en", *y))
            .collect();
        let (_tmp, pool) = seeded(&seed).await;
        let filter = SearchFilter::new().with(Field::Language, "en");

        let mut seen = Vec::new();
        for page in 1..=3 {
            let result = search(&pool, &filter, page, 3).await.unwrap();
            assert_eq!(result.total, 7);
            assert_eq!(result.total_pages, 3);
            assert!(result.records.len() <= 3);
            seen.extend(result.records.iter().map(|r| r.id));
        }
        assert_eq!(seen.len(), 7);
        assert!(seen.windows(2).all(|w| w[0] < w[1]));

        let last = search(&pool, &filter, 3, 3).await.unwrap();
        assert_eq!(titles(&last), vec!["Vol 7"]);

        let beyond = search(&pool, &filter, 4, 3).await.unwrap();
        assert!(beyond.records.is_empty());
        assert_eq!(beyond.total, 7);
    }

    #[tokio::test]
    async fn filters_are_conjunctive_and_fuzzy_fields_ignore_case() {
        let (_tmp, pool) = seeded(&[
            ("The Rust Book", "Klabnik", "en", 2018),
            ("Rust für Einsteiger", "Müller", "de", 2018),
            ("Programming Rust", "Blandy", "en", 2021),
        ])
        .await;

        let filter = SearchFilter::new()
            .with(Field::Title, "rust")
            .with(Field::Language, "en")
            .with(Field::PublishYear, 2018);
        let result = search(&pool, &filter, 1, 10).await.unwrap();
        assert_eq!(titles(&result), vec!["The Rust Book"]);

        let filter = SearchFilter::new().with(Field::Title, "RUST");
        assert_eq!(search(&pool, &filter, 1, 10).await.unwrap().total, 3);
    }

    #[tokio::test]
    async fn every_exact_filter_must_match() {
        let (_tmp, pool) = seeded(&[
            ("The Rust Book", "Klabnik", "en", 2018),
            ("Rust in Action", "McNamara", "en", 2018),
            ("Rust für Einsteiger", "Müller", "de", 2018),
        ])
        .await;
        sqlx::query("UPDATE books SET format = CASE language WHEN 'en' THEN 'epub' ELSE 'pdf' END")
            .execute(&pool)
            .await
            .unwrap();

        let two = SearchFilter::new()
            .with(Field::Language, "en")
            .with(Field::PublishYear, 2018);
        let result = search(&pool, &two, 1, 10).await.unwrap();
        assert_eq!(titles(&result), vec!["The Rust Book", "Rust in Action"]);

        let pdf_only = SearchFilter::new().with(Field::Format, "pdf");
        assert_eq!(search(&pool, &pdf_only, 1, 10).await.unwrap().total, 1);

        let three = two.with(Field::Format, "pdf");
        let result = search(&pool, &three, 1, 10).await.unwrap();
        assert_eq!(result.total, 0);
        assert_eq!(result.total_pages, 0);
        assert!(result.records.is_empty());
    }

    #[tokio::test]
    async fn like_wildcards_in_values_match_literally() {
        let (_tmp, pool) = seeded(&[
            ("100% Rust", "A", "en", 2020),
            ("1000 Rust tips", "B", "en", 2020),
        ])
        .await;
        let filter = SearchFilter::new().with(Field::Title, "100%");
        let result = search(&pool, &filter, 1, 10).await.unwrap();
        assert_eq!(titles(&result), vec!["100% Rust"]);
    }

    #[tokio::test]
    async fn invalid_requests_are_rejected() {
        let (_tmp, pool) = seeded(&[]).await;
        let config = SearchConfig::default();

        let err = execute(&pool, &config, &SearchRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::NoFilterProvided));

        let blank = SearchRequest::default().field("title", "   ");
        assert!(matches!(
            execute(&pool, &config, &blank).await.unwrap_err(),
            SearchError::NoFilterProvided
        ));

        let unknown = SearchRequest::default().field("isbn", "978");
        assert!(matches!(
            execute(&pool, &config, &unknown).await.unwrap_err(),
            SearchError::UnknownField(_)
        ));

        let mut zero_page = SearchRequest::default().field("title", "x");
        zero_page.page = Some(0);
        let err = execute(&pool, &config, &zero_page).await.unwrap_err();
        assert!(matches!(err, SearchError::InvalidPagination { page: 0, .. }));
        assert!(err.is_client_error());
    }

    #[test]
    fn paging_defaults_and_cap() {
        let config = SearchConfig::default();
        let mut req = SearchRequest::default();
        assert_eq!(req.paging(&config), (1, config.default_per_page));
        req.page = Some(4);
        req.per_page = Some(10_000);
        assert_eq!(req.paging(&config), (4, config.max_per_page));
    }

    #[test]
    fn request_deserializes_fields_alongside_paging() {
        let req: SearchRequest = serde_json::from_value(serde_json::json!({
            "author": "Kennedy",
            "year": 2015,
            "title": null,
            "page": 2,
        }))
        .unwrap();
        assert_eq!(req.page, Some(2));
        assert_eq!(req.per_page, None);
        let filter = req.filter().unwrap();
        assert_eq!(filter.get(Field::Author), Some(&FilterValue::from("Kennedy")));
        assert_eq!(filter.get(Field::PublishYear), Some(&FilterValue::Integer(2015)));
        assert!(filter.get(Field::Title).is_none());
    }

    #[tokio::test]
    async fn float_year_in_request_matches_the_integer_year() {
        let (_tmp, pool) = seeded(&[
            ("Go in Action", "Kennedy", "en", 2015),
            ("Rust Basics", "Klabnik", "en", 2018),
        ])
        .await;
        let config = SearchConfig::default();

        let req: SearchRequest =
            serde_json::from_value(serde_json::json!({ "year": 2015.0 })).unwrap();
        let page = execute(&pool, &config, &req).await.unwrap();
        assert_eq!(titles(&page), vec!["Go in Action"]);

        let req: SearchRequest =
            serde_json::from_value(serde_json::json!({ "year": 2015.5 })).unwrap();
        let page = execute(&pool, &config, &req).await.unwrap();
        assert_eq!(page.total, 0);
    }
}
