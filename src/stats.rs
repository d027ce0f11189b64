//! Catalog statistics.
//!
//! A quick summary of what has been loaded: row and ledger counts plus a
//! per-source-file breakdown. Used by `bookshelf stats` to confirm that a
//! load did what was expected.

use anyhow::Result;
use serde::Serialize;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;
use crate::migrate;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SourceStats {
    pub source: String,
    pub rows: i64,
    /// Last time the file was ledgered, if it was.
    pub processed_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CatalogStats {
    pub books: i64,
    pub processed_files: i64,
    pub sources: Vec<SourceStats>,
}

pub async fn collect_stats(pool: &SqlitePool) -> Result<CatalogStats, sqlx::Error> {
    let books: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM books")
        .fetch_one(pool)
        .await?;
    let processed_files: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM processed_files")
        .fetch_one(pool)
        .await?;

    // source_file holds the file name; the ledger keys on the full path.
    let rows = sqlx::query(
        r#"
        SELECT
            COALESCE(b.source_file, '(unknown)') AS source,
            COUNT(*) AS row_count,
            (SELECT MAX(p.processed_at) FROM processed_files p
             WHERE b.source_file IS NOT NULL
               AND (p.file_path = b.source_file
                    OR substr(p.file_path, -length(b.source_file) - 1)
                       IN ('/' || b.source_file, '\' || b.source_file))) AS processed_at
        FROM books b
        GROUP BY b.source_file
        ORDER BY row_count DESC, source ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    let sources = rows
        .iter()
        .map(|row| SourceStats {
            source: row.get("source"),
            rows: row.get("row_count"),
            processed_at: row.get("processed_at"),
        })
        .collect();

    Ok(CatalogStats {
        books,
        processed_files,
        sources,
    })
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate::create_schema(&pool).await?;
    let stats = collect_stats(&pool).await?;
    pool.close().await;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Bookshelf Catalog Stats");
    println!("=======================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Books:       {}", stats.books);
    println!("  Files:       {}", stats.processed_files);

    if !stats.sources.is_empty() {
        println!();
        println!("  By source file:");
        println!("  {:<40} {:>8}   {}", "SOURCE", "ROWS", "LOADED");
        println!("  {}", "-".repeat(68));
        for s in &stats.sources {
            let loaded = match s.processed_at {
                Some(ts) => format_ts_relative(ts),
                None => "incomplete".to_string(),
            };
            println!("  {:<40} {:>8}   {}", s.source, s.rows, loaded);
        }
    }

    println!();
    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;

    if delta < 0 {
        format_ts_iso(ts)
    } else if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load::load_directory;
    use crate::progress::NoProgress;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn counts_rows_per_source_file() {
        let tmp = TempDir::new().unwrap();
        let input = tmp.path().join("in");
        std::fs::create_dir(&input).unwrap();
        std::fs::write(input.join("a.csv"), "title\nOne\nTwo\nThree\n").unwrap();
        std::fs::write(input.join("b.csv"), "title\nFour\n").unwrap();

        let config = Config::minimal(tmp.path().join("shelf.sqlite"));
        load_directory(&config, &input, false, Arc::new(NoProgress))
            .await
            .unwrap();

        let pool = db::connect(&config).await.unwrap();
        let stats = collect_stats(&pool).await.unwrap();
        assert_eq!(stats.books, 4);
        assert_eq!(stats.processed_files, 2);
        assert_eq!(stats.sources.len(), 2);
        assert_eq!(stats.sources[0].source, "a.csv");
        assert_eq!(stats.sources[0].rows, 3);
        assert!(stats.sources[0].processed_at.is_some());
        assert_eq!(stats.sources[1].source, "b.csv");
    }

    #[test]
    fn byte_sizes_are_humanized() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }
}
