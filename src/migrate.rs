use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    create_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Creates the catalog and ledger tables. Safe to run repeatedly.
pub async fn create_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    // Catalog entries; `id` is the insertion order used for pagination.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS books (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            file_id TEXT CHECK (file_id IS NULL OR length(file_id) <= 100),
            title TEXT,
            author TEXT,
            publisher TEXT,
            language TEXT CHECK (language IS NULL OR length(language) <= 50),
            publish_year INTEGER,
            format TEXT CHECK (format IS NULL OR length(format) <= 50),
            source_file TEXT CHECK (source_file IS NULL OR length(source_file) <= 512),
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Ledger of ingested files; both keys are unique so concurrent loaders
    // resolve races at the store.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS processed_files (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            file_path TEXT NOT NULL,
            file_hash TEXT NOT NULL,
            last_modified INTEGER NOT NULL,
            processed_at INTEGER NOT NULL,
            UNIQUE(file_path),
            UNIQUE(file_hash)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_books_file_id ON books(file_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_books_language ON books(language)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_books_publish_year ON books(publish_year)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_books_source_file ON books(source_file)")
        .execute(pool)
        .await?;

    Ok(())
}
