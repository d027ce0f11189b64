//! Processed-file ledger.
//!
//! The `processed_files` table is the only coordination point between
//! ingestion workers. Its two uniqueness constraints (path and content hash)
//! decide which writer "owns" a file; a losing writer sees
//! [`LedgerError::DuplicateKey`] and moves on.

use sqlx::{Row, SqliteConnection};
use thiserror::Error;

use crate::models::ProcessedFileRecord;

#[derive(Debug, Error)]
pub enum LedgerError {
    /// Another writer already ledgered this path or this content.
    #[error("ledger already has an entry for {path} or hash {hash}")]
    DuplicateKey { path: String, hash: String },

    #[error("ledger store error: {0}")]
    Store(#[from] sqlx::Error),
}

/// How a candidate file relates to what the ledger already knows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerStatus {
    /// Neither the path nor the content has been seen.
    New,
    /// Same path, same content.
    Unchanged,
    /// The content was already ingested under another path.
    DuplicateContent { original_path: String },
    /// The path was ingested before with different content.
    Modified { previous_hash: String },
}

impl LedgerStatus {
    pub fn is_processed(&self) -> bool {
        matches!(
            self,
            LedgerStatus::Unchanged | LedgerStatus::DuplicateContent { .. }
        )
    }
}

pub async fn status(
    conn: &mut SqliteConnection,
    path: &str,
    hash: &str,
    last_modified: i64,
) -> Result<LedgerStatus, LedgerError> {
    let by_path = get_by_path(conn, path).await?;

    if let Some(ref rec) = by_path {
        if rec.file_hash == hash && rec.last_modified == last_modified {
            return Ok(LedgerStatus::Unchanged);
        }
    }

    let by_hash: Option<String> =
        sqlx::query_scalar("SELECT file_path FROM processed_files WHERE file_hash = ?")
            .bind(hash)
            .fetch_optional(&mut *conn)
            .await?;

    if let Some(original_path) = by_hash {
        // Touched but byte-identical files count as unchanged.
        if original_path == path {
            return Ok(LedgerStatus::Unchanged);
        }
        return Ok(LedgerStatus::DuplicateContent { original_path });
    }

    Ok(match by_path {
        Some(rec) => LedgerStatus::Modified {
            previous_hash: rec.file_hash,
        },
        None => LedgerStatus::New,
    })
}

/// True iff the file needs no ingestion: same path and content with an
/// unchanged modification time, or the content is ledgered under any path.
pub async fn is_processed(
    conn: &mut SqliteConnection,
    path: &str,
    hash: &str,
    last_modified: i64,
) -> Result<bool, LedgerError> {
    Ok(status(conn, path, hash, last_modified).await?.is_processed())
}

pub async fn record(
    conn: &mut SqliteConnection,
    path: &str,
    hash: &str,
    last_modified: i64,
) -> Result<(), LedgerError> {
    insert(&mut *conn, path, hash, last_modified).await
}

/// Swaps the entry for `path` to new content. Used when a previously
/// ingested file changed on disk; delete and insert share one transaction.
pub async fn replace_path(
    conn: &mut SqliteConnection,
    path: &str,
    hash: &str,
    last_modified: i64,
) -> Result<(), LedgerError> {
    let mut tx = sqlx::Connection::begin(&mut *conn).await?;

    sqlx::query("DELETE FROM processed_files WHERE file_path = ?")
        .bind(path)
        .execute(&mut *tx)
        .await?;

    insert(&mut tx, path, hash, last_modified).await?;

    tx.commit().await?;
    Ok(())
}

async fn insert(
    conn: &mut SqliteConnection,
    path: &str,
    hash: &str,
    last_modified: i64,
) -> Result<(), LedgerError> {
    let now = chrono::Utc::now().timestamp();
    let result = sqlx::query(
        "INSERT INTO processed_files (file_path, file_hash, last_modified, processed_at) VALUES (?, ?, ?, ?)",
    )
    .bind(path)
    .bind(hash)
    .bind(last_modified)
    .bind(now)
    .execute(&mut *conn)
    .await;

    match result {
        Ok(_) => Ok(()),
        Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
            Err(LedgerError::DuplicateKey {
                path: path.to_string(),
                hash: hash.to_string(),
            })
        }
        Err(e) => Err(LedgerError::Store(e)),
    }
}

pub async fn get_by_path(
    conn: &mut SqliteConnection,
    path: &str,
) -> Result<Option<ProcessedFileRecord>, LedgerError> {
    let row = sqlx::query(
        "SELECT file_path, file_hash, last_modified, processed_at FROM processed_files WHERE file_path = ?",
    )
    .bind(path)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(row.map(|row| ProcessedFileRecord {
        file_path: row.get("file_path"),
        file_hash: row.get("file_hash"),
        last_modified: row.get("last_modified"),
        processed_at: row.get("processed_at"),
    }))
}

/// Truncates the ledger and the catalog together, for a forced full reload.
pub async fn clear(conn: &mut SqliteConnection) -> Result<(), LedgerError> {
    let mut tx = sqlx::Connection::begin(&mut *conn).await?;

    sqlx::query("DELETE FROM processed_files")
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM books").execute(&mut *tx).await?;
    // Restart identities so insertion order begins at 1 again.
    sqlx::query("DELETE FROM sqlite_sequence WHERE name IN ('books', 'processed_files')")
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(())
}
