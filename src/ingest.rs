//! Per-file batch ingestion.
//!
//! A [`BatchIngestor`] owns one store connection and ingests files one at a
//! time: hash, ledger check, read, normalize, batched append, ledger record.
//! Batches commit independently, so a failure mid-file keeps every batch
//! committed before it and leaves the file unledgered for a later retry.

use sqlx::{QueryBuilder, Sqlite, SqliteConnection};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use thiserror::Error;

use crate::config::IngestConfig;
use crate::hasher;
use crate::ledger::{self, LedgerError, LedgerStatus};
use crate::models::NewCatalogEntry;
use crate::normalize::normalize;
use crate::progress::{LoadProgressEvent, LoadProgressReporter, Throttle};
use crate::reader::{ReadError, TabularReader};

/// Rows per INSERT statement inside a batch transaction, keeping bind
/// parameters well below SQLite's variable limit.
const ROWS_PER_STATEMENT: usize = 1000;

/// What happened to a file that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    Ingested {
        rows: u64,
        batches: u64,
        /// False when a concurrent writer ledgered the same path or content
        /// first. The rows written here stay.
        ledgered: bool,
    },
    /// Same path and content as a previous load.
    AlreadyProcessed,
    /// Content already ingested from another path.
    DuplicateContent { original_path: String },
}

impl FileOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            FileOutcome::Ingested { .. } => "ingested",
            FileOutcome::AlreadyProcessed => "unchanged",
            FileOutcome::DuplicateContent { .. } => "duplicate",
        }
    }

    pub fn is_skip(&self) -> bool {
        !matches!(self, FileOutcome::Ingested { .. })
    }
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("cannot hash {path}: {source}")]
    Hash {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    InputUnreadable(#[from] ReadError),

    #[error(
        "batch {failed_batch} of {total_batches} failed for {path} after {committed_rows} committed rows: {source}"
    )]
    PartialBatchFailure {
        path: String,
        failed_batch: u64,
        total_batches: u64,
        committed_rows: u64,
        #[source]
        source: sqlx::Error,
    },

    #[error("store unavailable: {0}")]
    StoreUnavailable(#[source] sqlx::Error),

    #[error("ledger error for {path}: {source}")]
    Ledger {
        path: String,
        /// Rows already committed for this file.
        committed_rows: u64,
        #[source]
        source: LedgerError,
    },

    #[error("ingestion task for {0} panicked")]
    TaskFailed(String),
}

impl IngestError {
    /// Catalog rows that were committed before the error.
    pub fn committed_rows(&self) -> u64 {
        match self {
            IngestError::PartialBatchFailure { committed_rows, .. }
            | IngestError::Ledger { committed_rows, .. } => *committed_rows,
            _ => 0,
        }
    }
}

impl From<LedgerError> for IngestError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Store(e) => IngestError::StoreUnavailable(e),
            LedgerError::DuplicateKey { ref path, .. } => {
                let path = path.clone();
                IngestError::Ledger {
                    path,
                    committed_rows: 0,
                    source: err,
                }
            }
        }
    }
}

pub struct BatchIngestor {
    conn: SqliteConnection,
    reader: Arc<TabularReader>,
    batch_size: usize,
    progress_interval: Duration,
    progress: Arc<dyn LoadProgressReporter>,
}

impl BatchIngestor {
    pub fn new(
        conn: SqliteConnection,
        reader: Arc<TabularReader>,
        settings: &IngestConfig,
        progress: Arc<dyn LoadProgressReporter>,
    ) -> Self {
        Self {
            conn,
            reader,
            batch_size: settings.batch_size.max(1),
            progress_interval: Duration::from_millis(settings.progress_interval_ms),
            progress,
        }
    }

    pub async fn close(self) {
        let _ = sqlx::Connection::close(self.conn).await;
    }

    pub async fn ingest_file(&mut self, path: &Path) -> Result<FileOutcome, IngestError> {
        let fp = fingerprint(path).await?;
        self.ingest_fingerprinted(path, &fp).await
    }

    /// Same as [`ingest_file`](Self::ingest_file) with the fingerprint
    /// already computed by the caller.
    pub async fn ingest_fingerprinted(
        &mut self,
        path: &Path,
        fp: &Fingerprint,
    ) -> Result<FileOutcome, IngestError> {
        let path_str = path.display().to_string();
        let name = display_name(path);
        let hash = fp.hash.as_str();
        let last_modified = fp.last_modified;

        let status = ledger::status(&mut self.conn, &path_str, hash, last_modified).await?;
        match status {
            LedgerStatus::Unchanged => {
                tracing::debug!(file = %path_str, "already processed, skipping");
                return Ok(FileOutcome::AlreadyProcessed);
            }
            LedgerStatus::DuplicateContent { original_path } => {
                tracing::info!(file = %path_str, original = %original_path, "duplicate content, skipping");
                return Ok(FileOutcome::DuplicateContent { original_path });
            }
            LedgerStatus::Modified { ref previous_hash } => {
                tracing::info!(file = %path_str, previous_hash = %previous_hash, "content changed since last load");
            }
            LedgerStatus::New => {}
        }

        let reader = Arc::clone(&self.reader);
        let read_path = path.to_path_buf();
        let records = tokio::task::spawn_blocking(move || reader.read(&read_path))
            .await
            .map_err(|_| IngestError::TaskFailed(path_str.clone()))??;

        let entries: Vec<NewCatalogEntry> =
            records.iter().map(|r| normalize(r, &name)).collect();
        let total_rows = entries.len() as u64;
        let total_batches = entries.chunks(self.batch_size).len() as u64;

        tracing::info!(file = %path_str, rows = total_rows, batches = total_batches, "ingesting");

        let mut throttle = Throttle::new(self.progress_interval);
        let mut committed_rows = 0u64;
        for (idx, batch) in entries.chunks(self.batch_size).enumerate() {
            if let Err(source) = write_batch(&mut self.conn, batch).await {
                tracing::error!(
                    file = %path_str,
                    batch = idx + 1,
                    committed_rows,
                    error = %source,
                    "batch write failed, abandoning rest of file"
                );
                return Err(IngestError::PartialBatchFailure {
                    path: path_str,
                    failed_batch: idx as u64 + 1,
                    total_batches,
                    committed_rows,
                    source,
                });
            }
            committed_rows += batch.len() as u64;

            if throttle.ready() || committed_rows == total_rows {
                tracing::debug!(file = %path_str, committed_rows, total_rows, "batch committed");
                self.progress.report(LoadProgressEvent::Rows {
                    file: name.clone(),
                    n: committed_rows,
                    total: total_rows,
                });
            }
        }

        let recorded = match status {
            LedgerStatus::Modified { .. } => {
                ledger::replace_path(&mut self.conn, &path_str, hash, last_modified).await
            }
            _ => ledger::record(&mut self.conn, &path_str, hash, last_modified).await,
        };
        let ledgered = match recorded {
            Ok(()) => true,
            Err(LedgerError::DuplicateKey { .. }) => {
                tracing::warn!(
                    file = %path_str,
                    "another writer ledgered this file first; keeping rows written here"
                );
                false
            }
            Err(source) => {
                return Err(IngestError::Ledger {
                    path: path_str,
                    committed_rows,
                    source,
                })
            }
        };

        tracing::info!(file = %path_str, rows = committed_rows, "file ingested");
        Ok(FileOutcome::Ingested {
            rows: committed_rows,
            batches: total_batches,
            ledgered,
        })
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

/// Content hash and modification time (unix seconds) of one input file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub hash: String,
    pub last_modified: i64,
}

/// Computes a [`Fingerprint`] off the async runtime.
pub async fn fingerprint(path: &Path) -> Result<Fingerprint, IngestError> {
    let label = path.display().to_string();
    let path = path.to_path_buf();
    let result = tokio::task::spawn_blocking(move || -> std::io::Result<Fingerprint> {
        let hash = hasher::hash_file(&path)?;
        let last_modified = std::fs::metadata(&path)?
            .modified()
            .unwrap_or(SystemTime::UNIX_EPOCH)
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64;
        Ok(Fingerprint {
            hash,
            last_modified,
        })
    })
    .await
    .map_err(|_| IngestError::TaskFailed(label.clone()))?;

    result.map_err(|source| IngestError::Hash {
        path: label,
        source,
    })
}

/// Appends one batch in a single transaction, rolled back on any error.
async fn write_batch(
    conn: &mut SqliteConnection,
    entries: &[NewCatalogEntry],
) -> Result<(), sqlx::Error> {
    let now = chrono::Utc::now().timestamp();
    let mut tx = sqlx::Connection::begin(conn).await?;

    match insert_entries(&mut tx, entries, now).await {
        Ok(()) => tx.commit().await,
        Err(e) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::warn!(error = %rollback_err, "rollback after failed batch also failed");
            }
            Err(e)
        }
    }
}

async fn insert_entries(
    conn: &mut SqliteConnection,
    entries: &[NewCatalogEntry],
    created_at: i64,
) -> Result<(), sqlx::Error> {
    for rows in entries.chunks(ROWS_PER_STATEMENT) {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "INSERT INTO books (file_id, title, author, publisher, language, publish_year, format, source_file, created_at) ",
        );
        qb.push_values(rows, |mut b, e| {
            b.push_bind(e.file_id.as_deref())
                .push_bind(e.title.as_deref())
                .push_bind(e.author.as_deref())
                .push_bind(e.publisher.as_deref())
                .push_bind(e.language.as_deref())
                .push_bind(e.publish_year)
                .push_bind(e.format.as_deref())
                .push_bind(e.source_file.as_deref())
                .push_bind(created_at);
        });
        qb.build().execute(&mut *conn).await?;
    }
    Ok(())
}
