use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
};
use sqlx::ConnectOptions;
use std::str::FromStr;
use std::time::Duration;

use crate::config::Config;

/// How long a writer waits on a locked database before giving up. Ingestion
/// workers contend for the single SQLite write lock, so this is generous.
const BUSY_TIMEOUT: Duration = Duration::from_secs(60);

fn connect_options(config: &Config) -> Result<SqliteConnectOptions, sqlx::Error> {
    let db_path = &config.db.path;

    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    Ok(
        SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT),
    )
}

/// Shared pool for read paths (search, stats) and coordinator bookkeeping.
pub async fn connect(config: &Config) -> Result<SqlitePool, sqlx::Error> {
    let options = connect_options(config)?;

    SqlitePoolOptions::new()
        .max_connections(config.db.max_connections)
        .connect_with(options)
        .await
}

/// A dedicated connection, owned by exactly one ingestion worker.
pub async fn open_connection(config: &Config) -> Result<SqliteConnection, sqlx::Error> {
    connect_options(config)?.connect().await
}
