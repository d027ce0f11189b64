//! Core data models shared by the ingestion and search paths.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Store limits (in characters) for the bounded text columns.
pub const FILE_ID_MAX_CHARS: usize = 100;
pub const LANGUAGE_MAX_CHARS: usize = 50;
pub const FORMAT_MAX_CHARS: usize = 50;
pub const SOURCE_FILE_MAX_CHARS: usize = 512;

/// A normalized row ready to be appended to the catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewCatalogEntry {
    pub file_id: Option<String>,
    pub title: Option<String>,
    pub author: Option<String>,
    pub publisher: Option<String>,
    pub language: Option<String>,
    pub publish_year: Option<i64>,
    pub format: Option<String>,
    pub source_file: Option<String>,
}

/// A catalog row as stored. Rows are never updated after insertion.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CatalogEntry {
    pub id: i64,
    pub file_id: Option<String>,
    pub title: Option<String>,
    pub author: Option<String>,
    pub publisher: Option<String>,
    pub language: Option<String>,
    pub publish_year: Option<i64>,
    pub format: Option<String>,
    pub source_file: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A ledger row marking a file as fully ingested.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ProcessedFileRecord {
    pub file_path: String,
    pub file_hash: String,
    pub last_modified: i64,
    pub processed_at: i64,
}

/// One window of search results plus pagination metadata.
#[derive(Debug, Clone, Serialize)]
pub struct ResultPage {
    pub records: Vec<CatalogEntry>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
    pub total_pages: i64,
}

impl ResultPage {
    pub fn total_pages_for(total: i64, per_page: i64) -> i64 {
        if total <= 0 {
            0
        } else {
            (total + per_page - 1) / per_page
        }
    }
}

/// Aggregate result of a directory load.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct LoadSummary {
    pub attempted: u64,
    /// Already processed or duplicate content.
    pub skipped: u64,
    pub failed: u64,
    pub succeeded: u64,
    /// Catalog rows committed during this load, including rows from files
    /// that later failed mid-way.
    pub rows: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_pages_rounds_up() {
        assert_eq!(ResultPage::total_pages_for(0, 10), 0);
        assert_eq!(ResultPage::total_pages_for(1, 10), 1);
        assert_eq!(ResultPage::total_pages_for(10, 10), 1);
        assert_eq!(ResultPage::total_pages_for(11, 10), 2);
        assert_eq!(ResultPage::total_pages_for(7, 1), 7);
    }
}
