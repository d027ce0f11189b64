//! The fixed set of catalog fields.
//!
//! Every place that maps names to fields (spreadsheet headers, search
//! requests, SQL columns) goes through [`Field`], so an unrecognized name is
//! a lookup miss rather than a silently ignored key.

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    FileId,
    Title,
    Author,
    Publisher,
    Language,
    PublishYear,
    Format,
}

/// How a field is compared in a search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    /// Case-insensitive substring containment.
    Fuzzy,
    /// Equality.
    Exact,
}

impl Field {
    pub const ALL: [Field; 7] = [
        Field::FileId,
        Field::Title,
        Field::Author,
        Field::Publisher,
        Field::Language,
        Field::PublishYear,
        Field::Format,
    ];

    /// Column name in the `books` table; also the canonical request name.
    pub fn column(self) -> &'static str {
        match self {
            Field::FileId => "file_id",
            Field::Title => "title",
            Field::Author => "author",
            Field::Publisher => "publisher",
            Field::Language => "language",
            Field::PublishYear => "publish_year",
            Field::Format => "format",
        }
    }

    pub fn match_kind(self) -> MatchKind {
        match self {
            Field::Title | Field::Author | Field::Publisher => MatchKind::Fuzzy,
            Field::FileId | Field::Language | Field::PublishYear | Field::Format => {
                MatchKind::Exact
            }
        }
    }

    /// Resolves a search request key. `year` is accepted for `publish_year`.
    pub fn from_request_name(name: &str) -> Option<Field> {
        match name {
            "year" => Some(Field::PublishYear),
            other => Field::ALL.into_iter().find(|f| f.column() == other),
        }
    }

    /// Resolves a spreadsheet column header. Matches the canonical column
    /// names, a few English spellings, and the Chinese headers used by the
    /// catalog exports.
    pub fn from_header(header: &str) -> Option<Field> {
        let h = header.trim().trim_start_matches('\u{feff}');
        let lower = h.to_lowercase();
        let normalized = lower.replace([' ', '-'], "_");
        let field = match normalized.as_str() {
            "文件编号" | "file_id" | "fileid" | "id" => Field::FileId,
            "书名" | "title" | "book_title" | "name" => Field::Title,
            "作者" | "author" | "authors" => Field::Author,
            "出版社" | "publisher" => Field::Publisher,
            "语种" | "language" | "lang" => Field::Language,
            "出版年份" | "publish_year" | "year" | "publication_year" => Field::PublishYear,
            "文件格式" | "format" | "file_format" => Field::Format,
            _ => return None,
        };
        Some(field)
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}
