//! Record normalization: raw spreadsheet cells → [`NewCatalogEntry`].

use crate::field::Field;
use crate::models::{
    NewCatalogEntry, FILE_ID_MAX_CHARS, FORMAT_MAX_CHARS, LANGUAGE_MAX_CHARS,
    SOURCE_FILE_MAX_CHARS,
};
use crate::reader::Record;

/// Cell values that spreadsheet exports use for "no value".
const NULL_MARKERS: &[&str] = &["nan", "none", "null", "nat", "<na>", "n/a", "#n/a"];

pub fn normalize(record: &Record, source_file: &str) -> NewCatalogEntry {
    let text = |field: Field| record.get(&field).and_then(|v| clean(v));

    NewCatalogEntry {
        file_id: text(Field::FileId).map(|v| truncate_chars(v, FILE_ID_MAX_CHARS)),
        title: text(Field::Title),
        author: text(Field::Author),
        publisher: text(Field::Publisher),
        language: text(Field::Language).map(|v| truncate_chars(v, LANGUAGE_MAX_CHARS)),
        publish_year: text(Field::PublishYear).and_then(|v| parse_year(&v)),
        format: text(Field::Format).map(|v| truncate_chars(v, FORMAT_MAX_CHARS)),
        source_file: clean(source_file).map(|v| truncate_chars(v, SOURCE_FILE_MAX_CHARS)),
    }
}

/// Trims and maps blank or NaN-like values to `None`.
pub fn clean(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let lower = trimmed.to_ascii_lowercase();
    if NULL_MARKERS.contains(&lower.as_str()) {
        return None;
    }
    Some(trimmed.to_string())
}

/// Keeps at most `max` characters (not bytes).
pub fn truncate_chars(value: String, max: usize) -> String {
    match value.char_indices().nth(max) {
        Some((byte_idx, _)) => value[..byte_idx].to_string(),
        None => value,
    }
}

/// Accepts integers and integral floats ("2015", "2015.0"). Anything else,
/// including out-of-range values, becomes `None`.
pub fn parse_year(raw: &str) -> Option<i64> {
    let s = raw.trim();
    if let Ok(year) = s.parse::<i64>() {
        return i32::try_from(year).ok().map(i64::from);
    }
    match s.parse::<f64>() {
        Ok(v) if v.is_finite() && v.fract() == 0.0 && v.abs() <= i32::MAX as f64 => {
            Some(v as i64)
        }
        _ => None,
    }
}
