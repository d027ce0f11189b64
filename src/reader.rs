//! Tabular reader for catalog spreadsheets.
//!
//! A file is decoded by trying an ordered list of [`DecodeStrategy`]s; the
//! first one that yields a table with at least one recognized column wins.
//! The whole read fails only when every strategy fails.
//!
//! Built-in strategies, in order:
//!
//! | Strategy | Handles |
//! |----------|---------|
//! | [`OoxmlWorkbook`] | `.xlsx` (and `.xls` files that are really OOXML) |
//! | [`BiffWorkbook`] | legacy Excel 97-2003 `.xls` |
//! | [`DelimitedText`] strict | UTF-8 CSV / TSV |
//! | [`DelimitedText`] lossy | CSV / TSV with stray invalid bytes |

use calamine::{Data, Range, Reader as _, Xls};
use std::collections::{BTreeMap, HashMap};
use std::io::{Cursor, Read};
use std::path::Path;
use thiserror::Error;

use crate::field::Field;

/// One spreadsheet row keyed by recognized field. Blank cells are absent.
pub type Record = BTreeMap<Field, String>;

/// Maximum decompressed bytes read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 256 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("not an OOXML workbook: {0}")]
    Ooxml(String),
    #[error("not a BIFF workbook: {0}")]
    Biff(String),
    #[error("invalid text encoding: {0}")]
    Encoding(String),
    #[error("malformed table: {0}")]
    Malformed(String),
    #[error("no recognized column in header {0:?}")]
    NoRecognizedColumns(Vec<String>),
}

#[derive(Debug, Error)]
pub enum ReadError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("no decoding strategy could read {path}: {}", format_attempts(.attempts))]
    Undecodable {
        path: String,
        attempts: Vec<(&'static str, DecodeError)>,
    },
}

fn format_attempts(attempts: &[(&'static str, DecodeError)]) -> String {
    attempts
        .iter()
        .map(|(name, err)| format!("{}: {}", name, err))
        .collect::<Vec<_>>()
        .join("; ")
}

/// One way of turning file bytes into records.
pub trait DecodeStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn decode(&self, bytes: &[u8]) -> Result<Vec<Record>, DecodeError>;
}

pub struct TabularReader {
    strategies: Vec<Box<dyn DecodeStrategy>>,
}

impl Default for TabularReader {
    fn default() -> Self {
        Self::new(vec![
            Box::new(OoxmlWorkbook),
            Box::new(BiffWorkbook),
            Box::new(DelimitedText::strict()),
            Box::new(DelimitedText::lossy()),
        ])
    }
}

impl TabularReader {
    pub fn new(strategies: Vec<Box<dyn DecodeStrategy>>) -> Self {
        Self { strategies }
    }

    pub fn read(&self, path: &Path) -> Result<Vec<Record>, ReadError> {
        let bytes = std::fs::read(path).map_err(|source| ReadError::Io {
            path: path.display().to_string(),
            source,
        })?;
        self.decode(&path.display().to_string(), &bytes)
    }

    pub fn decode(&self, label: &str, bytes: &[u8]) -> Result<Vec<Record>, ReadError> {
        let mut attempts = Vec::new();
        for strategy in &self.strategies {
            match strategy.decode(bytes) {
                Ok(records) => {
                    if !attempts.is_empty() {
                        tracing::debug!(
                            file = label,
                            strategy = strategy.name(),
                            "decoded after fallback"
                        );
                    }
                    return Ok(records);
                }
                Err(e) => {
                    tracing::debug!(file = label, strategy = strategy.name(), error = %e, "decode attempt failed");
                    attempts.push((strategy.name(), e));
                }
            }
        }
        Err(ReadError::Undecodable {
            path: label.to_string(),
            attempts,
        })
    }
}

/// Maps a header row plus data rows to records. Columns without a
/// recognized header are dropped; when two columns map to the same field the
/// first one wins.
fn rows_to_records(rows: Vec<Vec<Option<String>>>) -> Result<Vec<Record>, DecodeError> {
    let mut rows = rows
        .into_iter()
        .filter(|row| row.iter().any(|c| c.as_deref().is_some_and(|s| !s.trim().is_empty())));

    let header = match rows.next() {
        Some(h) => h,
        None => return Ok(Vec::new()),
    };

    let mut columns: Vec<(usize, Field)> = Vec::new();
    for (idx, cell) in header.iter().enumerate() {
        if let Some(field) = cell.as_deref().and_then(Field::from_header) {
            if !columns.iter().any(|(_, f)| *f == field) {
                columns.push((idx, field));
            }
        }
    }
    if columns.is_empty() {
        return Err(DecodeError::NoRecognizedColumns(
            header.into_iter().map(|c| c.unwrap_or_default()).collect(),
        ));
    }

    let records = rows
        .map(|row| {
            let mut record = Record::new();
            for &(idx, field) in &columns {
                if let Some(Some(value)) = row.get(idx) {
                    if !value.trim().is_empty() {
                        record.insert(field, value.clone());
                    }
                }
            }
            record
        })
        .collect();
    Ok(records)
}

// ============ OOXML workbook ============

/// Reads the first worksheet of an Office Open XML workbook.
pub struct OoxmlWorkbook;

impl DecodeStrategy for OoxmlWorkbook {
    fn name(&self) -> &'static str {
        "ooxml-workbook"
    }

    fn decode(&self, bytes: &[u8]) -> Result<Vec<Record>, DecodeError> {
        let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
            .map_err(|e| DecodeError::Ooxml(e.to_string()))?;

        let shared_strings = if archive.file_names().any(|n| n == "xl/sharedStrings.xml") {
            let xml = read_zip_entry_bounded(&mut archive, "xl/sharedStrings.xml")?;
            parse_shared_strings(&xml)?
        } else {
            Vec::new()
        };

        let sheet = first_worksheet_name(&archive)
            .ok_or_else(|| DecodeError::Ooxml("workbook has no worksheet".to_string()))?;
        let sheet_xml = read_zip_entry_bounded(&mut archive, &sheet)?;
        let rows = parse_sheet_rows(&sheet_xml, &shared_strings)?;
        rows_to_records(rows)
    }
}

fn read_zip_entry_bounded(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
) -> Result<Vec<u8>, DecodeError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| DecodeError::Ooxml(e.to_string()))?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| DecodeError::Ooxml(e.to_string()))?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(DecodeError::Ooxml(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, MAX_XML_ENTRY_BYTES
        )));
    }
    Ok(out)
}

fn first_worksheet_name(archive: &zip::ZipArchive<std::io::Cursor<&[u8]>>) -> Option<String> {
    archive
        .file_names()
        .filter(|n| n.starts_with("xl/worksheets/sheet") && n.ends_with(".xml"))
        .min_by_key(|name| {
            name.trim_start_matches("xl/worksheets/sheet")
                .trim_end_matches(".xml")
                .parse::<u32>()
                .unwrap_or(u32::MAX)
        })
        .map(|s| s.to_string())
}

/// Each `<si>` becomes one string: the concatenation of its `<t>` runs,
/// excluding phonetic hints (`<rPh>`).
fn parse_shared_strings(xml: &[u8]) -> Result<Vec<String>, DecodeError> {
    use quick_xml::events::Event;

    let mut strings = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut current: Option<String> = None;
    let mut in_t = false;
    let mut in_phonetic = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"t" => in_t = true,
                b"rPh" => in_phonetic = true,
                _ => {}
            },
            Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == b"si" {
                    strings.push(String::new());
                }
            }
            Ok(Event::Text(te)) if in_t && !in_phonetic => {
                if let Some(ref mut s) = current {
                    let text = te
                        .unescape()
                        .map_err(|e| DecodeError::Ooxml(e.to_string()))?;
                    s.push_str(&text);
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"si" => strings.push(current.take().unwrap_or_default()),
                b"t" => in_t = false,
                b"rPh" => in_phonetic = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(DecodeError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

/// Cell type from the `t` attribute of `<c>`.
#[derive(Clone, Copy, PartialEq)]
enum CellType {
    Number,
    Shared,
    Inline,
    Str,
    Bool,
    Error,
}

/// Columns in a worksheet, "A" through "XFD".
const MAX_COLUMNS: usize = 16_384;

/// Zero-based column index from an A1-style reference ("C7" → 2), or `None`
/// when the reference has no column letters. References past "XFD" are
/// rejected.
fn column_index(reference: &[u8]) -> Result<Option<usize>, DecodeError> {
    let mut idx = 0usize;
    let mut seen = false;
    for &b in reference.iter().take_while(|b| b.is_ascii_alphabetic()) {
        let digit = (b.to_ascii_uppercase() - b'A' + 1) as usize;
        idx = idx
            .checked_mul(26)
            .and_then(|v| v.checked_add(digit))
            .filter(|v| *v <= MAX_COLUMNS)
            .ok_or_else(|| {
                DecodeError::Ooxml(format!(
                    "cell reference {} is beyond column XFD",
                    String::from_utf8_lossy(reference)
                ))
            })?;
        seen = true;
    }
    Ok(seen.then(|| idx - 1))
}

/// Renders a numeric cell the way a person typed it: integral values lose
/// their fractional part ("2015.0" → "2015").
fn render_number(raw: &str) -> String {
    match raw.trim().parse::<f64>() {
        Ok(v) if v.is_finite() && v.fract() == 0.0 && v.abs() < 1e15 => format!("{}", v as i64),
        _ => raw.trim().to_string(),
    }
}

fn parse_sheet_rows(
    xml: &[u8],
    shared_strings: &[String],
) -> Result<Vec<Vec<Option<String>>>, DecodeError> {
    use quick_xml::events::Event;

    let mut rows: Vec<Vec<Option<String>>> = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();

    let mut row: Option<Vec<Option<String>>> = None;
    let mut col = 0usize;
    let mut cell_type = CellType::Number;
    let mut cell_text: Option<String> = None;
    let mut in_value = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"row" => row = Some(Vec::new()),
                b"c" => {
                    let mut reference = None;
                    cell_type = CellType::Number;
                    for attr in e.attributes().flatten() {
                        match attr.key.as_ref() {
                            b"r" => reference = column_index(&attr.value)?,
                            b"t" => {
                                cell_type = match attr.value.as_ref() {
                                    b"s" => CellType::Shared,
                                    b"inlineStr" => CellType::Inline,
                                    b"str" => CellType::Str,
                                    b"b" => CellType::Bool,
                                    b"e" => CellType::Error,
                                    _ => CellType::Number,
                                }
                            }
                            _ => {}
                        }
                    }
                    let current_len = row.as_ref().map(|r| r.len()).unwrap_or(0);
                    col = reference.unwrap_or(current_len);
                    cell_text = None;
                }
                b"v" | b"t" => in_value = true,
                _ => {}
            },
            Ok(Event::Text(te)) if in_value => {
                let text = te
                    .unescape()
                    .map_err(|e| DecodeError::Ooxml(e.to_string()))?;
                cell_text.get_or_insert_with(String::new).push_str(&text);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"c" => {
                    let value = cell_text.take().and_then(|raw| match cell_type {
                        CellType::Shared => raw
                            .trim()
                            .parse::<usize>()
                            .ok()
                            .and_then(|i| shared_strings.get(i).cloned()),
                        CellType::Number => Some(render_number(&raw)),
                        CellType::Bool => {
                            let truthy = raw.trim() == "1";
                            Some(if truthy { "TRUE" } else { "FALSE" }.to_string())
                        }
                        CellType::Error => None,
                        CellType::Inline | CellType::Str => Some(raw),
                    });
                    if let Some(ref mut r) = row {
                        if r.len() <= col {
                            r.resize(col + 1, None);
                        }
                        r[col] = value;
                    }
                }
                b"row" => {
                    if let Some(r) = row.take() {
                        rows.push(r);
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(DecodeError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(rows)
}

// ============ BIFF workbook ============

/// Reads the first worksheet of a legacy BIFF (`.xls`) workbook.
pub struct BiffWorkbook;

impl DecodeStrategy for BiffWorkbook {
    fn name(&self) -> &'static str {
        "biff-workbook"
    }

    fn decode(&self, bytes: &[u8]) -> Result<Vec<Record>, DecodeError> {
        let mut workbook: Xls<_> =
            Xls::new(Cursor::new(bytes)).map_err(|e| DecodeError::Biff(e.to_string()))?;
        let sheet = workbook
            .sheet_names()
            .into_iter()
            .next()
            .ok_or_else(|| DecodeError::Biff("workbook has no worksheet".to_string()))?;
        let range = workbook
            .worksheet_range(&sheet)
            .map_err(|e| DecodeError::Biff(e.to_string()))?;
        rows_to_records(range_rows(&range))
    }
}

fn range_rows(range: &Range<Data>) -> Vec<Vec<Option<String>>> {
    range
        .rows()
        .map(|row| row.iter().map(render_cell).collect())
        .collect()
}

fn render_cell(cell: &Data) -> Option<String> {
    match cell {
        Data::Empty | Data::Error(_) => None,
        Data::String(s) => Some(s.clone()),
        Data::Int(i) => Some(i.to_string()),
        Data::Float(f) => Some(render_number(&f.to_string())),
        Data::Bool(b) => Some(if *b { "TRUE" } else { "FALSE" }.to_string()),
        other => Some(other.to_string()),
    }
}

// ============ Delimited text ============

/// Comma-, tab- or semicolon-separated text with RFC 4180 quoting. The
/// delimiter is whichever of the three occurs most in the header line.
pub struct DelimitedText {
    lossy: bool,
}

impl DelimitedText {
    /// Rejects input that is not valid UTF-8.
    pub fn strict() -> Self {
        Self { lossy: false }
    }

    /// Replaces invalid UTF-8 sequences instead of failing.
    pub fn lossy() -> Self {
        Self { lossy: true }
    }
}

impl DecodeStrategy for DelimitedText {
    fn name(&self) -> &'static str {
        if self.lossy {
            "delimited-text-lossy"
        } else {
            "delimited-text"
        }
    }

    fn decode(&self, bytes: &[u8]) -> Result<Vec<Record>, DecodeError> {
        let text = if self.lossy {
            String::from_utf8_lossy(bytes).into_owned()
        } else {
            String::from_utf8(bytes.to_vec()).map_err(|e| DecodeError::Encoding(e.to_string()))?
        };
        if text.contains('\0') {
            return Err(DecodeError::Malformed("binary content".to_string()));
        }
        let text = text.trim_start_matches('\u{feff}');
        let delimiter = detect_delimiter(text);
        let rows = split_delimited(text, delimiter)?;
        rows_to_records(rows)
    }
}

fn detect_delimiter(text: &str) -> u8 {
    let header = text.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
    let mut counts: HashMap<u8, usize> = HashMap::new();
    for b in header.bytes() {
        if matches!(b, b',' | b'\t' | b';') {
            *counts.entry(b).or_default() += 1;
        }
    }
    [b',', b'\t', b';']
        .into_iter()
        .max_by_key(|b| (counts.get(b).copied().unwrap_or(0), *b == b','))
        .unwrap_or(b',')
}

/// Splits delimited text into rows. Rows may have differing lengths.
fn split_delimited(text: &str, delimiter: u8) -> Result<Vec<Vec<Option<String>>>, DecodeError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(text.as_bytes());

    reader
        .records()
        .map(|record| {
            record
                .map(|r| r.iter().map(|f| Some(f.to_string())).collect())
                .map_err(|e| DecodeError::Malformed(e.to_string()))
        })
        .collect()
}
