//! Query builder: [`SearchFilter`] → conjunctive SQL predicate.
//!
//! Fuzzy fields become case-insensitive substring matches, exact fields
//! become equality. Each present field contributes exactly one predicate;
//! an empty filter matches every row.

use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Sqlite};
use std::collections::BTreeMap;

use crate::field::{Field, MatchKind};
use crate::normalize::parse_year;
use crate::search::SearchError;

/// A scalar filter value as supplied by a caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Integer(i64),
    /// Integral floats ("2015.0") behave like the matching integer.
    Float(f64),
    Text(String),
}

impl From<&str> for FilterValue {
    fn from(s: &str) -> Self {
        FilterValue::Text(s.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(s: String) -> Self {
        FilterValue::Text(s)
    }
}

impl From<i64> for FilterValue {
    fn from(n: i64) -> Self {
        FilterValue::Integer(n)
    }
}

impl From<f64> for FilterValue {
    fn from(v: f64) -> Self {
        FilterValue::Float(v)
    }
}

impl FilterValue {
    fn as_text(&self) -> String {
        match self {
            FilterValue::Integer(n) => n.to_string(),
            FilterValue::Float(v) if v.fract() == 0.0 && v.abs() < 1e15 => (*v as i64).to_string(),
            FilterValue::Float(v) => v.to_string(),
            FilterValue::Text(s) => s.trim().to_string(),
        }
    }

    fn is_blank(&self) -> bool {
        matches!(self, FilterValue::Text(s) if s.trim().is_empty())
    }
}

/// Optional value per recognized field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchFilter {
    values: BTreeMap<Field, FilterValue>,
}

impl SearchFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`set`](Self::set).
    pub fn with(mut self, field: Field, value: impl Into<FilterValue>) -> Self {
        self.set(field, value);
        self
    }

    /// Sets a field. Blank text counts as "not provided" and clears it.
    pub fn set(&mut self, field: Field, value: impl Into<FilterValue>) {
        let value = value.into();
        if value.is_blank() {
            self.values.remove(&field);
        } else {
            self.values.insert(field, value);
        }
    }

    /// Builds a filter from request-style names. Unknown names are rejected.
    pub fn from_pairs<I, K>(pairs: I) -> Result<Self, SearchError>
    where
        I: IntoIterator<Item = (K, Option<FilterValue>)>,
        K: AsRef<str>,
    {
        let mut filter = Self::new();
        for (name, value) in pairs {
            let name = name.as_ref();
            let field = Field::from_request_name(name)
                .ok_or_else(|| SearchError::UnknownField(name.to_string()))?;
            if let Some(value) = value {
                filter.set(field, value);
            }
        }
        Ok(filter)
    }

    pub fn get(&self, field: Field) -> Option<&FilterValue> {
        self.values.get(&field)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Field, &FilterValue)> {
        self.values.iter().map(|(f, v)| (*f, v))
    }
}

/// A bound value in a predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlValue {
    Text(String),
    Integer(i64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    /// Case-insensitive substring containment.
    Contains { field: Field, needle: String },
    Equals { field: Field, value: SqlValue },
    /// The value can never match (e.g. a non-numeric year).
    Never { field: Field },
}

/// Conjunction of predicates, ready to append to a `SELECT ... FROM books`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    predicates: Vec<Predicate>,
}

pub fn build_query(filter: &SearchFilter) -> Query {
    let predicates = filter
        .iter()
        .map(|(field, value)| predicate_for(field, value))
        .collect();
    Query { predicates }
}

fn predicate_for(field: Field, value: &FilterValue) -> Predicate {
    match (field.match_kind(), field) {
        (MatchKind::Fuzzy, _) => Predicate::Contains {
            field,
            needle: value.as_text(),
        },
        (MatchKind::Exact, Field::PublishYear) => {
            let year = match value {
                FilterValue::Integer(n) => Some(*n),
                FilterValue::Float(v) => parse_year(&v.to_string()),
                FilterValue::Text(s) => parse_year(s),
            };
            match year {
                Some(y) => Predicate::Equals {
                    field,
                    value: SqlValue::Integer(y),
                },
                None => Predicate::Never { field },
            }
        }
        (MatchKind::Exact, _) => Predicate::Equals {
            field,
            value: SqlValue::Text(value.as_text()),
        },
    }
}

/// Escapes LIKE wildcards so user input matches literally.
fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

impl Query {
    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    pub fn matches_all(&self) -> bool {
        self.predicates.is_empty()
    }

    /// Appends ` WHERE p1 AND p2 ...` (nothing for an empty query), binding
    /// every value as a parameter.
    pub fn push_where(&self, qb: &mut QueryBuilder<'_, Sqlite>) {
        for (i, predicate) in self.predicates.iter().enumerate() {
            qb.push(if i == 0 { " WHERE " } else { " AND " });
            match predicate {
                Predicate::Contains { field, needle } => {
                    qb.push(field.column());
                    qb.push(" LIKE ");
                    qb.push_bind(format!("%{}%", escape_like(needle)));
                    qb.push(" ESCAPE '\\'");
                }
                Predicate::Equals { field, value } => {
                    qb.push(field.column());
                    qb.push(" = ");
                    match value {
                        SqlValue::Text(s) => qb.push_bind(s.clone()),
                        SqlValue::Integer(n) => qb.push_bind(*n),
                    };
                }
                Predicate::Never { .. } => {
                    qb.push("0 = 1");
                }
            }
        }
    }
}
