//! Result typing layer.
//!
//! Wraps raw pipeline rows in a value object exposing only the columns
//! the statement actually produced. Unknown column access errors
//! immediately instead of yielding a silent null, and a small alias table
//! redirects common misnamed accesses so caller drift does not corrupt
//! data.

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use std::collections::HashMap;

/// Alias table for column access: common misnames map onto the canonical
/// column so a drifting caller gets the right data instead of an error.
static COLUMN_ALIASES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("content", "summary"),
        ("text", "summary"),
        ("body", "summary"),
        ("memory_type", "type"),
        ("kind", "type"),
        ("when", "t"),
        ("timestamp", "t"),
        ("score", "confidence"),
    ])
});

/// A decoded column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Text value.
    Text(String),
    /// Integer value.
    Integer(i64),
    /// Floating-point value.
    Float(f64),
    /// SQL NULL.
    Null,
}

impl Value {
    /// Returns `true` for SQL NULL.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

/// One row of a statement result, with strict, alias-resolving access.
#[derive(Debug, Clone)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<Value>,
}

impl Row {
    /// Builds a row from parallel column/value lists.
    #[must_use]
    pub fn new(columns: Vec<String>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    /// Looks up a column by name, applying the alias table.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] naming the valid columns when the
    /// name (after alias resolution) is not present, so field-name typos
    /// fail fast instead of silently returning null.
    pub fn get(&self, name: &str) -> Result<&Value> {
        let canonical = COLUMN_ALIASES.get(name).copied().unwrap_or(name);
        self.columns
            .iter()
            .position(|c| c == canonical)
            .and_then(|i| self.values.get(i))
            .ok_or_else(|| {
                Error::InvalidInput(format!(
                    "unknown column '{name}' (valid: {})",
                    self.columns.join(", ")
                ))
            })
    }

    /// Returns a required text column.
    pub fn text(&self, name: &str) -> Result<&str> {
        match self.get(name)? {
            Value::Text(s) => Ok(s),
            other => Err(Error::InvalidInput(format!(
                "column '{name}' is not text: {other:?}"
            ))),
        }
    }

    /// Returns an optional text column.
    pub fn opt_text(&self, name: &str) -> Result<Option<&str>> {
        match self.get(name)? {
            Value::Text(s) => Ok(Some(s)),
            Value::Null => Ok(None),
            other => Err(Error::InvalidInput(format!(
                "column '{name}' is not text: {other:?}"
            ))),
        }
    }

    /// Returns a required integer column, accepting text-encoded integers
    /// (the wire sends 64-bit integers as strings).
    pub fn integer(&self, name: &str) -> Result<i64> {
        match self.get(name)? {
            Value::Integer(i) => Ok(*i),
            Value::Text(s) => s.parse().map_err(|_| {
                Error::InvalidInput(format!("column '{name}' is not an integer: {s:?}"))
            }),
            other => Err(Error::InvalidInput(format!(
                "column '{name}' is not an integer: {other:?}"
            ))),
        }
    }

    /// Returns an optional floating-point column, accepting integers and
    /// text-encoded numbers.
    pub fn opt_float(&self, name: &str) -> Result<Option<f64>> {
        match self.get(name)? {
            #[allow(clippy::cast_precision_loss)]
            Value::Integer(i) => Ok(Some(*i as f64)),
            Value::Float(f) => Ok(Some(*f)),
            Value::Text(s) => s.parse().map(Some).map_err(|_| {
                Error::InvalidInput(format!("column '{name}' is not a number: {s:?}"))
            }),
            Value::Null => Ok(None),
        }
    }

    /// Returns a required RFC 3339 timestamp column.
    pub fn datetime(&self, name: &str) -> Result<DateTime<Utc>> {
        let raw = self.text(name)?;
        parse_datetime(name, raw)
    }

    /// Returns an optional RFC 3339 timestamp column.
    pub fn opt_datetime(&self, name: &str) -> Result<Option<DateTime<Utc>>> {
        match self.opt_text(name)? {
            Some(raw) => parse_datetime(name, raw).map(Some),
            None => Ok(None),
        }
    }
}

fn parse_datetime(name: &str, raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::InvalidInput(format!("column '{name}' is not a timestamp: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_row() -> Row {
        Row::new(
            vec![
                "id".to_string(),
                "type".to_string(),
                "summary".to_string(),
                "confidence".to_string(),
                "access_count".to_string(),
                "t".to_string(),
                "deleted_at".to_string(),
            ],
            vec![
                Value::Text("mem-1".to_string()),
                Value::Text("decision".to_string()),
                Value::Text("Use FTS".to_string()),
                Value::Float(0.8),
                Value::Text("3".to_string()),
                Value::Text("2026-08-30T12:00:00Z".to_string()),
                Value::Null,
            ],
        )
    }

    #[test]
    fn test_unknown_column_fails_fast() {
        let row = sample_row();
        let err = row.get("sumary");
        assert!(matches!(err, Err(Error::InvalidInput(_))));
        if let Err(Error::InvalidInput(msg)) = err {
            assert!(msg.contains("valid:"));
        }
    }

    #[test]
    fn test_alias_redirects_instead_of_erroring() {
        let row = sample_row();
        assert_eq!(row.text("content").ok(), Some("Use FTS"));
        assert_eq!(row.text("body").ok(), Some("Use FTS"));
        assert_eq!(row.text("memory_type").ok(), Some("decision"));
        assert_eq!(row.opt_float("score").ok().flatten(), Some(0.8));
    }

    #[test]
    fn test_integer_accepts_text_encoding() {
        let row = sample_row();
        assert_eq!(row.integer("access_count").ok(), Some(3));
    }

    #[test]
    fn test_null_handling() {
        let row = sample_row();
        assert_eq!(row.opt_datetime("deleted_at").ok().flatten(), None);
        assert!(row.text("deleted_at").is_err());
    }

    #[test]
    fn test_datetime_parsing() {
        let row = sample_row();
        let t = row.datetime("t");
        assert!(t.is_ok());
        assert!(row.datetime("summary").is_err());
    }
}
