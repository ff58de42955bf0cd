use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;

/// A single converted scalar value in a result row.
///
/// Drivers return heterogeneous representations (strings for warehouse
/// results, typed values for PostgreSQL); both normalize into this enum.
/// Decimals keep their exact textual form so no precision is lost.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Date(NaiveDate),
    Timestamp(DateTime<Utc>),
    Decimal(String),
}

impl SqlValue {
    /// True when the value is SQL NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::Str(v) => Some(v),
            SqlValue::Decimal(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SqlValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SqlValue::Float(v) => Some(*v),
            _ => None,
        }
    }
}

impl Serialize for SqlValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            SqlValue::Null => serializer.serialize_none(),
            SqlValue::Bool(v) => serializer.serialize_bool(*v),
            SqlValue::Int(v) => serializer.serialize_i64(*v),
            SqlValue::Float(v) => serializer.serialize_f64(*v),
            SqlValue::Str(v) => serializer.serialize_str(v),
            SqlValue::Date(v) => serializer.serialize_str(&v.format("%Y-%m-%d").to_string()),
            SqlValue::Timestamp(v) => serializer.serialize_str(&v.to_rfc3339()),
            SqlValue::Decimal(v) => serializer.serialize_str(v),
        }
    }
}

/// An ordered mapping from column name to converted value.
///
/// Column names are shared across all rows of a result set via `Arc` so a
/// large result does not duplicate the header per row. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<SqlValue>,
}

impl Row {
    /// Build a row. Callers must pass exactly one value per column; the
    /// conversion layer validates counts before constructing.
    pub fn new(columns: Arc<[String]>, values: Vec<SqlValue>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { columns, values }
    }

    /// Look up a value by column name.
    pub fn get(&self, name: &str) -> Option<&SqlValue> {
        let idx = self.columns.iter().position(|c| c == name)?;
        self.values.get(idx)
    }

    /// Look up a value by position.
    pub fn get_index(&self, idx: usize) -> Option<&SqlValue> {
        self.values.get(idx)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[SqlValue] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Consume the row, returning the first value if any.
    pub fn into_first_value(mut self) -> Option<SqlValue> {
        if self.values.is_empty() {
            None
        } else {
            Some(self.values.swap_remove(0))
        }
    }
}

impl Serialize for Row {
    /// Serializes as a JSON object, preserving declared column order.
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (name, value) in self.columns.iter().zip(self.values.iter()) {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_row() -> Row {
        let columns: Arc<[String]> = Arc::from(vec!["id".to_string(), "name".to_string()]);
        Row::new(
            columns,
            vec![SqlValue::Int(1), SqlValue::Str("alice".to_string())],
        )
    }

    #[test]
    fn test_get_by_name_and_index() {
        let row = sample_row();
        assert_eq!(row.get("id"), Some(&SqlValue::Int(1)));
        assert_eq!(row.get("name"), Some(&SqlValue::Str("alice".to_string())));
        assert_eq!(row.get("missing"), None);
        assert_eq!(row.get_index(0), Some(&SqlValue::Int(1)));
    }

    #[test]
    fn test_serializes_in_column_order() {
        let row = sample_row();
        let json = serde_json::to_string(&row).unwrap();
        assert_eq!(json, r#"{"id":1,"name":"alice"}"#);
    }

    #[test]
    fn test_temporal_serialization() {
        let columns: Arc<[String]> = Arc::from(vec!["d".to_string(), "n".to_string()]);
        let row = Row::new(
            columns,
            vec![
                SqlValue::Date(NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()),
                SqlValue::Decimal("12.500".to_string()),
            ],
        );
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["d"], "2024-01-15");
        assert_eq!(json["n"], "12.500");
    }

    #[test]
    fn test_into_first_value() {
        let row = sample_row();
        assert_eq!(row.into_first_value(), Some(SqlValue::Int(1)));
    }
}
