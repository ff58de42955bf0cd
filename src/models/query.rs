use serde::{Deserialize, Serialize};

use super::row::Row;

/// A bind value for a SQL statement. Values always travel through parameter
/// binding; they are never interpolated into SQL text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlParam {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl SqlParam {
    /// SQL type name advertised to the warehouse statement API.
    pub fn type_name(&self) -> &'static str {
        match self {
            SqlParam::Null | SqlParam::Str(_) => "STRING",
            SqlParam::Bool(_) => "BOOLEAN",
            SqlParam::Int(_) => "BIGINT",
            SqlParam::Float(_) => "DOUBLE",
        }
    }

    /// String form sent as the warehouse parameter value, None for NULL.
    pub fn to_wire_value(&self) -> Option<String> {
        match self {
            SqlParam::Null => None,
            SqlParam::Bool(v) => Some(v.to_string()),
            SqlParam::Int(v) => Some(v.to_string()),
            SqlParam::Float(v) => Some(v.to_string()),
            SqlParam::Str(v) => Some(v.clone()),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct FetchRequest {
    pub statement: String,
    #[serde(default)]
    pub params: Vec<SqlParam>,
}

/// Result of a fetch, shaped for the HTTP response.
#[derive(Debug, Serialize)]
pub struct FetchResponse {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    pub row_count: usize,
    pub execution_time_ms: u64,
}

impl FetchResponse {
    pub fn new(rows: Vec<Row>, execution_time_ms: u64) -> Self {
        let columns = rows
            .first()
            .map(|r| r.columns().to_vec())
            .unwrap_or_default();
        let row_count = rows.len();
        Self {
            columns,
            rows,
            row_count,
            execution_time_ms,
        }
    }
}
