// Row/type conversion layer.
//
// Warehouse results arrive as arrays of strings tagged with SQL type names;
// PostgreSQL results arrive as typed driver rows. Both normalize into the
// crate's `Row` representation. Conversion is best-effort: a value that does
// not parse as its declared type is kept as its raw string. The only hard
// failure is a column-count/value-count mismatch.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use tokio_postgres::types::Type;

use crate::api::middleware::AppError;
use crate::models::{Row, SqlValue};

/// Strip a parameterized suffix: `DECIMAL(10,2)` -> `DECIMAL`.
fn base_type(type_name: &str) -> String {
    type_name
        .split('(')
        .next()
        .unwrap_or(type_name)
        .trim()
        .to_ascii_uppercase()
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    None
}

fn is_decimal_literal(raw: &str) -> bool {
    let digits = raw.strip_prefix(['+', '-']).unwrap_or(raw);
    if digits.is_empty() {
        return false;
    }
    let mut dots = 0usize;
    let mut has_digit = false;
    for c in digits.chars() {
        match c {
            '.' => dots += 1,
            '0'..='9' => has_digit = true,
            _ => return false,
        }
    }
    has_digit && dots <= 1
}

/// Convert one raw warehouse value according to its declared SQL type.
pub fn convert_value(raw: Option<String>, type_name: &str) -> SqlValue {
    let Some(raw) = raw else {
        return SqlValue::Null;
    };

    match base_type(type_name).as_str() {
        "TINYINT" | "SMALLINT" | "INT" | "BIGINT" | "LONG" => raw
            .parse::<i64>()
            .map(SqlValue::Int)
            .unwrap_or(SqlValue::Str(raw)),
        "FLOAT" | "DOUBLE" | "REAL" => raw
            .parse::<f64>()
            .map(SqlValue::Float)
            .unwrap_or(SqlValue::Str(raw)),
        "BOOLEAN" => {
            if raw.eq_ignore_ascii_case("true") {
                SqlValue::Bool(true)
            } else if raw.eq_ignore_ascii_case("false") {
                SqlValue::Bool(false)
            } else {
                SqlValue::Str(raw)
            }
        }
        "DECIMAL" | "NUMERIC" => {
            if is_decimal_literal(&raw) {
                SqlValue::Decimal(raw)
            } else {
                SqlValue::Str(raw)
            }
        }
        "DATE" => NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
            .map(SqlValue::Date)
            .unwrap_or(SqlValue::Str(raw)),
        "TIMESTAMP" | "TIMESTAMP_NTZ" => parse_timestamp(&raw)
            .map(SqlValue::Timestamp)
            .unwrap_or(SqlValue::Str(raw)),
        _ => SqlValue::Str(raw),
    }
}

/// Convert a chunk of warehouse rows.
///
/// `columns` is the declared result schema as `(name, type_name)` pairs;
/// every raw row must carry exactly one value per column.
pub fn convert_warehouse_rows(
    columns: &[(String, String)],
    data: Vec<Vec<Option<String>>>,
) -> Result<Vec<Row>, AppError> {
    let names: Arc<[String]> = columns.iter().map(|(name, _)| name.clone()).collect();

    let mut rows = Vec::with_capacity(data.len());
    for raw_row in data {
        if raw_row.len() != columns.len() {
            return Err(AppError::Conversion(format!(
                "row has {} values for {} declared columns",
                raw_row.len(),
                columns.len()
            )));
        }
        let values = raw_row
            .into_iter()
            .zip(columns.iter())
            .map(|(raw, (_, type_name))| convert_value(raw, type_name))
            .collect();
        rows.push(Row::new(names.clone(), values));
    }
    Ok(rows)
}

fn pg_value(row: &tokio_postgres::Row, idx: usize, col_type: &Type) -> SqlValue {
    fn opt<T, F>(got: Result<Option<T>, tokio_postgres::Error>, wrap: F, col_type: &Type) -> SqlValue
    where
        F: FnOnce(T) -> SqlValue,
    {
        match got {
            Ok(Some(v)) => wrap(v),
            Ok(None) => SqlValue::Null,
            Err(_) => SqlValue::Str(format!("<{}>", col_type.name())),
        }
    }

    match *col_type {
        Type::BOOL => opt(row.try_get::<_, Option<bool>>(idx), SqlValue::Bool, col_type),
        Type::INT2 => opt(
            row.try_get::<_, Option<i16>>(idx),
            |v| SqlValue::Int(i64::from(v)),
            col_type,
        ),
        Type::INT4 => opt(
            row.try_get::<_, Option<i32>>(idx),
            |v| SqlValue::Int(i64::from(v)),
            col_type,
        ),
        Type::INT8 => opt(row.try_get::<_, Option<i64>>(idx), SqlValue::Int, col_type),
        Type::FLOAT4 => opt(
            row.try_get::<_, Option<f32>>(idx),
            |v| SqlValue::Float(f64::from(v)),
            col_type,
        ),
        Type::FLOAT8 => opt(row.try_get::<_, Option<f64>>(idx), SqlValue::Float, col_type),
        Type::DATE => opt(
            row.try_get::<_, Option<NaiveDate>>(idx),
            SqlValue::Date,
            col_type,
        ),
        Type::TIMESTAMP => opt(
            row.try_get::<_, Option<NaiveDateTime>>(idx),
            |v| SqlValue::Timestamp(v.and_utc()),
            col_type,
        ),
        Type::TIMESTAMPTZ => opt(
            row.try_get::<_, Option<DateTime<Utc>>>(idx),
            SqlValue::Timestamp,
            col_type,
        ),
        _ => {
            // TEXT, VARCHAR, UUID, JSON and anything else: best-effort string,
            // with a type-name placeholder when the driver cannot give one.
            match row.try_get::<_, Option<String>>(idx) {
                Ok(Some(v)) => SqlValue::Str(v),
                Ok(None) => SqlValue::Null,
                Err(_) => SqlValue::Str(format!("<{}>", col_type.name())),
            }
        }
    }
}

/// Convert PostgreSQL driver rows into the uniform representation.
pub fn convert_pg_rows(pg_rows: &[tokio_postgres::Row]) -> Vec<Row> {
    let Some(first) = pg_rows.first() else {
        return Vec::new();
    };
    let names: Arc<[String]> = first
        .columns()
        .iter()
        .map(|c| c.name().to_string())
        .collect();

    pg_rows
        .iter()
        .map(|row| {
            let values = row
                .columns()
                .iter()
                .enumerate()
                .map(|(idx, col)| pg_value(row, idx, col.type_()))
                .collect();
            Row::new(names.clone(), values)
        })
        .collect()
}
