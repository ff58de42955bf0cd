// Identifier escaping for the two SQL dialects.
//
// Only identifiers (table, schema, column names) are ever escaped here, for
// DDL-like contexts where parameter binding is not available. Values always
// go through bind parameters.

use crate::api::middleware::AppError;

/// Quote a warehouse identifier with backticks.
///
/// Identifiers containing the quote character itself or a NUL byte are
/// rejected rather than rewritten, so a hostile name can never change the
/// shape of the surrounding SQL.
pub fn escape_name(name: &str) -> Result<String, AppError> {
    quote_identifier(name, '`')
}

/// Quote a fully qualified warehouse name (`catalog.schema.table`).
pub fn escape_full_name(full_name: &str) -> Result<String, AppError> {
    escape_path(full_name, 3, '`')
}

/// Quote a PostgreSQL identifier with double quotes.
pub fn escape_pg_name(name: &str) -> Result<String, AppError> {
    quote_identifier(name, '"')
}

/// Quote a fully qualified PostgreSQL name (`schema.table`).
pub fn escape_pg_full_name(full_name: &str) -> Result<String, AppError> {
    escape_path(full_name, 2, '"')
}

fn quote_identifier(name: &str, quote: char) -> Result<String, AppError> {
    if name.is_empty() {
        return Err(AppError::Escape("identifier is empty".to_string()));
    }
    if name.contains(quote) {
        return Err(AppError::Escape(format!(
            "identifier {:?} contains the quote character {:?}",
            name, quote
        )));
    }
    if name.contains('\0') {
        return Err(AppError::Escape(format!(
            "identifier {:?} contains a NUL byte",
            name
        )));
    }
    Ok(format!("{quote}{name}{quote}"))
}

fn escape_path(full_name: &str, max_parts: usize, quote: char) -> Result<String, AppError> {
    let parts: Vec<&str> = full_name.splitn(max_parts, '.').collect();
    let escaped: Result<Vec<String>, AppError> = parts
        .into_iter()
        .map(|p| quote_identifier(p, quote))
        .collect();
    Ok(escaped?.join("."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_name_plain() {
        assert_eq!(escape_name("orders").unwrap(), "`orders`");
        assert_eq!(escape_pg_name("orders").unwrap(), "\"orders\"");
    }

    #[test]
    fn test_escape_rejects_embedded_quote() {
        assert!(matches!(
            escape_name("ta`ble"),
            Err(AppError::Escape(_))
        ));
        assert!(matches!(
            escape_pg_name("o\"rders"),
            Err(AppError::Escape(_))
        ));
    }

    #[test]
    fn test_escape_rejects_nul_byte() {
        assert!(matches!(
            escape_name("bad\0name"),
            Err(AppError::Escape(_))
        ));
    }

    #[test]
    fn test_escape_rejects_empty() {
        assert!(escape_name("").is_err());
    }

    #[test]
    fn test_escape_full_name() {
        assert_eq!(
            escape_full_name("main.sales.orders").unwrap(),
            "`main`.`sales`.`orders`"
        );
        assert_eq!(
            escape_pg_full_name("public.orders").unwrap(),
            "\"public\".\"orders\""
        );
    }

    #[test]
    fn test_pg_full_name_splits_once() {
        // Only schema.table for PostgreSQL; further dots stay in the table part
        let escaped = escape_pg_full_name("public.some.table").unwrap();
        assert_eq!(escaped, "\"public\".\"some.table\"");
    }

    #[test]
    fn test_round_trip_without_quotes() {
        let original = "weird name-1$";
        let escaped = escape_name(original).unwrap();
        assert_eq!(escaped.trim_matches('`'), original);
    }
}
