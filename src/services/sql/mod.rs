// SQL backend abstraction: one backend-agnostic fetch contract over the
// warehouse statement-execution API and the Lakebase PostgreSQL instance.

pub mod convert;
pub mod escape;
pub mod lakebase;
pub mod warehouse;

pub use lakebase::{
    Credential, CredentialSource, LakebaseBackend, LakebaseConfig, PerRequestCredential,
    ServiceCredentials,
};
pub use warehouse::{StatementExecutionBackend, WarehouseConfig};

use crate::api::middleware::AppError;
use crate::models::{Row, SqlParam, SqlValue};

/// Which data store a backend talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Warehouse,
    Lakebase,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Warehouse => "warehouse",
            BackendKind::Lakebase => "lakebase",
        }
    }
}

/// Column type vocabulary for the DDL helpers, mapped per dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    BigInt,
    Text,
    Double,
    Boolean,
    Date,
    Timestamp,
    Decimal,
}

impl ColumnType {
    pub fn warehouse_type(&self) -> &'static str {
        match self {
            ColumnType::BigInt => "BIGINT",
            ColumnType::Text => "STRING",
            ColumnType::Double => "DOUBLE",
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Date => "DATE",
            ColumnType::Timestamp => "TIMESTAMP",
            ColumnType::Decimal => "DECIMAL(38,18)",
        }
    }

    pub fn pg_type(&self) -> &'static str {
        match self {
            ColumnType::BigInt => "BIGINT",
            ColumnType::Text => "TEXT",
            ColumnType::Double => "DOUBLE PRECISION",
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Date => "DATE",
            ColumnType::Timestamp => "TIMESTAMP WITH TIME ZONE",
            ColumnType::Decimal => "NUMERIC(38,18)",
        }
    }
}

/// A column definition for `create_table`.
#[derive(Debug, Clone)]
pub struct TableColumn {
    pub name: String,
    pub column_type: ColumnType,
}

impl TableColumn {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }
}

/// The stable contract shared by both backends.
///
/// Statements reference bind values with the backend's placeholder style
/// (`:p1`.. for the warehouse, `$1`.. for Lakebase); `params` supplies the
/// values in order. Identifiers interpolated by the DDL helpers go through
/// the escaping utility; values never do.
#[async_trait::async_trait]
pub trait SqlBackend: Send + Sync {
    /// Execute a query and return all result rows.
    async fn fetch(&self, sql: &str, params: &[SqlParam]) -> Result<Vec<Row>, AppError>;

    /// Execute a statement that returns no result set. Returns the number
    /// of affected rows where the store reports one, otherwise 0.
    async fn execute(&self, sql: &str, params: &[SqlParam]) -> Result<u64, AppError>;

    /// Create a table from column definitions if it does not exist.
    async fn create_table(
        &self,
        full_name: &str,
        columns: &[TableColumn],
    ) -> Result<(), AppError>;

    /// Insert rows one statement at a time with bound values.
    async fn insert_rows(
        &self,
        full_name: &str,
        columns: &[&str],
        rows: &[Vec<SqlParam>],
    ) -> Result<u64, AppError>;

    fn kind(&self) -> BackendKind;

    /// First row of the result, if any.
    async fn fetch_one(&self, sql: &str, params: &[SqlParam]) -> Result<Option<Row>, AppError> {
        let rows = self.fetch(sql, params).await?;
        Ok(rows.into_iter().next())
    }

    /// First column of the first row, if any.
    async fn fetch_value(
        &self,
        sql: &str,
        params: &[SqlParam],
    ) -> Result<Option<SqlValue>, AppError> {
        let row = self.fetch_one(sql, params).await?;
        Ok(row.and_then(Row::into_first_value))
    }
}

/// Collapse whitespace for statement logging.
pub(crate) fn normalize_sql(sql: &str) -> String {
    sql.split_whitespace().collect::<Vec<_>>().join(" ")
}
