// Warehouse backend using the statement execution API.
//
// Statements are submitted for asynchronous execution and polled until they
// reach a terminal state; results arrive inline as JSON arrays of strings,
// possibly split across chunks.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::api::middleware::AppError;
use crate::models::{Row, SqlParam};
use crate::services::platform::PlatformClient;
use crate::services::sql::convert::convert_warehouse_rows;
use crate::services::sql::escape::{escape_full_name, escape_name};
use crate::services::sql::{normalize_sql, BackendKind, SqlBackend, TableColumn};

const STATEMENTS_PATH: &str = "/api/2.0/sql/statements";
/// Longest server-side wait the submit call may request.
const MAX_SERVER_WAIT_SECS: u64 = 50;

#[derive(Debug, Clone)]
pub struct WarehouseConfig {
    pub warehouse_id: String,
    /// Maximum total wait for a statement to reach a terminal state.
    pub timeout: Duration,
    /// Fixed interval between status polls.
    pub poll_interval: Duration,
}

impl WarehouseConfig {
    pub fn new(warehouse_id: impl Into<String>) -> Self {
        Self {
            warehouse_id: warehouse_id.into(),
            timeout: Duration::from_secs(600),
            poll_interval: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Serialize)]
struct StatementParameter {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<String>,
    r#type: &'static str,
}

#[derive(Debug, Serialize)]
struct ExecuteStatementRequest<'a> {
    statement: &'a str,
    warehouse_id: &'a str,
    format: &'static str,
    disposition: &'static str,
    wait_timeout: String,
    on_wait_timeout: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    parameters: Vec<StatementParameter>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
enum StatementState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Canceled,
    Closed,
}

#[derive(Debug, Deserialize)]
struct StatementError {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatementStatus {
    state: StatementState,
    #[serde(default)]
    error: Option<StatementError>,
}

#[derive(Debug, Deserialize)]
struct ColumnSchema {
    name: String,
    #[serde(default)]
    type_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResultSchema {
    #[serde(default)]
    columns: Vec<ColumnSchema>,
}

#[derive(Debug, Deserialize)]
struct ResultManifest {
    #[serde(default)]
    schema: Option<ResultSchema>,
}

#[derive(Debug, Deserialize)]
struct ResultChunk {
    #[serde(default)]
    data_array: Vec<Vec<Option<String>>>,
    #[serde(default)]
    next_chunk_index: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct StatementResponse {
    #[serde(default)]
    statement_id: Option<String>,
    #[serde(default)]
    status: Option<StatementStatus>,
    #[serde(default)]
    manifest: Option<ResultManifest>,
    #[serde(default)]
    result: Option<ResultChunk>,
}

pub struct StatementExecutionBackend {
    client: Arc<PlatformClient>,
    config: WarehouseConfig,
}

impl StatementExecutionBackend {
    pub fn new(client: Arc<PlatformClient>, config: WarehouseConfig) -> Self {
        Self { client, config }
    }

    fn build_request<'a>(&'a self, sql: &'a str, params: &[SqlParam]) -> ExecuteStatementRequest<'a> {
        let parameters = params
            .iter()
            .enumerate()
            .map(|(i, p)| StatementParameter {
                name: format!("p{}", i + 1),
                value: p.to_wire_value(),
                r#type: p.type_name(),
            })
            .collect();

        ExecuteStatementRequest {
            statement: sql,
            warehouse_id: &self.config.warehouse_id,
            format: "JSON_ARRAY",
            disposition: "INLINE",
            wait_timeout: format!(
                "{}s",
                self.config.timeout.as_secs().min(MAX_SERVER_WAIT_SECS)
            ),
            on_wait_timeout: "CONTINUE",
            parameters,
        }
    }

    async fn cancel_statement(&self, statement_id: &str) {
        let path = format!("{}/{}/cancel", STATEMENTS_PATH, statement_id);
        if let Err(e) = self.client.post_no_content(&path).await {
            tracing::debug!("best-effort cancel of {} failed: {}", statement_id, e);
        }
    }

    /// Submit a statement and poll until it reaches a terminal state.
    async fn run_statement(
        &self,
        sql: &str,
        params: &[SqlParam],
    ) -> Result<StatementResponse, AppError> {
        tracing::debug!("executing: {:.200}", normalize_sql(sql));
        let start = Instant::now();

        let request = self.build_request(sql, params);
        let mut response: StatementResponse =
            self.client.post_json(STATEMENTS_PATH, &request).await?;

        loop {
            let state = response
                .status
                .as_ref()
                .map(|s| s.state)
                .ok_or_else(|| AppError::Internal("statement response without status".to_string()))?;

            match state {
                StatementState::Pending | StatementState::Running => {
                    let statement_id = response.statement_id.clone().ok_or_else(|| {
                        AppError::Internal("running statement without an id".to_string())
                    })?;

                    if start.elapsed() > self.config.timeout {
                        self.cancel_statement(&statement_id).await;
                        return Err(AppError::Timeout(format!(
                            "statement did not finish within {}s",
                            self.config.timeout.as_secs()
                        )));
                    }

                    tokio::time::sleep(self.config.poll_interval).await;
                    let path = format!("{}/{}", STATEMENTS_PATH, statement_id);
                    response = self.client.get_json(&path).await?;
                }
                StatementState::Succeeded => {
                    tracing::debug!("statement completed in {:?}", start.elapsed());
                    return Ok(response);
                }
                StatementState::Failed => {
                    let message = response
                        .status
                        .and_then(|s| s.error)
                        .and_then(|e| e.message)
                        .unwrap_or_else(|| "unknown error".to_string());
                    return Err(AppError::Query(message));
                }
                StatementState::Canceled => {
                    return Err(AppError::Query("statement was canceled".to_string()));
                }
                StatementState::Closed => {
                    return Err(AppError::Query(
                        "statement result is no longer available".to_string(),
                    ));
                }
            }
        }
    }

    async fn collect_rows(&self, response: StatementResponse) -> Result<Vec<Row>, AppError> {
        let columns: Vec<(String, String)> = match response.manifest.and_then(|m| m.schema) {
            Some(schema) if !schema.columns.is_empty() => schema
                .columns
                .into_iter()
                .map(|c| (c.name, c.type_name.unwrap_or_else(|| "STRING".to_string())))
                .collect(),
            _ => return Ok(Vec::new()),
        };

        let statement_id = response.statement_id;
        let mut rows = Vec::new();
        let mut next_chunk = match response.result {
            Some(chunk) => {
                rows.extend(convert_warehouse_rows(&columns, chunk.data_array)?);
                chunk.next_chunk_index
            }
            None => None,
        };

        while let Some(chunk_index) = next_chunk {
            let statement_id = statement_id.as_deref().ok_or_else(|| {
                AppError::Internal("chunked result without a statement id".to_string())
            })?;
            let path = format!(
                "{}/{}/result/chunks/{}",
                STATEMENTS_PATH, statement_id, chunk_index
            );
            let chunk: ResultChunk = self.client.get_json(&path).await?;
            rows.extend(convert_warehouse_rows(&columns, chunk.data_array)?);
            next_chunk = chunk.next_chunk_index;
        }

        Ok(rows)
    }
}

#[async_trait::async_trait]
impl SqlBackend for StatementExecutionBackend {
    async fn fetch(&self, sql: &str, params: &[SqlParam]) -> Result<Vec<Row>, AppError> {
        let response = self.run_statement(sql, params).await?;
        self.collect_rows(response).await
    }

    async fn execute(&self, sql: &str, params: &[SqlParam]) -> Result<u64, AppError> {
        // The statement API does not report affected-row counts.
        self.run_statement(sql, params).await?;
        Ok(0)
    }

    async fn create_table(
        &self,
        full_name: &str,
        columns: &[TableColumn],
    ) -> Result<(), AppError> {
        let escaped_table = escape_full_name(full_name)?;
        let col_defs: Result<Vec<String>, AppError> = columns
            .iter()
            .map(|c| Ok(format!("{} {}", escape_name(&c.name)?, c.column_type.warehouse_type())))
            .collect();
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} ({}) USING DELTA",
            escaped_table,
            col_defs?.join(", ")
        );
        self.execute(&sql, &[]).await?;
        Ok(())
    }

    async fn insert_rows(
        &self,
        full_name: &str,
        columns: &[&str],
        rows: &[Vec<SqlParam>],
    ) -> Result<u64, AppError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let escaped_table = escape_full_name(full_name)?;
        let escaped_cols: Result<Vec<String>, AppError> =
            columns.iter().map(|c| escape_name(c)).collect();
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!(":p{}", i)).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            escaped_table,
            escaped_cols?.join(", "),
            placeholders.join(", ")
        );

        let mut inserted = 0u64;
        for row in rows {
            if row.len() != columns.len() {
                return Err(AppError::Validation(format!(
                    "insert row has {} values for {} columns",
                    row.len(),
                    columns.len()
                )));
            }
            self.execute(&sql, row).await?;
            inserted += 1;
        }
        Ok(inserted)
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Warehouse
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statement_state_deserialization() {
        let status: StatementStatus =
            serde_json::from_str(r#"{"state": "SUCCEEDED"}"#).unwrap();
        assert_eq!(status.state, StatementState::Succeeded);

        let status: StatementStatus = serde_json::from_str(
            r#"{"state": "FAILED", "error": {"message": "TABLE_NOT_FOUND: t"}}"#,
        )
        .unwrap();
        assert_eq!(status.state, StatementState::Failed);
        assert_eq!(
            status.error.unwrap().message.as_deref(),
            Some("TABLE_NOT_FOUND: t")
        );
    }

    #[test]
    fn test_request_parameter_naming() {
        let client = Arc::new(PlatformClient::new("example.cloud.net", "t").unwrap());
        let backend =
            StatementExecutionBackend::new(client, WarehouseConfig::new("wh-123"));
        let params = vec![SqlParam::Int(5), SqlParam::Str("x".to_string())];
        let request = backend.build_request("SELECT :p1, :p2", &params);
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["parameters"][0]["name"], "p1");
        assert_eq!(json["parameters"][0]["type"], "BIGINT");
        assert_eq!(json["parameters"][1]["value"], "x");
        assert_eq!(json["warehouse_id"], "wh-123");
        assert_eq!(json["format"], "JSON_ARRAY");
    }

    #[test]
    fn test_wait_timeout_is_capped() {
        let client = Arc::new(PlatformClient::new("example.cloud.net", "t").unwrap());
        let backend =
            StatementExecutionBackend::new(client, WarehouseConfig::new("wh-123"));
        let request = backend.build_request("SELECT 1", &[]);
        assert_eq!(request.wait_timeout, "50s");
    }

    #[test]
    fn test_empty_params_not_serialized() {
        let client = Arc::new(PlatformClient::new("example.cloud.net", "t").unwrap());
        let backend =
            StatementExecutionBackend::new(client, WarehouseConfig::new("wh-123"));
        let request = backend.build_request("SELECT 1", &[]);
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("parameters").is_none());
    }
}
