// End-to-end tests for the warehouse backend against an in-process mock of
// the statement execution API.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use lakehouse_app_backend::api::middleware::AppError;
use lakehouse_app_backend::models::SqlValue;
use lakehouse_app_backend::services::platform::PlatformClient;
use lakehouse_app_backend::services::sql::{
    SqlBackend, StatementExecutionBackend, WarehouseConfig,
};

#[derive(Default)]
struct MockState {
    polls: HashMap<String, u32>,
    canceled: Vec<String>,
}

type Shared = Arc<Mutex<MockState>>;

fn succeeded_select_one() -> Value {
    json!({
        "statement_id": "stmt-1",
        "status": {"state": "SUCCEEDED"},
        "manifest": {"schema": {"columns": [
            {"name": "x", "type_name": "INT", "position": 0}
        ]}},
        "result": {"data_array": [["1"]]}
    })
}

fn succeeded_ordering() -> Value {
    json!({
        "statement_id": "stmt-ord",
        "status": {"state": "SUCCEEDED"},
        "manifest": {"schema": {"columns": [
            {"name": "b", "type_name": "BIGINT", "position": 0},
            {"name": "a", "type_name": "STRING", "position": 1}
        ]}},
        "result": {"data_array": [["2", "two"], [null, "three"]]}
    })
}

fn succeeded_slow() -> Value {
    json!({
        "statement_id": "stmt-slow",
        "status": {"state": "SUCCEEDED"},
        "manifest": {"schema": {"columns": [
            {"name": "a", "type_name": "STRING", "position": 0}
        ]}},
        "result": {"data_array": [["done"]]}
    })
}

fn succeeded_chunked() -> Value {
    json!({
        "statement_id": "stmt-chunks",
        "status": {"state": "SUCCEEDED"},
        "manifest": {"schema": {"columns": [
            {"name": "n", "type_name": "BIGINT", "position": 0}
        ]}},
        "result": {"data_array": [["1"], ["2"]], "next_chunk_index": 1}
    })
}

async fn submit(State(_state): State<Shared>, Json(body): Json<Value>) -> Json<Value> {
    let statement = body["statement"].as_str().unwrap_or("").to_string();
    let response = if statement.contains("AS x") {
        succeeded_select_one()
    } else if statement.contains("ordering") {
        succeeded_ordering()
    } else if statement.contains("hang") {
        json!({"statement_id": "stmt-hang", "status": {"state": "PENDING"}})
    } else if statement.contains("slow") {
        json!({"statement_id": "stmt-slow", "status": {"state": "PENDING"}})
    } else if statement.contains("boom") {
        json!({
            "statement_id": "stmt-boom",
            "status": {"state": "FAILED", "error": {"message": "TABLE_NOT_FOUND: missing"}}
        })
    } else if statement.contains("chunks") {
        succeeded_chunked()
    } else {
        json!({"statement_id": "stmt-0", "status": {"state": "SUCCEEDED"}})
    };
    Json(response)
}

async fn poll(State(state): State<Shared>, Path(id): Path<String>) -> Json<Value> {
    let mut guard = state.lock().unwrap();
    let count = guard.polls.entry(id.clone()).or_insert(0);
    *count += 1;
    let polls_so_far = *count;
    drop(guard);

    let response = match id.as_str() {
        "stmt-hang" => json!({"statement_id": id, "status": {"state": "RUNNING"}}),
        "stmt-slow" if polls_so_far < 2 => {
            json!({"statement_id": id, "status": {"state": "RUNNING"}})
        }
        "stmt-slow" => succeeded_slow(),
        _ => json!({"statement_id": id, "status": {"state": "SUCCEEDED"}}),
    };
    Json(response)
}

async fn chunk(Path((_id, index)): Path<(String, u64)>) -> Json<Value> {
    assert_eq!(index, 1);
    Json(json!({"data_array": [["3"], ["4"]]}))
}

async fn cancel(State(state): State<Shared>, Path(id): Path<String>) -> StatusCode {
    state.lock().unwrap().canceled.push(id);
    StatusCode::OK
}

async fn start_mock() -> (Shared, StatementExecutionBackend) {
    start_mock_with(Duration::from_secs(5), Duration::from_millis(20)).await
}

async fn start_mock_with(
    timeout: Duration,
    poll_interval: Duration,
) -> (Shared, StatementExecutionBackend) {
    let state: Shared = Arc::default();
    let router = Router::new()
        .route("/api/2.0/sql/statements", post(submit))
        .route("/api/2.0/sql/statements/{id}", get(poll))
        .route("/api/2.0/sql/statements/{id}/cancel", post(cancel))
        .route("/api/2.0/sql/statements/{id}/result/chunks/{n}", get(chunk))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    let client = Arc::new(PlatformClient::new(&format!("http://{}", addr), "test-token").unwrap());
    let mut config = WarehouseConfig::new("wh-test");
    config.timeout = timeout;
    config.poll_interval = poll_interval;
    (state, StatementExecutionBackend::new(client, config))
}

#[tokio::test]
async fn test_select_one_yields_single_row() {
    let (_state, backend) = start_mock().await;
    let rows = backend.fetch("SELECT 1 AS x", &[]).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].columns(), &["x".to_string()]);
    assert_eq!(rows[0].get("x"), Some(&SqlValue::Int(1)));

    let json = serde_json::to_value(&rows).unwrap();
    assert_eq!(json, json!([{"x": 1}]));
}

#[tokio::test]
async fn test_column_order_matches_declared_schema() {
    let (_state, backend) = start_mock().await;
    let rows = backend.fetch("SELECT ordering", &[]).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].columns(), &["b".to_string(), "a".to_string()]);
    assert_eq!(rows[0].get("b"), Some(&SqlValue::Int(2)));
    assert_eq!(rows[1].get("b"), Some(&SqlValue::Null));
    assert_eq!(rows[1].get("a"), Some(&SqlValue::Str("three".to_string())));
}

#[tokio::test]
async fn test_pending_statement_is_polled_to_completion() {
    let (state, backend) = start_mock().await;
    let rows = backend.fetch("SELECT slow", &[]).await.unwrap();
    assert_eq!(rows[0].get("a"), Some(&SqlValue::Str("done".to_string())));

    let polls = *state.lock().unwrap().polls.get("stmt-slow").unwrap();
    assert!(polls >= 2, "expected at least two polls, saw {}", polls);
}

#[tokio::test]
async fn test_failed_statement_preserves_remote_message() {
    let (_state, backend) = start_mock().await;
    let err = backend.fetch("SELECT boom", &[]).await.unwrap_err();
    match err {
        AppError::Query(message) => assert_eq!(message, "TABLE_NOT_FOUND: missing"),
        other => panic!("expected Query error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_never_terminal_statement_times_out_and_cancels() {
    let (state, backend) =
        start_mock_with(Duration::from_millis(200), Duration::from_millis(25)).await;
    let err = backend.fetch("SELECT hang", &[]).await.unwrap_err();
    assert!(matches!(err, AppError::Timeout(_)));

    // cancel is best-effort but the mock should have seen it
    let canceled = state.lock().unwrap().canceled.clone();
    assert_eq!(canceled, vec!["stmt-hang".to_string()]);
}

#[tokio::test]
async fn test_chunked_results_concatenate_in_order() {
    let (_state, backend) = start_mock().await;
    let rows = backend.fetch("SELECT chunks", &[]).await.unwrap();
    let values: Vec<_> = rows.iter().map(|r| r.get("n").cloned().unwrap()).collect();
    assert_eq!(
        values,
        vec![
            SqlValue::Int(1),
            SqlValue::Int(2),
            SqlValue::Int(3),
            SqlValue::Int(4)
        ]
    );
}

#[tokio::test]
async fn test_statement_without_result_set_yields_no_rows() {
    let (_state, backend) = start_mock().await;
    let rows = backend.fetch("UPDATE t SET a = 1", &[]).await.unwrap();
    assert!(rows.is_empty());
}
