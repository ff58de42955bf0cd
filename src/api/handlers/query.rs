use std::time::Instant;

use axum::{extract::State, Extension, Json};

use crate::api::handlers::{forwarded_token, AppState};
use crate::api::middleware::{AppError, RequestContext};
use crate::models::{FetchRequest, FetchResponse, Row};
use crate::services::sql::SqlBackend;

fn validate_statement(payload: &FetchRequest) -> Result<&str, AppError> {
    let statement = payload.statement.trim();
    if statement.is_empty() {
        return Err(AppError::Validation("statement cannot be empty".to_string()));
    }
    Ok(statement)
}

/// Execute a statement against the warehouse.
pub async fn warehouse_query(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(payload): Json<FetchRequest>,
) -> Result<Json<FetchResponse>, AppError> {
    let statement = validate_statement(&payload)?;
    tracing::info!("warehouse fetch ({} params)", payload.params.len());

    let start = Instant::now();
    let rows: Vec<Row> = if state.config.workspace.per_request_auth {
        let token = forwarded_token(&ctx)?;
        let backend = state.services.warehouse_for_token(&token).await?;
        backend.fetch(statement, &payload.params).await?
    } else {
        let backend = state.services.warehouse().await?;
        backend.fetch(statement, &payload.params).await?
    };

    Ok(Json(FetchResponse::new(
        rows,
        start.elapsed().as_millis() as u64,
    )))
}

/// Execute a statement against the Lakebase database.
pub async fn lakebase_query(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(payload): Json<FetchRequest>,
) -> Result<Json<FetchResponse>, AppError> {
    let statement = validate_statement(&payload)?;
    tracing::info!("lakebase fetch ({} params)", payload.params.len());

    let start = Instant::now();
    let rows: Vec<Row> = if state.config.workspace.per_request_auth {
        let token = forwarded_token(&ctx)?;
        let backend = state.services.lakebase_for_token(&token).await?;
        backend.fetch(statement, &payload.params).await?
    } else {
        let backend = state.services.lakebase().await?;
        backend.fetch(statement, &payload.params).await?
    };

    Ok(Json(FetchResponse::new(
        rows,
        start.elapsed().as_millis() as u64,
    )))
}
