use std::time::Instant;

use axum::{
    extract::Request,
    http::{HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Application error types
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Query timed out: {0}")]
    Timeout(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Invalid identifier: {0}")]
    Escape(String),

    #[error("Conversion error: {0}")]
    Conversion(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

/// Error response format
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorDetail {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_detail) = match self {
            AppError::Configuration(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorDetail::new("CONFIGURATION_ERROR", msg),
            ),
            AppError::Query(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorDetail::new("QUERY_ERROR", msg),
            ),
            AppError::Timeout(msg) => (
                StatusCode::GATEWAY_TIMEOUT,
                ErrorDetail::new("TIMEOUT", msg),
            ),
            AppError::Connection(msg) => (
                StatusCode::BAD_GATEWAY,
                ErrorDetail::new("CONNECTION_ERROR", msg),
            ),
            AppError::Auth(msg) => (
                StatusCode::UNAUTHORIZED,
                ErrorDetail::new("AUTHENTICATION_ERROR", msg),
            ),
            AppError::Escape(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorDetail::new("INVALID_IDENTIFIER", msg),
            ),
            AppError::Conversion(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorDetail::new("CONVERSION_ERROR", msg),
            ),
            AppError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorDetail::new("VALIDATION_ERROR", msg),
            ),
            AppError::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                ErrorDetail::new("NOT_FOUND", msg),
            ),
            AppError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorDetail::new("INTERNAL_ERROR", msg),
            ),
        };

        let body = Json(ErrorResponse {
            error: error_detail,
        });

        (status, body).into_response()
    }
}

/// Convert anyhow::Error to AppError
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// Per-request state extracted from inbound headers.
///
/// The forwarded access token carries the caller's own OAuth identity when
/// the app runs behind the platform proxy in per-request auth mode.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub request_id: String,
    pub forwarded_token: Option<String>,
}

/// Extracts request id and forwarded token, echoes the id on the response,
/// and logs completed non-health requests with their duration.
pub async fn request_context(mut request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let forwarded_token = request
        .headers()
        .get("x-forwarded-access-token")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let method = request.method().clone();
    let path = request.uri().path().to_string();

    request.extensions_mut().insert(RequestContext {
        request_id: request_id.clone(),
        forwarded_token,
    });

    let start = Instant::now();
    let mut response = next.run(request).await;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("x-request-id", value);
    }

    if path != "/health" {
        tracing::info!(
            "{} {} -> {} ({}ms)",
            method,
            path,
            response.status().as_u16(),
            start.elapsed().as_millis()
        );
    }

    response
}
