pub mod query;
pub mod user;

use std::sync::Arc;

use crate::api::middleware::{AppError, RequestContext};
use crate::config::Config;
use crate::services::Services;

/// Shared application state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub services: Arc<Services>,
}

/// The caller's forwarded OAuth token, required in per-request auth mode.
pub(crate) fn forwarded_token(ctx: &RequestContext) -> Result<String, AppError> {
    ctx.forwarded_token
        .clone()
        .ok_or_else(|| AppError::Auth("missing forwarded access token".to_string()))
}
