use axum::{extract::State, Extension, Json};

use crate::api::handlers::{forwarded_token, AppState};
use crate::api::middleware::{AppError, RequestContext};
use crate::models::UserInfo;

/// Identity of the calling user, resolved through the workspace API.
pub async fn current_user(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Json<UserInfo>, AppError> {
    let platform = state.services.platform().await?;
    let user = if state.config.workspace.per_request_auth {
        let token = forwarded_token(&ctx)?;
        platform.with_token(&token).current_user().await?
    } else {
        platform.current_user().await?
    };
    Ok(Json(user))
}
