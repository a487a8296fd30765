//! Password reset handler.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use profiles_models::PasswordResetRequest;

use crate::error::ApiResult;
use crate::extract::ApiJson;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

/// Reset the password of the account registered under an email.
pub async fn reset_password(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<PasswordResetRequest>,
) -> ApiResult<Json<MessageResponse>> {
    state.credentials.reset(request).await?;

    Ok(Json(MessageResponse {
        message: "Password has been reset successfully.".to_string(),
    }))
}
