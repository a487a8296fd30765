//! Firebase login handler.

use axum::extract::State;
use axum::Json;
use serde::Serialize;
use tracing::info;

use profiles_models::FirebaseLoginRequest;

use crate::error::{ApiError, ApiResult};
use crate::extract::ApiJson;
use crate::metrics;
use crate::state::AppState;

/// Login response.
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub uid: String,
    pub email: String,
    pub created: bool,
    pub full_name: String,
}

/// Exchange a Firebase ID token for a local record, creating it on first login.
pub async fn firebase_login(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<FirebaseLoginRequest>,
) -> ApiResult<Json<LoginResponse>> {
    request.check().into_result().map_err(ApiError::Validation)?;

    let claims = state.verifier.verify(request.id_token.trim()).await.inspect_err(|e| {
        metrics::record_auth_failure("login_rejected");
        info!(error = %e, "Login token rejected");
    })?;

    let (user, created) = state.profiles.provision(&claims).await?;
    metrics::record_login(created);

    Ok(Json(LoginResponse {
        uid: claims.subject_id,
        email: user.email.clone(),
        created,
        full_name: user.full_name(),
    }))
}
