//! Profile API handlers.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use profiles_models::{PhoneUpdateRequest, ProfileRequest, PublicProfile, UserId};

use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::extract::{ApiJson, ApiPath};
use crate::metrics;
use crate::state::AppState;

/// Response for a phone number change.
#[derive(Serialize)]
pub struct PhoneUpdateResponse {
    pub message: String,
    pub profile: PublicProfile,
}

/// Create (or complete) the caller's profile.
pub async fn create_profile(
    State(state): State<AppState>,
    user: AuthUser,
    ApiJson(request): ApiJson<ProfileRequest>,
) -> ApiResult<(StatusCode, Json<PublicProfile>)> {
    let (record, created) = state.profiles.upsert_profile(user.claims(), request).await?;
    metrics::record_profile_saved(created);

    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(record.into())))
}

/// Get the caller's own profile.
pub async fn get_own_profile(
    State(state): State<AppState>,
    user: AuthUser,
) -> ApiResult<Json<PublicProfile>> {
    let record = state.profiles.get_by_subject(user.uid()).await?;
    Ok(Json(record.into()))
}

/// Get a profile by id.
pub async fn get_profile(
    State(state): State<AppState>,
    _user: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult<Json<PublicProfile>> {
    let record = state.profiles.get_by_id(UserId(id)).await?;
    Ok(Json(record.into()))
}

/// Delete a profile by id.
pub async fn delete_profile(
    State(state): State<AppState>,
    _user: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult<StatusCode> {
    state.profiles.delete(UserId(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Replace a profile's phone number.
pub async fn update_phone(
    State(state): State<AppState>,
    _user: AuthUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(request): ApiJson<PhoneUpdateRequest>,
) -> ApiResult<Json<PhoneUpdateResponse>> {
    let record = state
        .profiles
        .update_phone(UserId(id), &request.phone_number)
        .await?;

    Ok(Json(PhoneUpdateResponse {
        message: "Phone number updated successfully.".to_string(),
        profile: record.into(),
    }))
}
