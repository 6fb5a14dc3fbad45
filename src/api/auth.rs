use crate::api::AppState;
use crate::api::dto::auth::{LoginRequest, SignupRequest};
use crate::api::middleware::AuthUser;
use crate::error::Result;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};

pub async fn signup(State(state): State<AppState>, Json(payload): Json<SignupRequest>) -> Result<impl IntoResponse> {
    let session = state.auth_service.signup(payload.username, payload.password).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

pub async fn login(State(state): State<AppState>, Json(payload): Json<LoginRequest>) -> Result<impl IntoResponse> {
    let session = state.auth_service.login(payload.username, payload.password).await?;
    Ok(Json(session))
}

/// Returns the profile the presented token belongs to.
pub async fn check(auth_user: AuthUser, State(state): State<AppState>) -> Result<impl IntoResponse> {
    let profile = state.auth_service.profile(auth_user.user_id).await?;
    Ok(Json(profile))
}
