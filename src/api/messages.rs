use crate::api::AppState;
use crate::api::dto::messages::SendMessageRequest;
use crate::api::middleware::AuthUser;
use crate::error::Result;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

pub async fn list_peers(auth_user: AuthUser, State(state): State<AppState>) -> Result<impl IntoResponse> {
    let peers = state.message_service.peers(auth_user.user_id).await?;
    Ok(Json(peers))
}

pub async fn get_conversation(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(peer_id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let messages = state.message_service.conversation(auth_user.user_id, peer_id).await?;
    Ok(Json(messages))
}

pub async fn send_message(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(peer_id): Path<Uuid>,
    Json(payload): Json<SendMessageRequest>,
) -> Result<impl IntoResponse> {
    let message = state.message_service.send(auth_user.user_id, peer_id, payload.into()).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn mark_seen(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(peer_id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    state.receipt_service.mark_seen(auth_user.user_id, peer_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
