use crate::api::AppState;
use axum::{
    extract::{Query, State, ws::WebSocketUpgrade},
    http::{Extensions, StatusCode},
    response::IntoResponse,
};
use serde::Deserialize;
use tower_http::request_id::RequestId;

#[derive(Deserialize)]
pub struct WsParams {
    token: String,
}

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    extensions: Extensions,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let request_id = extensions
        .get::<RequestId>()
        .and_then(|id| id.header_value().to_str().ok())
        .unwrap_or("unknown")
        .to_string();

    match state.auth_service.verify_token(&params.token) {
        Ok(user_id) => {
            let gateway = state.gateway_service.clone();
            let shutdown_rx = state.shutdown_rx.clone();
            ws.on_upgrade(move |socket| async move {
                gateway.handle_socket(socket, user_id, request_id, shutdown_rx).await;
            })
        }
        Err(e) => {
            tracing::warn!(error = %e, "WebSocket handshake failed: invalid token");
            StatusCode::UNAUTHORIZED.into_response()
        }
    }
}
