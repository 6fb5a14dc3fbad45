use crate::api::AppState;
use axum::{
    body::Body,
    extract::State,
    http::{Request, header},
    middleware::Next,
    response::Response,
};

/// Records the outcome of the governor layers sitting below this middleware.
pub async fn log_rate_limit_events(State(state): State<AppState>, req: Request<Body>, next: Next) -> Response {
    let response = next.run(req).await;

    let retry_after = response.headers().get(header::RETRY_AFTER).and_then(|v| v.to_str().ok());
    state.rate_limit_service.log_decision(response.status(), retry_after);

    response
}
