use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use crate::{
    errors::TradeError,
    models::{CommandRequest, CommandResponse},
    AppState,
};

/// Gateway entry point. Every parsed body gets a 200 with the outcome in the
/// response envelope; malformed JSON is answered the same way.
pub async fn post_command(
    State(state): State<AppState>,
    payload: Result<Json<CommandRequest>, JsonRejection>,
) -> Json<CommandResponse> {
    let req = match payload {
        Ok(Json(req)) => req,
        Err(e) => {
            tracing::warn!("unreadable command body: {e}");
            let err = TradeError::InvalidCommand(e.body_text());
            return Json(CommandResponse::err("", &err));
        }
    };

    Json(state.handler.handle_request(req).await)
}

pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}
