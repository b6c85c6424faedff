use axum::{Router, routing::{get, post}};

use crate::{AppState, controllers::command_controller};

pub fn add_routes(router: Router<AppState>) -> Router<AppState> {
    router
        .route("/command", post(command_controller::post_command))
        .route("/health", get(command_controller::health))
}
