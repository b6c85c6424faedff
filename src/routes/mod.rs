use axum::Router;

use crate::AppState;

pub mod command_routes;

pub fn app(state: AppState) -> Router {
    let router = Router::<AppState>::new();

    let router = command_routes::add_routes(router);

    router.with_state(state)
}
