pub mod get;

use axum::{Router, routing::get as get_route};

use crate::state::AppState;

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/track", get_route(get::track))
        .route("/absences", get_route(get::absences))
        .route("/summary", get_route(get::summary))
        .with_state(state)
}
