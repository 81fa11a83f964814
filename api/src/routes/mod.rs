pub mod attendance;

use axum::Router;

use crate::state::AppState;

pub fn routes(state: AppState) -> Router {
    Router::new().nest("/attendance", attendance::routes(state))
}
