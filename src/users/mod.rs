pub mod dto;
pub mod handlers;
pub mod memory;
pub mod model;
pub mod pg;
pub mod repo;
mod repo_types;
pub mod services;

use crate::state::AppState;
use axum::Router;

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .merge(handlers::profile_routes(state.clone()))
        .merge(handlers::admin_routes(state))
}
