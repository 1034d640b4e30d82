use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use tracing::instrument;

use crate::{
    auth::dto::{AuthResponse, LoginRequest},
    error::{ApiResponse, AppResult},
    state::AppState,
    users::dto::CreateUserRequest,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<CreateUserRequest>, JsonRejection>,
) -> AppResult<(StatusCode, Json<ApiResponse<AuthResponse>>)> {
    let Json(req) = payload?;
    let res = state.users.register(req).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::ok("User registered successfully", res)),
    ))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> AppResult<Json<ApiResponse<AuthResponse>>> {
    let Json(req) = payload?;
    let res = state.users.login(req).await?;
    Ok(Json(ApiResponse::ok("Login successful", res)))
}
