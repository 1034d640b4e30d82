use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    middleware::{from_fn, from_fn_with_state},
    routing::get,
    Json, Router,
};
use tracing::instrument;
use uuid::Uuid;

use super::{
    dto::{CreateUserRequest, ListParams, PagedUsers, UpdateUserRequest},
    model::{PublicUser, Role},
};
use crate::{
    auth::middleware::{require_auth, require_roles, AuthUser},
    error::{ApiResponse, AppError, AppResult},
    state::AppState,
};

const ADMIN_ONLY: &[Role] = &[Role::Admin];

/// Profile route: any authenticated caller.
pub fn profile_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/users/profile", get(get_profile))
        .route_layer(from_fn_with_state(state, require_auth))
}

/// Admin routes. Layers run bottom-up: token check first, then the role gate.
pub fn admin_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/users", get(list_users).post(create_user))
        .route(
            "/users/:id",
            get(get_user).put(update_user).delete(delete_user),
        )
        .route_layer(from_fn(require_roles(ADMIN_ONLY)))
        .route_layer(from_fn_with_state(state, require_auth))
}

fn parse_id(raw: &str) -> AppResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| AppError::Validation("Invalid user ID".into()))
}

#[instrument(skip(state, user), fields(user_id = %user.id))]
pub async fn get_profile(
    State(state): State<AppState>,
    user: AuthUser,
) -> AppResult<Json<ApiResponse<PublicUser>>> {
    let profile = state.users.get_by_id(user.id).await?;
    Ok(Json(ApiResponse::ok("Profile retrieved successfully", profile)))
}

#[instrument(skip(state, admin), fields(actor = %admin.id))]
pub async fn list_users(
    State(state): State<AppState>,
    admin: AuthUser,
    params: Result<Query<ListParams>, QueryRejection>,
) -> AppResult<Json<ApiResponse<PagedUsers>>> {
    // A query string that does not even parse still gets the defaults.
    let params = params.map(|Query(p)| p).unwrap_or_default();
    let (page, limit) = params.resolve();
    let users = state.users.list(page, limit).await?;
    Ok(Json(ApiResponse::ok("Users retrieved successfully", users)))
}

#[instrument(skip(state, admin, payload), fields(actor = %admin.id))]
pub async fn create_user(
    State(state): State<AppState>,
    admin: AuthUser,
    payload: Result<Json<CreateUserRequest>, JsonRejection>,
) -> AppResult<(StatusCode, Json<ApiResponse<PublicUser>>)> {
    let Json(req) = payload?;
    let user = state.users.create(req).await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::ok("User created successfully", user)),
    ))
}

#[instrument(skip(state, admin), fields(actor = %admin.id))]
pub async fn get_user(
    State(state): State<AppState>,
    admin: AuthUser,
    Path(id): Path<String>,
) -> AppResult<Json<ApiResponse<PublicUser>>> {
    let user = state.users.get_by_id(parse_id(&id)?).await?;
    Ok(Json(ApiResponse::ok("User retrieved successfully", user)))
}

#[instrument(skip(state, admin, payload), fields(actor = %admin.id))]
pub async fn update_user(
    State(state): State<AppState>,
    admin: AuthUser,
    Path(id): Path<String>,
    payload: Result<Json<UpdateUserRequest>, JsonRejection>,
) -> AppResult<Json<ApiResponse<PublicUser>>> {
    let id = parse_id(&id)?;
    let Json(req) = payload?;
    let user = state.users.update(id, req).await?;
    Ok(Json(ApiResponse::ok("User updated successfully", user)))
}

#[instrument(skip(state, admin), fields(actor = %admin.id))]
pub async fn delete_user(
    State(state): State<AppState>,
    admin: AuthUser,
    Path(id): Path<String>,
) -> AppResult<Json<ApiResponse<()>>> {
    state.users.delete(parse_id(&id)?).await?;
    Ok(Json(ApiResponse::message("User deleted successfully")))
}
