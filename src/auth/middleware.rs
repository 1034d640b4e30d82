//! Bearer-token authentication and role gating for protected routes.
//!
//! `require_auth` runs first: it verifies the token and stores an
//! [`AuthUser`] in the request extensions. `require_roles` runs after it and
//! only ever sees requests that already carry a verified identity.

use std::{future::Future, pin::Pin};

use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::warn;
use uuid::Uuid;

use super::jwt::JwtKeys;
use crate::{error::AppError, users::model::Role};

/// Identity of the caller, derived from a verified token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser {
    pub id: Uuid,
    pub role: Role,
}

fn bearer_token(header: Option<&axum::http::HeaderValue>) -> Result<&str, AppError> {
    let auth = header
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("Missing Authorization header".into()))?;

    // Expect "Bearer <token>"
    let token = auth
        .strip_prefix("Bearer ")
        .or_else(|| auth.strip_prefix("bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::Unauthorized("Invalid Authorization header".into()))?;
    Ok(token)
}

pub async fn require_auth(
    State(keys): State<JwtKeys>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer_token(request.headers().get(AUTHORIZATION))?;

    let claims = keys.verify(token).map_err(|e| {
        warn!(error = %e, "token verification failed");
        AppError::from(e)
    })?;

    request.extensions_mut().insert(AuthUser {
        id: claims.sub,
        role: claims.role,
    });
    Ok(next.run(request).await)
}

/// Rejects callers whose role is not in `allowed` with 403.
pub fn require_roles(
    allowed: &'static [Role],
) -> impl Fn(Request, Next) -> Pin<Box<dyn Future<Output = Response> + Send>>
       + Clone
       + Send
       + Sync
       + 'static {
    move |request: Request, next: Next| Box::pin(check_roles(request, next, allowed))
}

async fn check_roles(request: Request, next: Next, allowed: &[Role]) -> Response {
    let Some(user) = request.extensions().get::<AuthUser>().copied() else {
        return AppError::Unauthorized("Authentication required".into()).into_response();
    };

    if !allowed.contains(&user.role) {
        warn!(user_id = %user.id, role = %user.role, "insufficient role");
        return AppError::Forbidden("Insufficient permissions".into()).into_response();
    }

    next.run(request).await
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .copied()
            .ok_or_else(|| AppError::Unauthorized("Not authenticated".into()))
    }
}
