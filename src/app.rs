use std::{any::Any, future::IntoFuture, net::SocketAddr, sync::Arc, time::Duration};

use axum::{response::Response, routing::get, Json, Router};
use serde_json::json;
use tokio::sync::Notify;
use tower_http::{catch_panic::CatchPanicLayer, cors::CorsLayer, trace::TraceLayer};

use crate::error::{ApiResponse, AppError};
use crate::state::AppState;
use crate::{auth, users};

pub fn build_app(state: AppState) -> Router {
    let router = Router::new()
        .route("/health", get(health))
        .nest(
            "/api/v1",
            Router::new()
                .merge(auth::router())
                .merge(users::router(state.clone())),
        )
        .fallback(not_found)
        .with_state(state);
    with_middleware(router)
}

/// Outer layers shared by every route: panic recovery, CORS, request tracing.
fn with_middleware(router: Router) -> Router {
    router
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    let method = req.method().clone();
                    let uri = req.uri().clone();
                    tracing::info_span!("http_request", %method, uri = %uri, status = tracing::field::Empty)
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &tracing::Span| {
                        let status = res.status();
                        span.record("status", tracing::field::display(status));
                        let latency_ms = latency.as_millis() as u64;
                        if status.is_server_error() {
                            tracing::error!(%status, latency_ms, "response");
                        } else {
                            tracing::info!(%status, latency_ms, "response");
                        }
                    },
                ),
        )
}

async fn health() -> Json<ApiResponse<serde_json::Value>> {
    Json(ApiResponse::ok("Service is healthy", json!({ "status": "ok" })))
}

async fn not_found() -> AppError {
    AppError::NotFound("Route not found".into())
}

/// Turns a handler panic into the generic 500 envelope; the process keeps serving.
fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        (*s).to_string()
    } else {
        "unknown panic payload".to_string()
    };
    tracing::error!(panic = %detail, "request handler panicked");
    axum::response::IntoResponse::into_response(AppError::internal(anyhow::anyhow!(detail)))
}

/// Serves until SIGINT/SIGTERM, then gives in-flight requests `grace` to finish.
pub async fn serve(app: Router, addr: SocketAddr, grace: Duration) -> anyhow::Result<()> {
    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    let stop = Arc::new(Notify::new());
    let stop_rx = stop.clone();
    let mut server = tokio::spawn(
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { stop_rx.notified().await })
            .into_future(),
    );

    tokio::select! {
        res = &mut server => {
            res??;
            return Ok(());
        }
        _ = shutdown_signal() => {}
    }

    tracing::info!(grace_secs = grace.as_secs(), "shutting down server");
    stop.notify_one();
    match tokio::time::timeout(grace, &mut server).await {
        Ok(res) => res??,
        Err(_) => {
            tracing::warn!("graceful shutdown window elapsed; aborting in-flight requests");
            server.abort();
        }
    }
    tracing::info!("server exited");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{header, Method, Request, StatusCode},
    };
    use serde_json::Value;
    use tower::ServiceExt;
    use uuid::Uuid;

    use crate::users::{dto::CreateUserRequest, model::Role};

    async fn send(
        app: &Router,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(t) = token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {t}"));
        }
        let req = match body {
            Some(b) => req
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(b.to_string()))
                .unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };

        let res = app.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    fn bob() -> Value {
        json!({
            "username": "bob",
            "email": "bob@x.com",
            "password": "secret1",
            "first_name": "Bob",
            "last_name": "B",
            "role": "user"
        })
    }

    async fn admin_token(state: &AppState) -> String {
        let admin = state
            .users
            .create(CreateUserRequest {
                username: "root".into(),
                email: "root@x.com".into(),
                password: "rootpass".into(),
                first_name: "Root".into(),
                last_name: "Admin".into(),
                role: Some(Role::Admin),
            })
            .await
            .unwrap();
        state.jwt.issue(admin.id, Role::Admin).unwrap()
    }

    async fn register(app: &Router, body: Value) -> (String, Value) {
        let (status, res) = send(app, Method::POST, "/api/v1/auth/register", None, Some(body)).await;
        assert_eq!(status, StatusCode::CREATED, "{res}");
        (
            res["data"]["token"].as_str().unwrap().to_string(),
            res["data"]["user"].clone(),
        )
    }

    #[tokio::test]
    async fn health_is_public() {
        let app = build_app(AppState::fake());
        let (status, body) = send(&app, Method::GET, "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["status"], "ok");
    }

    #[tokio::test]
    async fn register_returns_token_and_user_without_password() {
        let state = AppState::fake();
        let app = build_app(state.clone());

        let (status, body) =
            send(&app, Method::POST, "/api/v1/auth/register", None, Some(bob())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["user"]["email"], "bob@x.com");
        assert_eq!(body["data"]["user"]["role"], "user");
        assert!(!body.to_string().contains("password"));

        let token = body["data"]["token"].as_str().unwrap();
        let claims = state.jwt.verify(token).unwrap();
        assert_eq!(claims.sub.to_string(), body["data"]["user"]["id"].as_str().unwrap());
        assert_eq!(claims.role, Role::User);
    }

    #[tokio::test]
    async fn register_conflicts_and_validation() {
        let app = build_app(AppState::fake());
        register(&app, bob()).await;

        let (status, body) =
            send(&app, Method::POST, "/api/v1/auth/register", None, Some(bob())).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "EMAIL_TAKEN");

        let mut short = bob();
        short["email"] = json!("new@x.com");
        short["username"] = json!("bo");
        let (status, body) =
            send(&app, Method::POST, "/api/v1/auth/register", None, Some(short)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "VALIDATION_ERROR");

        let (status, body) = send(
            &app,
            Method::POST,
            "/api/v1/auth/register",
            None,
            Some(json!({ "username": "x" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "VALIDATION_ERROR");
    }

    async fn send_raw(app: &Router, content_type: Option<&str>, body: &str) -> (StatusCode, Value) {
        let mut req = Request::builder()
            .method(Method::POST)
            .uri("/api/v1/auth/register");
        if let Some(ct) = content_type {
            req = req.header(header::CONTENT_TYPE, ct);
        }
        let res = app
            .clone()
            .oneshot(req.body(Body::from(body.to_string())).unwrap())
            .await
            .unwrap();
        let status = res.status();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn malformed_bodies_get_validation_envelope() {
        let app = build_app(AppState::fake());

        let (status, body) =
            send_raw(&app, Some("application/json"), r#"{"username": "bob","#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "VALIDATION_ERROR");

        let (status, body) = send_raw(&app, None, &bob().to_string()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn login_success_and_uniform_failures() {
        let app = build_app(AppState::fake());
        register(&app, bob()).await;

        let (status, body) = send(
            &app,
            Method::POST,
            "/api/v1/auth/login",
            None,
            Some(json!({ "email": "bob@x.com", "password": "secret1" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["data"]["token"].is_string());

        let (s1, wrong_pw) = send(
            &app,
            Method::POST,
            "/api/v1/auth/login",
            None,
            Some(json!({ "email": "bob@x.com", "password": "nope" })),
        )
        .await;
        let (s2, unknown) = send(
            &app,
            Method::POST,
            "/api/v1/auth/login",
            None,
            Some(json!({ "email": "eve@x.com", "password": "secret1" })),
        )
        .await;
        assert_eq!(s1, StatusCode::UNAUTHORIZED);
        assert_eq!(s2, StatusCode::UNAUTHORIZED);
        assert_eq!(wrong_pw, unknown);
        assert_eq!(wrong_pw["error"], "INVALID_CREDENTIALS");
    }

    #[tokio::test]
    async fn profile_requires_valid_token() {
        let state = AppState::fake();
        let app = build_app(state.clone());
        let (token, user) = register(&app, bob()).await;

        let (status, _) = send(&app, Method::GET, "/api/v1/users/profile", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) =
            send(&app, Method::GET, "/api/v1/users/profile", Some("garbage"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let expired = state
            .jwt
            .issue_with_ttl(Uuid::new_v4(), Role::User, Duration::ZERO)
            .unwrap();
        let (status, body) =
            send(&app, Method::GET, "/api/v1/users/profile", Some(&expired), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["message"], "Token has expired");

        let (status, body) =
            send(&app, Method::GET, "/api/v1/users/profile", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"], user);
    }

    #[tokio::test]
    async fn list_users_is_admin_only() {
        let state = AppState::fake();
        let app = build_app(state.clone());
        let (user_token, _) = register(&app, bob()).await;
        let admin = admin_token(&state).await;

        let (status, _) = send(&app, Method::GET, "/api/v1/users", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) =
            send(&app, Method::GET, "/api/v1/users", Some(&user_token), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "FORBIDDEN");

        let (status, body) = send(&app, Method::GET, "/api/v1/users", Some(&admin), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["total_count"], 2);
        assert_eq!(body["data"]["page"], 1);
        assert_eq!(body["data"]["limit"], 10);
        assert_eq!(body["data"]["users"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn list_users_coerces_bad_pagination() {
        let state = AppState::fake();
        let app = build_app(state.clone());
        let admin = admin_token(&state).await;

        let (status, body) = send(
            &app,
            Method::GET,
            "/api/v1/users?page=abc&limit=-3",
            Some(&admin),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["page"], 1);
        assert_eq!(body["data"]["limit"], 10);
    }

    #[tokio::test]
    async fn role_gate_runs_before_id_parsing() {
        let state = AppState::fake();
        let app = build_app(state.clone());
        let (user_token, _) = register(&app, bob()).await;

        let (status, _) = send(&app, Method::GET, "/api/v1/users/not-an-id", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) =
            send(&app, Method::GET, "/api/v1/users/not-an-id", Some(&user_token), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn admin_crud_flow() {
        let state = AppState::fake();
        let app = build_app(state.clone());
        let admin = admin_token(&state).await;

        let (status, body) =
            send(&app, Method::POST, "/api/v1/users", Some(&admin), Some(bob())).await;
        assert_eq!(status, StatusCode::CREATED);
        let created = body["data"].clone();
        let id = created["id"].as_str().unwrap().to_string();
        let uri = format!("/api/v1/users/{id}");

        let (status, body) = send(&app, Method::GET, &uri, Some(&admin), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"], created);

        let (status, body) = send(
            &app,
            Method::PUT,
            &uri,
            Some(&admin),
            Some(json!({ "first_name": "X" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let updated = &body["data"];
        assert_eq!(updated["first_name"], "X");
        for field in ["id", "username", "email", "last_name", "role", "is_active", "created_at"] {
            assert_eq!(updated[field], created[field], "{field} changed");
        }

        let (status, _) = send(&app, Method::DELETE, &uri, Some(&admin), None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(&app, Method::GET, &uri, Some(&admin), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "NOT_FOUND");

        let (status, _) = send(&app, Method::DELETE, &uri, Some(&admin), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn bad_ids_and_bodies_are_rejected() {
        let state = AppState::fake();
        let app = build_app(state.clone());
        let admin = admin_token(&state).await;

        let (status, body) =
            send(&app, Method::GET, "/api/v1/users/not-an-id", Some(&admin), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "VALIDATION_ERROR");

        let missing = format!("/api/v1/users/{}", Uuid::new_v4());
        let (status, _) = send(
            &app,
            Method::PUT,
            &missing,
            Some(&admin),
            Some(json!({ "last_name": "Y" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(
            &app,
            Method::PUT,
            &missing,
            Some(&admin),
            Some(json!({ "role": "superuser" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_route_gets_envelope() {
        let app = build_app(AppState::fake());
        let (status, body) = send(&app, Method::GET, "/api/v1/nope", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn app_carries_shared_middleware() {
        let app = build_app(AppState::fake());
        let res = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .header(header::ORIGIN, "http://example.com")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert!(res
            .headers()
            .contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN));
    }

    async fn boom() -> &'static str {
        panic!("handler exploded")
    }

    #[tokio::test]
    async fn panics_become_internal_errors() {
        let app = with_middleware(
            Router::new()
                .route("/boom", get(boom))
                .route("/fine", get(|| async { "fine" })),
        );

        let (status, body) = send(&app, Method::GET, "/boom", None, None).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "INTERNAL_ERROR");
        assert_eq!(body["message"], "Internal server error");
        assert!(!body.to_string().contains("exploded"));

        // The service keeps answering after a panic.
        let res = app
            .clone()
            .oneshot(Request::builder().uri("/fine").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }
}
