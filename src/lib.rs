// Library exports for the binaries and tests
pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;

#[cfg(test)]
pub(crate) mod test_support;

use std::sync::Arc;

use axum::{
    routing::{get, post, put},
    Extension, Router,
};
use sqlx::PgPool;
use tower_http::trace::TraceLayer;

use config::Config;
use db::store::{Stores, UserStore};
use error::AuthResult;
use services::{
    access::AccessValidator,
    auth::AuthService,
    password::PasswordHasher,
    refresh::RefreshTokenService,
    roles::{RoleResolver, RoleService},
    token::TokenService,
};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub auth: Arc<AuthService>,
    pub access: Arc<AccessValidator>,
    pub roles: Arc<RoleService>,
    pub refresh_tokens: Arc<RefreshTokenService>,
    pub tokens: Arc<TokenService>,
    pub users: Arc<dyn UserStore>,
    /// `None` when running on the in-process store.
    pub db: Option<PgPool>,
    pub redis: Option<redis::aio::MultiplexedConnection>,
    pub config: Arc<Config>,
}

impl AppState {
    /// Wires the services over `stores`.
    pub fn new(
        config: Arc<Config>,
        stores: Stores,
        db: Option<PgPool>,
        redis: Option<redis::aio::MultiplexedConnection>,
    ) -> AuthResult<Self> {
        let resolver = Arc::new(RoleResolver::new(
            stores.roles.clone(),
            stores.role_assignments.clone(),
        ));
        let tokens = Arc::new(TokenService::new(&config.jwt_secret));
        let refresh_tokens = Arc::new(RefreshTokenService::new(stores.refresh_tokens.clone()));
        let access = Arc::new(AccessValidator::new(stores.users.clone(), resolver.clone()));
        let roles = Arc::new(RoleService::new(&stores, access.clone()));
        let auth = Arc::new(AuthService::new(
            &stores,
            resolver,
            tokens.clone(),
            refresh_tokens.clone(),
            PasswordHasher::new(config.bcrypt_cost),
        )?);

        Ok(Self {
            auth,
            access,
            roles,
            refresh_tokens,
            tokens,
            users: stores.users,
            db,
            redis,
            config,
        })
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/metrics", get(routes::metrics::metrics_handler))
        // Auth
        .route("/auth/login", post(routes::auth::login))
        .route("/auth/register", post(routes::auth::register))
        .route("/auth/refresh", post(routes::auth::refresh_token))
        .route("/auth/logout", post(routes::auth::logout))
        // Users
        .route("/users", get(routes::users::list_users))
        .route("/users/me", get(routes::users::me))
        .route(
            "/users/roles",
            put(routes::users::assign_role).delete(routes::users::remove_role),
        )
        .route("/users/email/{email}", get(routes::users::get_user_by_email))
        .route("/users/{id}", get(routes::users::get_user))
        .layer(Extension(state.tokens.clone()))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{to_bytes, Body},
        http::{header, Request, StatusCode},
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::test_support::{memory_state, register_admin};

    async fn call(
        app: &Router,
        method: &str,
        uri: &str,
        bearer: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = bearer {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    fn registration() -> Value {
        json!({
            "first_name": "Ann",
            "last_name": "Lee",
            "email": "ann@example.com",
            "password": "Secr3t!A"
        })
    }

    #[tokio::test]
    async fn test_register_login_refresh_logout_over_http() {
        let (state, _store) = memory_state();
        let app = router(state);

        let (status, pair) = call(&app, "POST", "/auth/register", None, Some(registration())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert!(pair["access_token"].is_string());
        assert!(pair["expires_at"].is_string());

        let (status, pair) = call(
            &app,
            "POST",
            "/auth/login",
            None,
            Some(json!({ "email": "ann@example.com", "password": "Secr3t!A" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let access = pair["access_token"].as_str().unwrap().to_string();
        let refresh = pair["refresh_token"].as_str().unwrap().to_string();

        let (status, me) = call(&app, "GET", "/users/me", Some(&access), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(me["email"], "ann@example.com");
        assert!(me.get("password_hash").is_none());

        let (status, _) = call(
            &app,
            "POST",
            "/auth/refresh",
            None,
            Some(json!({ "refresh_token": refresh })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = call(
            &app,
            "POST",
            "/auth/refresh",
            None,
            Some(json!({ "refresh_token": refresh })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body["error"].is_string());

        let (status, body) = call(&app, "POST", "/auth/logout", Some(&access), None).await;
        assert_eq!(status, StatusCode::OK);
        // The registration token and the rotated one.
        assert_eq!(body["revoked_refresh_tokens"], 2);
    }

    #[tokio::test]
    async fn test_error_statuses_over_http() {
        let (state, _store) = memory_state();
        let app = router(state);

        let (status, _) = call(&app, "POST", "/auth/logout", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = call(&app, "GET", "/users/me", Some("garbage"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        call(&app, "POST", "/auth/register", None, Some(registration())).await;
        let (status, _) = call(&app, "POST", "/auth/register", None, Some(registration())).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let mut invalid = registration();
        invalid["email"] = json!("not-an-email");
        let (status, _) = call(&app, "POST", "/auth/register", None, Some(invalid)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let wrong = json!({ "email": "ann@example.com", "password": "wrong" });
        for _ in 0..5 {
            let (status, _) = call(&app, "POST", "/auth/login", None, Some(wrong.clone())).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED);
        }
        let (status, body) = call(&app, "POST", "/auth/login", None, Some(wrong)).await;
        assert_eq!(status, StatusCode::LOCKED);
        assert!(body["locked_until"].is_string());
    }

    #[tokio::test]
    async fn test_role_admin_endpoints_require_admin() {
        let (state, _store) = memory_state();
        let app = router(state);

        let (_, pair) = call(&app, "POST", "/auth/register", None, Some(registration())).await;
        let access = pair["access_token"].as_str().unwrap().to_string();

        let change = json!({ "email": "ann@example.com", "role_name": "ADMIN" });
        let (status, _) = call(&app, "PUT", "/users/roles", Some(&access), Some(change)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = call(
            &app,
            "GET",
            &format!("/users/{}", uuid::Uuid::new_v4()),
            Some(&access),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_health_and_metrics() {
        let (state, _store) = memory_state();
        let app = router(state);

        let (status, body) = call(&app, "GET", "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["store"], "memory");

        let response = app
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let text = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(String::from_utf8_lossy(&text).contains("auth_registrations_total"));
    }

    #[tokio::test]
    async fn test_list_users_is_admin_only() {
        let (state, store) = memory_state();
        register_admin(&state, &store, "admin@example.com").await;
        let app = router(state);

        let (_, pair) = call(&app, "POST", "/auth/register", None, Some(registration())).await;
        let ann = pair["access_token"].as_str().unwrap().to_string();
        let (status, _) = call(&app, "GET", "/users", Some(&ann), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (_, pair) = call(
            &app,
            "POST",
            "/auth/login",
            None,
            Some(json!({ "email": "admin@example.com", "password": "Secr3t!A" })),
        )
        .await;
        let admin = pair["access_token"].as_str().unwrap().to_string();
        let (status, users) = call(&app, "GET", "/users", Some(&admin), None).await;
        assert_eq!(status, StatusCode::OK);
        let emails: Vec<&str> = users
            .as_array()
            .unwrap()
            .iter()
            .map(|u| u["email"].as_str().unwrap())
            .collect();
        assert_eq!(emails, ["admin@example.com", "ann@example.com"]);
        assert!(users[0].get("password_hash").is_none());
    }
}
