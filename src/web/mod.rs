use axum::{
    Json, Router,
    extract::State,
    http::Method,
    middleware as axum_middleware,
    response::IntoResponse,
    routing::{get, post},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use reqwest::Client;
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::db::services::ChannelStore;
use crate::notifications::encryption::EncryptionService;
use crate::notifications::service::NotificationService;
use crate::server::config::ServerConfig;
use crate::services::auth_service;
use crate::web::{
    middleware::auth,
    models::{AuthenticatedUser, LoginRequest, RegisterRequest, UserResponse},
    routes::*,
};

pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;

pub use error::AppError;

/// Name of the cookie carrying the session JWT.
pub const SESSION_COOKIE: &str = "session";

#[derive(Clone)]
pub struct AppState {
    pub db_pool: SqlitePool,
    pub channel_store: ChannelStore,
    pub notification_service: Arc<NotificationService>,
    pub config: Arc<ServerConfig>,
}

async fn register_handler(
    State(app_state): State<Arc<AppState>>,
    Json(payload): Json<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user = auth_service::register_user(
        &app_state.db_pool,
        payload,
        app_state.config.registration_enabled,
    )
    .await?;
    Ok((axum::http::StatusCode::CREATED, Json(user)))
}

async fn login_handler(
    State(app_state): State<Arc<AppState>>,
    jar: CookieJar,
    Json(payload): Json<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let login_response =
        auth_service::login_user(&app_state.db_pool, payload, &app_state.config.secret_key).await?;

    let session_cookie = Cookie::build((SESSION_COOKIE, login_response.token.clone()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(true)
        .build();

    Ok((jar.add(session_cookie), Json(login_response)))
}

async fn me_handler(
    State(app_state): State<Arc<AppState>>,
    axum::Extension(user): axum::Extension<AuthenticatedUser>,
) -> Result<Json<UserResponse>, AppError> {
    let user = crate::db::services::get_user_by_id(&app_state.db_pool, user.id)
        .await?
        .ok_or_else(|| AppError::Unauthorized("User no longer exists".to_string()))?;
    Ok(Json(UserResponse {
        id: user.id,
        username: user.username,
        email: user.email,
    }))
}

async fn health_check_handler() -> &'static str {
    "OK"
}

pub fn create_axum_router(
    db_pool: SqlitePool,
    encryption_service: Arc<EncryptionService>,
    http_client: Client,
    config: Arc<ServerConfig>,
) -> Router {
    let channel_store = ChannelStore::new(db_pool.clone(), encryption_service);
    let notification_service = Arc::new(NotificationService::new(
        db_pool.clone(),
        channel_store.clone(),
        http_client,
    ));

    let app_state = Arc::new(AppState {
        db_pool,
        channel_store,
        notification_service,
        config,
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(vec![Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(health_check_handler))
        .route("/api/notify", post(notify_routes::notify))
        .route("/api/auth/register", post(register_handler))
        .route("/api/auth/login", post(login_handler))
        .route(
            "/api/auth/me",
            get(me_handler).route_layer(axum_middleware::from_fn_with_state(app_state.clone(), auth::auth)),
        )
        .nest(
            "/api/user",
            user_routes::create_user_router()
                .route_layer(axum_middleware::from_fn_with_state(app_state.clone(), auth::auth)),
        )
        .nest(
            "/api/channels",
            channel_routes::create_channel_router()
                .route_layer(axum_middleware::from_fn_with_state(app_state.clone(), auth::auth)),
        )
        .with_state(app_state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
