//! Reusable helpers for HTTP integration tests.
//!
//! `TestApp` drives the full axum router through `tower::ServiceExt::oneshot`
//! against a private in-memory database.
#![allow(dead_code)]

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, Response, StatusCode, header};
use http_body_util::BodyExt;
use notifyhub::db;
use notifyhub::notifications::encryption::EncryptionService;
use notifyhub::server::config::ServerConfig;
use notifyhub::web::create_axum_router;
use serde_json::{Value, json};
use sqlx::SqlitePool;
use tower::ServiceExt;

pub struct TestApp {
    pub router: Router,
    pub pool: SqlitePool,
}

/// A registered user with both credentials the API knows about.
pub struct TestUser {
    pub session: String,
    pub api_token: String,
}

pub fn test_config() -> ServerConfig {
    ServerConfig {
        secret_key: "test-session-secret".to_string(),
        encryption_key: "test-encryption-key".to_string(),
        database_url: "sqlite::memory:".to_string(),
        ..ServerConfig::default()
    }
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(test_config()).await
    }

    pub async fn with_config(config: ServerConfig) -> Self {
        let pool = db::create_pool(&config.database_url)
            .await
            .expect("Failed to create test pool");
        db::run_migrations(&pool).await.expect("Failed to migrate");

        let encryption = Arc::new(EncryptionService::from_secret(&config.encryption_key));
        let router = create_axum_router(pool.clone(), encryption, reqwest::Client::new(), Arc::new(config));
        Self { router, pool }
    }

    /// Send a request through the router via `tower::ServiceExt::oneshot`.
    pub async fn oneshot(&self, request: Request<Body>) -> Response<Body> {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("oneshot request failed")
    }

    /// Sends a JSON request, optionally with a session bearer token.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        session: Option<&str>,
    ) -> Response<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(session) = session {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {session}"));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("Failed to build request");
        self.oneshot(request).await
    }

    pub async fn notify(&self, body: Value) -> Response<Body> {
        self.request(Method::POST, "/api/notify", Some(body), None).await
    }

    /// Registers and logs in `username`, then fetches their API token.
    pub async fn register_user(&self, username: &str) -> TestUser {
        let response = self
            .request(
                Method::POST,
                "/api/auth/register",
                Some(json!({
                    "username": username,
                    "email": format!("{username}@example.com"),
                    "password": "password123"
                })),
                None,
            )
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = self
            .request(
                Method::POST,
                "/api/auth/login",
                Some(json!({"username": username, "password": "password123"})),
                None,
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let session = body_to_json(response).await["token"]
            .as_str()
            .expect("login token")
            .to_string();

        let response = self.request(Method::GET, "/api/user/token", None, Some(&session)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let api_token = body_to_json(response).await["token"]
            .as_str()
            .expect("api token")
            .to_string();

        TestUser { session, api_token }
    }

    /// Creates a channel through the management API.
    pub async fn create_channel(
        &self,
        user: &TestUser,
        channel_id: &str,
        channel_type: &str,
        config: Value,
    ) -> Response<Body> {
        self.request(
            Method::POST,
            "/api/channels",
            Some(json!({
                "channel_id": channel_id,
                "channel_type": channel_type,
                "config": config
            })),
            Some(&user.session),
        )
        .await
    }
}

pub async fn body_to_json(response: Response<Body>) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("Failed to collect response body")
        .to_bytes();
    serde_json::from_slice(&bytes).unwrap_or_else(|e| {
        let preview = String::from_utf8_lossy(&bytes);
        panic!("Failed to parse response as JSON: {e}\nBody: {preview}")
    })
}
