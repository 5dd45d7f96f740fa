use axum::{
    Json, Router,
    extract::{Extension, State},
    routing::{get, post},
};
use std::sync::Arc;
use tracing::info;

use crate::{
    db::services::user_service,
    services::auth_service,
    web::{
        AppError, AppState,
        models::{ApiTokenResponse, AuthenticatedUser, RefreshTokenResponse},
    },
};

pub fn create_user_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/token", get(get_api_token))
        .route("/token/refresh", post(refresh_api_token))
}

async fn get_api_token(
    Extension(auth_user): Extension<AuthenticatedUser>,
    State(app_state): State<Arc<AppState>>,
) -> Result<Json<ApiTokenResponse>, AppError> {
    let user = user_service::get_user_by_id(&app_state.db_pool, auth_user.id)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;
    Ok(Json(ApiTokenResponse { token: user.token }))
}

async fn refresh_api_token(
    Extension(auth_user): Extension<AuthenticatedUser>,
    State(app_state): State<Arc<AppState>>,
) -> Result<Json<RefreshTokenResponse>, AppError> {
    let new_token = auth_service::rotate_api_token(&app_state.db_pool, auth_user.id).await?;
    info!(user_id = auth_user.id, "API token rotated.");
    Ok(Json(RefreshTokenResponse {
        status: "success".to_string(),
        new_token,
    }))
}
