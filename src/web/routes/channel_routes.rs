use axum::{
    Extension, Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use std::sync::Arc;
use tracing::info;

use crate::{
    db::models::NotificationChannel,
    notifications::models::{
        ChannelRequest, ChannelResponse, ChannelTemplate, ChannelType, TestChannelRequest,
    },
    web::{
        AppError, AppState,
        models::{AuthenticatedUser, StatusResponse},
    },
};

pub fn create_channel_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(get_all_channels).post(create_channel))
        .route("/templates", get(get_channel_templates))
        .route(
            "/{id}",
            get(get_channel_by_id)
                .put(update_channel)
                .delete(delete_channel),
        )
        .route("/{id}/test", post(test_channel))
}

fn to_response(channel: NotificationChannel, config: Option<serde_json::Value>) -> ChannelResponse {
    ChannelResponse {
        id: channel.id,
        channel_id: channel.channel_id,
        channel_type: channel.channel_type,
        config,
        created_at: channel.created_at,
        updated_at: channel.updated_at,
    }
}

fn parse_channel_type(raw: &str) -> Result<ChannelType, AppError> {
    raw.parse::<ChannelType>()
        .map_err(|e| AppError::InvalidInput(e.to_string()))
}

async fn get_channel_templates(
    State(app_state): State<Arc<AppState>>,
) -> Json<Vec<ChannelTemplate>> {
    Json(app_state.notification_service.get_channel_templates())
}

async fn create_channel(
    State(app_state): State<Arc<AppState>>,
    Extension(authenticated_user): Extension<AuthenticatedUser>,
    Json(payload): Json<ChannelRequest>,
) -> Result<impl IntoResponse, AppError> {
    let channel_type = parse_channel_type(&payload.channel_type)?;
    let channel = app_state
        .channel_store
        .create(authenticated_user.id, payload.channel_id.trim(), channel_type, &payload.config)
        .await?;
    info!(
        user_id = authenticated_user.id,
        channel_id = %channel.channel_id,
        channel_type = %channel.channel_type,
        "Channel created."
    );
    Ok((StatusCode::CREATED, Json(to_response(channel, None))))
}

async fn get_all_channels(
    State(app_state): State<Arc<AppState>>,
    Extension(authenticated_user): Extension<AuthenticatedUser>,
) -> Result<Json<Vec<ChannelResponse>>, AppError> {
    let channels = app_state
        .channel_store
        .list_for_owner(authenticated_user.id)
        .await?
        .into_iter()
        .map(|channel| to_response(channel, None))
        .collect();
    Ok(Json(channels))
}

async fn get_channel_by_id(
    State(app_state): State<Arc<AppState>>,
    Extension(authenticated_user): Extension<AuthenticatedUser>,
    Path(id): Path<i64>,
) -> Result<Json<ChannelResponse>, AppError> {
    let channel = app_state
        .channel_store
        .get_owned(id, authenticated_user.id)
        .await?;
    let config = app_state.channel_store.decrypted_config(&channel)?;
    Ok(Json(to_response(channel, Some(config))))
}

async fn update_channel(
    State(app_state): State<Arc<AppState>>,
    Extension(authenticated_user): Extension<AuthenticatedUser>,
    Path(id): Path<i64>,
    Json(payload): Json<ChannelRequest>,
) -> Result<Json<ChannelResponse>, AppError> {
    let channel_type = parse_channel_type(&payload.channel_type)?;
    let channel = app_state
        .channel_store
        .update(
            id,
            authenticated_user.id,
            payload.channel_id.trim(),
            channel_type,
            &payload.config,
        )
        .await?;
    info!(user_id = authenticated_user.id, channel_id = %channel.channel_id, "Channel updated.");
    Ok(Json(to_response(channel, None)))
}

async fn delete_channel(
    State(app_state): State<Arc<AppState>>,
    Extension(authenticated_user): Extension<AuthenticatedUser>,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    app_state
        .channel_store
        .delete(id, authenticated_user.id)
        .await?;
    info!(user_id = authenticated_user.id, id, "Channel deleted.");
    Ok(StatusCode::NO_CONTENT)
}

async fn test_channel(
    State(app_state): State<Arc<AppState>>,
    Extension(authenticated_user): Extension<AuthenticatedUser>,
    Path(id): Path<i64>,
    payload: Result<Json<TestChannelRequest>, JsonRejection>,
) -> Result<Json<StatusResponse>, AppError> {
    let channel = app_state
        .channel_store
        .get_owned(id, authenticated_user.id)
        .await?;
    // A missing or empty body falls back to the default test message.
    let content = payload.ok().and_then(|Json(req)| req.content);
    app_state
        .notification_service
        .test_channel(&channel, content)
        .await?;
    Ok(Json(StatusResponse::success("Test notification sent successfully.")))
}
