use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
};
use serde_json::Value;
use std::sync::Arc;

use crate::web::{
    AppError, AppState,
    models::{NotifyRequest, StatusResponse},
};

fn present(value: Option<&str>) -> Option<&str> {
    value.filter(|s| !s.is_empty())
}

fn channel_id(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// `POST /api/notify`: the public dispatch endpoint, authenticated by the
/// caller's API token rather than a session.
pub async fn notify(
    State(app_state): State<Arc<AppState>>,
    payload: Result<Json<NotifyRequest>, JsonRejection>,
) -> Result<Json<StatusResponse>, AppError> {
    let missing = || AppError::InvalidInput("missing required parameter".to_string());
    let Json(request) = payload.map_err(|_| missing())?;

    let token = present(request.token.as_deref()).ok_or_else(missing)?;
    let channel_id = channel_id(request.id.as_ref()).ok_or_else(missing)?;
    // Empty content is still content; the channel decides whether it is usable.
    let content = match request.content {
        None | Some(Value::Null) => return Err(missing()),
        Some(ref content) => content,
    };

    app_state
        .notification_service
        .dispatch(token, &channel_id, content)
        .await?;

    Ok(Json(StatusResponse::success("notification sent")))
}
