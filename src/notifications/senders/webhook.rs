use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use super::{NotificationSender, SenderError, parse_config};
use crate::notifications::models::WebhookConfig;

/// A sender for pushing caller-supplied JSON to an arbitrary webhook.
pub struct WebhookSender {
    client: Client,
}

impl WebhookSender {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

/// The body to forward. Content must be a JSON-encoded string; it is decoded
/// and sent as the request body.
fn payload_from_content(content: &Value) -> Result<Value, SenderError> {
    match content {
        Value::String(raw) => serde_json::from_str(raw)
            .map_err(|e| SenderError::InvalidJson(format!("content is not valid JSON: {e}"))),
        _ => Err(SenderError::InvalidJson(
            "content must be a JSON-encoded string".to_string(),
        )),
    }
}

/// Interprets the receiver's reply. A 2xx reply counts as delivered unless it
/// carries a non-zero `errcode`.
fn check_response(status: reqwest::StatusCode, body: &str) -> Result<(), SenderError> {
    let parsed = serde_json::from_str::<Value>(body).ok();
    let errcode = parsed
        .as_ref()
        .and_then(|v| v.get("errcode"))
        .map(|code| code.as_i64().unwrap_or(-1));

    match errcode {
        Some(0) => Ok(()),
        Some(_) => Err(SenderError::SendFailed(format!(
            "Webhook rejected the message: {}",
            parsed
                .as_ref()
                .and_then(|v| v.get("errmsg"))
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
        ))),
        None if status.is_success() => Ok(()),
        None => Err(SenderError::SendFailed(format!(
            "Webhook returned non-success status: {status}"
        ))),
    }
}

#[async_trait]
impl NotificationSender for WebhookSender {
    async fn send(&self, config: &Value, content: &Value) -> Result<(), SenderError> {
        // Content is validated before anything else so bad input never reaches the network.
        let payload = payload_from_content(content)?;
        let config: WebhookConfig = parse_config(config)?;

        let response = self.client.post(&config.webhook_url).json(&payload).send().await?;
        let status = response.status();
        let body = response.text().await?;
        check_response(status, &body)
    }
}
