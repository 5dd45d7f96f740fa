use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};

use super::{NotificationSender, SenderError, parse_config, read_json_response, text_content};
use crate::notifications::models::FeishuConfig;

/// A sender for Feishu (Lark) custom bot webhooks.
pub struct FeishuSender {
    client: Client,
}

impl FeishuSender {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl NotificationSender for FeishuSender {
    async fn send(&self, config: &Value, content: &Value) -> Result<(), SenderError> {
        let config: FeishuConfig = parse_config(config)?;

        let payload = json!({
            "msg_type": "text",
            "content": { "text": text_content(content) }
        });

        let response = self.client.post(&config.webhook_url).json(&payload).send().await?;
        let result = read_json_response(response, "Feishu").await?;

        match result.get("code").and_then(Value::as_i64) {
            Some(0) => Ok(()),
            _ => Err(SenderError::SendFailed(format!(
                "Feishu rejected the message: {}",
                result.get("msg").and_then(Value::as_str).unwrap_or("unknown error")
            ))),
        }
    }
}
