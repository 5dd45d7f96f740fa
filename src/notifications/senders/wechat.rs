use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};

use super::{NotificationSender, SenderError, check_errcode, parse_config, read_json_response, text_content};
use crate::notifications::models::{MessageFormat, WeChatConfig};

/// A sender for WeChat Work (WeCom) group robot webhooks.
pub struct WeChatSender {
    client: Client,
}

impl WeChatSender {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn build_payload(format: MessageFormat, text: String) -> Value {
    match format {
        MessageFormat::Text => json!({ "msgtype": "text", "text": { "content": text } }),
        MessageFormat::Markdown => json!({ "msgtype": "markdown", "markdown": { "content": text } }),
    }
}

#[async_trait]
impl NotificationSender for WeChatSender {
    async fn send(&self, config: &Value, content: &Value) -> Result<(), SenderError> {
        let config: WeChatConfig = parse_config(config)?;
        let payload = build_payload(config.msg_type, text_content(content));

        let response = self.client.post(&config.webhook_url).json(&payload).send().await?;
        let result = read_json_response(response, "WeChat").await?;
        check_errcode(&result, "WeChat")
    }
}
