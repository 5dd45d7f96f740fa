use async_trait::async_trait;
use reqwest::{Client, Proxy};
use serde::Serialize;
use serde_json::Value;

use super::{NotificationSender, SEND_TIMEOUT, SenderError, parse_config, read_json_response, text_content};
use crate::notifications::models::TelegramConfig;

/// A sender for pushing notifications via the Telegram Bot API.
pub struct TelegramSender {
    client: Client,
}

impl TelegramSender {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Picks the client for this config. Proxied channels get a dedicated client;
    /// a proxy flag without a proxy URL is rejected rather than sent directly.
    fn client_for(&self, config: &TelegramConfig) -> Result<Client, SenderError> {
        if !config.is_proxy {
            return Ok(self.client.clone());
        }
        let proxy_url = config
            .https_proxy
            .as_deref()
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| {
                SenderError::InvalidConfiguration(
                    "is_proxy is enabled but https_proxy is not configured".to_string(),
                )
            })?;
        let proxy = Proxy::https(proxy_url)
            .map_err(|_| SenderError::InvalidConfiguration("https_proxy is not a valid URL".to_string()))?;
        Client::builder()
            .proxy(proxy)
            .timeout(SEND_TIMEOUT)
            .connect_timeout(SEND_TIMEOUT)
            .build()
            .map_err(SenderError::from)
    }
}

#[derive(Serialize)]
struct TelegramMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'a str,
}

#[async_trait]
impl NotificationSender for TelegramSender {
    async fn send(&self, config: &Value, content: &Value) -> Result<(), SenderError> {
        let config: TelegramConfig = parse_config(config)?;
        let client = self.client_for(&config)?;

        let api_url = format!(
            "{}/bot{}/sendMessage",
            config.api_url.trim_end_matches('/'),
            config.bot_token
        );

        let text = text_content(content);
        let payload = TelegramMessage {
            chat_id: &config.chat_id,
            text: &text,
            parse_mode: "HTML",
        };

        let response = client.post(&api_url).form(&payload).send().await?;
        let status = response.status();
        let result = read_json_response(response, "Telegram").await?;

        if result.get("ok").and_then(Value::as_bool) != Some(true) {
            let description = result
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            return Err(SenderError::SendFailed(format!(
                "Telegram API error (HTTP {status}): {description}"
            )));
        }

        Ok(())
    }
}
