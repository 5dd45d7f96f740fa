use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{Client, Url};
use serde_json::{Value, json};
use sha2::Sha256;

use super::{NotificationSender, SenderError, check_errcode, parse_config, read_json_response, text_content};
use crate::notifications::models::{DingTalkConfig, MessageFormat};

type HmacSha256 = Hmac<Sha256>;

/// A sender for DingTalk custom robot webhooks, with optional signing.
pub struct DingTalkSender {
    client: Client,
}

impl DingTalkSender {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

/// Base64 HMAC-SHA256 of `"{timestamp}\n{secret}"`, keyed with the secret.
pub fn sign(secret: &str, timestamp_ms: i64) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(format!("{timestamp_ms}\n{secret}").as_bytes());
    STANDARD.encode(mac.finalize().into_bytes())
}

/// Appends `timestamp` and `sign` to the webhook URL. The query serializer
/// escapes the base64 signature (`+`, `/`, `=`).
pub fn signed_url(webhook_url: &str, secret: &str, timestamp_ms: i64) -> Result<Url, SenderError> {
    let mut url = Url::parse(webhook_url)
        .map_err(|_| SenderError::InvalidConfiguration("webhook_url is not a valid URL".to_string()))?;
    url.query_pairs_mut()
        .append_pair("timestamp", &timestamp_ms.to_string())
        .append_pair("sign", &sign(secret, timestamp_ms));
    Ok(url)
}

fn build_payload(config: &DingTalkConfig, text: String) -> Value {
    let mut payload = match config.msg_type {
        MessageFormat::Text => json!({
            "msgtype": "text",
            "text": { "content": text }
        }),
        MessageFormat::Markdown => json!({
            "msgtype": "markdown",
            "markdown": {
                "title": config.title.as_deref().unwrap_or("通知"),
                "text": text
            }
        }),
    };
    if !config.at_mobiles.is_empty() {
        payload["at"] = json!({
            "atMobiles": config.at_mobiles,
            "isAtAll": false
        });
    }
    payload
}

#[async_trait]
impl NotificationSender for DingTalkSender {
    async fn send(&self, config: &Value, content: &Value) -> Result<(), SenderError> {
        let config: DingTalkConfig = parse_config(config)?;

        let url = match config.secret.as_deref().filter(|s| !s.is_empty()) {
            Some(secret) => signed_url(&config.webhook_url, secret, Utc::now().timestamp_millis())?,
            None => Url::parse(&config.webhook_url).map_err(|_| {
                SenderError::InvalidConfiguration("webhook_url is not a valid URL".to_string())
            })?,
        };

        let payload = build_payload(&config, text_content(content));
        let response = self.client.post(url).json(&payload).send().await?;
        let result = read_json_response(response, "DingTalk").await?;
        check_errcode(&result, "DingTalk")
    }
}
