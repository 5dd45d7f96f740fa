use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::time::Duration;
use thiserror::Error;

use super::models::ChannelType;

pub mod dingtalk;
pub mod email;
pub mod feishu;
pub mod sms;
pub mod telegram;
pub mod webhook;
pub mod wechat;

/// Connect/read budget for every outbound provider call.
pub const SEND_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum SenderError {
    #[error("{0}")]
    SendFailed(String),
    #[error("Invalid configuration for sender: {0}")]
    InvalidConfiguration(String),
    #[error("Invalid content: {0}")]
    InvalidContent(String),
    /// Caller content that had to be JSON text and was not.
    #[error("Invalid JSON content: {0}")]
    InvalidJson(String),
    #[error("Network error: {0}")]
    NetworkError(String),
}

impl From<reqwest::Error> for SenderError {
    fn from(err: reqwest::Error) -> Self {
        // Webhook and bot URLs carry credentials, so they never reach the message.
        SenderError::NetworkError(error_chain(&err.without_url()))
    }
}

/// Joins an error with its sources, e.g. "error sending request: connection refused".
pub(crate) fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}

/// A trait for sending notifications to a specific channel type.
/// All concrete sender implementations (e.g., Telegram, Webhook) must implement this trait.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    /// Sends a notification.
    ///
    /// # Arguments
    ///
    /// * `config` - The decrypted channel configuration object.
    /// * `content` - The caller-supplied content: a plain string for chat style
    ///   channels, a JSON object (or JSON-encoded string) for structured ones.
    async fn send(&self, config: &Value, content: &Value) -> Result<(), SenderError>;
}

/// Returns the sender implementation for a channel type.
pub fn sender_for(channel_type: ChannelType, client: Client) -> Box<dyn NotificationSender> {
    match channel_type {
        ChannelType::Email => Box::new(email::EmailSender::new()),
        ChannelType::Sms => Box::new(sms::SmsSender::new(client)),
        ChannelType::Telegram => Box::new(telegram::TelegramSender::new(client)),
        ChannelType::DingTalk => Box::new(dingtalk::DingTalkSender::new(client)),
        ChannelType::Feishu => Box::new(feishu::FeishuSender::new(client)),
        ChannelType::WeChat => Box::new(wechat::WeChatSender::new(client)),
        ChannelType::Webhook => Box::new(webhook::WebhookSender::new(client)),
    }
}

/// Builds the shared HTTP client used by all webhook-style senders.
pub fn build_http_client() -> Result<Client, reqwest::Error> {
    Client::builder()
        .timeout(SEND_TIMEOUT)
        .connect_timeout(SEND_TIMEOUT)
        .build()
}

/// Deserializes a provider config, keeping only the field name from serde's
/// message so configured values never end up in an error.
pub(crate) fn parse_config<T: DeserializeOwned>(config: &Value) -> Result<T, SenderError> {
    serde_json::from_value(config.clone()).map_err(|e| {
        let message = e.to_string();
        if message.starts_with("missing field") || message.starts_with("smtp_port") {
            SenderError::InvalidConfiguration(message)
        } else if message.starts_with("unknown variant") {
            // e.g. "unknown variant `html`, expected `text` or `markdown`"
            SenderError::InvalidConfiguration(format!("msg_type {}", &message["unknown ".len()..]))
        } else if let Some(field) = offending_field::<T>(config) {
            // "invalid type: string \"true\", expected a boolean": only the tail is safe.
            let expected = message
                .split_once(", expected ")
                .map(|(_, expected)| format!(", expected {expected}"))
                .unwrap_or_default();
            SenderError::InvalidConfiguration(format!("invalid value for field `{field}`{expected}"))
        } else {
            SenderError::InvalidConfiguration("malformed channel configuration".to_string())
        }
    })
}

/// serde_json reports type errors without a path. The culprit is the key whose
/// removal makes the config parse, or turns the failure into its own
/// "missing field".
fn offending_field<T: DeserializeOwned>(config: &Value) -> Option<String> {
    let map = config.as_object()?;
    map.keys()
        .find(|key| {
            let mut trimmed = map.clone();
            trimmed.remove(key.as_str());
            match serde_json::from_value::<T>(Value::Object(trimmed)) {
                Ok(_) => true,
                Err(e) => e.to_string() == format!("missing field `{key}`"),
            }
        })
        .cloned()
}

/// Renders content for text based channels. Strings pass through untouched,
/// anything else is sent as its JSON text.
pub(crate) fn text_content(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Interprets content as a JSON object, decoding it first when it arrives as a
/// JSON-encoded string.
pub(crate) fn object_content(content: &Value) -> Result<Map<String, Value>, SenderError> {
    let value = match content {
        Value::String(s) => serde_json::from_str::<Value>(s).map_err(|_| {
            SenderError::InvalidContent("content must be a JSON object or JSON string".to_string())
        })?,
        other => other.clone(),
    };
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(SenderError::InvalidContent(
            "content must be a JSON object".to_string(),
        )),
    }
}

/// Reads a response body as JSON. A non-JSON body is an error that mentions the
/// HTTP status so misrouted webhooks are easy to spot.
pub(crate) async fn read_json_response(response: Response, provider: &str) -> Result<Value, SenderError> {
    let status = response.status();
    let body = response.text().await?;
    serde_json::from_str::<Value>(&body).map_err(|_| {
        SenderError::SendFailed(format!(
            "{provider} returned a non-JSON response (HTTP {status})"
        ))
    })
}

/// Checks the `errcode`/`errmsg` convention shared by DingTalk and WeChat webhooks.
pub(crate) fn check_errcode(result: &Value, provider: &str) -> Result<(), SenderError> {
    match result.get("errcode").and_then(Value::as_i64) {
        Some(0) => Ok(()),
        _ => Err(SenderError::SendFailed(format!(
            "{provider} rejected the message: {}",
            result.get("errmsg").and_then(Value::as_str).unwrap_or("unknown error")
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::models::{SmtpConfig, TelegramConfig};
    use serde_json::json;

    #[test]
    fn config_errors_cite_field_but_not_values() {
        let err = parse_config::<TelegramConfig>(&json!({"api_url": "https://x", "chat_id": "1"}))
            .unwrap_err();
        assert!(err.to_string().contains("bot_token"));

        let err = parse_config::<TelegramConfig>(&json!({
            "api_url": "https://x", "bot_token": 12345678, "chat_id": "1"
        }))
        .unwrap_err();
        assert!(!err.to_string().contains("12345678"));
        assert!(err.to_string().contains("bot_token"));
    }

    #[test]
    fn type_errors_name_the_field() {
        let err = parse_config::<SmtpConfig>(&json!({
            "smtp_server": "smtp.example.com",
            "smtp_username": "ops",
            "smtp_password": "hunter22",
            "use_ssl": "true"
        }))
        .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("use_ssl"), "{message}");
        assert!(message.contains("expected a boolean"), "{message}");
        assert!(!message.contains("hunter22"));

        let err = parse_config::<TelegramConfig>(&json!({
            "api_url": "https://x", "bot_token": "1:a", "chat_id": "1", "is_proxy": "true"
        }))
        .unwrap_err();
        assert!(err.to_string().contains("is_proxy"));
    }

    #[test]
    fn object_content_accepts_objects_and_encoded_strings() {
        let direct = object_content(&json!({"a": 1})).unwrap();
        assert_eq!(direct["a"], 1);

        let encoded = object_content(&json!("{\"b\": \"x\"}")).unwrap();
        assert_eq!(encoded["b"], "x");

        assert!(matches!(
            object_content(&json!("not json")),
            Err(SenderError::InvalidContent(_))
        ));
        assert!(matches!(
            object_content(&json!([1, 2])),
            Err(SenderError::InvalidContent(_))
        ));
    }

    #[test]
    fn errcode_convention() {
        assert!(check_errcode(&json!({"errcode": 0, "errmsg": "ok"}), "DingTalk").is_ok());
        let err = check_errcode(&json!({"errcode": 310000, "errmsg": "sign not match"}), "DingTalk")
            .unwrap_err();
        assert!(err.to_string().contains("sign not match"));
        assert!(check_errcode(&json!({}), "WeChat").is_err());
    }

    #[test]
    fn text_content_passes_strings_through() {
        assert_eq!(text_content(&json!("hello")), "hello");
        assert_eq!(text_content(&json!({"k": 1})), "{\"k\":1}");
    }
}
