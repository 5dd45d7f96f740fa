use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// The provider kinds a channel can be bound to.
/// The serialized names are the values stored in `notification_channels.channel_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelType {
    #[serde(rename = "smtp", alias = "email")]
    Email,
    #[serde(rename = "sms")]
    Sms,
    #[serde(rename = "tg", alias = "telegram")]
    Telegram,
    #[serde(rename = "dingtalk")]
    DingTalk,
    #[serde(rename = "feishu")]
    Feishu,
    #[serde(rename = "wechat")]
    WeChat,
    #[serde(rename = "webhook")]
    Webhook,
}

impl ChannelType {
    pub const ALL: [ChannelType; 7] = [
        ChannelType::Email,
        ChannelType::Sms,
        ChannelType::Telegram,
        ChannelType::DingTalk,
        ChannelType::Feishu,
        ChannelType::WeChat,
        ChannelType::Webhook,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelType::Email => "smtp",
            ChannelType::Sms => "sms",
            ChannelType::Telegram => "tg",
            ChannelType::DingTalk => "dingtalk",
            ChannelType::Feishu => "feishu",
            ChannelType::WeChat => "wechat",
            ChannelType::Webhook => "webhook",
        }
    }
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unsupported channel type: {0}")]
pub struct UnsupportedChannelType(pub String);

impl FromStr for ChannelType {
    type Err = UnsupportedChannelType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "smtp" | "email" => Ok(ChannelType::Email),
            "sms" => Ok(ChannelType::Sms),
            "tg" | "telegram" => Ok(ChannelType::Telegram),
            "dingtalk" => Ok(ChannelType::DingTalk),
            "feishu" => Ok(ChannelType::Feishu),
            "wechat" => Ok(ChannelType::WeChat),
            "webhook" => Ok(ChannelType::Webhook),
            _ => Err(UnsupportedChannelType(s.to_string())),
        }
    }
}

// --- Provider configurations ---
//
// Each struct mirrors the JSON object a user stores for that channel type.
// They are deserialized from the decrypted config at send time, so a missing
// required field surfaces as a sender error naming that field.

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    pub smtp_server: String,
    pub smtp_username: String,
    pub smtp_password: String,
    #[serde(default = "default_smtp_port", deserialize_with = "port_from_number_or_string")]
    pub smtp_port: u16,
    #[serde(default)]
    pub use_ssl: bool,
}

fn default_smtp_port() -> u16 {
    465
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmsConfig {
    pub access_key_id: String,
    pub access_key_secret: String,
    /// Overrides the public Dysms endpoint.
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    pub api_url: String,
    pub bot_token: String,
    #[serde(deserialize_with = "string_from_number_or_string")]
    pub chat_id: String,
    #[serde(default)]
    pub is_proxy: bool,
    pub https_proxy: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageFormat {
    #[default]
    Text,
    Markdown,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DingTalkConfig {
    pub webhook_url: String,
    pub secret: Option<String>,
    #[serde(default)]
    pub msg_type: MessageFormat,
    pub title: Option<String>,
    #[serde(default)]
    pub at_mobiles: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeishuConfig {
    pub webhook_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WeChatConfig {
    pub webhook_url: String,
    #[serde(default)]
    pub msg_type: MessageFormat,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    pub webhook_url: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(serde_json::Number),
    String(String),
}

fn string_from_number_or_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Number(n) => Ok(n.to_string()),
        NumberOrString::String(s) => Ok(s),
    }
}

fn port_from_number_or_string<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = string_from_number_or_string(deserializer)?;
    raw.trim()
        .parse::<u16>()
        .map_err(|_| serde::de::Error::custom("smtp_port must be a valid port number"))
}

// --- Management API models ---

/// Defines the structure for a field in a channel template for the frontend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelTemplateField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String, // e.g., "text", "password", "boolean"
    pub required: bool,
    pub label: String,
    pub help_text: Option<String>,
}

/// Defines the template for a channel type, used to dynamically generate UI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelTemplate {
    pub channel_type: ChannelType,
    pub name: String,
    pub fields: Vec<ChannelTemplateField>,
}

/// API request body for creating or replacing a notification channel.
/// Updates are always a full replace, so both operations share this shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelRequest {
    pub channel_id: String,
    pub channel_type: String,
    pub config: serde_json::Value,
}

/// API response for a notification channel.
/// `config` is only populated on the single-channel read used by edit forms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelResponse {
    pub id: i64,
    pub channel_id: String,
    pub channel_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<serde_json::Value>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// API request for sending a test notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestChannelRequest {
    pub content: Option<serde_json::Value>,
}
