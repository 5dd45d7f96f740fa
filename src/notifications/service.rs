use reqwest::Client;
use serde_json::Value;
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::{error, info, warn};

use super::models::{ChannelTemplate, ChannelTemplateField, ChannelType};
use super::senders::{SenderError, sender_for};
use crate::db::models::{NotificationChannel, User};
use crate::db::services::{ChannelStore, StoreError};
use crate::services::auth_service::{self, AuthenticationError};

/// Outcome of a failed dispatch. Only `Transport` is worth retrying as is;
/// every other kind needs the caller or the channel owner to change something.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("invalid token")]
    Unauthorized,
    #[error("channel id not found")]
    NotFound,
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    ServerError(String),
    #[error("{0}")]
    Transport(String),
}

impl DispatchError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, DispatchError::Transport(_))
    }
}

impl From<SenderError> for DispatchError {
    fn from(err: SenderError) -> Self {
        match err {
            SenderError::InvalidJson(_) => DispatchError::BadRequest(err.to_string()),
            SenderError::NetworkError(_) => DispatchError::Transport(err.to_string()),
            SenderError::SendFailed(_)
            | SenderError::InvalidConfiguration(_)
            | SenderError::InvalidContent(_) => DispatchError::ServerError(err.to_string()),
        }
    }
}

impl From<StoreError> for DispatchError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound | StoreError::PermissionDenied => DispatchError::NotFound,
            other => DispatchError::ServerError(other.to_string()),
        }
    }
}

impl From<AuthenticationError> for DispatchError {
    fn from(err: AuthenticationError) -> Self {
        match err {
            AuthenticationError::InvalidToken => DispatchError::Unauthorized,
            AuthenticationError::Database(e) => DispatchError::ServerError(format!("Database error: {e}")),
        }
    }
}

/// Resolves channels and forwards content through the matching provider sender.
pub struct NotificationService {
    db_pool: SqlitePool,
    channels: ChannelStore,
    http_client: Client,
}

impl NotificationService {
    pub fn new(db_pool: SqlitePool, channels: ChannelStore, http_client: Client) -> Self {
        Self {
            db_pool,
            channels,
            http_client,
        }
    }

    /// Authenticates `token` and sends `content` to the caller's channel named `channel_id`.
    pub async fn dispatch(
        &self,
        token: &str,
        channel_id: &str,
        content: &Value,
    ) -> Result<(), DispatchError> {
        let user = auth_service::authenticate_token(&self.db_pool, token).await?;
        self.dispatch_for_user(&user, channel_id, content).await
    }

    /// Sends `content` to one of `user`'s channels.
    pub async fn dispatch_for_user(
        &self,
        user: &User,
        channel_id: &str,
        content: &Value,
    ) -> Result<(), DispatchError> {
        let channel = self
            .channels
            .find_by_owner_and_channel_id(user.id, channel_id)
            .await?;
        self.send_to_channel(&channel, content).await
    }

    /// Decrypts the channel's configuration and invokes its sender once.
    pub async fn send_to_channel(
        &self,
        channel: &NotificationChannel,
        content: &Value,
    ) -> Result<(), DispatchError> {
        let config = self.channels.decrypted_config(channel).map_err(|e| {
            error!(
                user_id = channel.user_id,
                channel_id = %channel.channel_id,
                error = %e,
                "Failed to read channel configuration."
            );
            DispatchError::ServerError(e.to_string())
        })?;

        let channel_type: ChannelType = channel.channel_type.parse().map_err(|_| {
            warn!(
                user_id = channel.user_id,
                channel_type = %channel.channel_type,
                "Channel has an unsupported type."
            );
            DispatchError::BadRequest("unsupported channel type".to_string())
        })?;

        let sender = sender_for(channel_type, self.http_client.clone());
        match sender.send(&config, content).await {
            Ok(()) => {
                info!(
                    user_id = channel.user_id,
                    channel_id = %channel.channel_id,
                    channel_type = %channel_type,
                    "Notification sent."
                );
                Ok(())
            }
            Err(e) => {
                warn!(
                    user_id = channel.user_id,
                    channel_id = %channel.channel_id,
                    channel_type = %channel_type,
                    error = %e,
                    "Notification failed."
                );
                Err(e.into())
            }
        }
    }

    /// Sends a test message through `channel`, defaulting to a short greeting.
    pub async fn test_channel(
        &self,
        channel: &NotificationChannel,
        content: Option<Value>,
    ) -> Result<(), DispatchError> {
        let content = content.unwrap_or_else(|| {
            Value::String(format!(
                "This is a test message from channel '{}'.",
                channel.channel_id
            ))
        });
        self.send_to_channel(channel, &content).await
    }

    /// Field lists for each provider, used to build channel forms.
    pub fn get_channel_templates(&self) -> Vec<ChannelTemplate> {
        fn field(name: &str, field_type: &str, required: bool, label: &str, help: Option<&str>) -> ChannelTemplateField {
            ChannelTemplateField {
                name: name.to_string(),
                field_type: field_type.to_string(),
                required,
                label: label.to_string(),
                help_text: help.map(str::to_string),
            }
        }
        let webhook_url = || field("webhook_url", "text", true, "Webhook URL", None);
        let msg_type = || field("msg_type", "text", false, "Message Type", Some("text or markdown."));

        vec![
            ChannelTemplate {
                channel_type: ChannelType::Email,
                name: "Email (SMTP)".to_string(),
                fields: vec![
                    field("smtp_server", "text", true, "SMTP Server", None),
                    field("smtp_port", "number", false, "SMTP Port", Some("Defaults to 465.")),
                    field("smtp_username", "text", true, "Username", Some("Also used as the sender address.")),
                    field("smtp_password", "password", true, "Password", None),
                    field("use_ssl", "boolean", false, "Use SSL", Some("Implicit TLS. Port 465 always uses it.")),
                ],
            },
            ChannelTemplate {
                channel_type: ChannelType::Sms,
                name: "Aliyun SMS".to_string(),
                fields: vec![
                    field("access_key_id", "text", true, "AccessKey ID", None),
                    field("access_key_secret", "password", true, "AccessKey Secret", None),
                ],
            },
            ChannelTemplate {
                channel_type: ChannelType::Telegram,
                name: "Telegram".to_string(),
                fields: vec![
                    field("api_url", "text", true, "API URL", Some("Usually https://api.telegram.org.")),
                    field("bot_token", "password", true, "Bot Token", Some("Your Telegram Bot Token.")),
                    field("chat_id", "text", true, "Chat ID", Some("The target chat ID (user, group, or channel).")),
                    field("is_proxy", "boolean", false, "Use Proxy", None),
                    field("https_proxy", "text", false, "HTTPS Proxy", Some("Required when the proxy is enabled.")),
                ],
            },
            ChannelTemplate {
                channel_type: ChannelType::DingTalk,
                name: "DingTalk".to_string(),
                fields: vec![
                    webhook_url(),
                    field("secret", "password", false, "Signing Secret", None),
                    msg_type(),
                    field("title", "text", false, "Markdown Title", None),
                    field("at_mobiles", "text", false, "Mention Mobiles", None),
                ],
            },
            ChannelTemplate {
                channel_type: ChannelType::Feishu,
                name: "Feishu".to_string(),
                fields: vec![webhook_url()],
            },
            ChannelTemplate {
                channel_type: ChannelType::WeChat,
                name: "WeChat Work".to_string(),
                fields: vec![webhook_url(), msg_type()],
            },
            ChannelTemplate {
                channel_type: ChannelType::Webhook,
                name: "Custom Webhook".to_string(),
                fields: vec![field(
                    "webhook_url",
                    "text",
                    true,
                    "Webhook URL",
                    Some("Content must be a JSON string; it is posted as the request body."),
                )],
            },
        ]
    }
}
