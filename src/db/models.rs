use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Represents a user in the system.
/// Corresponds to the `users` table.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    /// Bearer token for the dispatch API. Rotating it invalidates the old value.
    #[serde(skip_serializing)]
    pub token: String,
    pub created_at: DateTime<Utc>,
}

/// Represents a notification channel configured by a user.
/// Corresponds to the `notification_channels` table.
#[derive(Debug, Clone, FromRow)]
pub struct NotificationChannel {
    pub id: i64,
    pub user_id: i64,
    /// User-scoped identifier named by dispatch callers.
    pub channel_id: String,
    pub channel_type: String,
    /// Encrypted configuration (base64), or plain JSON for legacy rows.
    pub config: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
