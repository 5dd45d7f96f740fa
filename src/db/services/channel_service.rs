use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::Utc;
use serde_json::Value;
use sqlx::SqlitePool;
use tracing::warn;

use super::{StoreError, unique_violation};
use crate::db::models::NotificationChannel;
use crate::notifications::encryption::EncryptionService;
use crate::notifications::models::ChannelType;

/// Durable mapping from `(owner, channel_id)` to a channel. Configurations are
/// encrypted before they are written and decrypted on demand.
#[derive(Clone)]
pub struct ChannelStore {
    pool: SqlitePool,
    encryption: Arc<EncryptionService>,
}

fn duplicate(channel_id: &str) -> StoreError {
    StoreError::Duplicate(format!("Channel ID '{channel_id}' already exists"))
}

fn validate(channel_id: &str, config: &Value) -> Result<(), StoreError> {
    if channel_id.trim().is_empty() {
        return Err(StoreError::InvalidInput("channel_id must not be empty".to_string()));
    }
    if !config.is_object() {
        return Err(StoreError::InvalidInput("config must be a JSON object".to_string()));
    }
    Ok(())
}

impl ChannelStore {
    pub fn new(pool: SqlitePool, encryption: Arc<EncryptionService>) -> Self {
        Self { pool, encryption }
    }

    fn encrypt_config(&self, config: &Value) -> Result<String, StoreError> {
        let plaintext = serde_json::to_vec(config)
            .map_err(|e| StoreError::InvalidInput(e.to_string()))?;
        Ok(STANDARD.encode(self.encryption.encrypt(&plaintext)?))
    }

    /// Creates a channel for `owner_id`. The `(owner, channel_id)` pair must be new.
    pub async fn create(
        &self,
        owner_id: i64,
        channel_id: &str,
        channel_type: ChannelType,
        config: &Value,
    ) -> Result<NotificationChannel, StoreError> {
        validate(channel_id, config)?;
        let encrypted = self.encrypt_config(config)?;
        let now = Utc::now();

        sqlx::query_as::<_, NotificationChannel>(
            r#"
            INSERT INTO notification_channels (user_id, channel_id, channel_type, config, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(owner_id)
        .bind(channel_id)
        .bind(channel_type.as_str())
        .bind(encrypted)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match unique_violation(&e) {
            Some(_) => duplicate(channel_id),
            None => StoreError::Database(e),
        })
    }

    pub async fn get(&self, id: i64) -> Result<NotificationChannel, StoreError> {
        sqlx::query_as::<_, NotificationChannel>("SELECT * FROM notification_channels WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound)
    }

    /// Fetches a channel and checks that `owner_id` owns it.
    pub async fn get_owned(&self, id: i64, owner_id: i64) -> Result<NotificationChannel, StoreError> {
        let channel = self.get(id).await?;
        if channel.user_id != owner_id {
            return Err(StoreError::PermissionDenied);
        }
        Ok(channel)
    }

    pub async fn find_by_owner_and_channel_id(
        &self,
        owner_id: i64,
        channel_id: &str,
    ) -> Result<NotificationChannel, StoreError> {
        sqlx::query_as::<_, NotificationChannel>(
            "SELECT * FROM notification_channels WHERE user_id = ? AND channel_id = ?",
        )
        .bind(owner_id)
        .bind(channel_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound)
    }

    pub async fn list_for_owner(&self, owner_id: i64) -> Result<Vec<NotificationChannel>, StoreError> {
        Ok(sqlx::query_as::<_, NotificationChannel>(
            "SELECT * FROM notification_channels WHERE user_id = ? ORDER BY channel_id",
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?)
    }

    /// Replaces `channel_id`, `channel_type` and `config` in one transaction.
    pub async fn update(
        &self,
        id: i64,
        owner_id: i64,
        channel_id: &str,
        channel_type: ChannelType,
        config: &Value,
    ) -> Result<NotificationChannel, StoreError> {
        validate(channel_id, config)?;
        let encrypted = self.encrypt_config(config)?;

        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query_as::<_, NotificationChannel>(
            "SELECT * FROM notification_channels WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::NotFound)?;
        if existing.user_id != owner_id {
            return Err(StoreError::PermissionDenied);
        }

        let collision: Option<(i64,)> = sqlx::query_as(
            "SELECT id FROM notification_channels WHERE user_id = ? AND channel_id = ? AND id != ?",
        )
        .bind(owner_id)
        .bind(channel_id)
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;
        if collision.is_some() {
            return Err(duplicate(channel_id));
        }

        let updated = sqlx::query_as::<_, NotificationChannel>(
            r#"
            UPDATE notification_channels
            SET channel_id = ?, channel_type = ?, config = ?, updated_at = ?
            WHERE id = ?
            RETURNING *
            "#,
        )
        .bind(channel_id)
        .bind(channel_type.as_str())
        .bind(encrypted)
        .bind(Utc::now())
        .bind(id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match unique_violation(&e) {
            Some(_) => duplicate(channel_id),
            None => StoreError::Database(e),
        })?;

        tx.commit().await?;
        Ok(updated)
    }

    pub async fn delete(&self, id: i64, owner_id: i64) -> Result<(), StoreError> {
        self.get_owned(id, owner_id).await?;
        sqlx::query("DELETE FROM notification_channels WHERE id = ? AND user_id = ?")
            .bind(id)
            .bind(owner_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Decrypts and parses a channel's configuration.
    ///
    /// Rows stored before encryption was introduced hold plain JSON; those are
    /// accepted only after decryption has failed. Anything else is corrupt.
    pub fn decrypted_config(&self, channel: &NotificationChannel) -> Result<Value, StoreError> {
        let decrypted = STANDARD
            .decode(channel.config.trim())
            .ok()
            .and_then(|ciphertext| self.encryption.decrypt(&ciphertext).ok());

        if let Some(plaintext) = decrypted {
            return match serde_json::from_slice::<Value>(&plaintext) {
                Ok(config) if config.is_object() => Ok(config),
                _ => Err(StoreError::CorruptConfig),
            };
        }

        match serde_json::from_str::<Value>(&channel.config) {
            Ok(config) if config.is_object() => {
                warn!(channel_id = channel.id, "Read legacy plaintext channel configuration.");
                Ok(config)
            }
            _ => Err(StoreError::CorruptConfig),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::services::user_service::create_user;
    use crate::db::test_pool;
    use serde_json::json;

    async fn setup() -> (ChannelStore, i64, i64) {
        let pool = test_pool().await;
        let alice = create_user(&pool, "alice", "alice@example.com", "hash").await.unwrap();
        let bob = create_user(&pool, "bob", "bob@example.com", "hash").await.unwrap();
        let store = ChannelStore::new(pool, Arc::new(EncryptionService::from_secret("test-key")));
        (store, alice.id, bob.id)
    }

    fn tg_config() -> Value {
        json!({"api_url": "https://api.telegram.org", "bot_token": "123:abc", "chat_id": "42"})
    }

    #[tokio::test]
    async fn created_config_round_trips_and_is_encrypted_at_rest() {
        let (store, alice, _) = setup().await;
        store.create(alice, "tg1", ChannelType::Telegram, &tg_config()).await.unwrap();

        let found = store.find_by_owner_and_channel_id(alice, "tg1").await.unwrap();
        assert_eq!(found.channel_type, "tg");
        assert!(!found.config.contains("123:abc"));
        assert_eq!(store.decrypted_config(&found).unwrap(), tg_config());
    }

    #[tokio::test]
    async fn channel_ids_are_scoped_per_owner() {
        let (store, alice, bob) = setup().await;
        store.create(alice, "alerts", ChannelType::Webhook, &json!({"webhook_url": "https://a"})).await.unwrap();
        store.create(bob, "alerts", ChannelType::Webhook, &json!({"webhook_url": "https://b"})).await.unwrap();

        let err = store
            .create(alice, "alerts", ChannelType::Feishu, &json!({"webhook_url": "https://c"}))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(_)));
        assert_eq!(store.list_for_owner(alice).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn lookups_report_missing_records() {
        let (store, alice, bob) = setup().await;
        let channel = store.create(alice, "tg1", ChannelType::Telegram, &tg_config()).await.unwrap();

        assert!(matches!(store.get(channel.id + 100).await, Err(StoreError::NotFound)));
        assert!(matches!(
            store.find_by_owner_and_channel_id(bob, "tg1").await,
            Err(StoreError::NotFound)
        ));
        assert!(matches!(
            store.get_owned(channel.id, bob).await,
            Err(StoreError::PermissionDenied)
        ));
    }

    #[tokio::test]
    async fn update_replaces_all_fields() {
        let (store, alice, _) = setup().await;
        let channel = store.create(alice, "tg1", ChannelType::Telegram, &tg_config()).await.unwrap();

        let new_config = json!({"webhook_url": "https://open.feishu.cn/hook"});
        let updated = store
            .update(channel.id, alice, "ops", ChannelType::Feishu, &new_config)
            .await
            .unwrap();
        assert_eq!(updated.channel_id, "ops");
        assert_eq!(updated.channel_type, "feishu");
        assert_eq!(store.decrypted_config(&updated).unwrap(), new_config);
        assert!(updated.updated_at >= channel.updated_at);
    }

    #[tokio::test]
    async fn update_rejects_collisions_and_foreign_owners() {
        let (store, alice, bob) = setup().await;
        let first = store.create(alice, "one", ChannelType::Telegram, &tg_config()).await.unwrap();
        store.create(alice, "two", ChannelType::Telegram, &tg_config()).await.unwrap();

        let err = store
            .update(first.id, alice, "two", ChannelType::Telegram, &tg_config())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(_)));

        // Keeping its own channel_id is not a collision.
        store.update(first.id, alice, "one", ChannelType::Telegram, &tg_config()).await.unwrap();

        let err = store
            .update(first.id, bob, "one", ChannelType::Telegram, &tg_config())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::PermissionDenied));
    }

    #[tokio::test]
    async fn delete_requires_ownership() {
        let (store, alice, bob) = setup().await;
        let channel = store.create(alice, "tg1", ChannelType::Telegram, &tg_config()).await.unwrap();

        assert!(matches!(store.delete(channel.id, bob).await, Err(StoreError::PermissionDenied)));
        store.delete(channel.id, alice).await.unwrap();
        assert!(matches!(store.get(channel.id).await, Err(StoreError::NotFound)));
    }

    #[tokio::test]
    async fn non_object_config_is_rejected() {
        let (store, alice, _) = setup().await;
        let err = store.create(alice, "x", ChannelType::Webhook, &json!("plain")).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidInput(_)));
        let err = store.create(alice, "  ", ChannelType::Webhook, &json!({})).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidInput(_)));
    }

    fn raw_channel(config: &str) -> NotificationChannel {
        NotificationChannel {
            id: 1,
            user_id: 1,
            channel_id: "legacy".to_string(),
            channel_type: "webhook".to_string(),
            config: config.to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn legacy_plaintext_is_readable_but_garbage_is_corrupt() {
        let (store, _, _) = setup().await;

        let legacy = raw_channel(r#"{"webhook_url": "https://legacy"}"#);
        assert_eq!(store.decrypted_config(&legacy).unwrap()["webhook_url"], "https://legacy");

        assert!(matches!(
            store.decrypted_config(&raw_channel("bm90IGEgY2lwaGVydGV4dA==")),
            Err(StoreError::CorruptConfig)
        ));
        assert!(matches!(
            store.decrypted_config(&raw_channel("[1, 2]")),
            Err(StoreError::CorruptConfig)
        ));
    }

    #[tokio::test]
    async fn config_from_another_key_is_corrupt() {
        let (store, alice, _) = setup().await;
        let channel = store.create(alice, "tg1", ChannelType::Telegram, &tg_config()).await.unwrap();

        let other = ChannelStore::new(
            store.pool.clone(),
            Arc::new(EncryptionService::from_secret("another-key")),
        );
        assert!(matches!(other.decrypted_config(&channel), Err(StoreError::CorruptConfig)));
    }
}
