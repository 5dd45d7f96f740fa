use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::Utc;
use rand::RngCore;
use sqlx::SqlitePool;

use super::{StoreError, unique_violation};
use crate::db::models::User;

// --- User Service Functions ---

/// A fresh API token: 32 random bytes, standard base64.
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    STANDARD.encode(bytes)
}

/// Creates a new user together with their initial API token.
pub async fn create_user(
    pool: &SqlitePool,
    username: &str,
    email: &str,
    password_hash: &str,
) -> Result<User, StoreError> {
    sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (username, email, password_hash, token, created_at)
        VALUES (?, ?, ?, ?, ?)
        RETURNING id, username, email, password_hash, token, created_at
        "#,
    )
    .bind(username)
    .bind(email)
    .bind(password_hash)
    .bind(generate_token())
    .bind(Utc::now())
    .fetch_one(pool)
    .await
    .map_err(|e| match unique_violation(&e) {
        Some(constraint) if constraint.contains("username") => {
            StoreError::Duplicate("Username already exists".to_string())
        }
        Some(constraint) if constraint.contains("email") => {
            StoreError::Duplicate("Email already registered".to_string())
        }
        _ => StoreError::Database(e),
    })
}

/// Retrieves a user by their ID.
pub async fn get_user_by_id(pool: &SqlitePool, user_id: i64) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_optional(pool)
        .await
}

/// Retrieves a user by their username.
pub async fn get_user_by_username(pool: &SqlitePool, username: &str) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE username = ?")
        .bind(username)
        .fetch_optional(pool)
        .await
}

/// Exact-match lookup of the bearer token.
pub async fn get_user_by_token(pool: &SqlitePool, token: &str) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE token = ?")
        .bind(token)
        .fetch_optional(pool)
        .await
}

/// Replaces the user's API token and returns the new value.
pub async fn rotate_token(pool: &SqlitePool, user_id: i64) -> Result<String, StoreError> {
    let token = generate_token();
    let result = sqlx::query("UPDATE users SET token = ? WHERE id = ?")
        .bind(&token)
        .bind(user_id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound);
    }
    Ok(token)
}
