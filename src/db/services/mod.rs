//! The `services` module wraps all SQL behind small, domain-oriented functions
//! so HTTP handlers and the dispatch engine never touch the schema directly.

pub mod channel_service;
pub mod user_service;

pub use channel_service::ChannelStore;
pub use user_service::*;

use thiserror::Error;

use crate::notifications::encryption::EncryptionError;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Record not found")]
    NotFound,
    #[error("Permission denied")]
    PermissionDenied,
    #[error("{0}")]
    Duplicate(String),
    #[error("Stored channel configuration is corrupt or was encrypted with a different key")]
    CorruptConfig,
    #[error("{0}")]
    InvalidInput(String),
    #[error("Encryption error: {0}")]
    Encryption(#[from] EncryptionError),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// The constraint name when `err` is a UNIQUE violation, e.g. `users.email`.
pub(crate) fn unique_violation(err: &sqlx::Error) -> Option<String> {
    match err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => Some(
            db_err
                .message()
                .rsplit(": ")
                .next()
                .unwrap_or_default()
                .to_string(),
        ),
        _ => None,
    }
}
