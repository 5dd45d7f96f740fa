use bcrypt::{DEFAULT_COST, hash, verify};
use chrono::{Duration, Utc};
use jsonwebtoken::{EncodingKey, Header, encode};
use sqlx::SqlitePool;
use thiserror::Error;

use crate::db::models::User;
use crate::db::services::{StoreError, user_service};
use crate::web::error::AppError;
use crate::web::models::{Claims, LoginRequest, LoginResponse, RegisterRequest, UserResponse};

/// Session JWTs stay valid for a week.
const SESSION_TTL_HOURS: i64 = 24 * 7;

#[derive(Error, Debug)]
pub enum AuthenticationError {
    #[error("invalid token")]
    InvalidToken,
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Maps an API bearer token to its user. Tokens are matched exactly and never expire.
pub async fn authenticate_token(pool: &SqlitePool, token: &str) -> Result<User, AuthenticationError> {
    if token.is_empty() {
        return Err(AuthenticationError::InvalidToken);
    }
    user_service::get_user_by_token(pool, token)
        .await?
        .ok_or(AuthenticationError::InvalidToken)
}

fn is_plausible_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    }
}

fn validate_registration(req: &RegisterRequest) -> Result<(), AppError> {
    let username_len = req.username.chars().count();
    if !(4..=20).contains(&username_len) {
        return Err(AppError::InvalidInput(
            "Username must be between 4 and 20 characters".to_string(),
        ));
    }
    if !is_plausible_email(&req.email) {
        return Err(AppError::InvalidInput("Invalid email address".to_string()));
    }
    if req.password.len() < 6 {
        return Err(AppError::InvalidInput(
            "Password must be at least 6 characters".to_string(),
        ));
    }
    Ok(())
}

pub async fn register_user(
    pool: &SqlitePool,
    req: RegisterRequest,
    registration_enabled: bool,
) -> Result<UserResponse, AppError> {
    if !registration_enabled {
        return Err(AppError::Forbidden("Registration is disabled".to_string()));
    }
    validate_registration(&req)?;

    let existing_user = user_service::get_user_by_username(pool, &req.username).await?;
    if existing_user.is_some() {
        return Err(AppError::UserAlreadyExists("Username already exists".to_string()));
    }

    let password_hash = hash(&req.password, DEFAULT_COST)
        .map_err(|e| AppError::PasswordHashingError(e.to_string()))?;

    let user = user_service::create_user(pool, &req.username, &req.email, &password_hash)
        .await
        .map_err(|e| match e {
            StoreError::Duplicate(msg) => AppError::UserAlreadyExists(msg),
            other => AppError::from(other),
        })?;

    Ok(UserResponse {
        id: user.id,
        username: user.username,
        email: user.email,
    })
}

pub async fn login_user(
    pool: &SqlitePool,
    req: LoginRequest,
    jwt_secret: &str,
) -> Result<LoginResponse, AppError> {
    if req.username.is_empty() || req.password.is_empty() {
        return Err(AppError::InvalidInput(
            "Username and password must not be empty".to_string(),
        ));
    }

    let user = user_service::get_user_by_username(pool, &req.username)
        .await?
        .ok_or(AppError::InvalidCredentials)?;

    let valid_password = verify(&req.password, &user.password_hash)
        .map_err(|e| AppError::InternalServerError(format!("Password verification failed: {e}")))?;
    if !valid_password {
        return Err(AppError::InvalidCredentials);
    }

    create_jwt_for_user(&user, jwt_secret)
}

pub fn create_jwt_for_user(user: &User, jwt_secret: &str) -> Result<LoginResponse, AppError> {
    let expiration = (Utc::now() + Duration::hours(SESSION_TTL_HOURS)).timestamp() as usize;

    let claims = Claims {
        sub: user.username.clone(),
        user_id: user.id,
        exp: expiration,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(jwt_secret.as_ref()),
    )
    .map_err(|e| AppError::TokenCreationError(e.to_string()))?;

    Ok(LoginResponse {
        token,
        user_id: user.id,
        username: user.username.clone(),
    })
}

/// Issues a new API token for `user_id`; the previous one stops working at once.
pub async fn rotate_api_token(pool: &SqlitePool, user_id: i64) -> Result<String, AppError> {
    user_service::rotate_token(pool, user_id).await.map_err(|e| match e {
        StoreError::NotFound => AppError::NotFound("User not found".to_string()),
        other => AppError::from(other),
    })
}
