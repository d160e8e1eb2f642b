use crate::db::{self, DbConnection};
use crate::error::AppError;
use crate::models::CurrentUser;
use crate::AppState;
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use bcrypt::{hash, verify};
use chrono::Utc;
use rand::Rng;
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

const TOKEN_LEN: usize = 32;

pub async fn hash_password(password: &str, cost: u32) -> Result<String, AppError> {
    let password = password.to_string();
    tokio::task::spawn_blocking(move || hash(password, cost))
        .await
        .map_err(|e| AppError::Internal(format!("join password hashing task: {e}")))?
        .map_err(|e| AppError::Internal(format!("hash password: {e}")))
}

pub async fn verify_password(password: &str, hash: &str) -> bool {
    let (password, hash) = (password.to_string(), hash.to_string());
    tokio::task::spawn_blocking(move || verify(password, &hash).unwrap_or(false))
        .await
        .unwrap_or(false)
}

pub fn generate_token() -> String {
    rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(TOKEN_LEN)
        .map(char::from)
        .collect()
}

pub async fn create_auth_token(conn: &DbConnection, user_id: &Uuid) -> Result<String, rusqlite::Error> {
    let token = generate_token();
    let now = Utc::now();

    conn.lock().await.execute(
        "INSERT INTO auth_tokens (token, user_id, created_at) VALUES (?, ?, ?)",
        params![token, user_id.to_string(), now.to_rfc3339()],
    )?;

    Ok(token)
}

pub async fn verify_auth_token(conn: &DbConnection, token: &str) -> Result<Option<Uuid>, rusqlite::Error> {
    let user_id: Option<String> = conn
        .lock()
        .await
        .query_row(
            "SELECT user_id FROM auth_tokens WHERE token = ?",
            [token],
            |row| row.get(0),
        )
        .optional()?;

    Ok(user_id.and_then(|id| Uuid::parse_str(&id).ok()))
}

/// Accepts both `Bearer <token>` and a bare token.
fn token_from_parts(parts: &Parts) -> Option<&str> {
    let value = parts.headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ").unwrap_or(value).trim();
    (!token.is_empty()).then_some(token)
}

/// Resolves the session to a [`CurrentUser`], or rejects with
/// [`AppError::NotLoggedIn`] / [`AppError::UserNotFound`].
#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = token_from_parts(parts).ok_or(AppError::NotLoggedIn)?;
        let user_id = verify_auth_token(&state.db, token)
            .await?
            .ok_or(AppError::NotLoggedIn)?;

        let user = db::get_user(&state.db, user_id).await?.ok_or_else(|| {
            tracing::warn!(user_id = %user_id, "session refers to a missing user");
            AppError::UserNotFound
        })?;
        let is_admin = db::is_admin(&state.db, user.id).await?;

        Ok(CurrentUser {
            id: user.id,
            username: user.username,
            is_admin,
        })
    }
}
