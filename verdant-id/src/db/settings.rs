//! Key/value settings
//!
//! Also holds the persisted auth session so a restart can resume it.

use sqlx::SqlitePool;
use verdant_common::Result;

use crate::models::Session;

const GEMINI_API_KEY: &str = "gemini_api_key";
const AUTH_SESSION: &str = "auth_session";
const AUTH_CODE_VERIFIER: &str = "auth_code_verifier";

pub async fn get_setting(pool: &SqlitePool, key: &str) -> Result<Option<String>> {
    let value: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?;
    Ok(value)
}

pub async fn set_setting(pool: &SqlitePool, key: &str, value: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO settings (key, value) VALUES (?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn delete_setting(pool: &SqlitePool, key: &str) -> Result<()> {
    sqlx::query("DELETE FROM settings WHERE key = ?")
        .bind(key)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn get_gemini_api_key(pool: &SqlitePool) -> Result<Option<String>> {
    get_setting(pool, GEMINI_API_KEY).await
}

pub async fn set_gemini_api_key(pool: &SqlitePool, key: &str) -> Result<()> {
    set_setting(pool, GEMINI_API_KEY, key).await
}

/// Persisted session, if any
///
/// A row that no longer deserializes is treated as absent and removed.
pub async fn load_session(pool: &SqlitePool) -> Result<Option<Session>> {
    let Some(raw) = get_setting(pool, AUTH_SESSION).await? else {
        return Ok(None);
    };

    match serde_json::from_str(&raw) {
        Ok(session) => Ok(Some(session)),
        Err(e) => {
            tracing::warn!(error = %e, "Discarding unreadable persisted session");
            delete_setting(pool, AUTH_SESSION).await?;
            Ok(None)
        }
    }
}

pub async fn save_session(pool: &SqlitePool, session: &Session) -> Result<()> {
    let raw = serde_json::to_string(session)?;
    set_setting(pool, AUTH_SESSION, &raw).await
}

pub async fn clear_session(pool: &SqlitePool) -> Result<()> {
    delete_setting(pool, AUTH_SESSION).await
}

/// PKCE verifier stored when a sign-in flow is started by the UI shell
pub async fn get_code_verifier(pool: &SqlitePool) -> Result<Option<String>> {
    get_setting(pool, AUTH_CODE_VERIFIER).await
}

pub async fn set_code_verifier(pool: &SqlitePool, verifier: &str) -> Result<()> {
    set_setting(pool, AUTH_CODE_VERIFIER, verifier).await
}

pub async fn clear_code_verifier(pool: &SqlitePool) -> Result<()> {
    delete_setting(pool, AUTH_CODE_VERIFIER).await
}
