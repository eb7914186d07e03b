//! Per-user usage and plan persistence

use chrono::Utc;
use sqlx::{Row, SqlitePool};
use verdant_common::events::PlanTier;
use verdant_common::{Error, Result};

use crate::db::lock_retry::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};
use crate::models::UsageProfile;

/// Load a profile, inserting a fresh free profile when missing
pub async fn load_profile(pool: &SqlitePool, user_id: &str) -> Result<UsageProfile> {
    ensure_profile(pool, user_id).await?;

    let row = sqlx::query("SELECT plan, used FROM usage_profiles WHERE user_id = ?")
        .bind(user_id)
        .fetch_one(pool)
        .await?;

    let plan: String = row.get("plan");
    let plan = PlanTier::parse(&plan)
        .ok_or_else(|| Error::Internal(format!("Unknown plan '{}' for {}", plan, user_id)))?;
    let used: i64 = row.get("used");

    Ok(UsageProfile {
        user_id: user_id.to_string(),
        plan,
        used: used.max(0) as u32,
    })
}

/// Atomically add one identification and return the new count
pub async fn increment_usage(pool: &SqlitePool, user_id: &str) -> Result<u32> {
    ensure_profile(pool, user_id).await?;

    let used: i64 = retry_on_lock("increment_usage", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        let used = sqlx::query_scalar(
            "UPDATE usage_profiles SET used = used + 1, updated_at = ?
             WHERE user_id = ? RETURNING used",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(user_id)
        .fetch_one(pool)
        .await?;
        Ok(used)
    })
    .await?;

    Ok(used.max(0) as u32)
}

pub async fn set_plan(pool: &SqlitePool, user_id: &str, plan: PlanTier) -> Result<()> {
    ensure_profile(pool, user_id).await?;

    retry_on_lock("set_plan", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        sqlx::query("UPDATE usage_profiles SET plan = ?, updated_at = ? WHERE user_id = ?")
            .bind(plan.as_str())
            .bind(Utc::now().to_rfc3339())
            .bind(user_id)
            .execute(pool)
            .await?;
        Ok(())
    })
    .await
}

async fn ensure_profile(pool: &SqlitePool, user_id: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO usage_profiles (user_id, plan, used, updated_at)
         VALUES (?, 'free', 0, ?)
         ON CONFLICT(user_id) DO NOTHING",
    )
    .bind(user_id)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;
    Ok(())
}
