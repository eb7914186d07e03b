//! Identification history persistence

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;
use verdant_common::{Error, Result};

use crate::db::lock_retry::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};
use crate::models::HistoryEntry;

pub async fn insert_entry(pool: &SqlitePool, entry: &HistoryEntry) -> Result<()> {
    retry_on_lock("insert_history_entry", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        sqlx::query(
            r#"
            INSERT INTO identification_history
                (id, user_id, query, from_image, resolved_name, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(entry.id.to_string())
        .bind(&entry.user_id)
        .bind(&entry.query)
        .bind(entry.from_image as i64)
        .bind(&entry.resolved_name)
        .bind(entry.created_at.to_rfc3339())
        .execute(pool)
        .await?;
        Ok(())
    })
    .await
}

/// Most recent entries for one user
pub async fn recent_entries(
    pool: &SqlitePool,
    user_id: &str,
    limit: usize,
) -> Result<Vec<HistoryEntry>> {
    let rows = sqlx::query(
        r#"
        SELECT id, user_id, query, from_image, resolved_name, created_at
        FROM identification_history
        WHERE user_id = ?
        ORDER BY created_at DESC, rowid DESC
        LIMIT ?
        "#,
    )
    .bind(user_id)
    .bind(limit as i64)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let id: String = row.get("id");
            let created_at: String = row.get("created_at");
            let from_image: i64 = row.get("from_image");

            Ok(HistoryEntry {
                id: Uuid::parse_str(&id)
                    .map_err(|e| Error::Internal(format!("Bad history id {}: {}", id, e)))?,
                user_id: row.get("user_id"),
                query: row.get("query"),
                from_image: from_image != 0,
                resolved_name: row.get("resolved_name"),
                created_at: parse_timestamp(&created_at)?,
            })
        })
        .collect()
}

pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Bad timestamp '{}': {}", raw, e)))
}
