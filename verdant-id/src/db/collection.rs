//! Plant collection persistence
//!
//! The full record is stored as JSON; the name columns exist for listing.

use sqlx::{Row, SqlitePool};
use uuid::Uuid;
use verdant_common::{Error, Result};

use crate::db::history::parse_timestamp;
use crate::db::lock_retry::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};
use crate::models::PlantRecord;
use crate::store::prepare_for_save;

/// Insert or update; an id already used by another user's record gets a
/// fresh id instead of overwriting it
pub async fn save_plant(pool: &SqlitePool, user_id: &str, record: &PlantRecord) -> Result<PlantRecord> {
    let mut saved = prepare_for_save(record);

    if !upsert_owned(pool, user_id, &saved).await? {
        let fresh = Uuid::new_v4();
        tracing::warn!(
            user_id,
            requested = ?saved.id,
            %fresh,
            "Collection id belongs to another user, saving as new record"
        );
        saved.id = Some(fresh);
        upsert_owned(pool, user_id, &saved).await?;
    }

    tracing::debug!(id = ?saved.id, user_id, name = %saved.common_name, "Saved plant to collection");
    Ok(saved)
}

/// False when the id exists under a different user
async fn upsert_owned(pool: &SqlitePool, user_id: &str, saved: &PlantRecord) -> Result<bool> {
    let (Some(id), Some(saved_at)) = (saved.id, saved.saved_at) else {
        return Err(Error::Internal("Collection metadata missing after prepare".to_string()));
    };
    let json = serde_json::to_string(saved)?;

    let affected = retry_on_lock("save_plant", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        let result = sqlx::query(
            r#"
            INSERT INTO plant_collection (id, user_id, common_name, scientific_name, record, saved_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                common_name = excluded.common_name,
                scientific_name = excluded.scientific_name,
                record = excluded.record,
                saved_at = excluded.saved_at
            WHERE plant_collection.user_id = excluded.user_id
            "#,
        )
        .bind(id.to_string())
        .bind(user_id)
        .bind(&saved.common_name)
        .bind(&saved.scientific_name)
        .bind(&json)
        .bind(saved_at.to_rfc3339())
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    })
    .await?;

    Ok(affected > 0)
}

/// Newest first
pub async fn list_plants(pool: &SqlitePool, user_id: &str) -> Result<Vec<PlantRecord>> {
    let rows = sqlx::query(
        "SELECT record, saved_at FROM plant_collection WHERE user_id = ? ORDER BY saved_at DESC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| decode_record(row.get("record"), row.get("saved_at")))
        .collect()
}

pub async fn get_plant(pool: &SqlitePool, user_id: &str, id: Uuid) -> Result<Option<PlantRecord>> {
    let row = sqlx::query(
        "SELECT record, saved_at FROM plant_collection WHERE user_id = ? AND id = ?",
    )
    .bind(user_id)
    .bind(id.to_string())
    .fetch_optional(pool)
    .await?;

    row.map(|row| decode_record(row.get("record"), row.get("saved_at")))
        .transpose()
}

pub async fn delete_plant(pool: &SqlitePool, user_id: &str, id: Uuid) -> Result<bool> {
    let affected = retry_on_lock("delete_plant", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        let result = sqlx::query("DELETE FROM plant_collection WHERE user_id = ? AND id = ?")
            .bind(user_id)
            .bind(id.to_string())
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    })
    .await?;

    Ok(affected > 0)
}

fn decode_record(json: String, saved_at: String) -> Result<PlantRecord> {
    let mut record: PlantRecord = serde_json::from_str(&json)?;
    // Column is authoritative for ordering and display
    record.saved_at = Some(parse_timestamp(&saved_at)?);
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_pool;
    use crate::models::plant_record::fixtures::plant_json;
    use crate::models::validate_plant_record;

    fn rose() -> PlantRecord {
        validate_plant_record(&plant_json("Rose", "Rosa rubiginosa")).unwrap()
    }

    #[tokio::test]
    async fn test_save_assigns_metadata_and_get_returns_it() {
        let pool = init_memory_pool().await.unwrap();
        let saved = save_plant(&pool, "u1", &rose()).await.unwrap();
        let id = saved.id.unwrap();

        let loaded = get_plant(&pool, "u1", id).await.unwrap().unwrap();
        assert_eq!(loaded.identity(), rose().identity());
        assert_eq!(loaded.id, Some(id));

        assert!(get_plant(&pool, "u2", id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_only_own_records() {
        let pool = init_memory_pool().await.unwrap();
        let saved = save_plant(&pool, "u1", &rose()).await.unwrap();
        let id = saved.id.unwrap();

        assert!(!delete_plant(&pool, "u2", id).await.unwrap());
        assert!(delete_plant(&pool, "u1", id).await.unwrap());
        assert!(list_plants(&pool, "u1").await.unwrap().is_empty());
    }
}
