//! SQLite persistence
//!
//! One database file under the root folder holds settings, the persisted auth
//! session, per-user usage profiles, identification history and the plant
//! collection.

pub mod collection;
pub mod history;
pub mod lock_retry;
pub mod profiles;
pub mod settings;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::path::Path;
use uuid::Uuid;
use verdant_common::events::PlanTier;

use crate::models::{HistoryEntry, PlantRecord, UsageProfile};
use crate::store::{ApiKeyStore, CollectionStore, HistoryStore, UsageStore};

/// Open (creating if needed) the database and its tables
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePool::connect(&db_url).await?;
    init_tables(&pool).await?;
    Ok(pool)
}

/// Single-connection in-memory database (every connection to `sqlite::memory:`
/// is a separate database, so the pool is pinned to one)
pub async fn init_memory_pool() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    init_tables(&pool).await?;
    Ok(pool)
}

/// Create tables if they don't exist
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS usage_profiles (
            user_id TEXT PRIMARY KEY,
            plan TEXT NOT NULL DEFAULT 'free',
            used INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS identification_history (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            query TEXT,
            from_image INTEGER NOT NULL,
            resolved_name TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS plant_collection (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            common_name TEXT NOT NULL,
            scientific_name TEXT NOT NULL,
            record TEXT NOT NULL,
            saved_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_history_user ON identification_history (user_id, created_at)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_collection_user ON plant_collection (user_id, saved_at)",
    )
    .execute(pool)
    .await?;

    tracing::info!(
        "Database tables initialized (settings, usage_profiles, identification_history, plant_collection)"
    );

    Ok(())
}

/// Store traits backed by the SQLite pool
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl UsageStore for SqliteStore {
    async fn load_profile(&self, user_id: &str) -> verdant_common::Result<UsageProfile> {
        profiles::load_profile(&self.pool, user_id).await
    }

    async fn increment_usage(&self, user_id: &str) -> verdant_common::Result<u32> {
        profiles::increment_usage(&self.pool, user_id).await
    }

    async fn set_plan(&self, user_id: &str, plan: PlanTier) -> verdant_common::Result<()> {
        profiles::set_plan(&self.pool, user_id, plan).await
    }
}

#[async_trait]
impl HistoryStore for SqliteStore {
    async fn record(&self, entry: &HistoryEntry) -> verdant_common::Result<()> {
        history::insert_entry(&self.pool, entry).await
    }

    async fn recent(&self, user_id: &str, limit: usize) -> verdant_common::Result<Vec<HistoryEntry>> {
        history::recent_entries(&self.pool, user_id, limit).await
    }
}

#[async_trait]
impl ApiKeyStore for SqliteStore {
    async fn gemini_api_key(&self) -> verdant_common::Result<Option<String>> {
        settings::get_gemini_api_key(&self.pool).await
    }

    async fn set_gemini_api_key(&self, key: &str) -> verdant_common::Result<()> {
        settings::set_gemini_api_key(&self.pool, key).await
    }
}

#[async_trait]
impl CollectionStore for SqliteStore {
    async fn save(&self, user_id: &str, record: &PlantRecord) -> verdant_common::Result<PlantRecord> {
        collection::save_plant(&self.pool, user_id, record).await
    }

    async fn list(&self, user_id: &str) -> verdant_common::Result<Vec<PlantRecord>> {
        collection::list_plants(&self.pool, user_id).await
    }

    async fn get(&self, user_id: &str, id: Uuid) -> verdant_common::Result<Option<PlantRecord>> {
        collection::get_plant(&self.pool, user_id, id).await
    }

    async fn delete(&self, user_id: &str, id: Uuid) -> verdant_common::Result<bool> {
        collection::delete_plant(&self.pool, user_id, id).await
    }
}
