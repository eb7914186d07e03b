//! Persistence seams
//!
//! The engine talks to storage only through these traits. `db::SqliteStore`
//! is the durable implementation; `MemoryStore` backs tests and ephemeral
//! runs and must behave identically.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;
use verdant_common::events::PlanTier;
use verdant_common::Result;

use crate::models::{HistoryEntry, PlantRecord, UsageProfile};

/// Usage count and plan, keyed by authenticated identity
#[async_trait]
pub trait UsageStore: Send + Sync {
    /// Load the profile, creating a free profile with zero usage if missing
    async fn load_profile(&self, user_id: &str) -> Result<UsageProfile>;

    /// Add one identification; returns the new count
    async fn increment_usage(&self, user_id: &str) -> Result<u32>;

    async fn set_plan(&self, user_id: &str, plan: PlanTier) -> Result<()>;
}

/// Identification history
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn record(&self, entry: &HistoryEntry) -> Result<()>;

    /// Most recent first
    async fn recent(&self, user_id: &str, limit: usize) -> Result<Vec<HistoryEntry>>;
}

/// Personal plant collection
#[async_trait]
pub trait CollectionStore: Send + Sync {
    /// Persist a record; assigns `id` and `saved_at` when absent
    async fn save(&self, user_id: &str, record: &PlantRecord) -> Result<PlantRecord>;

    /// Newest first
    async fn list(&self, user_id: &str) -> Result<Vec<PlantRecord>>;

    async fn get(&self, user_id: &str, id: Uuid) -> Result<Option<PlantRecord>>;

    /// Returns false when nothing was deleted
    async fn delete(&self, user_id: &str, id: Uuid) -> Result<bool>;
}

/// Locally configured API keys
#[async_trait]
pub trait ApiKeyStore: Send + Sync {
    async fn gemini_api_key(&self) -> Result<Option<String>>;

    async fn set_gemini_api_key(&self, key: &str) -> Result<()>;
}

/// Stamp collection metadata onto a record about to be saved
pub(crate) fn prepare_for_save(record: &PlantRecord) -> PlantRecord {
    let mut saved = record.clone();
    saved.id.get_or_insert_with(Uuid::new_v4);
    saved.saved_at.get_or_insert_with(Utc::now);
    saved
}

/// In-memory implementation of every store
#[derive(Default)]
pub struct MemoryStore {
    profiles: RwLock<HashMap<String, UsageProfile>>,
    history: RwLock<Vec<HistoryEntry>>,
    collection: RwLock<HashMap<String, Vec<PlantRecord>>>,
    gemini_api_key: RwLock<Option<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UsageStore for MemoryStore {
    async fn load_profile(&self, user_id: &str) -> Result<UsageProfile> {
        let mut profiles = self.profiles.write().await;
        Ok(profiles
            .entry(user_id.to_string())
            .or_insert_with(|| UsageProfile::new(user_id))
            .clone())
    }

    async fn increment_usage(&self, user_id: &str) -> Result<u32> {
        let mut profiles = self.profiles.write().await;
        let profile = profiles
            .entry(user_id.to_string())
            .or_insert_with(|| UsageProfile::new(user_id));
        profile.used += 1;
        Ok(profile.used)
    }

    async fn set_plan(&self, user_id: &str, plan: PlanTier) -> Result<()> {
        let mut profiles = self.profiles.write().await;
        profiles
            .entry(user_id.to_string())
            .or_insert_with(|| UsageProfile::new(user_id))
            .plan = plan;
        Ok(())
    }
}

#[async_trait]
impl HistoryStore for MemoryStore {
    async fn record(&self, entry: &HistoryEntry) -> Result<()> {
        self.history.write().await.push(entry.clone());
        Ok(())
    }

    async fn recent(&self, user_id: &str, limit: usize) -> Result<Vec<HistoryEntry>> {
        let history = self.history.read().await;
        Ok(history
            .iter()
            .rev()
            .filter(|e| e.user_id == user_id)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl CollectionStore for MemoryStore {
    async fn save(&self, user_id: &str, record: &PlantRecord) -> Result<PlantRecord> {
        let mut saved = prepare_for_save(record);
        let mut collection = self.collection.write().await;

        let owned_elsewhere = collection
            .iter()
            .any(|(owner, records)| owner != user_id && records.iter().any(|r| r.id == saved.id));
        if owned_elsewhere {
            saved.id = Some(Uuid::new_v4());
        }

        let records = collection.entry(user_id.to_string()).or_default();
        records.retain(|r| r.id != saved.id);
        records.push(saved.clone());
        Ok(saved)
    }

    async fn list(&self, user_id: &str) -> Result<Vec<PlantRecord>> {
        let collection = self.collection.read().await;
        let mut records = collection.get(user_id).cloned().unwrap_or_default();
        records.sort_by(|a, b| b.saved_at.cmp(&a.saved_at));
        Ok(records)
    }

    async fn get(&self, user_id: &str, id: Uuid) -> Result<Option<PlantRecord>> {
        let collection = self.collection.read().await;
        Ok(collection
            .get(user_id)
            .and_then(|records| records.iter().find(|r| r.id == Some(id)).cloned()))
    }

    async fn delete(&self, user_id: &str, id: Uuid) -> Result<bool> {
        let mut collection = self.collection.write().await;
        let Some(records) = collection.get_mut(user_id) else {
            return Ok(false);
        };
        let before = records.len();
        records.retain(|r| r.id != Some(id));
        Ok(records.len() != before)
    }
}

#[async_trait]
impl ApiKeyStore for MemoryStore {
    async fn gemini_api_key(&self) -> Result<Option<String>> {
        Ok(self.gemini_api_key.read().await.clone())
    }

    async fn set_gemini_api_key(&self, key: &str) -> Result<()> {
        *self.gemini_api_key.write().await = Some(key.to_string());
        Ok(())
    }
}
