//! Collection persistence: SQLite and in-memory stores must agree

mod common;

use chrono::{Duration, TimeZone, Utc};
use common::plant_json;
use std::sync::Arc;
use tempfile::TempDir;
use verdant_id::db::{init_database_pool, SqliteStore};
use verdant_id::models::{validate_plant_record, HistoryEntry, PlantRecord};
use verdant_id::store::{CollectionStore, HistoryStore, MemoryStore};

fn record(common: &str, scientific: &str) -> PlantRecord {
    let mut record = validate_plant_record(&plant_json(common, scientific)).unwrap();
    record.image_url = Some(format!("https://img/{}.jpg", scientific.replace(' ', "_")));
    record
}

async fn sqlite_store(dir: &TempDir) -> SqliteStore {
    let pool = init_database_pool(&dir.path().join("verdant.db")).await.unwrap();
    SqliteStore::new(pool)
}

async fn stores(dir: &TempDir) -> Vec<(&'static str, Arc<dyn CollectionStore>)> {
    let sqlite: Arc<dyn CollectionStore> = Arc::new(sqlite_store(dir).await);
    let memory: Arc<dyn CollectionStore> = Arc::new(MemoryStore::new());
    vec![("sqlite", sqlite), ("memory", memory)]
}

#[tokio::test]
async fn test_saved_record_reads_back_identical() {
    let dir = TempDir::new().unwrap();
    let original = record("Aloe", "Aloe vera");

    for (name, store) in stores(&dir).await {
        let saved = store.save("alice", &original).await.unwrap();
        let id = saved.id.unwrap_or_else(|| panic!("{}: no id assigned", name));
        assert!(saved.saved_at.is_some(), "{}: no saved_at", name);

        let loaded = store.get("alice", id).await.unwrap().unwrap();
        assert_eq!(loaded.identity(), original.identity(), "{}", name);
        assert_eq!(loaded.image_url, original.image_url, "{}", name);
        assert_eq!(loaded.saved_at, saved.saved_at, "{}", name);
    }
}

#[tokio::test]
async fn test_collection_is_per_user_and_newest_first() {
    let dir = TempDir::new().unwrap();
    let base = Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).unwrap();

    for (name, store) in stores(&dir).await {
        for (offset, (common, scientific)) in [
            ("Aloe", "Aloe vera"),
            ("Pothos", "Epipremnum aureum"),
            ("Fern", "Nephrolepis exaltata"),
        ]
        .into_iter()
        .enumerate()
        {
            let mut r = record(common, scientific);
            r.saved_at = Some(base + Duration::minutes(offset as i64));
            store.save("alice", &r).await.unwrap();
        }
        store.save("bob", &record("Oak", "Quercus robur")).await.unwrap();

        let names: Vec<String> = store
            .list("alice")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.common_name)
            .collect();
        assert_eq!(names, vec!["Fern", "Pothos", "Aloe"], "{}", name);
        assert_eq!(store.list("bob").await.unwrap().len(), 1, "{}", name);
    }
}

#[tokio::test]
async fn test_resave_with_id_replaces() {
    let dir = TempDir::new().unwrap();

    for (name, store) in stores(&dir).await {
        let mut saved = store.save("alice", &record("Aloe", "Aloe vera")).await.unwrap();
        saved.description = "Succulent with gel-filled leaves.".to_string();
        store.save("alice", &saved).await.unwrap();

        let list = store.list("alice").await.unwrap();
        assert_eq!(list.len(), 1, "{}", name);
        assert_eq!(list[0].description, "Succulent with gel-filled leaves.", "{}", name);
    }
}

#[tokio::test]
async fn test_foreign_id_does_not_overwrite_owner() {
    let dir = TempDir::new().unwrap();

    for (name, store) in stores(&dir).await {
        let alice = store.save("alice", &record("Aloe", "Aloe vera")).await.unwrap();
        let alice_id = alice.id.unwrap();

        let mut forged = record("Oak", "Quercus robur");
        forged.id = Some(alice_id);
        let bob = store.save("bob", &forged).await.unwrap();
        assert_ne!(bob.id, Some(alice_id), "{}", name);

        let kept = store.get("alice", alice_id).await.unwrap().unwrap();
        assert_eq!(kept.common_name, "Aloe", "{}", name);
        assert_eq!(store.list("alice").await.unwrap().len(), 1, "{}", name);

        let bobs = store.list("bob").await.unwrap();
        assert_eq!(bobs.len(), 1, "{}", name);
        assert_eq!(bobs[0].common_name, "Oak", "{}", name);
        assert_eq!(bobs[0].id, bob.id, "{}", name);
    }
}

#[tokio::test]
async fn test_delete_only_touches_owner() {
    let dir = TempDir::new().unwrap();

    for (name, store) in stores(&dir).await {
        let saved = store.save("alice", &record("Aloe", "Aloe vera")).await.unwrap();
        let id = saved.id.unwrap();

        assert!(!store.delete("bob", id).await.unwrap(), "{}", name);
        assert!(store.get("bob", id).await.unwrap().is_none(), "{}", name);

        assert!(store.delete("alice", id).await.unwrap(), "{}", name);
        assert!(!store.delete("alice", id).await.unwrap(), "{}", name);
        assert!(store.list("alice").await.unwrap().is_empty(), "{}", name);
    }
}

#[tokio::test]
async fn test_collection_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let id = {
        let store = sqlite_store(&dir).await;
        let saved = store.save("alice", &record("Aloe", "Aloe vera")).await.unwrap();
        store.pool().close().await;
        saved.id.unwrap()
    };

    let store = sqlite_store(&dir).await;
    let loaded = store.get("alice", id).await.unwrap().unwrap();
    assert_eq!(loaded.common_name, "Aloe");
}

#[tokio::test]
async fn test_history_stores_agree() {
    let dir = TempDir::new().unwrap();
    let sqlite: Arc<dyn HistoryStore> = Arc::new(sqlite_store(&dir).await);
    let memory: Arc<dyn HistoryStore> = Arc::new(MemoryStore::new());

    for store in [&sqlite, &memory] {
        store
            .record(&HistoryEntry::new("alice", Some("rose".into()), false, "Dog rose"))
            .await
            .unwrap();
        store
            .record(&HistoryEntry::new("alice", None, true, "Aloe"))
            .await
            .unwrap();
    }

    let from_sqlite = sqlite.recent("alice", 1).await.unwrap();
    let from_memory = memory.recent("alice", 1).await.unwrap();
    assert_eq!(from_sqlite.len(), 1);
    assert_eq!(from_sqlite[0].resolved_name, from_memory[0].resolved_name);
    assert_eq!(from_sqlite[0].resolved_name, "Aloe");
}
