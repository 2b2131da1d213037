//! Integration tests for the apiwallet-store crate.
//!
//! These exercise the on-disk SQLite store and TTL caches persisted through
//! it, including reloads across process-like restarts.

use std::sync::Arc;
use std::time::Duration;

use apiwallet_store::{KeyValueStore, ManualClock, SqliteStore, TtlCache};
use chrono::{DateTime, TimeDelta};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Quota {
    remaining: f64,
    total: f64,
}

fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(
        DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
    ))
}

// ═══════════════════════════════════════════════════════════════════════
//  SQLite store
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn sqlite_values_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("apiwallet.db");

    {
        let store = SqliteStore::open(&path).unwrap();
        store.set("apiKeys", "ciphertext").unwrap();
    }

    let store = SqliteStore::open(&path).unwrap();
    assert_eq!(store.get("apiKeys").unwrap().as_deref(), Some("ciphertext"));
}

#[test]
fn sqlite_reopen_does_not_rerun_migrations() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("apiwallet.db");

    SqliteStore::open(&path).unwrap().set("k", "v").unwrap();
    let store = SqliteStore::open(&path).unwrap();
    assert_eq!(store.keys().unwrap(), vec!["k".to_string()]);
}

// ═══════════════════════════════════════════════════════════════════════
//  Caches over SQLite
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn cache_entries_persist_across_instances() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("apiwallet.db");
    let clock = clock();

    {
        let store: Arc<dyn KeyValueStore> = Arc::new(SqliteStore::open(&path).unwrap());
        let cache: TtlCache<Quota> = TtlCache::builder("quotaCache", store)
            .clock(clock.clone())
            .build()
            .unwrap();
        cache
            .set(
                "deepseek:k1",
                Quota {
                    remaining: 12.5,
                    total: 12.5,
                },
            )
            .unwrap();
    }

    clock.advance(TimeDelta::minutes(5));

    let store: Arc<dyn KeyValueStore> = Arc::new(SqliteStore::open(&path).unwrap());
    let cache: TtlCache<Quota> = TtlCache::builder("quotaCache", store)
        .clock(clock.clone())
        .build()
        .unwrap();
    let hit = cache.get("deepseek:k1").unwrap().unwrap();
    assert_eq!(hit.remaining, 12.5);

    clock.advance(TimeDelta::minutes(6));
    assert!(cache.get("deepseek:k1").unwrap().is_none());
}

#[test]
fn persisted_map_uses_camel_case_entries() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let cache: TtlCache<Vec<String>> = TtlCache::builder("modelCache", store.clone())
        .clock(clock())
        .build()
        .unwrap();
    cache
        .set("kimi:k1", vec!["moonshot-v1-8k".to_string()])
        .unwrap();

    let raw = store.get("modelCache").unwrap().unwrap();
    let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(json["kimi:k1"]["value"][0], "moonshot-v1-8k");
    assert!(json["kimi:k1"]["storedAt"].is_string());
}

#[test]
fn three_namespaces_share_one_store() {
    let store: Arc<dyn KeyValueStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
    let quota: TtlCache<Quota> = TtlCache::builder("quotaCache", store.clone())
        .build()
        .unwrap();
    let models: TtlCache<Vec<String>> = TtlCache::builder("modelCache", store.clone())
        .build()
        .unwrap();
    let availability: TtlCache<String> = TtlCache::builder("availabilityCache", store.clone())
        .ttl(Duration::from_secs(60))
        .build()
        .unwrap();

    quota
        .set(
            "a:b",
            Quota {
                remaining: 1.0,
                total: 2.0,
            },
        )
        .unwrap();
    models.set("a:b", vec![]).unwrap();
    availability.set("a:b:m", "normal".to_string()).unwrap();

    models.clear().unwrap();
    assert!(quota.get("a:b").unwrap().is_some());
    assert!(models.get("a:b").unwrap().is_none());
    assert_eq!(availability.get("a:b:m").unwrap().as_deref(), Some("normal"));
}
