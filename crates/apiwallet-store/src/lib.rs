//! # apiwallet-store
//!
//! Storage layer for apiwallet.
//!
//! Everything durable is a string value under a string key in a
//! [`KeyValueStore`]. On top of that sits [`TtlCache`], a namespaced,
//! persisted, expiring map used for quota results, model lists and
//! availability probes. Time is read through [`Clock`] so expiry can be
//! tested without sleeping.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │  TtlCache<T> (one per namespace)        │
//! │    lazy eviction + periodic sweep       │
//! ├─────────────────────────────────────────┤
//! │  KeyValueStore                          │
//! │    SqliteStore (WAL file) / MemoryStore │
//! │  Migrations (versioned, transactional)  │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```ignore
//! use std::sync::Arc;
//! use apiwallet_store::{KeyValueStore, SqliteStore, TtlCache};
//!
//! let store: Arc<dyn KeyValueStore> = Arc::new(SqliteStore::open("data/apiwallet.db")?);
//! let cache: TtlCache<String> = TtlCache::builder("modelCache", store.clone()).build()?;
//! ```

pub mod cache;
pub mod clock;
pub mod db;
pub mod error;
pub mod kv;
pub mod migration;

// ── re-exports ───────────────────────────────────────────────────────

pub use cache::{
    CacheEntry, CacheStats, DEFAULT_SWEEP_INTERVAL, DEFAULT_TTL, TtlCache, TtlCacheBuilder,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use db::SqliteStore;
pub use error::{StoreError, StoreResult};
pub use kv::{KeyValueStore, MemoryStore};
