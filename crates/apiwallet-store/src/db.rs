//! SQLite-backed [`KeyValueStore`].
//!
//! A single `kv` table in a WAL-mode database file plays the role of the
//! browser-local storage the vault and caches were designed against. The
//! connection sits behind a `Mutex`; every call holds it only for one
//! statement.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info};

use crate::error::StoreResult;
use crate::kv::KeyValueStore;
use crate::migration;

/// Durable key-value store in a SQLite file.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the store at `path` and bring its schema up to date.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "opening kv store");

        let conn = Connection::open(path)?;
        Self::apply_pragmas(&conn)?;
        migration::run_all(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory store, mostly for tests.
    pub fn open_in_memory() -> StoreResult<Self> {
        debug!("opening in-memory kv store");

        let conn = Connection::open_in_memory()?;
        Self::apply_pragmas(&conn)?;
        migration::run_all(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// List every stored key in lexical order.
    pub fn keys(&self) -> StoreResult<Vec<String>> {
        let conn = self.conn.lock()?;
        let mut stmt = conn.prepare("SELECT key FROM kv ORDER BY key")?;
        let keys = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(keys)
    }

    fn apply_pragmas(conn: &Connection) -> StoreResult<()> {
        // WAL keeps readers off the writer's back; NORMAL sync is safe with it.
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "temp_store", "MEMORY")?;
        conn.pragma_update(None, "busy_timeout", 5_000_i32)?;
        Ok(())
    }
}

impl KeyValueStore for SqliteStore {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let conn = self.conn.lock()?;
        let value = conn
            .query_row(
                "SELECT value FROM kv WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let conn = self.conn.lock()?;
        conn.execute(
            "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, chrono::Utc::now().timestamp()],
        )?;
        debug!(key = key, bytes = value.len(), "kv value written");
        Ok(())
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        let conn = self.conn.lock()?;
        conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        debug!(key = key, "kv value removed");
        Ok(())
    }
}

// ── tests ────────────────────────────────────────────────────────────
