//! Key/value persistence for session continuity (client id, user id,
//! session token), namespaced by app id.
//!
//! Backed by SQLite in the platform data directory. When the database
//! cannot be opened, or a write fails mid-session, values fall back to an
//! in-process map so the widget keeps working for the lifetime of the
//! embedding process (matching what a browser SDK does when localStorage
//! is unavailable).

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use directories::ProjectDirs;
use rusqlite::{params, Connection};
use tracing::warn;

use crate::error::{Result, StoreError};

pub struct KvStore {
    namespace: String,
    conn: Option<Mutex<Connection>>,
    memory: Mutex<HashMap<String, String>>,
}

impl KvStore {
    /// Open (or create) the default store for an app id.
    ///
    /// Never fails: if the platform data directory or the database is
    /// unavailable, the store degrades to memory-only with a warning.
    pub fn open(app_id: &str) -> Self {
        match Self::open_default(app_id) {
            Ok(store) => store,
            Err(e) => {
                warn!(error = %e, "Persistent storage unavailable; falling back on memory storage");
                Self::in_memory(app_id)
            }
        }
    }

    /// Open (or create) a store at an explicit path. Useful for tests and
    /// custom directory layouts.
    pub fn open_at(app_id: &str, path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        )?;

        Ok(Self {
            namespace: app_id.to_string(),
            conn: Some(Mutex::new(conn)),
            memory: Mutex::new(HashMap::new()),
        })
    }

    /// Memory-only store, used as the fallback and directly in tests.
    pub fn in_memory(app_id: &str) -> Self {
        Self {
            namespace: app_id.to_string(),
            conn: None,
            memory: Mutex::new(HashMap::new()),
        }
    }

    fn open_default(app_id: &str) -> Result<Self> {
        let project_dirs =
            ProjectDirs::from("im", "palaver", "palaver").ok_or(StoreError::NoDataDir)?;
        let data_dir = project_dirs.data_dir();
        std::fs::create_dir_all(data_dir)?;
        Self::open_at(app_id, &data_dir.join("palaver.db"))
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}.{}", self.namespace, key)
    }

    pub fn set(&self, key: &str, value: &str) {
        let full = self.full_key(key);

        if let Some(conn) = &self.conn {
            let result = conn.lock().unwrap().execute(
                "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
                params![full, value],
            );
            match result {
                Ok(_) => return,
                Err(e) => {
                    warn!(error = %e, key = %full, "Storage write failed; falling back on memory storage");
                }
            }
        }

        self.memory.lock().unwrap().insert(full, value.to_string());
    }

    pub fn get(&self, key: &str) -> Option<String> {
        let full = self.full_key(key);

        if let Some(conn) = &self.conn {
            let persisted: Option<String> = conn
                .lock()
                .unwrap()
                .query_row("SELECT value FROM kv WHERE key = ?1", params![full], |row| {
                    row.get(0)
                })
                .ok();
            if persisted.is_some() {
                return persisted;
            }
        }

        self.memory.lock().unwrap().get(&full).cloned()
    }

    pub fn remove(&self, key: &str) {
        let full = self.full_key(key);

        if let Some(conn) = &self.conn {
            let _ = conn
                .lock()
                .unwrap()
                .execute("DELETE FROM kv WHERE key = ?1", params![full]);
        }

        self.memory.lock().unwrap().remove(&full);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = KvStore::open_at("app-1", &dir.path().join("test.db")).expect("should open");

        assert_eq!(store.get("clientId"), None);
        store.set("clientId", "abc123");
        assert_eq!(store.get("clientId").as_deref(), Some("abc123"));

        store.set("clientId", "def456");
        assert_eq!(store.get("clientId").as_deref(), Some("def456"));

        store.remove("clientId");
        assert_eq!(store.get("clientId"), None);
    }

    #[test]
    fn values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");

        KvStore::open_at("app-1", &path).unwrap().set("sessionToken", "tok");

        let reopened = KvStore::open_at("app-1", &path).unwrap();
        assert_eq!(reopened.get("sessionToken").as_deref(), Some("tok"));
    }

    #[test]
    fn namespaces_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");

        let a = KvStore::open_at("app-a", &path).unwrap();
        a.set("clientId", "from-a");

        let b = KvStore::open_at("app-b", &path).unwrap();
        assert_eq!(b.get("clientId"), None);
    }

    #[test]
    fn memory_fallback_round_trip() {
        let store = KvStore::in_memory("app-1");
        store.set("appUserId", "u1");
        assert_eq!(store.get("appUserId").as_deref(), Some("u1"));
        store.remove("appUserId");
        assert_eq!(store.get("appUserId"), None);
    }
}
