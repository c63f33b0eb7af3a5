use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::Mutex;

/// Small namespaced key/value store for scanner state. Values are JSON,
/// writes are last-write-wins.
pub struct PluginStore {
    namespace: String,
    conn: Mutex<Connection>,
}

impl PluginStore {
    pub fn open(db_path: &str, namespace: &str) -> Result<Self> {
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create store directory: {}", parent.display())
                })?;
            }
        }
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open store database: {db_path}"))?;
        Self::init(conn, namespace)
    }

    pub fn open_in_memory(namespace: &str) -> Result<Self> {
        Self::init(Connection::open_in_memory()?, namespace)
    }

    fn init(conn: Connection, namespace: &str) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS plugin_store_rows (
                plugin_name TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (plugin_name, key)
            )",
            [],
        )?;
        Ok(Self {
            namespace: namespace.to_string(),
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow::anyhow!("store connection lock poisoned"))
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let raw: Option<String> = self
            .lock()?
            .query_row(
                "SELECT value FROM plugin_store_rows WHERE plugin_name = ?1 AND key = ?2",
                params![self.namespace, key],
                |row| row.get(0),
            )
            .optional()?;

        match raw {
            Some(raw) => {
                let value = serde_json::from_str(&raw)
                    .with_context(|| format!("Corrupt value stored under {key}"))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let raw = serde_json::to_string(value)?;
        self.lock()?.execute(
            "INSERT INTO plugin_store_rows (plugin_name, key, value) VALUES (?1, ?2, ?3)
             ON CONFLICT (plugin_name, key) DO UPDATE SET value = excluded.value",
            params![self.namespace, key, raw],
        )?;
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        self.lock()?.execute(
            "DELETE FROM plugin_store_rows WHERE plugin_name = ?1 AND key = ?2",
            params![self.namespace, key],
        )?;
        Ok(())
    }
}
