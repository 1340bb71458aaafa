use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension};
use serde_json::Value;
use tokio::sync::Mutex;

use super::StateStore;

/// SQLite-backed state store.
/// Uses tokio::Mutex for async-friendly locking around the connection.
///
/// Rows are scoped by a task execution identity so one database file can
/// serve many task attempts without key collisions.
pub struct SqliteStateStore {
    conn: Arc<Mutex<Connection>>,
    scope: String,
}

impl SqliteStateStore {
    /// Opens (creating if needed) the state database at `db_path`, scoping
    /// all keys under `scope`.
    pub async fn open<P: AsRef<Path>>(db_path: P, scope: &str) -> anyhow::Result<Self> {
        let conn = Connection::open(db_path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            scope: scope.to_string(),
        };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS task_state (
                scope TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (scope, key)
            )
            "#,
            [],
        )?;
        Ok(())
    }
}

#[async_trait]
impl StateStore for SqliteStateStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Value>> {
        let conn = self.conn.lock().await;
        let raw: Option<String> = conn
            .query_row(
                "SELECT value FROM task_state WHERE scope = ?1 AND key = ?2",
                rusqlite::params![&self.scope, key],
                |row| row.get(0),
            )
            .optional()?;

        match raw {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: Value) -> anyhow::Result<()> {
        let conn = self.conn.lock().await;
        let now = chrono::Utc::now().to_rfc3339();
        conn.execute(
            r#"
            INSERT INTO task_state (scope, key, value, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (scope, key)
            DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
            rusqlite::params![&self.scope, key, value.to_string(), now],
        )?;
        Ok(())
    }
}
