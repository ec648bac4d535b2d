//! SQLite storage medium
//!
//! One database file holds every namespace; each [`SqliteBackend`] sees only
//! the rows of its own namespace.

use super::StorageBackend;
use crate::error::Result;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Database handle with connection pooling (single connection for now)
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        // WAL keeps readers and the single writer from blocking each other
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            ",
        )?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    /// Run migrations on this database
    pub fn migrate(&self) -> Result<()> {
        let conn = self.connection();
        super::schema::run_migrations(&conn)
    }

    /// Get the underlying connection (for advanced use)
    pub fn connection(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Namespace-scoped view of a [`Database`].
pub struct SqliteBackend {
    db: Arc<Database>,
    namespace: String,
}

impl SqliteBackend {
    pub fn new(db: Arc<Database>, namespace: &str) -> Self {
        Self {
            db,
            namespace: namespace.to_string(),
        }
    }
}

impl StorageBackend for SqliteBackend {
    fn keys(&self) -> Result<Vec<String>> {
        let conn = self.db.connection();
        let mut stmt = conn.prepare("SELECT key FROM storage_items WHERE namespace = ?1")?;
        let keys = stmt
            .query_map([&self.namespace], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(keys)
    }

    fn read(&self, key: &str) -> Result<Option<String>> {
        let conn = self.db.connection();
        let value = conn
            .query_row(
                "SELECT value FROM storage_items WHERE namespace = ?1 AND key = ?2",
                params![self.namespace, key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn write(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.db.connection();
        conn.execute(
            r#"
            INSERT INTO storage_items (namespace, key, value)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(namespace, key) DO UPDATE SET
                value = excluded.value
            "#,
            params![self.namespace, key, value],
        )?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let conn = self.db.connection();
        conn.execute(
            "DELETE FROM storage_items WHERE namespace = ?1 AND key = ?2",
            params![self.namespace, key],
        )?;
        Ok(())
    }
}
