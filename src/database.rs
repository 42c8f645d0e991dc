use duckdb::{params, Connection};
use std::path::Path;

use crate::settings::{SettingsBackend, SettingsError};

/// DuckDB-backed key/value table for persisted settings
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open or create a database at the specified path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let conn = Connection::open(path)?;
        let db = Database { conn };
        db.init_schema()?;
        Ok(db)
    }

    /// Open an in-memory database (useful for testing)
    #[allow(dead_code)]
    pub fn open_in_memory() -> Result<Self, SettingsError> {
        let conn = Connection::open_in_memory()?;
        let db = Database { conn };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<(), SettingsError> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS settings (
                key VARCHAR PRIMARY KEY,
                value VARCHAR NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    /// Number of stored rows, chunks included
    #[allow(dead_code)]
    pub fn count(&self) -> Result<i64, SettingsError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM settings", [], |row| row.get(0))?;
        Ok(count)
    }
}

impl SettingsBackend for Database {
    fn get(&self, key: &str) -> Result<Option<String>, SettingsError> {
        let result = self.conn.query_row(
            "SELECT value FROM settings WHERE key = ?",
            params![key],
            |row| row.get::<_, String>(0),
        );

        match result {
            Ok(value) => Ok(Some(value)),
            Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), SettingsError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO settings (key, value) VALUES (?, ?)",
            params![key, value],
        )?;
        Ok(())
    }

    fn delete(&mut self, key: &str) -> Result<(), SettingsError> {
        self.conn
            .execute("DELETE FROM settings WHERE key = ?", params![key])?;
        Ok(())
    }
}
