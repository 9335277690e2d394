//! SQLite-backed store over the `kv_entries` table.

use super::{KvStore, StoreError, StoreResult};
use rusqlite::{params, Connection, OptionalExtension};

/// Store adapter borrowing a connection opened through `db::open_db`.
pub struct SqliteKvStore<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteKvStore<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl KvStore for SqliteKvStore<'_> {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.conn
            .query_row(
                "SELECT value FROM kv_entries WHERE key = ?1;",
                [key],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .map_err(|err| StoreError::Read {
                key: key.to_string(),
                message: err.to_string(),
            })
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.conn
            .execute(
                "INSERT INTO kv_entries (key, value)
                 VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    updated_at = (strftime('%s', 'now') * 1000);",
                params![key, value],
            )
            .map(|_| ())
            .map_err(|err| StoreError::Write {
                key: key.to_string(),
                message: err.to_string(),
            })
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        self.conn
            .execute("DELETE FROM kv_entries WHERE key = ?1;", [key])
            .map(|_| ())
            .map_err(|err| StoreError::Write {
                key: key.to_string(),
                message: err.to_string(),
            })
    }

    fn keys(&self) -> StoreResult<Vec<String>> {
        let listing = || -> rusqlite::Result<Vec<String>> {
            let mut stmt = self
                .conn
                .prepare("SELECT key FROM kv_entries ORDER BY key ASC;")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            rows.collect()
        };
        listing().map_err(|err| StoreError::Listing(err.to_string()))
    }
}
