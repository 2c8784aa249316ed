//! SQLite backend via `tokio-rusqlite`.
//!
//! Each record is one row: the identity key as primary key and the full
//! record as JSON. `rowid` gives store order for scans.

use std::path::Path;

use async_trait::async_trait;
use facegate_core::EnrollmentRecord;
use rusqlite::{params, OptionalExtension};
use tokio_rusqlite::Connection;

use crate::store::{EnrollmentStore, StoreError};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS enrollments (
    key        TEXT PRIMARY KEY NOT NULL,
    record     TEXT NOT NULL,
    created_at TEXT NOT NULL
);
";

/// Handle to the on-disk enrollment database, opened once and shared.
pub struct SqliteEnrollmentStore {
    conn: Connection,
}

impl SqliteEnrollmentStore {
    /// Open (creating if needed) the database at `path`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Unavailable(format!("cannot create {}: {e}", parent.display()))
            })?;
        }

        let conn = Connection::open(path)
            .await
            .map_err(|e| StoreError::Unavailable(format!("{}: {e}", path.display())))?;
        let store = Self { conn };
        store.init_schema().await?;

        tracing::info!(path = %path.display(), "enrollment store opened");
        Ok(store)
    }

    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let store = Self { conn };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        self.conn
            .call(|conn| {
                conn.execute_batch(SCHEMA)?;
                Ok(())
            })
            .await
            .map_err(|e| StoreError::Unavailable(format!("schema setup failed: {e}")))
    }
}

fn map_call_error(err: tokio_rusqlite::Error) -> StoreError {
    match err {
        tokio_rusqlite::Error::ConnectionClosed => {
            StoreError::Unavailable("database connection closed".into())
        }
        other => StoreError::Io(other.to_string()),
    }
}

fn encode(record: &EnrollmentRecord) -> Result<String, StoreError> {
    serde_json::to_string(record).map_err(|e| StoreError::Io(format!("encoding record: {e}")))
}

fn decode(key: &str, raw: &str) -> Result<EnrollmentRecord, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::Corrupt {
        key: key.to_string(),
        message: e.to_string(),
    })
}

#[async_trait]
impl EnrollmentStore for SqliteEnrollmentStore {
    async fn put(&self, record: EnrollmentRecord) -> Result<(), StoreError> {
        let json = encode(&record)?;
        let key = record.key().to_string();
        let created_at = record.created_at().to_rfc3339();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO enrollments (key, record, created_at) VALUES (?1, ?2, ?3)
                     ON CONFLICT(key) DO UPDATE SET record = excluded.record,
                                                    created_at = excluded.created_at",
                    params![key, json, created_at],
                )?;
                Ok(())
            })
            .await
            .map_err(map_call_error)
    }

    async fn insert(&self, record: EnrollmentRecord) -> Result<(), StoreError> {
        let json = encode(&record)?;
        let key = record.key().to_string();
        let created_at = record.created_at().to_rfc3339();
        let inserted = self
            .conn
            .call({
                let key = key.clone();
                move |conn| {
                    let changed = conn.execute(
                        "INSERT OR IGNORE INTO enrollments (key, record, created_at)
                         VALUES (?1, ?2, ?3)",
                        params![key, json, created_at],
                    )?;
                    Ok(changed == 1)
                }
            })
            .await
            .map_err(map_call_error)?;

        if inserted {
            Ok(())
        } else {
            Err(StoreError::Duplicate(key))
        }
    }

    async fn get_by_key(&self, key: &str) -> Result<Option<EnrollmentRecord>, StoreError> {
        let lookup = key.to_string();
        let raw: Option<String> = self
            .conn
            .call(move |conn| {
                let raw = conn
                    .query_row(
                        "SELECT record FROM enrollments WHERE key = ?1",
                        params![lookup],
                        |row| row.get(0),
                    )
                    .optional()?;
                Ok(raw)
            })
            .await
            .map_err(map_call_error)?;

        raw.map(|json| decode(key, &json)).transpose()
    }

    async fn get_all(&self) -> Result<Vec<EnrollmentRecord>, StoreError> {
        let rows: Vec<(String, String)> = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare("SELECT key, record FROM enrollments ORDER BY rowid")?;
                let rows = stmt
                    .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
            .map_err(map_call_error)?;

        rows.iter().map(|(key, json)| decode(key, json)).collect()
    }

    async fn remove(&self, key: &str) -> Result<bool, StoreError> {
        let key = key.to_string();
        self.conn
            .call(move |conn| {
                let changed = conn.execute("DELETE FROM enrollments WHERE key = ?1", params![key])?;
                Ok(changed > 0)
            })
            .await
            .map_err(map_call_error)
    }

    async fn len(&self) -> Result<usize, StoreError> {
        self.conn
            .call(|conn| {
                let n: i64 = conn.query_row("SELECT COUNT(*) FROM enrollments", [], |row| row.get(0))?;
                Ok(n as usize)
            })
            .await
            .map_err(map_call_error)
    }
}
