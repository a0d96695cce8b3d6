//! SQLite-backed feedback store

use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use std::path::Path;
use tracing::debug;

use super::feedback::{FeedbackEntry, FeedbackStore};

/// Feedback entries persisted in a SQLite database
pub struct SqliteFeedbackStore {
    conn: Connection,
    capacity: usize,
}

impl SqliteFeedbackStore {
    /// Open or create database at path
    pub fn open(path: &Path, capacity: usize) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open feedback database {:?}", path))?;
        debug!("Opened feedback database {:?}", path);
        Self::with_connection(conn, capacity)
    }

    /// Database that lives only as long as the store
    pub fn in_memory(capacity: usize) -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, capacity)
    }

    fn with_connection(conn: Connection, capacity: usize) -> Result<Self> {
        let store = Self {
            conn,
            capacity: capacity.max(1),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Initialize database schema
    fn init_schema(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS feedback (
                    seq INTEGER PRIMARY KEY AUTOINCREMENT,
                    id TEXT NOT NULL,
                    image_png BLOB NOT NULL,
                    expected_answer TEXT NOT NULL,
                    result_json TEXT NOT NULL,
                    timestamp_ms INTEGER NOT NULL
                );",
            )
            .context("Failed to create feedback schema")?;
        Ok(())
    }
}

impl FeedbackStore for SqliteFeedbackStore {
    fn append(&mut self, entry: FeedbackEntry) -> Result<()> {
        let result_json = serde_json::to_string(&entry.result)?;
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO feedback (id, image_png, expected_answer, result_json, timestamp_ms)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.id,
                entry.image_png,
                entry.expected_answer,
                result_json,
                entry.timestamp_ms as i64
            ],
        )?;
        tx.execute(
            "DELETE FROM feedback WHERE seq NOT IN
                (SELECT seq FROM feedback ORDER BY seq DESC LIMIT ?1)",
            params![self.capacity as i64],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn entries(&self) -> Result<Vec<FeedbackEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, image_png, expected_answer, result_json, timestamp_ms
             FROM feedback ORDER BY seq ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Vec<u8>>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, i64>(4)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (id, image_png, expected_answer, result_json, timestamp_ms) = row?;
            entries.push(FeedbackEntry {
                result: serde_json::from_str(&result_json)
                    .with_context(|| format!("Corrupt result for feedback entry {}", id))?,
                id,
                image_png,
                expected_answer,
                timestamp_ms: timestamp_ms.max(0) as u64,
            });
        }
        Ok(entries)
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn len(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM feedback", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}
