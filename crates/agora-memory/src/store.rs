use agora_models::memory_record::{MemoryRecord, MEMORY_TABLE_DDL};
use chrono::Utc;
use rusqlite::Connection;

use crate::error::MemoryError;

/// SQLite-backed store for every memory bank.
pub struct SqliteMemoryStore {
    conn: Connection,
}

impl SqliteMemoryStore {
    /// Open (or create) the store at `path` and ensure the schema exists.
    pub fn open(path: &str) -> Result<Self, MemoryError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(MEMORY_TABLE_DDL)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, MemoryError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(MEMORY_TABLE_DDL)?;
        Ok(Self { conn })
    }

    /// Append a lesson to `memory_name`. Returns the new row id.
    pub fn insert(
        &self,
        memory_name: &str,
        situation: &str,
        recommendation: &str,
    ) -> Result<i64, MemoryError> {
        self.conn.execute(
            "INSERT INTO memory_entries (memory_name, situation, recommendation, created_at) \
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![memory_name, situation, recommendation, Utc::now().to_rfc3339()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// All lessons in a bank, oldest first.
    pub fn entries(&self, memory_name: &str) -> Result<Vec<MemoryRecord>, MemoryError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, memory_name, situation, recommendation, created_at \
             FROM memory_entries WHERE memory_name = ?1 ORDER BY id",
        )?;

        let rows = stmt
            .query_map(rusqlite::params![memory_name], |row| {
                Ok(MemoryRecord {
                    id: row.get(0)?,
                    memory_name: row.get(1)?,
                    situation: row.get(2)?,
                    recommendation: row.get(3)?,
                    created_at: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    pub fn count(&self, memory_name: &str) -> Result<usize, MemoryError> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT COUNT(*) FROM memory_entries WHERE memory_name = ?1")?;
        let count: i64 = stmt.query_row(rusqlite::params![memory_name], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn clear(&self, memory_name: &str) -> Result<usize, MemoryError> {
        let removed = self.conn.execute(
            "DELETE FROM memory_entries WHERE memory_name = ?1",
            rusqlite::params![memory_name],
        )?;
        Ok(removed)
    }
}
