//! SQLite backend for the memory store.
//!
//! This module provides:
//! - `Database`: connection handling, schema, and the one-time persona migration
//! - `embedding`: vector BLOB encoding and cosine distance
//! - `search`: k-nearest-neighbour queries over the vector table
//!
//! Entries and vectors live in two tables keyed by the same id. Every write that
//! touches both runs in a single transaction, so a reader never sees one without
//! the other. Writes go through one mutex-guarded connection; reads open their own
//! read-only connection and, with WAL journaling, never block each other.

pub mod embedding;
pub mod search;

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};

use crate::memory_types::{MemoryEntry, GLOBAL_PERSONA};

pub use self::embedding::vec_to_blob;

/// Error types for SQLite operations.
#[derive(Debug)]
pub enum Error {
    Sqlite(String),
    InvalidBlobSize { expected: usize, actual: usize },
    MismatchedDimensions { expected: usize, actual: usize },
    EmptyVector,
    InvalidEmbedding(String),
    InvalidLimit(String),
    /// The blocking worker running the query panicked or was cancelled.
    Worker(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Sqlite(msg) => write!(f, "Database error: {}", msg),
            Error::InvalidBlobSize { expected, actual } => {
                write!(
                    f,
                    "Invalid BLOB size: expected {} bytes, got {} bytes",
                    expected, actual
                )
            }
            Error::MismatchedDimensions { expected, actual } => {
                write!(
                    f,
                    "Mismatched dimensions: expected {} dimensions, got {} dimensions",
                    expected, actual
                )
            }
            Error::EmptyVector => write!(f, "Cannot compute similarity with empty vector"),
            Error::InvalidEmbedding(msg) => write!(f, "Invalid embedding: {}", msg),
            Error::InvalidLimit(msg) => write!(f, "Invalid limit: {}", msg),
            Error::Worker(msg) => write!(f, "Database worker failed: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Sqlite(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Which half of a paired insert failed.
#[derive(Debug)]
pub enum PairInsertError {
    /// The entry row could not be written. Nothing was stored.
    Entry(Error),
    /// The vector row could not be written. The entry row was rolled back.
    Vector(Error),
}

/// SQLite database backend.
pub struct Database {
    path: PathBuf,
    writer: Mutex<Connection>,
}

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Create tables if missing and bring older databases up to date.
fn create_schema(conn: &mut Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS memory_entries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            text TEXT NOT NULL,
            tags TEXT NOT NULL DEFAULT '',
            persona TEXT NOT NULL DEFAULT 'Global',
            created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );

        CREATE TABLE IF NOT EXISTS memory_vectors (
            entry_id INTEGER PRIMARY KEY REFERENCES memory_entries(id) ON DELETE CASCADE,
            embedding BLOB NOT NULL
        );
        "#,
    )?;

    migrate_persona_column(conn)?;

    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_memory_entries_persona ON memory_entries(persona);",
    )?;
    Ok(())
}

/// Add the persona column to databases created before it existed, backfilling "Global".
fn migrate_persona_column(conn: &mut Connection) -> Result<()> {
    let has_persona = {
        let mut stmt = conn.prepare("PRAGMA table_info(memory_entries)")?;
        let columns = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        columns.iter().any(|c| c == "persona")
    };

    if !has_persona {
        let tx = conn.transaction()?;
        tx.execute(
            "ALTER TABLE memory_entries ADD COLUMN persona TEXT DEFAULT 'Global'",
            [],
        )?;
        let backfilled = tx.execute(
            "UPDATE memory_entries SET persona = ?1 WHERE persona IS NULL",
            [GLOBAL_PERSONA],
        )?;
        tx.commit()?;
        tracing::info!(backfilled, "added persona column to memory_entries");
    }
    Ok(())
}

pub(crate) fn tags_to_column(tags: &[String]) -> String {
    tags.join(",")
}

pub(crate) fn tags_from_column(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<MemoryEntry> {
    let tags: Option<String> = row.get(2)?;
    let persona: Option<String> = row.get(3)?;
    Ok(MemoryEntry {
        id: row.get(0)?,
        text: row.get(1)?,
        tags: tags_from_column(tags.as_deref().unwrap_or_default()),
        persona: persona.unwrap_or_else(|| GLOBAL_PERSONA.to_string()),
        created_at: row.get(4)?,
    })
}

impl Database {
    /// Open or create a SQLite database at the given path.
    ///
    /// Initializes the schema if the database is new and migrates older layouts.
    ///
    /// # Errors
    ///
    /// Returns error if the database cannot be opened or schema initialization fails.
    pub fn open(path: &Path) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.pragma_update(None, "foreign_keys", true)?;
        create_schema(&mut conn)?;
        tracing::debug!(path = %path.display(), journal_mode = %mode, "database opened");

        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(conn),
        })
    }

    /// Path of the backing database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn writer(&self) -> Result<MutexGuard<'_, Connection>> {
        self.writer
            .lock()
            .map_err(|_| Error::Sqlite("writer connection lock poisoned".to_string()))
    }

    /// Open a read-only connection for a single query.
    pub(crate) fn reader(&self) -> Result<Connection> {
        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY
                | OpenFlags::SQLITE_OPEN_NO_MUTEX
                | OpenFlags::SQLITE_OPEN_URI,
        )?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(conn)
    }

    /// Insert an entry and its vector as one unit.
    ///
    /// The entry row is written first; if the vector cannot be encoded or written
    /// the transaction is rolled back so no entry exists without its vector.
    pub fn insert_pair(
        &self,
        text: &str,
        tags: &[String],
        persona: &str,
        embedding: &[f32],
    ) -> std::result::Result<i64, PairInsertError> {
        let mut conn = self.writer().map_err(PairInsertError::Entry)?;
        let tx = conn
            .transaction()
            .map_err(|e| PairInsertError::Entry(e.into()))?;

        tx.execute(
            r#"
            INSERT INTO memory_entries (text, tags, persona, created_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![text, tags_to_column(tags), persona, Utc::now().timestamp()],
        )
        .map_err(|e| PairInsertError::Entry(e.into()))?;
        let id = tx.last_insert_rowid();

        let vector = vec_to_blob(embedding).and_then(|blob| {
            tx.execute(
                "INSERT INTO memory_vectors (entry_id, embedding) VALUES (?1, ?2)",
                params![id, blob],
            )
            .map_err(Error::from)
        });

        if let Err(err) = vector {
            if let Err(rollback_err) = tx.rollback() {
                tracing::error!(id, error = %rollback_err, "rollback after vector insert failure failed");
            }
            return Err(PairInsertError::Vector(err));
        }

        tx.commit().map_err(|e| PairInsertError::Vector(e.into()))?;
        Ok(id)
    }

    /// Retrieve a single entry by id.
    pub fn get(&self, id: i64) -> Result<Option<MemoryEntry>> {
        let conn = self.reader()?;
        let entry = conn
            .query_row(
                r#"
                SELECT id, text, tags, persona, created_at
                FROM memory_entries
                WHERE id = ?1
                "#,
                [id],
                row_to_entry,
            )
            .optional()?;
        Ok(entry)
    }

    /// List entries newest first, optionally for one persona.
    pub fn list_recent(&self, limit: usize, persona: Option<&str>) -> Result<Vec<MemoryEntry>> {
        search::validate_limit(limit)?;
        let conn = self.reader()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, text, tags, persona, created_at
            FROM memory_entries
            WHERE ?1 IS NULL OR persona = ?1
            ORDER BY id DESC
            LIMIT ?2
            "#,
        )?;
        let entries = stmt
            .query_map(params![persona, limit as i64], row_to_entry)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    /// Number of stored entries.
    pub fn count(&self) -> Result<usize> {
        let conn = self.reader()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM memory_entries", [], |row| {
            row.get(0)
        })?;
        Ok(count as usize)
    }

    /// Delete every vector and entry in one transaction. Returns the entry count removed.
    pub fn clear(&self) -> Result<usize> {
        let mut conn = self.writer()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM memory_vectors", [])?;
        let removed = tx.execute("DELETE FROM memory_entries", [])?;
        tx.commit()?;
        Ok(removed)
    }

    /// Number of vector rows (pairing checks in tests).
    #[cfg(test)]
    pub(crate) fn vector_count(&self) -> Result<usize> {
        let conn = self.reader()?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM memory_vectors", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use tempfile::TempDir;

    fn create_test_db() -> Database {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.db");
        let db = Database::open(&path).unwrap();
        std::mem::forget(dir);
        db
    }

    #[test]
    fn test_insert_pair_and_get() {
        let db = create_test_db();
        let embedding = testing::test_embedding(0.1);
        let tags = vec!["work".to_string(), "idea".to_string()];
        let id = db
            .insert_pair("test content", &tags, "Alice", &embedding)
            .unwrap();

        let entry = db.get(id).unwrap().unwrap();
        assert_eq!(entry.text, "test content");
        assert_eq!(entry.tags, tags);
        assert_eq!(entry.persona, "Alice");
        assert!(entry.created_at > 0);
        assert_eq!(db.vector_count().unwrap(), 1);
    }

    #[test]
    fn test_ids_are_monotonic() {
        let db = create_test_db();
        let embedding = testing::test_embedding(0.1);
        let first = db.insert_pair("one", &[], "Global", &embedding).unwrap();
        let second = db.insert_pair("two", &[], "Global", &embedding).unwrap();
        assert_eq!(first, 1);
        assert!(second > first);
    }

    #[test]
    fn test_vector_failure_rolls_back_entry() {
        let db = create_test_db();
        let bad_embedding = vec![0.1f32; 10];
        let result = db.insert_pair("orphan", &[], "Global", &bad_embedding);
        assert!(matches!(result, Err(PairInsertError::Vector(_))));
        assert_eq!(db.count().unwrap(), 0);
        assert_eq!(db.vector_count().unwrap(), 0);
    }

    #[test]
    fn test_get_nonexistent() {
        let db = create_test_db();
        assert!(db.get(42).unwrap().is_none());
    }

    #[test]
    fn test_list_recent_newest_first() {
        let db = create_test_db();
        let embedding = testing::test_embedding(0.1);
        let first = db.insert_pair("first", &[], "Global", &embedding).unwrap();
        let second = db.insert_pair("second", &[], "Global", &embedding).unwrap();

        let entries = db.list_recent(10, None).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, second);
        assert_eq!(entries[1].id, first);
    }

    #[test]
    fn test_list_recent_by_persona() {
        let db = create_test_db();
        let embedding = testing::test_embedding(0.1);
        db.insert_pair("alice note", &[], "Alice", &embedding).unwrap();
        db.insert_pair("shared note", &[], "Global", &embedding).unwrap();

        let alice = db.list_recent(10, Some("Alice")).unwrap();
        assert_eq!(alice.len(), 1);
        assert_eq!(alice[0].persona, "Alice");
    }

    #[test]
    fn test_clear_removes_both_tables() {
        let db = create_test_db();
        let embedding = testing::test_embedding(0.1);
        for i in 0..3 {
            db.insert_pair(&format!("item {}", i), &[], "Global", &embedding)
                .unwrap();
        }

        assert_eq!(db.clear().unwrap(), 3);
        assert_eq!(db.count().unwrap(), 0);
        assert_eq!(db.vector_count().unwrap(), 0);

        db.insert_pair("after clear", &[], "Global", &embedding)
            .unwrap();
        assert_eq!(db.count().unwrap(), 1);
    }

    #[test]
    fn test_tags_column_round_trip_empty() {
        assert_eq!(tags_to_column(&[]), "");
        assert!(tags_from_column("").is_empty());
        assert_eq!(tags_from_column("a,,b"), vec!["a", "b"]);
    }

    #[test]
    fn test_persona_migration_backfills_global() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("legacy.db");

        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(
                r#"
                CREATE TABLE memory_entries (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    text TEXT NOT NULL,
                    tags TEXT NOT NULL DEFAULT '',
                    created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
                );
                INSERT INTO memory_entries (text, tags) VALUES ('legacy thought', 'old');
                "#,
            )
            .unwrap();
        }

        let db = Database::open(&path).unwrap();
        let entry = db.get(1).unwrap().unwrap();
        assert_eq!(entry.persona, "Global");
        assert_eq!(entry.tags, vec!["old"]);

        // Reopening must not try to add the column again.
        drop(db);
        Database::open(&path).unwrap();
    }

    #[test]
    fn test_database_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.db");

        {
            let db = Database::open(&path).unwrap();
            let embedding = testing::test_embedding(0.5);
            db.insert_pair("persistent", &[], "Global", &embedding)
                .unwrap();
        }

        let db = Database::open(&path).unwrap();
        let entries = db.list_recent(10, None).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].text, "persistent");
    }

    #[test]
    fn test_error_display() {
        let err = Error::InvalidBlobSize {
            expected: 1536,
            actual: 10,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("1536"));
        assert!(msg.contains("10"));
    }
}
