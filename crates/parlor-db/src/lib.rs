//! SQLite measurement source.
//!
//! The measurement store is written by the sensor listener; the monitor only
//! reads it. Each poll tick runs two queries:
//!
//! 1. every run without an end time, joined to its animal, newest first
//! 2. the pulse count for each of those runs
//!
//! and hands the rows to the engine as [`RawOpenRun`]s.
//!
//! # Schema
//!
//! ```sql
//! animals(id INTEGER PRIMARY KEY, tag TEXT, tracking_number TEXT)
//! measurements(id INTEGER PRIMARY KEY, animal_id INTEGER, started_at TEXT, ended_at TEXT)
//! measurement_pulses(id INTEGER PRIMARY KEY, measurement_id INTEGER, recorded_at TEXT)
//! ```
//!
//! Timestamps are TEXT, either ISO 8601 or SQLite's `YYYY-MM-DD HH:MM:SS`.
//! The listener does not guarantee `tag` or `started_at`, so both are read
//! leniently: a NULL or non-text value reaches the engine as one malformed
//! row rather than failing the query.
//!
//! # Thread Safety
//!
//! [`Database`] wraps a `rusqlite::Connection`, which is `Send` but not `Sync`.
//! The scheduler owns one instance and queries it from a blocking task.

use std::path::{Path, PathBuf};
use std::time::Duration;

use parlor_core::RawOpenRun;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags, Row, params};
use thiserror::Error;
use tracing::debug;

/// How long a read waits for the listener to release a write lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(2);

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// The store could not be opened.
    #[error("cannot open measurement store {}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },
    /// An error from the underlying database.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// A run with no end time, as stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenRunRecord {
    pub run_id: i64,
    pub animal_id: i64,
    pub tag: Option<String>,
    pub tracking_number: Option<String>,
    pub started_at: Option<String>,
}

/// Connection to the measurement store.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Opens an existing store read-only.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|source| DbError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        debug!(path = %path.display(), "opened measurement store");
        Ok(Self { conn })
    }

    /// Opens a store for writing, creating the schema if necessary.
    ///
    /// Used for fixtures and demo data; the monitor itself never writes.
    pub fn create(path: &Path) -> Result<Self, DbError> {
        let conn = Connection::open(path).map_err(|source| DbError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Opens an in-memory store with the schema in place.
    pub fn open_in_memory() -> Result<Self, DbError> {
        let db = Self {
            conn: Connection::open_in_memory()?,
        };
        db.init()?;
        Ok(db)
    }

    /// Initializes the schema. Idempotent.
    fn init(&self) -> Result<(), DbError> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS animals (
                id INTEGER PRIMARY KEY,
                tag TEXT,
                tracking_number TEXT
            );

            CREATE TABLE IF NOT EXISTS measurements (
                id INTEGER PRIMARY KEY,
                animal_id INTEGER NOT NULL REFERENCES animals(id),
                started_at TEXT,
                ended_at TEXT
            );

            CREATE TABLE IF NOT EXISTS measurement_pulses (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                measurement_id INTEGER NOT NULL REFERENCES measurements(id),
                recorded_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            );

            CREATE INDEX IF NOT EXISTS idx_measurements_open ON measurements(ended_at);
            CREATE INDEX IF NOT EXISTS idx_pulses_measurement ON measurement_pulses(measurement_id);
            ",
        )?;
        Ok(())
    }

    /// Lists runs with no end time, newest first.
    pub fn list_open_runs(&self) -> Result<Vec<OpenRunRecord>, DbError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT m.id, m.animal_id, a.tag, a.tracking_number, m.started_at
            FROM measurements m
            LEFT JOIN animals a ON a.id = m.animal_id
            WHERE m.ended_at IS NULL
            ORDER BY m.started_at DESC, m.id DESC
            ",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(OpenRunRecord {
                run_id: row.get(0)?,
                animal_id: row.get(1)?,
                tag: lenient_text(row, 2)?,
                tracking_number: lenient_text(row, 3)?,
                started_at: lenient_text(row, 4)?,
            })
        })?;
        let mut runs = Vec::new();
        for row in rows {
            runs.push(row?);
        }
        Ok(runs)
    }

    /// Counts pulses recorded for a run.
    pub fn pulse_count(&self, run_id: i64) -> Result<i64, DbError> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM measurement_pulses WHERE measurement_id = ?1",
            [run_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Runs both queries and combines them into one poll snapshot.
    pub fn open_runs(&self) -> Result<Vec<RawOpenRun>, DbError> {
        let records = self.list_open_runs()?;
        let mut runs = Vec::with_capacity(records.len());
        for record in records {
            let pulses = self.pulse_count(record.run_id)?;
            runs.push(RawOpenRun {
                run_id: record.run_id,
                entity_id: record.animal_id,
                tag: record.tag,
                secondary_id: record.tracking_number,
                started_at: record.started_at,
                pulses: Some(pulses),
            });
        }
        debug!(open = runs.len(), "queried open runs");
        Ok(runs)
    }

    // Writers below mirror what the sensor listener does.

    /// Inserts or replaces an animal.
    pub fn upsert_animal(
        &self,
        id: i64,
        tag: &str,
        tracking_number: Option<&str>,
    ) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO animals (id, tag, tracking_number) VALUES (?1, ?2, ?3)",
            params![id, tag, tracking_number],
        )?;
        Ok(())
    }

    /// Opens a run for an animal.
    pub fn start_run(&self, run_id: i64, animal_id: i64, started_at: &str) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO measurements (id, animal_id, started_at) VALUES (?1, ?2, ?3)",
            params![run_id, animal_id, started_at],
        )?;
        Ok(())
    }

    /// Records `count` pulses against a run.
    pub fn add_pulses(&mut self, run_id: i64, count: u32) -> Result<(), DbError> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt =
                tx.prepare("INSERT INTO measurement_pulses (measurement_id) VALUES (?1)")?;
            for _ in 0..count {
                stmt.execute([run_id])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Closes a run.
    pub fn end_run(&self, run_id: i64, ended_at: &str) -> Result<(), DbError> {
        self.conn.execute(
            "UPDATE measurements SET ended_at = ?2 WHERE id = ?1",
            params![run_id, ended_at],
        )?;
        Ok(())
    }
}

/// NULL and blobs read as `None`; numbers are rendered as text so that
/// validation rejects them per row.
fn lenient_text(row: &Row<'_>, index: usize) -> rusqlite::Result<Option<String>> {
    Ok(match row.get_ref(index)? {
        ValueRef::Null | ValueRef::Blob(_) => None,
        ValueRef::Text(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Integer(value) => Some(value.to_string()),
        ValueRef::Real(value) => Some(value.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn seeded() -> Database {
        let mut db = Database::open_in_memory().expect("open in-memory db");
        db.upsert_animal(23, "TR023", Some("Daisy")).unwrap();
        db.upsert_animal(14, "TR014", None).unwrap();
        db.start_run(1, 23, "2025-01-15 06:00:00").unwrap();
        db.start_run(2, 14, "2025-01-15 06:02:00").unwrap();
        db.add_pulses(1, 45).unwrap();
        db.add_pulses(2, 3).unwrap();
        db
    }

    #[test]
    fn open_runs_joins_animals_newest_first() {
        let db = seeded();
        let runs = db.open_runs().unwrap();
        assert_eq!(
            runs,
            vec![
                RawOpenRun {
                    run_id: 2,
                    entity_id: 14,
                    tag: Some("TR014".to_string()),
                    secondary_id: None,
                    started_at: Some("2025-01-15 06:02:00".to_string()),
                    pulses: Some(3),
                },
                RawOpenRun {
                    run_id: 1,
                    entity_id: 23,
                    tag: Some("TR023".to_string()),
                    secondary_id: Some("Daisy".to_string()),
                    started_at: Some("2025-01-15 06:00:00".to_string()),
                    pulses: Some(45),
                },
            ]
        );
    }

    #[test]
    fn null_and_mistyped_columns_do_not_fail_the_query() {
        let db = seeded();
        db.conn
            .execute(
                "INSERT INTO animals (id, tag, tracking_number) VALUES (31, NULL, NULL)",
                [],
            )
            .unwrap();
        db.start_run(3, 31, "2025-01-15 06:03:00").unwrap();
        db.conn
            .execute(
                "INSERT INTO measurements (id, animal_id, started_at) VALUES (4, 14, 1736920980)",
                [],
            )
            .unwrap();
        db.conn
            .execute(
                "INSERT INTO measurements (id, animal_id, started_at) VALUES (5, 99, '2025-01-15 06:04:00')",
                [],
            )
            .unwrap();

        let runs = db.open_runs().unwrap();
        assert_eq!(runs.len(), 5);
        let by_id = |id: i64| runs.iter().find(|run| run.run_id == id).unwrap();
        assert_eq!(by_id(3).tag, None);
        assert_eq!(by_id(4).started_at.as_deref(), Some("1736920980"));
        assert_eq!(by_id(5).tag, None);
        assert_eq!(by_id(5).entity_id, 99);
        assert_eq!(by_id(1).tag.as_deref(), Some("TR023"));
    }

    #[test]
    fn ended_runs_are_not_open() {
        let db = seeded();
        db.end_run(2, "2025-01-15 06:05:00").unwrap();
        let runs = db.list_open_runs().unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].run_id, 1);
    }

    #[test]
    fn pulse_count_of_unknown_run_is_zero() {
        let db = seeded();
        assert_eq!(db.pulse_count(99).unwrap(), 0);
    }

    #[test]
    fn read_only_open_sees_listener_writes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("measurements.db");
        let mut writer = Database::create(&path).unwrap();
        writer.upsert_animal(5, "TR005", None).unwrap();
        writer.start_run(10, 5, "2025-01-15T06:00:00Z").unwrap();

        let reader = Database::open(&path).unwrap();
        assert_eq!(reader.open_runs().unwrap()[0].pulses, Some(0));

        writer.add_pulses(10, 7).unwrap();
        assert_eq!(reader.open_runs().unwrap()[0].pulses, Some(7));

        assert!(reader.start_run(11, 5, "2025-01-15T06:01:00Z").is_err());
    }

    #[test]
    fn open_missing_store_fails() {
        let dir = TempDir::new().unwrap();
        let result = Database::open(&dir.path().join("missing.db"));
        assert!(matches!(result, Err(DbError::Open { .. })));
    }
}
