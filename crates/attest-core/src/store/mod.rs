//! `SQLite`-backed store for the compliance history core.
//!
//! The store owns the database connection and runs the embedded schema on
//! open: WAL mode for concurrent reads, foreign keys, a busy timeout for
//! cross-connection write contention, and the append-only triggers on the
//! evidence tables.
//!
//! There is deliberately no update or delete primitive for evidence rows
//! anywhere in this crate. The triggers in `schema.sql` turn that contract
//! into a database invariant: an `UPDATE` or `DELETE` against
//! `evidence_nodes` or `ledger_entries` aborts no matter which connection
//! issues it.

// SQLite returns i64 for row IDs and counts, but they're always non-negative.
// Timestamps won't overflow u64 until the year 2554.
// Mutex poisoning indicates a panic in another thread, which is unrecoverable.
#![allow(
    clippy::cast_sign_loss,
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::missing_panics_doc
)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OpenFlags};
use thiserror::Error;


/// Schema SQL embedded at compile time.
const SCHEMA_SQL: &str = include_str!("schema.sql");

/// Errors that can occur while opening or inspecting the store.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// Database error from `SQLite`.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O error during database operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Row counts for the store's record kinds.
#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    /// Total number of evidence nodes.
    pub evidence_node_count: u64,

    /// Total number of ledger entries.
    pub ledger_entry_count: u64,

    /// Total number of certification versions (all chains, all versions).
    pub certification_count: u64,

    /// Total number of verification tokens ever issued.
    pub token_count: u64,

    /// Total number of scan events.
    pub scan_event_count: u64,

    /// Highest ledger entry ID assigned so far (0 when empty).
    pub last_ledger_entry_id: u64,
}

/// Handle to the compliance history database.
///
/// Cloning is cheap: all clones share one connection behind a mutex, which
/// also gives every multi-statement read a consistent snapshot (a chain walk
/// never observes a half-applied correction).
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl Store {
    /// Opens or creates the database at the specified path.
    ///
    /// Runs the embedded schema, enabling WAL mode and installing the
    /// append-only triggers if they are not already present.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        conn.execute_batch(SCHEMA_SQL)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(path.to_path_buf()),
        })
    }

    /// Creates an in-memory store for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be initialized.
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: None,
        })
    }

    /// Locks and returns the underlying connection.
    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap()
    }

    /// Gets row counts for every record kind in the store.
    ///
    /// # Errors
    ///
    /// Returns an error if statistics cannot be gathered.
    pub fn stats(&self) -> Result<StoreStats, StoreError> {
        let conn = self.conn();

        let count = |table: &str| -> Result<u64, rusqlite::Error> {
            conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                row.get::<_, i64>(0)
            })
            .map(|n| n as u64)
        };

        let last_ledger_entry_id: u64 = conn
            .query_row(
                "SELECT COALESCE(MAX(id), 0) FROM ledger_entries",
                [],
                |row| row.get::<_, i64>(0),
            )
            .map(|n| n as u64)?;

        Ok(StoreStats {
            evidence_node_count: count("evidence_nodes")?,
            ledger_entry_count: count("ledger_entries")?,
            certification_count: count("certifications")?,
            token_count: count("verification_tokens")?,
            scan_event_count: count("scan_events")?,
            last_ledger_entry_id,
        })
    }

    /// Verifies that WAL mode is enabled.
    ///
    /// # Errors
    ///
    /// Returns an error if the journal mode cannot be queried.
    pub fn verify_wal_mode(&self) -> Result<bool, StoreError> {
        let conn = self.conn();
        let mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
        Ok(mode.to_lowercase() == "wal")
    }

    /// Path of the backing database file, if file-backed.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

/// Current time as nanoseconds since the Unix epoch.
pub(crate) fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// Converts a UTC timestamp to storage nanoseconds, clamping pre-epoch
/// instants to zero.
pub(crate) fn datetime_to_ns(at: DateTime<Utc>) -> u64 {
    at.timestamp_nanos_opt().map_or(0, |ns| ns.max(0) as u64)
}

/// Converts storage nanoseconds back to a UTC timestamp.
pub(crate) fn ns_to_datetime(ns: u64) -> DateTime<Utc> {
    DateTime::from_timestamp_nanos(ns as i64)
}
