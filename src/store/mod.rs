//! SQLite-based durable extraction state.
//!
//! Everything the pipeline needs to survive a process crash lives here:
//! Run and Stage rows, discovered relationships, and fingerprinted schema
//! snapshots. The store is stored in `~/.cartograph/state.db` by default.
//!
//! # Design
//!
//! - Ownership is provable from durable state only: the conditional
//!   reclaim update is the sole cross-process mutual-exclusion primitive.
//! - Relationship writes are idempotent upserts keyed by
//!   (source column, target column, inference method), so re-running a
//!   stage never duplicates rows.
//! - Versioned - incompatible state is cleared on version mismatch.

mod relationships;
mod runs;
mod snapshots;

pub use relationships::{ArbitrationRecord, RelationshipStatus, SchemaRelationship, ValidationSnapshot};
pub use runs::{Run, RunStatus, Stage, StageStatus};
pub use snapshots::{compute_fingerprint, SchemaSnapshot};

use std::path::PathBuf;
use std::sync::Mutex;

use rusqlite::{Connection, OptionalExtension};

/// Current store schema version. Bump this when the layout changes.
const STORE_VERSION: i32 = 1;

/// Errors that can occur during store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to determine state directory")]
    NoStateDir,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Run not found: {0}")]
    RunNotFound(String),

    #[error("Stage not found: {run_id}/{stage}")]
    StageNotFound { run_id: String, stage: String },

    #[error("Ownership of run {0} was lost to another process")]
    OwnershipLost(String),

    #[error("Unknown status value: {0}")]
    UnknownStatus(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Current unix time in seconds.
pub(crate) fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("time went backwards")
        .as_secs() as i64
}

/// SQLite-backed extraction state store.
pub struct ExtractionStore {
    conn: Mutex<Connection>,
}

impl ExtractionStore {
    /// Open or create the state database at the default location.
    pub fn open() -> StoreResult<Self> {
        Self::open_at(&Self::default_path()?)
    }

    /// Open or create the state database at a specific path.
    pub fn open_at(path: &std::path::Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init()?;
        Ok(store)
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init()?;
        Ok(store)
    }

    /// Default path of the state database.
    pub fn default_path() -> StoreResult<PathBuf> {
        let base = dirs::home_dir().ok_or(StoreError::NoStateDir)?;
        Ok(base.join(".cartograph").join("state.db"))
    }

    pub(crate) fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        f(&conn)
    }

    /// Initialize the store schema and check the version.
    fn init(&self) -> StoreResult<()> {
        self.with_conn(|conn| {
            conn.execute_batch(
                "
                CREATE TABLE IF NOT EXISTS meta (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS runs (
                    id TEXT PRIMARY KEY,
                    project_id TEXT NOT NULL,
                    status TEXT NOT NULL,
                    owner_id TEXT,
                    last_heartbeat INTEGER,
                    current_stage TEXT,
                    error TEXT,
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL
                );

                CREATE TABLE IF NOT EXISTS stages (
                    run_id TEXT NOT NULL,
                    name TEXT NOT NULL,
                    ord INTEGER NOT NULL,
                    status TEXT NOT NULL,
                    progress REAL NOT NULL DEFAULT 0,
                    error TEXT,
                    warnings TEXT NOT NULL DEFAULT '[]',
                    retry_count INTEGER NOT NULL DEFAULT 0,
                    updated_at INTEGER NOT NULL,
                    PRIMARY KEY (run_id, name)
                );

                CREATE TABLE IF NOT EXISTS relationships (
                    project_id TEXT NOT NULL,
                    source_schema TEXT NOT NULL,
                    source_table TEXT NOT NULL,
                    source_column TEXT NOT NULL,
                    target_schema TEXT NOT NULL,
                    target_table TEXT NOT NULL,
                    target_column TEXT NOT NULL,
                    method TEXT NOT NULL,
                    confidence REAL NOT NULL,
                    validation TEXT NOT NULL,
                    status TEXT NOT NULL,
                    updated_at INTEGER NOT NULL,
                    PRIMARY KEY (
                        project_id,
                        source_schema, source_table, source_column,
                        target_schema, target_table, target_column,
                        method
                    )
                );

                CREATE TABLE IF NOT EXISTS snapshots (
                    project_id TEXT PRIMARY KEY,
                    payload TEXT NOT NULL,
                    fingerprint TEXT NOT NULL,
                    refreshed_at INTEGER NOT NULL
                );

                CREATE TABLE IF NOT EXISTS artifacts (
                    project_id TEXT NOT NULL,
                    name TEXT NOT NULL,
                    payload TEXT NOT NULL,
                    updated_at INTEGER NOT NULL,
                    PRIMARY KEY (project_id, name)
                );
                ",
            )?;

            let stored_version: Option<i32> = conn
                .query_row("SELECT value FROM meta WHERE key = 'version'", [], |row| {
                    let s: String = row.get(0)?;
                    Ok(s.parse().unwrap_or(0))
                })
                .optional()?;

            match stored_version {
                Some(v) if v == STORE_VERSION => {}
                Some(_) => {
                    conn.execute_batch(
                        "DELETE FROM runs;
                         DELETE FROM stages;
                         DELETE FROM relationships;
                         DELETE FROM snapshots;
                         DELETE FROM artifacts;",
                    )?;
                    set_version(conn)?;
                }
                None => {
                    set_version(conn)?;
                }
            }
            Ok(())
        })
    }

    /// Store a named artifact payload for a project (upsert).
    pub fn put_artifact(&self, project_id: &str, name: &str, payload: &str) -> StoreResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO artifacts (project_id, name, payload, updated_at)
                 VALUES (?, ?, ?, ?)",
                rusqlite::params![project_id, name, payload, unix_now()],
            )?;
            Ok(())
        })
    }

    /// Fetch a named artifact payload for a project.
    pub fn get_artifact(&self, project_id: &str, name: &str) -> StoreResult<Option<String>> {
        self.with_conn(|conn| {
            let payload = conn
                .query_row(
                    "SELECT payload FROM artifacts WHERE project_id = ? AND name = ?",
                    rusqlite::params![project_id, name],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(payload)
        })
    }
}

fn set_version(conn: &Connection) -> StoreResult<()> {
    conn.execute(
        "INSERT OR REPLACE INTO meta (key, value) VALUES ('version', ?)",
        rusqlite::params![STORE_VERSION.to_string()],
    )?;
    Ok(())
}
