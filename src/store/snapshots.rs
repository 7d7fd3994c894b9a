//! Fingerprinted schema snapshots.
//!
//! One snapshot per project: the table set as last extracted, its sha256
//! fingerprint, and the refresh timestamp. An empty change set completes
//! with nothing but a `touch_refreshed` call, and refresh planning diffs
//! the stored snapshot against a fresh listing.

use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::{unix_now, ExtractionStore, StoreResult};

/// Compute the sha256 fingerprint of a serializable value.
///
/// The value is serialized to JSON before hashing, ensuring deterministic
/// output. Returns a 64-character lowercase hexadecimal string.
pub fn compute_fingerprint<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let json = serde_json::to_string(value)?;
    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}

/// A stored schema snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    pub project_id: String,
    /// Serialized table set (JSON).
    pub payload: String,
    /// sha256 over the payload.
    pub fingerprint: String,
    pub refreshed_at: i64,
}

impl ExtractionStore {
    /// Store or replace a project's schema snapshot.
    pub fn save_snapshot(
        &self,
        project_id: &str,
        payload: &str,
        fingerprint: &str,
    ) -> StoreResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO snapshots (project_id, payload, fingerprint, refreshed_at)
                 VALUES (?, ?, ?, ?)",
                params![project_id, payload, fingerprint, unix_now()],
            )?;
            Ok(())
        })
    }

    /// Fetch a project's schema snapshot.
    pub fn get_snapshot(&self, project_id: &str) -> StoreResult<Option<SchemaSnapshot>> {
        self.with_conn(|conn| {
            let snapshot = conn
                .query_row(
                    "SELECT project_id, payload, fingerprint, refreshed_at
                     FROM snapshots WHERE project_id = ?",
                    params![project_id],
                    |row| {
                        Ok(SchemaSnapshot {
                            project_id: row.get(0)?,
                            payload: row.get(1)?,
                            fingerprint: row.get(2)?,
                            refreshed_at: row.get(3)?,
                        })
                    },
                )
                .optional()?;
            Ok(snapshot)
        })
    }

    /// Bump the refresh timestamp without touching the payload.
    ///
    /// The whole write path of a no-op refresh.
    pub fn touch_refreshed(&self, project_id: &str) -> StoreResult<bool> {
        self.with_conn(|conn| {
            let rows = conn.execute(
                "UPDATE snapshots SET refreshed_at = ? WHERE project_id = ?",
                params![unix_now(), project_id],
            )?;
            Ok(rows > 0)
        })
    }
}
