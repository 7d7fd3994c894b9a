//! Run and Stage rows.
//!
//! A Run is one execution of the extraction/refresh pipeline; its stages
//! are created eagerly at run creation, including those a resume or an
//! incremental plan will skip. Ownership (owner_id + last_heartbeat) is
//! part of the row because it must survive the owning process.

use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use super::{unix_now, ExtractionStore, StoreError, StoreResult};

/// Status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> StoreResult<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(StoreError::UnknownStatus(other.to_string())),
        }
    }

    /// Terminal states accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Status of a stage within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    pub fn from_str(s: &str) -> StoreResult<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            other => Err(StoreError::UnknownStatus(other.to_string())),
        }
    }

    /// Whether the orchestrator passes over this stage on (re)execution.
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Completed | Self::Skipped)
    }
}

/// A persisted pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub project_id: String,
    pub status: RunStatus,
    pub owner_id: Option<String>,
    pub last_heartbeat: Option<i64>,
    pub current_stage: Option<String>,
    pub error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A persisted stage within a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stage {
    pub run_id: String,
    pub name: String,
    pub ord: i64,
    pub status: StageStatus,
    pub progress: f64,
    pub error: Option<String>,
    pub warnings: Vec<String>,
    pub retry_count: i64,
    pub updated_at: i64,
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<(Run, String)> {
    let status: String = row.get(2)?;
    Ok((
        Run {
            id: row.get(0)?,
            project_id: row.get(1)?,
            status: RunStatus::Pending, // patched by caller
            owner_id: row.get(3)?,
            last_heartbeat: row.get(4)?,
            current_stage: row.get(5)?,
            error: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        },
        status,
    ))
}

const RUN_COLUMNS: &str =
    "id, project_id, status, owner_id, last_heartbeat, current_stage, error, created_at, updated_at";

impl ExtractionStore {
    /// Create a run with its full stage set in `pending`.
    ///
    /// `stages` are (name, order) pairs for every planned stage, including
    /// ones a later plan may mark skipped.
    pub fn create_run(
        &self,
        project_id: &str,
        owner_id: &str,
        stages: &[(&str, i64)],
    ) -> StoreResult<Run> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = unix_now();

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO runs
                 (id, project_id, status, owner_id, last_heartbeat, current_stage, error, created_at, updated_at)
                 VALUES (?, ?, 'pending', ?, ?, NULL, NULL, ?, ?)",
                params![id, project_id, owner_id, now, now, now],
            )?;
            for (name, ord) in stages {
                conn.execute(
                    "INSERT INTO stages (run_id, name, ord, status, progress, warnings, retry_count, updated_at)
                     VALUES (?, ?, ?, 'pending', 0, '[]', 0, ?)",
                    params![id, name, ord, now],
                )?;
            }
            Ok(())
        })?;

        self.get_run(&id)
    }

    /// Fetch a run by id.
    pub fn get_run(&self, run_id: &str) -> StoreResult<Run> {
        self.with_conn(|conn| {
            let found = conn
                .query_row(
                    &format!("SELECT {} FROM runs WHERE id = ?", RUN_COLUMNS),
                    params![run_id],
                    run_from_row,
                )
                .optional()?;
            match found {
                Some((mut run, status)) => {
                    run.status = RunStatus::from_str(&status)?;
                    Ok(run)
                }
                None => Err(StoreError::RunNotFound(run_id.to_string())),
            }
        })
    }

    /// List runs, optionally filtered by project, newest first.
    pub fn list_runs(&self, project_id: Option<&str>) -> StoreResult<Vec<Run>> {
        self.with_conn(|conn| {
            let mut runs = Vec::new();
            match project_id {
                Some(p) => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {} FROM runs WHERE project_id = ? ORDER BY created_at DESC",
                        RUN_COLUMNS
                    ))?;
                    let mut rows = stmt.query(params![p])?;
                    while let Some(row) = rows.next()? {
                        let (mut run, status) = run_from_row(row)?;
                        run.status = RunStatus::from_str(&status)?;
                        runs.push(run);
                    }
                }
                None => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {} FROM runs ORDER BY created_at DESC",
                        RUN_COLUMNS
                    ))?;
                    let mut rows = stmt.query([])?;
                    while let Some(row) = rows.next()? {
                        let (mut run, status) = run_from_row(row)?;
                        run.status = RunStatus::from_str(&status)?;
                        runs.push(run);
                    }
                }
            }
            Ok(runs)
        })
    }

    /// Update a run's status and error.
    pub fn update_run_status(
        &self,
        run_id: &str,
        status: RunStatus,
        error: Option<&str>,
    ) -> StoreResult<()> {
        self.with_conn(|conn| {
            let rows = conn.execute(
                "UPDATE runs SET status = ?, error = ?, updated_at = ? WHERE id = ?",
                params![status.as_str(), error, unix_now(), run_id],
            )?;
            if rows == 0 {
                return Err(StoreError::RunNotFound(run_id.to_string()));
            }
            Ok(())
        })
    }

    /// Mark a run cancelled unless it already reached a terminal state.
    ///
    /// Returns `true` when this call performed the transition. Cancellation
    /// is durable so a run owned by another process observes it on its next
    /// heartbeat.
    pub fn cancel_run(&self, run_id: &str) -> StoreResult<bool> {
        self.with_conn(|conn| {
            let rows = conn.execute(
                "UPDATE runs SET status = 'cancelled', updated_at = ?
                 WHERE id = ? AND status IN ('pending', 'running')",
                params![unix_now(), run_id],
            )?;
            Ok(rows > 0)
        })
    }

    /// Record the stage a run is currently executing.
    pub fn set_current_stage(&self, run_id: &str, stage: Option<&str>) -> StoreResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE runs SET current_stage = ?, updated_at = ? WHERE id = ?",
                params![stage, unix_now(), run_id],
            )?;
            Ok(())
        })
    }

    /// Write a heartbeat, proving this owner still executes the run.
    ///
    /// Fails with [`StoreError::OwnershipLost`] if another process has
    /// reclaimed the run since the last beat.
    pub fn heartbeat(&self, run_id: &str, owner_id: &str) -> StoreResult<()> {
        self.with_conn(|conn| {
            let rows = conn.execute(
                "UPDATE runs SET last_heartbeat = ?, updated_at = ?
                 WHERE id = ? AND owner_id = ?",
                params![unix_now(), unix_now(), run_id, owner_id],
            )?;
            if rows == 0 {
                return Err(StoreError::OwnershipLost(run_id.to_string()));
            }
            Ok(())
        })
    }

    /// Runs that look abandoned: `running` with a heartbeat older than
    /// `threshold_secs` (or no heartbeat at all).
    pub fn find_orphaned(&self, threshold_secs: i64, now: i64) -> StoreResult<Vec<Run>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM runs
                 WHERE status = 'running'
                   AND (last_heartbeat IS NULL OR last_heartbeat <= ?)
                 ORDER BY created_at",
                RUN_COLUMNS
            ))?;
            let mut rows = stmt.query(params![now - threshold_secs])?;
            let mut runs = Vec::new();
            while let Some(row) = rows.next()? {
                let (mut run, status) = run_from_row(row)?;
                run.status = RunStatus::from_str(&status)?;
                runs.push(run);
            }
            Ok(runs)
        })
    }

    /// Atomically take ownership of an orphaned run.
    ///
    /// A conditional update, not read-then-write: the staleness condition is
    /// re-checked at write time so two racing processes cannot both win.
    /// Returns `true` when this caller now owns the run.
    pub fn reclaim_ownership(
        &self,
        run_id: &str,
        new_owner: &str,
        threshold_secs: i64,
        now: i64,
    ) -> StoreResult<bool> {
        self.with_conn(|conn| {
            let rows = conn.execute(
                "UPDATE runs SET owner_id = ?, last_heartbeat = ?, updated_at = ?
                 WHERE id = ?
                   AND status = 'running'
                   AND (last_heartbeat IS NULL OR last_heartbeat <= ?)
                   AND (owner_id IS NULL OR owner_id != ?)",
                params![new_owner, now, now, run_id, now - threshold_secs, new_owner],
            )?;
            Ok(rows > 0)
        })
    }

    /// Take ownership of a resumable run.
    ///
    /// Succeeds when the run is unowned, already ours, or its owner's
    /// heartbeat has gone stale. Used by `resume_run`; startup recovery
    /// goes through [`Self::reclaim_ownership`] instead.
    pub fn try_acquire(
        &self,
        run_id: &str,
        owner_id: &str,
        threshold_secs: i64,
        now: i64,
    ) -> StoreResult<bool> {
        self.with_conn(|conn| {
            let rows = conn.execute(
                "UPDATE runs SET owner_id = ?, last_heartbeat = ?, updated_at = ?
                 WHERE id = ?
                   AND status IN ('pending', 'running')
                   AND (owner_id IS NULL OR owner_id = ?
                        OR last_heartbeat IS NULL OR last_heartbeat <= ?)",
                params![owner_id, now, now, run_id, owner_id, now - threshold_secs],
            )?;
            Ok(rows > 0)
        })
    }

    /// Reset any `running` stage of a run back to `pending`.
    ///
    /// A reclaimed run's in-flight stage cannot be trusted; it re-runs in
    /// full, which is safe because all writes are idempotent upserts.
    pub fn reset_running_stages(&self, run_id: &str) -> StoreResult<usize> {
        self.with_conn(|conn| {
            let rows = conn.execute(
                "UPDATE stages SET status = 'pending', progress = 0, updated_at = ?
                 WHERE run_id = ? AND status = 'running'",
                params![unix_now(), run_id],
            )?;
            Ok(rows)
        })
    }

    /// All stages of a run in execution order.
    pub fn run_stages(&self, run_id: &str) -> StoreResult<Vec<Stage>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT run_id, name, ord, status, progress, error, warnings, retry_count, updated_at
                 FROM stages WHERE run_id = ? ORDER BY ord",
            )?;
            let mut rows = stmt.query(params![run_id])?;
            let mut stages = Vec::new();
            while let Some(row) = rows.next()? {
                stages.push(stage_from_row(row)?);
            }
            Ok(stages)
        })
    }

    /// Fetch one stage of a run.
    pub fn get_stage(&self, run_id: &str, name: &str) -> StoreResult<Stage> {
        self.with_conn(|conn| {
            let stage = conn
                .query_row(
                    "SELECT run_id, name, ord, status, progress, error, warnings, retry_count, updated_at
                     FROM stages WHERE run_id = ? AND name = ?",
                    params![run_id, name],
                    stage_from_row,
                )
                .optional()?;
            stage.ok_or_else(|| StoreError::StageNotFound {
                run_id: run_id.to_string(),
                stage: name.to_string(),
            })
        })
    }

    /// Update a stage's status.
    pub fn update_stage_status(
        &self,
        run_id: &str,
        name: &str,
        status: StageStatus,
    ) -> StoreResult<()> {
        self.with_conn(|conn| {
            let rows = conn.execute(
                "UPDATE stages SET status = ?, updated_at = ? WHERE run_id = ? AND name = ?",
                params![status.as_str(), unix_now(), run_id, name],
            )?;
            if rows == 0 {
                return Err(StoreError::StageNotFound {
                    run_id: run_id.to_string(),
                    stage: name.to_string(),
                });
            }
            Ok(())
        })
    }

    /// Update a stage's fractional progress.
    pub fn update_stage_progress(&self, run_id: &str, name: &str, progress: f64) -> StoreResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE stages SET progress = ?, updated_at = ? WHERE run_id = ? AND name = ?",
                params![progress.clamp(0.0, 1.0), unix_now(), run_id, name],
            )?;
            Ok(())
        })
    }

    /// Append a warning to a stage. Warnings are additive and never block
    /// completion.
    pub fn add_stage_warning(&self, run_id: &str, name: &str, warning: &str) -> StoreResult<()> {
        let stage = self.get_stage(run_id, name)?;
        let mut warnings = stage.warnings;
        warnings.push(warning.to_string());
        let encoded = serde_json::to_string(&warnings)?;
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE stages SET warnings = ?, updated_at = ? WHERE run_id = ? AND name = ?",
                params![encoded, unix_now(), run_id, name],
            )?;
            Ok(())
        })
    }

    /// Record a stage failure and bump its retry count.
    pub fn record_stage_failure(&self, run_id: &str, name: &str, error: &str) -> StoreResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE stages SET error = ?, retry_count = retry_count + 1, updated_at = ?
                 WHERE run_id = ? AND name = ?",
                params![error, unix_now(), run_id, name],
            )?;
            Ok(())
        })
    }
}

fn stage_from_row(row: &Row<'_>) -> rusqlite::Result<Stage> {
    let status: String = row.get(3)?;
    let warnings_json: String = row.get(6)?;
    Ok(Stage {
        run_id: row.get(0)?,
        name: row.get(1)?,
        ord: row.get(2)?,
        status: StageStatus::from_str(&status).unwrap_or(StageStatus::Pending),
        progress: row.get(4)?,
        error: row.get(5)?,
        warnings: serde_json::from_str(&warnings_json).unwrap_or_default(),
        retry_count: row.get(7)?,
        updated_at: row.get(8)?,
    })
}
