//! Ownership recovery for runs abandoned by a crashed process.
//!
//! A crash loses tasks and cancellation tokens but never the Run/Stage
//! rows, so ownership is provable from durable state alone: a `running`
//! run whose heartbeat went stale is an orphan, and whichever process
//! reclaims it first (one atomic conditional update) resumes it. The
//! reclaimed run's in-flight stage resets to `pending`; its partial work
//! cannot be trusted and every stage is safe to re-run in full.

use tracing::{info, instrument, warn};

use crate::store::{unix_now, Run};

use super::orchestrator::{Orchestrator, PipelineError};

impl Orchestrator {
    /// Runs that look abandoned under the configured staleness threshold.
    pub fn find_orphaned(&self) -> Result<Vec<Run>, PipelineError> {
        let threshold = self.settings().pipeline.orphan_threshold_secs();
        Ok(self.store().find_orphaned(threshold, unix_now())?)
    }

    /// Try to take ownership of one orphaned run.
    ///
    /// The staleness condition is re-checked inside the update, so of two
    /// racing processes exactly one returns `true`.
    pub fn reclaim_ownership(&self, run_id: &str) -> Result<bool, PipelineError> {
        let threshold = self.settings().pipeline.orphan_threshold_secs();
        Ok(self
            .store()
            .reclaim_ownership(run_id, self.owner_id(), threshold, unix_now())?)
    }

    /// Startup recovery: scan for orphans, reclaim each, reset their
    /// in-flight stage, and resume execution.
    ///
    /// A lost race is not an error; the other process is running the run.
    /// Returns the ids of runs this process reclaimed.
    #[instrument(skip(self))]
    pub fn recover_orphaned_runs(&self) -> Result<Vec<String>, PipelineError> {
        let mut reclaimed = Vec::new();

        for orphan in self.find_orphaned()? {
            if !self.reclaim_ownership(&orphan.id)? {
                warn!(run_id = %orphan.id, "orphan reclaimed by another process");
                continue;
            }

            let reset = self.store().reset_running_stages(&orphan.id)?;
            info!(
                run_id = %orphan.id,
                project_id = %orphan.project_id,
                stages_reset = reset,
                "orphaned run reclaimed; resuming"
            );

            self.spawn_execution(orphan.id.clone());
            reclaimed.push(orphan.id);
        }

        Ok(reclaimed)
    }
}
