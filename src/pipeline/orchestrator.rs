//! The extraction-pipeline orchestrator.
//!
//! Stateless over durable storage: every decision the orchestrator makes is
//! derived from Run/Stage rows, never from process memory. The in-process
//! maps below are caches for delivering cooperative cancellation and
//! awaiting task completion; losing them (a crash) loses nothing that
//! recovery cannot rebuild from the store.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{error, info, instrument, warn};

use crate::catalog::SchemaCatalog;
use crate::config::Settings;
use crate::llm::LlmClient;
use crate::store::{unix_now, ExtractionStore, Run, RunStatus, Stage, StageStatus, StoreError};

use super::stage::{
    cancel_pair, CancelHandle, CancelToken, PipelineStage, StageContext, StageError, StageKind,
};
use super::stages::build_stages;

/// Errors surfaced by orchestrator entrypoints.
///
/// Execution failures never appear here: they land in Run/Stage state and
/// are observed through [`Orchestrator::run_status`].
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("run {run_id} is already {status:?} and cannot be resumed")]
    RunTerminal { run_id: String, status: RunStatus },

    #[error("run {run_id} is owned by {owner} with a fresh heartbeat")]
    AlreadyOwned { run_id: String, owner: String },
}

/// Snapshot of a run's execution state for polling callers.
#[derive(Debug, Clone)]
pub struct RunStatusReport {
    pub run: Run,
    pub stages: Vec<Stage>,
}

impl RunStatusReport {
    /// Fraction of stages settled.
    pub fn overall_progress(&self) -> f64 {
        if self.stages.is_empty() {
            return 0.0;
        }
        let settled = self
            .stages
            .iter()
            .filter(|s| s.status.is_settled())
            .count();
        settled as f64 / self.stages.len() as f64
    }

    /// All warnings across stages, in stage order.
    pub fn warnings(&self) -> Vec<&str> {
        self.stages
            .iter()
            .flat_map(|s| s.warnings.iter().map(String::as_str))
            .collect()
    }
}

pub(crate) struct OrchestratorInner {
    pub(crate) store: Arc<ExtractionStore>,
    pub(crate) stages: Vec<Arc<dyn PipelineStage>>,
    pub(crate) settings: Settings,
    pub(crate) owner_id: String,
    /// Process-local cancellation handles for runs executing here.
    cancels: DashMap<String, CancelHandle>,
    /// Process-local join handles for runs executing here.
    tasks: DashMap<String, JoinHandle<()>>,
}

/// Drives persisted runs through their stage graphs.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<OrchestratorInner>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<ExtractionStore>,
        catalog: Arc<dyn SchemaCatalog>,
        llm: Arc<dyn LlmClient>,
        settings: Settings,
    ) -> Self {
        let stages = build_stages(catalog, llm, &settings);
        Self {
            inner: Arc::new(OrchestratorInner {
                store,
                stages,
                settings,
                owner_id: format!("cartograph-{}", uuid::Uuid::new_v4()),
                cancels: DashMap::new(),
                tasks: DashMap::new(),
            }),
        }
    }

    /// This process's durable owner identity.
    pub fn owner_id(&self) -> &str {
        &self.inner.owner_id
    }

    /// The durable store backing this orchestrator.
    pub fn store(&self) -> &Arc<ExtractionStore> {
        &self.inner.store
    }

    /// The settings this orchestrator runs under.
    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    /// Create a run with its full stage set and begin executing it.
    #[instrument(skip(self))]
    pub fn start_run(&self, project_id: &str) -> Result<String, PipelineError> {
        let stage_names: Vec<(&str, i64)> = StageKind::ALL
            .iter()
            .map(|k| (k.name(), k.order()))
            .collect();
        let run = self
            .inner
            .store
            .create_run(project_id, &self.inner.owner_id, &stage_names)?;
        info!(run_id = %run.id, project_id, "run created");

        self.spawn_execution(run.id.clone());
        Ok(run.id)
    }

    /// Re-attach execution to an existing run, skipping settled stages.
    #[instrument(skip(self))]
    pub fn resume_run(&self, run_id: &str) -> Result<(), PipelineError> {
        let run = self.inner.store.get_run(run_id)?;
        if run.status.is_terminal() {
            return Err(PipelineError::RunTerminal {
                run_id: run_id.to_string(),
                status: run.status,
            });
        }

        let threshold = self.inner.settings.pipeline.orphan_threshold_secs();
        let acquired = self.inner.store.try_acquire(
            run_id,
            &self.inner.owner_id,
            threshold,
            unix_now(),
        )?;
        if !acquired {
            return Err(PipelineError::AlreadyOwned {
                run_id: run_id.to_string(),
                owner: run.owner_id.unwrap_or_else(|| "unknown".to_string()),
            });
        }

        info!(run_id, "run resumed");
        self.spawn_execution(run_id.to_string());
        Ok(())
    }

    /// Cancel a run.
    ///
    /// Durable first (so a foreign owner observes it on its next heartbeat),
    /// then the local cooperative token if the run executes here. The
    /// in-flight stage finishes its current unit of work.
    #[instrument(skip(self))]
    pub fn cancel(&self, run_id: &str) -> Result<bool, PipelineError> {
        let transitioned = self.inner.store.cancel_run(run_id)?;
        if let Some(handle) = self.inner.cancels.get(run_id) {
            handle.cancel();
        }
        if transitioned {
            info!(run_id, "run cancelled");
        }
        Ok(transitioned)
    }

    /// Poll a run's overall status and per-stage progress/warnings.
    pub fn run_status(&self, run_id: &str) -> Result<RunStatusReport, PipelineError> {
        let run = self.inner.store.get_run(run_id)?;
        let stages = self.inner.store.run_stages(run_id)?;
        Ok(RunStatusReport { run, stages })
    }

    /// Active relationships extracted for a project.
    pub fn relationships(
        &self,
        project_id: &str,
    ) -> Result<Vec<crate::store::SchemaRelationship>, PipelineError> {
        Ok(self.inner.store.active_relationships(project_id)?)
    }

    /// Wait for a run executing in this process to finish its task.
    pub async fn wait(&self, run_id: &str) -> Result<RunStatusReport, PipelineError> {
        if let Some((_, task)) = self.inner.tasks.remove(run_id) {
            if let Err(e) = task.await {
                error!(run_id, error = %e, "run task panicked");
            }
        }
        self.inner.cancels.remove(run_id);
        self.run_status(run_id)
    }

    pub(crate) fn spawn_execution(&self, run_id: String) {
        let (handle, token) = cancel_pair();
        self.inner.cancels.insert(run_id.clone(), handle.clone());

        let inner = self.inner.clone();
        let task_run_id = run_id.clone();
        let task = tokio::spawn(async move {
            execute_run(inner, task_run_id, handle, token).await;
        });
        self.inner.tasks.insert(run_id, task);
    }
}

/// Execute one run to a terminal state, heartbeating throughout.
async fn execute_run(
    inner: Arc<OrchestratorInner>,
    run_id: String,
    cancel_handle: CancelHandle,
    cancel_token: CancelToken,
) {
    let heartbeat = spawn_heartbeat(inner.clone(), run_id.clone(), cancel_handle);

    if let Err(e) = execute_stages(&inner, &run_id, &cancel_token).await {
        error!(run_id = %run_id, error = %e, "run execution error");
        let _ = inner
            .store
            .update_run_status(&run_id, RunStatus::Failed, Some(&e.to_string()));
    }

    heartbeat.abort();
    inner.cancels.remove(&run_id);
}

/// Periodically prove ownership; observe durable cancellation and loss of
/// ownership, converting both into the cooperative token.
fn spawn_heartbeat(
    inner: Arc<OrchestratorInner>,
    run_id: String,
    cancel_handle: CancelHandle,
) -> JoinHandle<()> {
    let interval = inner.settings.pipeline.heartbeat_interval();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;

            match inner.store.get_run(&run_id) {
                Ok(run) if run.status == RunStatus::Cancelled => {
                    cancel_handle.cancel();
                    break;
                }
                Ok(run) if run.status.is_terminal() => break,
                Ok(_) => {}
                Err(e) => {
                    warn!(run_id = %run_id, error = %e, "heartbeat status check failed");
                    continue;
                }
            }

            match inner.store.heartbeat(&run_id, &inner.owner_id) {
                Ok(()) => {}
                Err(StoreError::OwnershipLost(_)) => {
                    warn!(run_id = %run_id, "ownership lost; stopping execution");
                    cancel_handle.cancel();
                    break;
                }
                Err(e) => {
                    warn!(run_id = %run_id, error = %e, "heartbeat write failed");
                }
            }
        }
    })
}

/// The stage loop: iterate in dependency order, skip settled stages, retry
/// transient failures, and capture every outcome as durable state.
async fn execute_stages(
    inner: &Arc<OrchestratorInner>,
    run_id: &str,
    cancel: &CancelToken,
) -> Result<(), StoreError> {
    let run = inner.store.get_run(run_id)?;
    if run.status.is_terminal() {
        return Ok(());
    }
    inner
        .store
        .update_run_status(run_id, RunStatus::Running, None)?;

    let policy = inner.settings.pipeline.retry_policy();
    let stage_timeout = inner.settings.pipeline.stage_timeout();

    for stage in &inner.stages {
        let name = stage.kind().name();
        let row = inner.store.get_stage(run_id, name)?;
        if row.status.is_settled() {
            continue;
        }

        // Re-read durable status: cancellation may have landed from another
        // process between stages.
        let current = inner.store.get_run(run_id)?;
        if current.status == RunStatus::Cancelled || cancel.is_cancelled() {
            finish_cancelled(inner, run_id)?;
            return Ok(());
        }

        inner.store.set_current_stage(run_id, Some(name))?;
        inner
            .store
            .update_stage_status(run_id, name, StageStatus::Running)?;

        let ctx = StageContext::new(
            run_id,
            current.project_id.clone(),
            inner.store.clone(),
            cancel.clone(),
            stage.kind(),
        );

        let mut attempt = row.retry_count as u32;
        loop {
            let result = match timeout(stage_timeout, stage.execute(&ctx)).await {
                Ok(r) => r,
                Err(_) => Err(StageError::Timeout(stage_timeout.as_secs())),
            };

            match result {
                Ok(()) => {
                    inner
                        .store
                        .update_stage_status(run_id, name, StageStatus::Completed)?;
                    inner.store.update_stage_progress(run_id, name, 1.0)?;
                    info!(run_id, stage = name, "stage completed");
                    break;
                }
                Err(StageError::Cancelled) => {
                    // The partial stage re-runs in full on resume.
                    inner
                        .store
                        .update_stage_status(run_id, name, StageStatus::Pending)?;
                    finish_cancelled(inner, run_id)?;
                    return Ok(());
                }
                Err(e) => {
                    warn!(run_id, stage = name, attempt, error = %e, "stage attempt failed");
                    inner
                        .store
                        .record_stage_failure(run_id, name, &e.to_string())?;

                    if e.is_retriable() && policy.should_retry(attempt) {
                        tokio::time::sleep(policy.calculate_delay(attempt)).await;
                        attempt += 1;
                        continue;
                    }

                    inner
                        .store
                        .update_stage_status(run_id, name, StageStatus::Failed)?;
                    inner.store.update_run_status(
                        run_id,
                        RunStatus::Failed,
                        Some(&format!("stage {} failed: {}", name, e)),
                    )?;
                    return Ok(());
                }
            }
        }
    }

    inner.store.set_current_stage(run_id, None)?;
    // Only complete a run that nothing cancelled underneath us.
    let final_state = inner.store.get_run(run_id)?;
    if final_state.status == RunStatus::Running {
        inner
            .store
            .update_run_status(run_id, RunStatus::Completed, None)?;
        info!(run_id, "run completed");
    }
    Ok(())
}

fn finish_cancelled(inner: &Arc<OrchestratorInner>, run_id: &str) -> Result<(), StoreError> {
    // The status may already be cancelled (durable cancel); make sure it is.
    inner.store.cancel_run(run_id)?;
    inner.store.set_current_stage(run_id, None)?;
    info!(run_id, "run stopped on cancellation");
    Ok(())
}
