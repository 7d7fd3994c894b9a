//! The stage framework.
//!
//! Pipeline phases are a closed set of [`StageKind`] variants, each backed
//! by a [`PipelineStage`] implementation. The orchestrator is agnostic to
//! any concrete stage's internals: it sees a name, an order, dependencies,
//! and an `execute` call that takes a cancellable context.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::warn;

use crate::catalog::CatalogError;
use crate::llm::LlmError;
use crate::store::{ExtractionStore, StoreError};

/// The closed set of pipeline stage kinds, in dependency order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    /// Introspect the catalog and persist a fingerprinted snapshot.
    Snapshot,
    /// Classify every column into a role.
    Classify,
    /// Collect candidates with bidirectional join validation and apply the
    /// coincidence filter.
    Discover,
    /// Semantic arbitration of surviving candidates.
    Arbitrate,
    /// Upsert relationships and stale out the rest.
    Finalize,
}

impl StageKind {
    /// All stages in execution order.
    pub const ALL: [StageKind; 5] = [
        StageKind::Snapshot,
        StageKind::Classify,
        StageKind::Discover,
        StageKind::Arbitrate,
        StageKind::Finalize,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Snapshot => "snapshot",
            Self::Classify => "classify",
            Self::Discover => "discover",
            Self::Arbitrate => "arbitrate",
            Self::Finalize => "finalize",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.name() == name)
    }

    /// Position in the execution order.
    pub fn order(&self) -> i64 {
        Self::ALL
            .iter()
            .position(|k| k == self)
            .map(|p| p as i64)
            .unwrap_or(i64::MAX)
    }

    /// Stages this one directly depends on.
    pub fn depends_on(&self) -> &'static [StageKind] {
        match self {
            Self::Snapshot => &[],
            Self::Classify => &[StageKind::Snapshot],
            Self::Discover => &[StageKind::Classify],
            Self::Arbitrate => &[StageKind::Discover],
            Self::Finalize => &[StageKind::Arbitrate],
        }
    }
}

/// Errors crossing the stage boundary.
///
/// Nothing is thrown past the orchestrator: every variant ends up as Stage
/// and Run state.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("stage timed out after {0} seconds")]
    Timeout(u64),

    #[error("run was cancelled")]
    Cancelled,

    #[error("invariant violation: {0}")]
    Invariant(String),
}

impl StageError {
    /// Transient errors are retried at stage granularity; logic errors are
    /// not.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Catalog(e) => e.is_retriable(),
            Self::Llm(e) => e.is_retriable(),
            Self::Timeout(_) => true,
            Self::Store(_) | Self::Cancelled | Self::Invariant(_) => false,
        }
    }
}

/// Sending half of a cooperative cancellation token.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    /// Request cooperative cancellation.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Receiving half of a cooperative cancellation token.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// A token that is never cancelled (for standalone component use).
    pub fn never() -> Self {
        cancel_pair().1
    }
}

/// Create a connected cancellation handle/token pair.
pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx: Arc::new(tx) }, CancelToken { rx })
}

/// Execution context handed to each stage.
///
/// Progress and warning writes are best-effort: a stage never fails
/// because its bookkeeping write failed.
#[derive(Clone)]
pub struct StageContext {
    pub run_id: String,
    pub project_id: String,
    pub store: Arc<ExtractionStore>,
    pub cancel: CancelToken,
    stage: StageKind,
}

impl StageContext {
    pub fn new(
        run_id: impl Into<String>,
        project_id: impl Into<String>,
        store: Arc<ExtractionStore>,
        cancel: CancelToken,
        stage: StageKind,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            project_id: project_id.into(),
            store,
            cancel,
            stage,
        }
    }

    /// The stage this context belongs to.
    pub fn stage(&self) -> StageKind {
        self.stage
    }

    /// Report fractional progress for this stage.
    pub fn progress(&self, fraction: f64) {
        if let Err(e) =
            self.store
                .update_stage_progress(&self.run_id, self.stage.name(), fraction)
        {
            warn!(run_id = %self.run_id, stage = self.stage.name(), error = %e,
                "failed to persist stage progress");
        }
    }

    /// Record a stage warning. Warnings are additive and never block run
    /// completion.
    pub fn warn(&self, message: &str) {
        if let Err(e) = self
            .store
            .add_stage_warning(&self.run_id, self.stage.name(), message)
        {
            warn!(run_id = %self.run_id, stage = self.stage.name(), error = %e,
                "failed to persist stage warning");
        }
    }

    /// Bail out if cancellation was requested.
    pub fn check_cancelled(&self) -> Result<(), StageError> {
        if self.cancel.is_cancelled() {
            Err(StageError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// A pipeline phase executable by the orchestrator.
#[async_trait]
pub trait PipelineStage: Send + Sync {
    /// Which stage kind this implements.
    fn kind(&self) -> StageKind;

    /// Execute the stage to completion or a prompt cancellation exit.
    ///
    /// Must be safe to re-run in full: a resumed or reclaimed stage starts
    /// from scratch and every external write must be an idempotent upsert.
    async fn execute(&self, ctx: &StageContext) -> Result<(), StageError>;
}
