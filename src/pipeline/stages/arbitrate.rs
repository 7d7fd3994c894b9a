//! Arbitrate stage: semantic validation of surviving candidates.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::config::DiscoverySettings;
use crate::discovery::{RelationshipArbiter, RelationshipCandidate};
use crate::llm::LlmClient;
use crate::pipeline::stage::{PipelineStage, StageContext, StageError, StageKind};

use super::{artifacts, load_artifact, load_profiles, load_snapshot_tables, store_artifact};

pub struct ArbitrateStage {
    llm: Arc<dyn LlmClient>,
    settings: DiscoverySettings,
    concurrency: usize,
}

impl ArbitrateStage {
    pub fn new(llm: Arc<dyn LlmClient>, settings: DiscoverySettings, concurrency: usize) -> Self {
        Self {
            llm,
            settings,
            concurrency,
        }
    }
}

#[async_trait]
impl PipelineStage for ArbitrateStage {
    fn kind(&self) -> StageKind {
        StageKind::Arbitrate
    }

    async fn execute(&self, ctx: &StageContext) -> Result<(), StageError> {
        ctx.check_cancelled()?;

        let tables = load_snapshot_tables(&ctx.store, &ctx.project_id)?;
        let profiles = load_profiles(ctx)?;
        let candidates: Vec<RelationshipCandidate> = load_artifact(ctx, artifacts::CANDIDATES)?;
        let total = candidates.len();

        let arbiter = RelationshipArbiter::new(
            self.llm.clone(),
            self.settings.clone(),
            self.concurrency,
        );
        let outcomes = arbiter
            .arbitrate_all(candidates, &tables, &profiles, &ctx.cancel)
            .await?;

        // A cancelled arbitration returns a prefix; the stage error makes
        // the orchestrator leave this stage unsettled for the resume.
        if outcomes.len() < total && ctx.cancel.is_cancelled() {
            return Err(StageError::Cancelled);
        }

        for outcome in outcomes.iter().filter_map(|o| o.warning.as_deref()) {
            ctx.warn(outcome);
        }
        ctx.progress(0.9);

        let accepted = outcomes.iter().filter(|o| o.accepted).count();
        let bypassed = outcomes.iter().filter(|o| o.bypassed).count();

        store_artifact(ctx, artifacts::ARBITRATION, &outcomes)?;

        info!(
            project_id = %ctx.project_id,
            arbitrated = outcomes.len(),
            accepted,
            bypassed,
            "arbitration outcomes stored"
        );
        Ok(())
    }
}
