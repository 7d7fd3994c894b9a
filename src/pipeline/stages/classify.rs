//! Classify stage: assign a role to every column.

use async_trait::async_trait;
use tracing::info;

use crate::classify::{ColumnRole, FeatureClassifier};
use crate::pipeline::stage::{PipelineStage, StageContext, StageError, StageKind};

use super::{artifacts, load_snapshot_tables, store_artifact};

#[derive(Default)]
pub struct ClassifyStage {
    classifier: FeatureClassifier,
}

impl ClassifyStage {
    pub fn new() -> Self {
        Self {
            classifier: FeatureClassifier::new(),
        }
    }
}

#[async_trait]
impl PipelineStage for ClassifyStage {
    fn kind(&self) -> StageKind {
        StageKind::Classify
    }

    async fn execute(&self, ctx: &StageContext) -> Result<(), StageError> {
        ctx.check_cancelled()?;

        let tables = load_snapshot_tables(&ctx.store, &ctx.project_id)?;
        let profiles = self.classifier.classify_all(&tables);

        let fk_eligible = profiles.iter().filter(|p| p.fk_eligible()).count();
        let ordinal = profiles
            .iter()
            .filter(|p| p.role == ColumnRole::Ordinal)
            .count();

        store_artifact(ctx, artifacts::PROFILES, &profiles)?;

        info!(
            project_id = %ctx.project_id,
            columns = profiles.len(),
            fk_eligible,
            ordinal,
            "column profiles stored"
        );
        Ok(())
    }
}
