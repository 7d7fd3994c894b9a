//! Discover stage: candidate collection plus coincidence filtering.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::catalog::SchemaCatalog;
use crate::config::DiscoverySettings;
use crate::discovery::{CandidateCollector, CoincidenceFilter};
use crate::pipeline::stage::{PipelineStage, StageContext, StageError, StageKind};

use super::{artifacts, load_profiles, load_snapshot_tables, store_artifact};

pub struct DiscoverStage {
    catalog: Arc<dyn SchemaCatalog>,
    settings: DiscoverySettings,
}

impl DiscoverStage {
    pub fn new(catalog: Arc<dyn SchemaCatalog>, settings: DiscoverySettings) -> Self {
        Self { catalog, settings }
    }
}

#[async_trait]
impl PipelineStage for DiscoverStage {
    fn kind(&self) -> StageKind {
        StageKind::Discover
    }

    async fn execute(&self, ctx: &StageContext) -> Result<(), StageError> {
        ctx.check_cancelled()?;

        let tables = load_snapshot_tables(&ctx.store, &ctx.project_id)?;
        let profiles = load_profiles(ctx)?;

        let collector = CandidateCollector::new(self.catalog.as_ref(), self.settings.clone());
        let candidates = collector.collect(&tables, &profiles, &ctx.cancel).await?;
        ctx.check_cancelled()?;
        ctx.progress(0.7);

        let filter = CoincidenceFilter::new(self.settings.max_target_tables);
        let outcome = filter.apply(candidates);

        for suppressed in &outcome.suppressed {
            ctx.warn(&format!(
                "column {} matched {} target tables ({}); discarded as coincidental",
                suppressed.column,
                suppressed.target_tables.len(),
                suppressed.target_tables.join(", ")
            ));
        }

        store_artifact(ctx, artifacts::CANDIDATES, &outcome.kept)?;

        info!(
            project_id = %ctx.project_id,
            candidates = outcome.kept.len(),
            suppressed_columns = outcome.suppressed.len(),
            "relationship candidates stored"
        );
        Ok(())
    }
}
