//! Snapshot stage: introspect the catalog, persist a fingerprinted copy.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::catalog::SchemaCatalog;
use crate::pipeline::stage::{PipelineStage, StageContext, StageError, StageKind};
use crate::store::compute_fingerprint;

pub struct SnapshotStage {
    catalog: Arc<dyn SchemaCatalog>,
}

impl SnapshotStage {
    pub fn new(catalog: Arc<dyn SchemaCatalog>) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl PipelineStage for SnapshotStage {
    fn kind(&self) -> StageKind {
        StageKind::Snapshot
    }

    async fn execute(&self, ctx: &StageContext) -> Result<(), StageError> {
        ctx.check_cancelled()?;

        let mut tables = self.catalog.list_tables(&ctx.project_id).await?;
        // Stable order so the fingerprint only moves when the schema does.
        tables.sort_by(|a, b| {
            (a.schema.as_str(), a.name.as_str()).cmp(&(b.schema.as_str(), b.name.as_str()))
        });

        if tables.is_empty() {
            return Err(StageError::Invariant(format!(
                "catalog returned no tables for project {}",
                ctx.project_id
            )));
        }

        ctx.progress(0.5);
        ctx.check_cancelled()?;

        let payload =
            serde_json::to_string(&tables).map_err(crate::store::StoreError::from)?;
        let fingerprint =
            compute_fingerprint(&tables).map_err(crate::store::StoreError::from)?;
        ctx.store
            .save_snapshot(&ctx.project_id, &payload, &fingerprint)?;

        info!(
            project_id = %ctx.project_id,
            tables = tables.len(),
            fingerprint = %&fingerprint[..12],
            "schema snapshot stored"
        );
        Ok(())
    }
}
