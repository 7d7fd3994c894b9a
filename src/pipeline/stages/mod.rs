//! Concrete pipeline stages.
//!
//! Each stage reads its inputs from durable state and writes durable
//! outputs, so any stage can be re-run from scratch after a crash or
//! reclaim. Intermediate results travel through project-scoped artifacts;
//! nothing flows between stages in memory.

mod arbitrate;
mod classify;
mod discover;
mod finalize;
mod snapshot;

pub use arbitrate::ArbitrateStage;
pub use classify::ClassifyStage;
pub use discover::DiscoverStage;
pub use finalize::FinalizeStage;
pub use snapshot::SnapshotStage;

use std::sync::Arc;

use crate::catalog::{SchemaCatalog, TableMeta};
use crate::classify::ColumnProfile;
use crate::config::Settings;
use crate::llm::LlmClient;
use crate::store::ExtractionStore;

use super::stage::{PipelineStage, StageContext, StageError};

/// Artifact names used to hand results between stages.
pub(crate) mod artifacts {
    pub const PROFILES: &str = "profiles";
    pub const CANDIDATES: &str = "candidates";
    pub const ARBITRATION: &str = "arbitration";
}

/// Build the full stage set in execution order.
pub fn build_stages(
    catalog: Arc<dyn SchemaCatalog>,
    llm: Arc<dyn LlmClient>,
    settings: &Settings,
) -> Vec<Arc<dyn PipelineStage>> {
    vec![
        Arc::new(SnapshotStage::new(catalog.clone())),
        Arc::new(ClassifyStage::new()),
        Arc::new(DiscoverStage::new(catalog, settings.discovery.clone())),
        Arc::new(ArbitrateStage::new(
            llm,
            settings.discovery.clone(),
            settings.pipeline.llm_concurrency,
        )),
        Arc::new(FinalizeStage::new()),
    ]
}

/// Load the current schema snapshot's table set.
pub(crate) fn load_snapshot_tables(
    store: &ExtractionStore,
    project_id: &str,
) -> Result<Vec<TableMeta>, StageError> {
    let snapshot = store
        .get_snapshot(project_id)?
        .ok_or_else(|| StageError::Invariant(format!("no schema snapshot for {}", project_id)))?;
    let tables: Vec<TableMeta> =
        serde_json::from_str(&snapshot.payload).map_err(crate::store::StoreError::from)?;
    Ok(tables)
}

/// Load a JSON artifact written by an earlier stage.
pub(crate) fn load_artifact<T: serde::de::DeserializeOwned>(
    ctx: &StageContext,
    name: &str,
) -> Result<T, StageError> {
    let payload = ctx
        .store
        .get_artifact(&ctx.project_id, name)?
        .ok_or_else(|| {
            StageError::Invariant(format!(
                "artifact '{}' missing for {}; an upstream stage has not run",
                name, ctx.project_id
            ))
        })?;
    serde_json::from_str(&payload).map_err(|e| StageError::Store(crate::store::StoreError::from(e)))
}

/// Store a JSON artifact for downstream stages.
pub(crate) fn store_artifact<T: serde::Serialize>(
    ctx: &StageContext,
    name: &str,
    value: &T,
) -> Result<(), StageError> {
    let payload = serde_json::to_string(value).map_err(crate::store::StoreError::from)?;
    ctx.store.put_artifact(&ctx.project_id, name, &payload)?;
    Ok(())
}

/// Load the column profiles artifact.
pub(crate) fn load_profiles(ctx: &StageContext) -> Result<Vec<ColumnProfile>, StageError> {
    load_artifact(ctx, artifacts::PROFILES)
}
