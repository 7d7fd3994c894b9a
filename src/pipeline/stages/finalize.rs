//! Finalize stage: persist accepted relationships, stale out the rest.

use async_trait::async_trait;
use tracing::info;

use crate::discovery::ArbitrationOutcome;
use crate::pipeline::stage::{PipelineStage, StageContext, StageError, StageKind};
use crate::store::{
    ArbitrationRecord, RelationshipStatus, SchemaRelationship, ValidationSnapshot,
};

use super::{artifacts, load_artifact};

#[derive(Default)]
pub struct FinalizeStage;

impl FinalizeStage {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PipelineStage for FinalizeStage {
    fn kind(&self) -> StageKind {
        StageKind::Finalize
    }

    async fn execute(&self, ctx: &StageContext) -> Result<(), StageError> {
        ctx.check_cancelled()?;

        let outcomes: Vec<ArbitrationOutcome> = load_artifact(ctx, artifacts::ARBITRATION)?;

        let mut confirmed = Vec::new();
        for outcome in outcomes.iter().filter(|o| o.accepted) {
            let candidate = &outcome.candidate;
            let rel = SchemaRelationship {
                project_id: ctx.project_id.clone(),
                source: candidate.source.clone(),
                target: candidate.target.clone(),
                method: candidate.method,
                confidence: outcome.confidence,
                validation: ValidationSnapshot {
                    stats: candidate.stats,
                    forward_match_rate: candidate.stats.forward_match_rate(),
                    reverse_coverage: candidate.stats.reverse_coverage(),
                    adjustments: candidate.adjustments.clone(),
                    arbitration: Some(ArbitrationRecord {
                        accepted: outcome.accepted,
                        confidence: outcome.confidence,
                        reason: outcome
                            .verdict
                            .as_ref()
                            .map(|v| v.reason.clone())
                            .filter(|r| !r.is_empty()),
                        deterministic_fallback: outcome.verdict.is_none(),
                    }),
                },
                status: RelationshipStatus::Active,
                updated_at: 0,
            };
            ctx.store.upsert_relationship(&rel)?;
            confirmed.push((rel.source, rel.target, rel.method));
        }

        let staled = ctx.store.mark_stale_except(&ctx.project_id, &confirmed)?;
        ctx.store.touch_refreshed(&ctx.project_id)?;

        info!(
            project_id = %ctx.project_id,
            persisted = confirmed.len(),
            staled,
            "relationships finalized"
        );
        Ok(())
    }
}
