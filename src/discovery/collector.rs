//! Candidate collection with bidirectional join validation.

use std::collections::{BTreeMap, HashSet};

use tracing::debug;

use crate::catalog::{
    CatalogResult, ColumnRef, JoinStatistics, SchemaCatalog, TableMeta,
};
use crate::classify::ColumnProfile;
use crate::config::DiscoverySettings;
use crate::pipeline::stage::CancelToken;

use super::candidate::{column_names_target, InferenceMethod, RelationshipCandidate};

/// Pre-computed lookup of single-column primary-key targets.
///
/// Built in one pass over the table set; composite primary keys contribute
/// no targets because the join-statistics primitive is single-column.
#[derive(Debug, Default)]
struct TargetLookup {
    /// (schema, table) -> PK column ref; ordered so statistics queries and
    /// equal-confidence candidates come out in a stable order
    targets: BTreeMap<(String, String), ColumnRef>,
}

impl TargetLookup {
    fn from_tables(tables: &[TableMeta]) -> Self {
        let mut lookup = Self::default();
        for table in tables {
            if let Some(pk) = table.single_pk_column() {
                lookup.targets.insert(
                    (table.schema.to_lowercase(), table.name.to_lowercase()),
                    ColumnRef::new(&table.schema, &table.name, pk),
                );
            }
        }
        lookup
    }
}

/// Collects relationship candidates from schema metadata, column features
/// and live join statistics.
pub struct CandidateCollector<'a> {
    catalog: &'a dyn SchemaCatalog,
    settings: DiscoverySettings,
}

impl<'a> CandidateCollector<'a> {
    pub fn new(catalog: &'a dyn SchemaCatalog, settings: DiscoverySettings) -> Self {
        Self { catalog, settings }
    }

    /// Collect candidates across the table set.
    ///
    /// Returns candidates ordered by confidence (descending). Respects the
    /// cancellation token between statistics queries; a cancelled collection
    /// returns what it has so far, which is safe because the downstream
    /// stage will be re-run in full.
    pub async fn collect(
        &self,
        tables: &[TableMeta],
        profiles: &[ColumnProfile],
        cancel: &CancelToken,
    ) -> CatalogResult<Vec<RelationshipCandidate>> {
        let lookup = TargetLookup::from_tables(tables);
        let mut candidates = Vec::new();

        // Declared FK constraints first: ground truth, still measured so the
        // validation snapshot carries real statistics.
        let mut declared: HashSet<(ColumnRef, ColumnRef)> = HashSet::new();
        for table in tables {
            for fk in &table.foreign_keys {
                let ([source_col], [target_col]) =
                    (fk.columns.as_slice(), fk.referenced_columns.as_slice())
                else {
                    // Composite FKs surface without per-column statistics.
                    continue;
                };
                if cancel.is_cancelled() {
                    return Ok(candidates);
                }
                let source = ColumnRef::new(&table.schema, &table.name, source_col);
                let target = ColumnRef::new(
                    &fk.referenced_schema,
                    &fk.referenced_table,
                    target_col,
                );
                let stats = self.catalog.join_statistics(&source, &target).await?;
                declared.insert((source.clone(), target.clone()));
                candidates.push(RelationshipCandidate::new(
                    source,
                    target,
                    InferenceMethod::FkConstraint,
                    stats,
                ));
            }
        }

        // Inferred candidates: every FK-eligible column against every
        // single-column PK target, both join directions measured.
        for profile in profiles.iter().filter(|p| p.fk_eligible()) {
            let source = &profile.column;
            for ((_, target_table), target) in &lookup.targets {
                if cancel.is_cancelled() {
                    return Ok(candidates);
                }
                if source.table_key() == target.table_key() {
                    continue;
                }
                if declared.contains(&(source.clone(), target.clone())) {
                    continue;
                }

                let stats = self.catalog.join_statistics(source, target).await?;
                if !self.accepts(&stats) {
                    debug!(
                        source = %source,
                        target = %target,
                        forward = stats.forward_match_rate(),
                        reverse_orphan_ratio = stats.reverse_orphan_ratio(),
                        "candidate rejected by join validation"
                    );
                    continue;
                }

                let method = if column_names_target(&source.column, target_table) {
                    InferenceMethod::ColumnFeatures
                } else {
                    InferenceMethod::PkMatch
                };
                candidates.push(RelationshipCandidate::new(
                    source.clone(),
                    target.clone(),
                    method,
                    stats,
                ));
            }
        }

        candidates.retain(|c| {
            c.method == InferenceMethod::FkConstraint
                || c.confidence >= self.settings.min_confidence
        });
        candidates.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        Ok(candidates)
    }

    /// The bidirectional acceptance rule.
    ///
    /// Forward match rate must clear the configured floor, the target must
    /// not be mostly unreferenced, and a small-cardinality source must cover
    /// a meaningful share of the target key range.
    fn accepts(&self, stats: &JoinStatistics) -> bool {
        if stats.source_distinct == 0 || stats.target_distinct == 0 {
            return false;
        }
        if stats.forward_match_rate() < self.settings.min_forward_match_rate {
            return false;
        }
        if stats.reverse_orphan_ratio() > self.settings.max_reverse_orphan_ratio {
            return false;
        }
        if stats.source_distinct <= self.settings.small_source_max_distinct
            && stats.reverse_coverage() < self.settings.small_source_min_coverage
        {
            return false;
        }
        true
    }
}
