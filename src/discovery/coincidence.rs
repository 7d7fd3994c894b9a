//! Coincidence filtering.
//!
//! A genuine foreign key references exactly one table. A source column that
//! clears the statistical acceptance rule against three or more distinct
//! target tables is overlapping small integer ranges by accident, and every
//! one of its candidates is discarded. Declared FK constraints are exempt:
//! the database already told us they are real.

use std::collections::{BTreeSet, HashMap};

use tracing::info;

use crate::catalog::ColumnRef;

use super::candidate::{InferenceMethod, RelationshipCandidate};

/// A source column suppressed for matching too many targets.
#[derive(Debug, Clone)]
pub struct SuppressedColumn {
    /// The coincidental source column.
    pub column: ColumnRef,
    /// The target tables it statistically matched.
    pub target_tables: Vec<String>,
}

/// Result of coincidence filtering.
#[derive(Debug, Clone)]
pub struct CoincidenceOutcome {
    /// Candidates that survived.
    pub kept: Vec<RelationshipCandidate>,
    /// Source columns whose candidates were all discarded.
    pub suppressed: Vec<SuppressedColumn>,
}

/// Rejects candidates whose source column matches too many distinct target
/// tables.
#[derive(Debug, Clone, Copy)]
pub struct CoincidenceFilter {
    /// Maximum distinct target tables per source column.
    max_target_tables: usize,
}

impl CoincidenceFilter {
    pub fn new(max_target_tables: usize) -> Self {
        Self { max_target_tables }
    }

    /// Apply the filter to a candidate list.
    pub fn apply(&self, candidates: Vec<RelationshipCandidate>) -> CoincidenceOutcome {
        // Distinct inferred target tables per source column.
        let mut targets_by_source: HashMap<ColumnRef, BTreeSet<String>> = HashMap::new();
        for candidate in &candidates {
            if candidate.method == InferenceMethod::FkConstraint {
                continue;
            }
            targets_by_source
                .entry(candidate.source.clone())
                .or_default()
                .insert(format!("{}.{}", candidate.target.schema, candidate.target.table));
        }

        let suppressed: Vec<SuppressedColumn> = targets_by_source
            .iter()
            .filter(|(_, targets)| targets.len() > self.max_target_tables)
            .map(|(column, targets)| SuppressedColumn {
                column: column.clone(),
                target_tables: targets.iter().cloned().collect(),
            })
            .collect();

        for s in &suppressed {
            info!(
                column = %s.column,
                targets = s.target_tables.len(),
                "source column suppressed as coincidental"
            );
        }

        let suppressed_columns: BTreeSet<String> =
            suppressed.iter().map(|s| s.column.to_string()).collect();

        let kept = candidates
            .into_iter()
            .filter(|c| {
                c.method == InferenceMethod::FkConstraint
                    || !suppressed_columns.contains(&c.source.to_string())
            })
            .collect();

        CoincidenceOutcome { kept, suppressed }
    }
}
