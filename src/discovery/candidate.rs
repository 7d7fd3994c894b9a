//! Relationship candidates and confidence scoring.

use std::fmt;

use inflector::Inflector;
use serde::{Deserialize, Serialize};

use crate::catalog::{ColumnRef, JoinStatistics};

use super::thresholds;

/// How a candidate was proposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InferenceMethod {
    /// Declared foreign key constraint.
    FkConstraint,
    /// Column features link the source to the target by name and role.
    ColumnFeatures,
    /// Pure statistical match against a primary key.
    PkMatch,
}

impl InferenceMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FkConstraint => "fk_constraint",
            Self::ColumnFeatures => "column_features",
            Self::PkMatch => "pk_match",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "fk_constraint" => Some(Self::FkConstraint),
            "column_features" => Some(Self::ColumnFeatures),
            "pk_match" => Some(Self::PkMatch),
            _ => None,
        }
    }

    fn base_score(&self) -> f64 {
        match self {
            Self::FkConstraint => thresholds::base::FK_CONSTRAINT,
            Self::ColumnFeatures => thresholds::base::COLUMN_FEATURES,
            Self::PkMatch => thresholds::base::PK_MATCH,
        }
    }

    fn cap(&self) -> f64 {
        match self {
            Self::FkConstraint => thresholds::cap::DECLARED,
            _ => thresholds::cap::INFERRED,
        }
    }
}

impl fmt::Display for InferenceMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single adjustment to the confidence score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreAdjustment {
    /// Description of this adjustment
    pub reason: String,
    /// Amount added (or subtracted if negative)
    pub delta: f64,
}

/// A hypothesized foreign-key relationship awaiting validation.
///
/// Candidates are ephemeral: they live in stage artifacts between discovery
/// and finalization, never in the relationship table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipCandidate {
    /// Referencing column.
    pub source: ColumnRef,
    /// Referenced column (a single-column primary key).
    pub target: ColumnRef,
    /// How the candidate was proposed.
    pub method: InferenceMethod,
    /// Bidirectional join statistics backing the candidate.
    pub stats: JoinStatistics,
    /// Deterministic confidence (0.0 to 1.0).
    pub confidence: f64,
    /// Trail of adjustments behind the confidence.
    pub adjustments: Vec<ScoreAdjustment>,
}

impl RelationshipCandidate {
    /// Build a candidate, computing its confidence from the statistics.
    pub fn new(
        source: ColumnRef,
        target: ColumnRef,
        method: InferenceMethod,
        stats: JoinStatistics,
    ) -> Self {
        let (confidence, adjustments) = score_candidate(method, &stats, &source, &target);
        Self {
            source,
            target,
            method,
            stats,
            confidence,
            adjustments,
        }
    }
}

/// Score a candidate from its method and join statistics.
///
/// Base score per method, bounded boosts for strong bidirectional evidence,
/// a penalty for weak target coverage, capped below certainty.
pub fn score_candidate(
    method: InferenceMethod,
    stats: &JoinStatistics,
    source: &ColumnRef,
    target: &ColumnRef,
) -> (f64, Vec<ScoreAdjustment>) {
    let mut adjustments = Vec::new();
    let mut score = method.base_score();

    let forward = stats.forward_match_rate();
    let coverage = stats.reverse_coverage();

    if forward >= 0.999 {
        adjustments.push(ScoreAdjustment {
            reason: "All source values exist in target".to_string(),
            delta: thresholds::adjustment::MAJOR_BOOST,
        });
        score += thresholds::adjustment::MAJOR_BOOST;
    } else if forward >= 0.95 {
        adjustments.push(ScoreAdjustment {
            reason: "Nearly all source values exist in target".to_string(),
            delta: thresholds::adjustment::MEDIUM_BOOST,
        });
        score += thresholds::adjustment::MEDIUM_BOOST;
    }

    if coverage >= 0.90 {
        adjustments.push(ScoreAdjustment {
            reason: "Source references most of the target key range".to_string(),
            delta: thresholds::adjustment::MEDIUM_BOOST,
        });
        score += thresholds::adjustment::MEDIUM_BOOST;
    } else if coverage >= 0.70 {
        adjustments.push(ScoreAdjustment {
            reason: "Source references much of the target key range".to_string(),
            delta: thresholds::adjustment::MINOR_BOOST,
        });
        score += thresholds::adjustment::MINOR_BOOST;
    } else if coverage < 0.50 {
        adjustments.push(ScoreAdjustment {
            reason: "Source covers under half of the target key range".to_string(),
            delta: thresholds::adjustment::LOW_COVERAGE_PENALTY,
        });
        score += thresholds::adjustment::LOW_COVERAGE_PENALTY;
    }

    if column_names_target(&source.column, &target.table) {
        adjustments.push(ScoreAdjustment {
            reason: "Column name contains target table name".to_string(),
            delta: thresholds::adjustment::MINOR_BOOST,
        });
        score += thresholds::adjustment::MINOR_BOOST;
    }

    (score.clamp(0.0, method.cap()), adjustments)
}

/// Check whether a source column name references a target table name
/// (singular or plural form).
pub fn column_names_target(column: &str, table: &str) -> bool {
    let column = column.to_lowercase();
    let table = table.to_lowercase();
    let singular = table.to_singular();
    column.contains(&table) || (!singular.is_empty() && column.contains(&singular))
}
