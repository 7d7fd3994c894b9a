//! Relationship discovery engine.
//!
//! Discovery proposes foreign-key relationships from schema metadata and
//! column features, then validates each hypothesis against live row
//! statistics before anything semantic happens:
//!
//! 1. **Candidate collection** - for every FK-eligible column and every
//!    single-column primary key, one join-statistics query measuring
//!    distinct counts and orphans in *both* directions.
//! 2. **Coincidence filtering** - a source column that statistically
//!    matches more than two distinct target tables is overlapping small
//!    integer ranges, not referencing anything; all its candidates die.
//! 3. **Semantic arbitration** - survivors below the bypass confidence go
//!    to the LLM collaborator, whose malformed replies degrade to the
//!    deterministic score rather than aborting the stage.

mod arbiter;
mod candidate;
mod collector;
mod coincidence;

pub use arbiter::{ArbiterVerdict, ArbitrationOutcome, RelationshipArbiter};
pub use candidate::{
    score_candidate, InferenceMethod, RelationshipCandidate, ScoreAdjustment,
};
pub use collector::CandidateCollector;
pub use coincidence::{CoincidenceFilter, CoincidenceOutcome, SuppressedColumn};

/// Centralized confidence constants for candidate scoring.
///
/// Operational thresholds (match rates, orphan ceilings, bypass confidence)
/// are configuration; these are the fixed shape of the scoring curve.
pub mod thresholds {
    /// Base confidence per inference method.
    pub mod base {
        /// Candidate backed by a declared FK constraint.
        pub const FK_CONSTRAINT: f64 = 0.90;
        /// Candidate proposed from column features (naming links source to
        /// target).
        pub const COLUMN_FEATURES: f64 = 0.60;
        /// Candidate matched purely by primary-key statistics.
        pub const PK_MATCH: f64 = 0.50;
    }

    /// Confidence ceilings.
    pub mod cap {
        /// Declared constraints can approach certainty.
        pub const DECLARED: f64 = 0.98;
        /// Inferred relationships are never fully certain.
        pub const INFERRED: f64 = 0.95;
    }

    /// Confidence score adjustments.
    pub mod adjustment {
        /// Major boost (perfect forward match).
        pub const MAJOR_BOOST: f64 = 0.15;
        /// Medium boost (strong forward match or high coverage).
        pub const MEDIUM_BOOST: f64 = 0.10;
        /// Minor boost.
        pub const MINOR_BOOST: f64 = 0.05;
        /// Penalty for weak coverage of the target.
        pub const LOW_COVERAGE_PENALTY: f64 = -0.15;
    }
}
