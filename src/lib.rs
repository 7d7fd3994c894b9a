//! # Cartograph
//!
//! Semantic ontology extraction for unfamiliar relational schemas.
//!
//! ## Architecture
//!
//! Cartograph derives entities, relationships and column roles from a live
//! database it has never seen before, through a persisted, crash-recoverable
//! staged pipeline:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │              Schema Catalog (live database)              │
//! │  (tables, columns, declared FKs, join statistics)        │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [snapshot]
//! ┌─────────────────────────────────────────────────────────┐
//! │            Schema Snapshot (fingerprinted)               │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [classify]
//! ┌─────────────────────────────────────────────────────────┐
//! │     Column Profiles (pk / fk / ordinal / attribute)      │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [discover + coincidence filter]
//! ┌─────────────────────────────────────────────────────────┐
//! │   Relationship Candidates (bidirectional join stats)     │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [arbitrate - LLM collaborator]
//! ┌─────────────────────────────────────────────────────────┐
//! │            Schema Relationships (persisted)              │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! Every arrow is a pipeline stage owned by the orchestrator. Runs and
//! stages live in a durable store, so a crashed process loses nothing but
//! its in-flight stage; ownership is heartbeat-proven and reclaimed
//! atomically by whichever process notices the corpse first.

pub mod catalog;
pub mod classify;
pub mod config;
pub mod discovery;
pub mod llm;
pub mod pipeline;
pub mod store;

/// Re-exports for convenient usage.
pub mod prelude {
    pub use crate::catalog::{
        ColumnMeta, ColumnRef, ForeignKeyMeta, JoinStatistics, SchemaCatalog, TableMeta,
    };
    pub use crate::classify::{ColumnProfile, ColumnRole, FeatureClassifier};
    pub use crate::config::Settings;
    pub use crate::discovery::{
        CandidateCollector, CoincidenceFilter, InferenceMethod, RelationshipArbiter,
        RelationshipCandidate,
    };
    pub use crate::llm::LlmClient;
    pub use crate::pipeline::{ChangeSet, Orchestrator, RefreshPlanner, StageKind};
    pub use crate::store::{ExtractionStore, Run, RunStatus, Stage, StageStatus};
}
