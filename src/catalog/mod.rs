//! Schema catalog boundary.
//!
//! The catalog supplies table/column listings with declared constraints and
//! executes the join-statistics primitive (distinct counts plus left-join
//! orphan counts in both directions). Relationship discovery never touches
//! a database driver directly; it goes through [`SchemaCatalog`].
//!
//! # Architecture note
//!
//! Discovery is deterministic and local; the catalog is the only component
//! that sees live rows. This mirrors the split between metadata fetching
//! (remote, async) and inference (local, sync) so that discovery can be
//! exercised against the in-memory [`FixtureCatalog`] in tests.

mod memory;

pub use memory::{FixtureCatalog, FixtureTable};

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Result type for catalog operations.
pub type CatalogResult<T> = Result<T, CatalogError>;

/// Errors from the schema catalog.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// The catalog query failed (driver or network level).
    #[error("catalog query failed: {0}")]
    QueryFailed(String),

    /// Query timed out.
    #[error("catalog query timed out after {0} seconds")]
    Timeout(u64),

    /// A referenced table does not exist.
    #[error("unknown table: {schema}.{table}")]
    UnknownTable { schema: String, table: String },

    /// A referenced column does not exist.
    #[error("unknown column: {0}")]
    UnknownColumn(ColumnRef),
}

impl CatalogError {
    /// Check if this error is retriable.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::QueryFailed(_) | Self::Timeout(_))
    }
}

/// A fully-qualified column identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnRef {
    pub schema: String,
    pub table: String,
    pub column: String,
}

impl ColumnRef {
    pub fn new(
        schema: impl Into<String>,
        table: impl Into<String>,
        column: impl Into<String>,
    ) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
            column: column.into(),
        }
    }

    /// The (schema, table) pair this column belongs to.
    pub fn table_key(&self) -> (String, String) {
        (self.schema.to_lowercase(), self.table.to_lowercase())
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.schema, self.table, self.column)
    }
}

/// Metadata about a column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMeta {
    /// Column name
    pub name: String,
    /// Data type (database-specific string)
    pub data_type: String,
    /// Whether the column is nullable
    pub is_nullable: bool,
}

/// A declared foreign key constraint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignKeyMeta {
    /// Constraint name
    pub name: String,
    /// Constrained columns on this table
    pub columns: Vec<String>,
    /// Referenced schema
    pub referenced_schema: String,
    /// Referenced table
    pub referenced_table: String,
    /// Referenced columns
    pub referenced_columns: Vec<String>,
}

/// Metadata about a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableMeta {
    /// Schema name
    pub schema: String,
    /// Table name
    pub name: String,
    /// Columns in this table
    pub columns: Vec<ColumnMeta>,
    /// Primary key column names
    pub primary_key: Vec<String>,
    /// Declared foreign key constraints
    pub foreign_keys: Vec<ForeignKeyMeta>,
}

impl TableMeta {
    /// The single primary-key column, if the PK is not composite.
    pub fn single_pk_column(&self) -> Option<&str> {
        match self.primary_key.as_slice() {
            [only] => Some(only.as_str()),
            _ => None,
        }
    }

    /// Look up a column by name (case-insensitive).
    pub fn column(&self, name: &str) -> Option<&ColumnMeta> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }
}

/// Result of one join-statistics query between a source column and a
/// candidate target column.
///
/// Orphans are counted in both directions: a low-cardinality source can
/// trivially achieve a perfect forward match against any generous key range,
/// and only the reverse direction exposes the coverage asymmetry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JoinStatistics {
    /// Distinct non-null values in the source column.
    pub source_distinct: i64,
    /// Distinct non-null values in the target column.
    pub target_distinct: i64,
    /// Distinct source values absent from the target.
    pub forward_orphans: i64,
    /// Distinct target values absent from the source.
    pub reverse_orphans: i64,
}

impl JoinStatistics {
    /// Fraction of source values that exist in the target.
    pub fn forward_match_rate(&self) -> f64 {
        if self.source_distinct <= 0 {
            return 0.0;
        }
        (self.source_distinct - self.forward_orphans) as f64 / self.source_distinct as f64
    }

    /// Fraction of target values that the source references.
    pub fn reverse_coverage(&self) -> f64 {
        if self.target_distinct <= 0 {
            return 0.0;
        }
        (self.target_distinct - self.reverse_orphans) as f64 / self.target_distinct as f64
    }

    /// Fraction of target values the source never references.
    pub fn reverse_orphan_ratio(&self) -> f64 {
        if self.target_distinct <= 0 {
            return 1.0;
        }
        self.reverse_orphans as f64 / self.target_distinct as f64
    }
}

/// Trait for fetching schema metadata and executing join statistics.
#[async_trait]
pub trait SchemaCatalog: Send + Sync {
    /// List all tables visible to a project, with columns, primary keys and
    /// declared foreign keys.
    async fn list_tables(&self, project_id: &str) -> CatalogResult<Vec<TableMeta>>;

    /// Compute join statistics between a source column and a target column.
    async fn join_statistics(
        &self,
        source: &ColumnRef,
        target: &ColumnRef,
    ) -> CatalogResult<JoinStatistics>;
}
