//! Persisted schema relationships.
//!
//! The relationship table is keyed by (source column, target column,
//! inference method), so finalization can re-run any number of times
//! without duplicating rows. Relationships that stop being discovered are
//! marked stale rather than deleted; downstream ontology consumers decide
//! what staleness means to them.

use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};

use crate::catalog::{ColumnRef, JoinStatistics};
use crate::discovery::{InferenceMethod, ScoreAdjustment};

use super::{unix_now, ExtractionStore, StoreError, StoreResult};

/// Lifecycle status of a persisted relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipStatus {
    Active,
    Stale,
}

impl RelationshipStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Stale => "stale",
        }
    }

    pub fn from_str(s: &str) -> StoreResult<Self> {
        match s {
            "active" => Ok(Self::Active),
            "stale" => Ok(Self::Stale),
            other => Err(StoreError::UnknownStatus(other.to_string())),
        }
    }
}

/// Record of the arbitration decision embedded in the validation snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArbitrationRecord {
    /// Final decision.
    pub accepted: bool,
    /// Final confidence.
    pub confidence: f64,
    /// Collaborator justification, when one parsed.
    #[serde(default)]
    pub reason: Option<String>,
    /// True when the deterministic score decided (bypass or malformed
    /// reply).
    pub deterministic_fallback: bool,
}

/// Structured join-statistics snapshot persisted with each relationship.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationSnapshot {
    /// Raw bidirectional join statistics.
    pub stats: JoinStatistics,
    /// Forward match rate at validation time.
    pub forward_match_rate: f64,
    /// Reverse coverage at validation time.
    pub reverse_coverage: f64,
    /// Score adjustment trail.
    pub adjustments: Vec<ScoreAdjustment>,
    /// Arbitration decision, if the candidate went through arbitration.
    #[serde(default)]
    pub arbitration: Option<ArbitrationRecord>,
}

/// A persisted, validated schema relationship.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaRelationship {
    pub project_id: String,
    pub source: ColumnRef,
    pub target: ColumnRef,
    pub method: InferenceMethod,
    pub confidence: f64,
    pub validation: ValidationSnapshot,
    pub status: RelationshipStatus,
    pub updated_at: i64,
}

fn relationship_from_row(row: &Row<'_>) -> rusqlite::Result<(SchemaRelationship, String, String, String)> {
    let method: String = row.get(7)?;
    let validation: String = row.get(9)?;
    let status: String = row.get(10)?;
    Ok((
        SchemaRelationship {
            project_id: row.get(0)?,
            source: ColumnRef {
                schema: row.get(1)?,
                table: row.get(2)?,
                column: row.get(3)?,
            },
            target: ColumnRef {
                schema: row.get(4)?,
                table: row.get(5)?,
                column: row.get(6)?,
            },
            method: InferenceMethod::PkMatch, // patched by caller
            confidence: row.get(8)?,
            validation: ValidationSnapshot {
                stats: JoinStatistics {
                    source_distinct: 0,
                    target_distinct: 0,
                    forward_orphans: 0,
                    reverse_orphans: 0,
                },
                forward_match_rate: 0.0,
                reverse_coverage: 0.0,
                adjustments: vec![],
                arbitration: None,
            },
            status: RelationshipStatus::Active, // patched by caller
            updated_at: row.get(11)?,
        },
        method,
        validation,
        status,
    ))
}

const REL_COLUMNS: &str = "project_id, source_schema, source_table, source_column, \
     target_schema, target_table, target_column, method, confidence, validation, status, updated_at";

impl ExtractionStore {
    /// Idempotently upsert a relationship.
    pub fn upsert_relationship(&self, rel: &SchemaRelationship) -> StoreResult<()> {
        let validation = serde_json::to_string(&rel.validation)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO relationships
                 (project_id, source_schema, source_table, source_column,
                  target_schema, target_table, target_column,
                  method, confidence, validation, status, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(project_id, source_schema, source_table, source_column,
                             target_schema, target_table, target_column, method)
                 DO UPDATE SET
                     confidence = excluded.confidence,
                     validation = excluded.validation,
                     status = excluded.status,
                     updated_at = excluded.updated_at",
                params![
                    rel.project_id,
                    rel.source.schema,
                    rel.source.table,
                    rel.source.column,
                    rel.target.schema,
                    rel.target.table,
                    rel.target.column,
                    rel.method.as_str(),
                    rel.confidence,
                    validation,
                    rel.status.as_str(),
                    unix_now(),
                ],
            )?;
            Ok(())
        })
    }

    /// All relationships for a project, active first, then by confidence.
    pub fn project_relationships(&self, project_id: &str) -> StoreResult<Vec<SchemaRelationship>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM relationships WHERE project_id = ?
                 ORDER BY status, confidence DESC",
                REL_COLUMNS
            ))?;
            let mut rows = stmt.query(params![project_id])?;
            let mut rels = Vec::new();
            while let Some(row) = rows.next()? {
                let (mut rel, method, validation, status) = relationship_from_row(row)?;
                rel.method = InferenceMethod::from_str(&method)
                    .ok_or_else(|| StoreError::UnknownStatus(method.clone()))?;
                rel.validation = serde_json::from_str(&validation)?;
                rel.status = RelationshipStatus::from_str(&status)?;
                rels.push(rel);
            }
            Ok(rels)
        })
    }

    /// Active relationships for a project.
    pub fn active_relationships(&self, project_id: &str) -> StoreResult<Vec<SchemaRelationship>> {
        Ok(self
            .project_relationships(project_id)?
            .into_iter()
            .filter(|r| r.status == RelationshipStatus::Active)
            .collect())
    }

    /// Mark every relationship of a project stale except the given keys.
    ///
    /// Keys are `(source, target, method)` triples of relationships the
    /// current run re-confirmed. Returns the number of rows newly staled.
    pub fn mark_stale_except(
        &self,
        project_id: &str,
        keep: &[(ColumnRef, ColumnRef, InferenceMethod)],
    ) -> StoreResult<usize> {
        let current = self.project_relationships(project_id)?;
        let mut staled = 0;
        for rel in current {
            if rel.status == RelationshipStatus::Stale {
                continue;
            }
            let confirmed = keep.iter().any(|(s, t, m)| {
                *s == rel.source && *t == rel.target && *m == rel.method
            });
            if !confirmed {
                self.with_conn(|conn| {
                    conn.execute(
                        "UPDATE relationships SET status = 'stale', updated_at = ?
                         WHERE project_id = ?
                           AND source_schema = ? AND source_table = ? AND source_column = ?
                           AND target_schema = ? AND target_table = ? AND target_column = ?
                           AND method = ?",
                        params![
                            unix_now(),
                            project_id,
                            rel.source.schema,
                            rel.source.table,
                            rel.source.column,
                            rel.target.schema,
                            rel.target.table,
                            rel.target.column,
                            rel.method.as_str(),
                        ],
                    )?;
                    Ok(())
                })?;
                staled += 1;
            }
        }
        Ok(staled)
    }
}
