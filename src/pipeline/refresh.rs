//! Incremental refresh planning.
//!
//! Given a change set (schema diffs plus pending corrections), compute the
//! minimal ordered sub-graph of stages to re-run. An empty change set is a
//! true no-op: one timestamp write, zero catalog or LLM calls.

use std::collections::{BTreeSet, HashMap, HashSet};

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Bfs;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::catalog::{ColumnRef, ForeignKeyMeta, TableMeta};
use crate::store::compute_fingerprint;

use super::orchestrator::{Orchestrator, PipelineError};
use super::stage::StageKind;

/// A pending user or agent correction to extracted semantics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Correction {
    /// The column the correction targets, when column-scoped.
    #[serde(default)]
    pub column: Option<ColumnRef>,
    /// What the user or agent changed.
    pub note: String,
}

/// The set of observed changes driving an incremental refresh.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChangeSet {
    /// Tables newly visible, as `schema.table`.
    pub tables_added: Vec<String>,
    /// Tables no longer visible.
    pub tables_removed: Vec<String>,
    /// Columns newly visible.
    pub columns_added: Vec<ColumnRef>,
    /// Columns no longer visible.
    pub columns_removed: Vec<ColumnRef>,
    /// Foreign keys newly declared, as (source, target) column pairs.
    pub fks_added: Vec<(ColumnRef, ColumnRef)>,
    /// Foreign keys dropped.
    pub fks_removed: Vec<(ColumnRef, ColumnRef)>,
    /// Pending user/agent corrections.
    pub corrections: Vec<Correction>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.tables_added.is_empty()
            && self.tables_removed.is_empty()
            && self.columns_added.is_empty()
            && self.columns_removed.is_empty()
            && self.fks_added.is_empty()
            && self.fks_removed.is_empty()
            && self.corrections.is_empty()
    }

    /// Whether the shape of the schema itself changed (tables or columns).
    pub fn has_shape_changes(&self) -> bool {
        !self.tables_added.is_empty()
            || !self.tables_removed.is_empty()
            || !self.columns_added.is_empty()
            || !self.columns_removed.is_empty()
    }

    /// Whether declared relationships changed.
    pub fn has_fk_changes(&self) -> bool {
        !self.fks_added.is_empty() || !self.fks_removed.is_empty()
    }

    /// Diff two schema snapshots into a change set.
    pub fn diff_snapshots(old: &[TableMeta], new: &[TableMeta]) -> Self {
        let table_name = |t: &TableMeta| format!("{}.{}", t.schema, t.name);

        let old_names: BTreeSet<String> = old.iter().map(table_name).collect();
        let new_names: BTreeSet<String> = new.iter().map(table_name).collect();

        let mut change = ChangeSet {
            tables_added: new_names.difference(&old_names).cloned().collect(),
            tables_removed: old_names.difference(&new_names).cloned().collect(),
            ..Default::default()
        };

        let old_by_name: HashMap<String, &TableMeta> =
            old.iter().map(|t| (table_name(t), t)).collect();

        for new_table in new {
            let Some(old_table) = old_by_name.get(&table_name(new_table)) else {
                continue;
            };

            let old_cols: BTreeSet<&str> =
                old_table.columns.iter().map(|c| c.name.as_str()).collect();
            let new_cols: BTreeSet<&str> =
                new_table.columns.iter().map(|c| c.name.as_str()).collect();
            for added in new_cols.difference(&old_cols) {
                change.columns_added.push(ColumnRef::new(
                    &new_table.schema,
                    &new_table.name,
                    *added,
                ));
            }
            for removed in old_cols.difference(&new_cols) {
                change.columns_removed.push(ColumnRef::new(
                    &old_table.schema,
                    &old_table.name,
                    *removed,
                ));
            }

            let old_fks = fk_pairs(old_table);
            let new_fks = fk_pairs(new_table);
            for added in new_fks.difference(&old_fks) {
                change.fks_added.push(added.clone());
            }
            for removed in old_fks.difference(&new_fks) {
                change.fks_removed.push(removed.clone());
            }
        }

        change
    }
}

fn fk_pairs(table: &TableMeta) -> HashSet<(ColumnRef, ColumnRef)> {
    table
        .foreign_keys
        .iter()
        .filter_map(|fk| {
            let ([source], [target]) = (fk.columns.as_slice(), fk.referenced_columns.as_slice())
            else {
                return None;
            };
            Some((
                ColumnRef::new(&table.schema, &table.name, source),
                ColumnRef::new(&fk.referenced_schema, &fk.referenced_table, target),
            ))
        })
        .collect()
}

/// Computes the minimal stage sub-graph a change set invalidates.
pub struct RefreshPlanner;

impl RefreshPlanner {
    /// Map a change set to the ordered stage subset to re-run.
    ///
    /// Each change type invalidates a root stage; everything downstream of
    /// an invalidated root re-runs too. Empty change set plans nothing.
    pub fn plan(change: &ChangeSet) -> Vec<StageKind> {
        if change.is_empty() {
            return Vec::new();
        }

        let mut roots: HashSet<StageKind> = HashSet::new();
        if change.has_shape_changes() {
            roots.insert(StageKind::Snapshot);
        }
        if change.has_fk_changes() {
            roots.insert(StageKind::Discover);
        }
        if !change.corrections.is_empty() {
            roots.insert(StageKind::Finalize);
        }

        Self::closure(&roots)
    }

    /// The invalidated roots plus all stages that depend on them, in
    /// execution order.
    fn closure(roots: &HashSet<StageKind>) -> Vec<StageKind> {
        let mut graph: DiGraph<StageKind, ()> = DiGraph::new();
        let mut nodes: HashMap<StageKind, NodeIndex> = HashMap::new();

        for kind in StageKind::ALL {
            nodes.insert(kind, graph.add_node(kind));
        }
        for kind in StageKind::ALL {
            for dep in kind.depends_on() {
                graph.add_edge(nodes[dep], nodes[&kind], ());
            }
        }

        let mut invalidated: HashSet<StageKind> = HashSet::new();
        for root in roots {
            let mut bfs = Bfs::new(&graph, nodes[root]);
            while let Some(node) = bfs.next(&graph) {
                invalidated.insert(graph[node]);
            }
        }

        let mut ordered: Vec<StageKind> = invalidated.into_iter().collect();
        ordered.sort_by_key(|k| k.order());
        ordered
    }
}

impl Orchestrator {
    /// Trigger an incremental refresh for a project.
    ///
    /// An empty change set completes immediately with a single timestamp
    /// write and returns `None`. Otherwise a run is created whose stages
    /// outside the computed plan are `skipped`, and execution begins.
    #[instrument(skip(self, change))]
    pub fn refresh_run(
        &self,
        project_id: &str,
        change: &ChangeSet,
    ) -> Result<Option<String>, PipelineError> {
        if change.is_empty() {
            self.store().touch_refreshed(project_id)?;
            info!(project_id, "refresh is a no-op; timestamp touched");
            return Ok(None);
        }

        let plan = RefreshPlanner::plan(change);

        // Plans rooted below the snapshot stage still need declared-FK
        // changes visible to discovery; patch the stored snapshot from the
        // change set instead of re-introspecting.
        if !plan.contains(&StageKind::Snapshot) && change.has_fk_changes() {
            self.patch_snapshot_fks(project_id, change)?;
        }

        let stage_names: Vec<(&str, i64)> = StageKind::ALL
            .iter()
            .map(|k| (k.name(), k.order()))
            .collect();
        let run = self
            .store()
            .create_run(project_id, self.owner_id(), &stage_names)?;

        for kind in StageKind::ALL {
            if !plan.contains(&kind) {
                self.store().update_stage_status(
                    &run.id,
                    kind.name(),
                    crate::store::StageStatus::Skipped,
                )?;
            }
        }

        info!(
            run_id = %run.id,
            project_id,
            stages = ?plan.iter().map(|k| k.name()).collect::<Vec<_>>(),
            "incremental refresh planned"
        );

        self.spawn_execution(run.id.clone());
        Ok(Some(run.id))
    }

    /// Apply declared-FK additions/removals to the stored snapshot.
    fn patch_snapshot_fks(
        &self,
        project_id: &str,
        change: &ChangeSet,
    ) -> Result<(), PipelineError> {
        let Some(snapshot) = self.store().get_snapshot(project_id)? else {
            return Ok(());
        };
        let mut tables: Vec<TableMeta> = serde_json::from_str(&snapshot.payload)
            .map_err(crate::store::StoreError::from)?;

        for (source, target) in &change.fks_added {
            if let Some(table) = tables.iter_mut().find(|t| {
                t.schema.eq_ignore_ascii_case(&source.schema)
                    && t.name.eq_ignore_ascii_case(&source.table)
            }) {
                let already = fk_pairs(table).contains(&(source.clone(), target.clone()));
                if !already {
                    table.foreign_keys.push(ForeignKeyMeta {
                        name: format!("observed_{}_{}", source.table, source.column),
                        columns: vec![source.column.clone()],
                        referenced_schema: target.schema.clone(),
                        referenced_table: target.table.clone(),
                        referenced_columns: vec![target.column.clone()],
                    });
                }
            }
        }

        for (source, target) in &change.fks_removed {
            if let Some(table) = tables.iter_mut().find(|t| {
                t.schema.eq_ignore_ascii_case(&source.schema)
                    && t.name.eq_ignore_ascii_case(&source.table)
            }) {
                table.foreign_keys.retain(|fk| {
                    !(fk.columns.len() == 1
                        && fk.columns[0] == source.column
                        && fk.referenced_table.eq_ignore_ascii_case(&target.table)
                        && fk.referenced_columns.len() == 1
                        && fk.referenced_columns[0] == target.column)
                });
            }
        }

        let payload =
            serde_json::to_string(&tables).map_err(crate::store::StoreError::from)?;
        let fingerprint =
            compute_fingerprint(&tables).map_err(crate::store::StoreError::from)?;
        self.store()
            .save_snapshot(project_id, &payload, &fingerprint)?;
        Ok(())
    }
}
