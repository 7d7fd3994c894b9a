//! In-memory fixture catalog.
//!
//! Holds tables together with their actual column value sets and computes
//! join statistics with set operations. Used by the test suite and the CLI
//! fixture mode; call counters let tests assert the no-op properties
//! (zero catalog calls on an unchanged schema).

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{
    CatalogError, CatalogResult, ColumnRef, JoinStatistics, SchemaCatalog, TableMeta,
};

/// A table definition plus its column values, for fixture use.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureTable {
    /// Table metadata.
    pub meta: TableMeta,
    /// Non-null values per column, stringified.
    #[serde(default)]
    pub values: HashMap<String, Vec<String>>,
}

impl FixtureTable {
    pub fn new(meta: TableMeta) -> Self {
        Self {
            meta,
            values: HashMap::new(),
        }
    }

    /// Attach integer values to a column.
    pub fn with_int_values(mut self, column: &str, values: impl IntoIterator<Item = i64>) -> Self {
        self.values.insert(
            column.to_string(),
            values.into_iter().map(|v| v.to_string()).collect(),
        );
        self
    }

    /// Attach string values to a column.
    pub fn with_values<S: Into<String>>(
        mut self,
        column: &str,
        values: impl IntoIterator<Item = S>,
    ) -> Self {
        self.values.insert(
            column.to_string(),
            values.into_iter().map(Into::into).collect(),
        );
        self
    }
}

/// In-memory [`SchemaCatalog`] implementation backed by fixture tables.
#[derive(Debug, Default)]
pub struct FixtureCatalog {
    tables: Vec<FixtureTable>,
    list_calls: AtomicUsize,
    join_calls: AtomicUsize,
}

impl FixtureCatalog {
    pub fn new(tables: Vec<FixtureTable>) -> Self {
        Self {
            tables,
            list_calls: AtomicUsize::new(0),
            join_calls: AtomicUsize::new(0),
        }
    }

    /// Number of `list_tables` calls served so far.
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Number of `join_statistics` calls served so far.
    pub fn join_calls(&self) -> usize {
        self.join_calls.load(Ordering::SeqCst)
    }

    fn find_table(&self, schema: &str, table: &str) -> Option<&FixtureTable> {
        self.tables.iter().find(|t| {
            t.meta.schema.eq_ignore_ascii_case(schema) && t.meta.name.eq_ignore_ascii_case(table)
        })
    }

    fn column_values(&self, col: &ColumnRef) -> CatalogResult<&Vec<String>> {
        let table = self
            .find_table(&col.schema, &col.table)
            .ok_or_else(|| CatalogError::UnknownTable {
                schema: col.schema.clone(),
                table: col.table.clone(),
            })?;
        table
            .values
            .get(&col.column)
            .ok_or_else(|| CatalogError::UnknownColumn(col.clone()))
    }
}

#[async_trait]
impl SchemaCatalog for FixtureCatalog {
    async fn list_tables(&self, _project_id: &str) -> CatalogResult<Vec<TableMeta>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.tables.iter().map(|t| t.meta.clone()).collect())
    }

    async fn join_statistics(
        &self,
        source: &ColumnRef,
        target: &ColumnRef,
    ) -> CatalogResult<JoinStatistics> {
        self.join_calls.fetch_add(1, Ordering::SeqCst);

        let source_values: HashSet<&String> = self.column_values(source)?.iter().collect();
        let target_values: HashSet<&String> = self.column_values(target)?.iter().collect();

        let forward_orphans = source_values.difference(&target_values).count() as i64;
        let reverse_orphans = target_values.difference(&source_values).count() as i64;

        Ok(JoinStatistics {
            source_distinct: source_values.len() as i64,
            target_distinct: target_values.len() as i64,
            forward_orphans,
            reverse_orphans,
        })
    }
}
