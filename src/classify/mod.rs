//! Column feature classification.
//!
//! Tags each column with a role (primary key, foreign key, ordinal,
//! attribute) and a purpose string. The role gates FK eligibility for the
//! candidate collector: ordinal/sequence counters are excluded *here*,
//! before any candidates exist, so no amount of statistical overlap can
//! resurrect a `week_number` column as a foreign key.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::catalog::{ColumnMeta, ColumnRef, TableMeta};

/// Role assigned to a column by feature classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnRole {
    /// Single-column primary key.
    PrimaryKey,
    /// Reference to another table's key (declared or shaped like one).
    ForeignKey,
    /// Sequence/position counter; never a relationship endpoint.
    Ordinal,
    /// Plain descriptive or measured value.
    Attribute,
}

impl ColumnRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PrimaryKey => "primary_key",
            Self::ForeignKey => "foreign_key",
            Self::Ordinal => "ordinal",
            Self::Attribute => "attribute",
        }
    }
}

/// Classification output for one column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnProfile {
    /// The column this profile describes.
    pub column: ColumnRef,
    /// Assigned role.
    pub role: ColumnRole,
    /// Short human-readable purpose.
    pub purpose: String,
    /// Data type carried through from the catalog.
    pub data_type: String,
}

impl ColumnProfile {
    /// Whether the collector may propose this column as a relationship
    /// source.
    pub fn fk_eligible(&self) -> bool {
        self.role == ColumnRole::ForeignKey
    }
}

/// A name-shape check used for role assignment.
#[derive(Debug, Clone)]
enum NamePattern {
    EndsWith(&'static str),
    StartsWith(&'static str),
    Contains(&'static str),
    Exact(&'static str),
}

impl NamePattern {
    fn matches(&self, name: &str) -> bool {
        let name = name.to_lowercase();
        match self {
            Self::EndsWith(suffix) => name.ends_with(suffix),
            Self::StartsWith(prefix) => name.starts_with(prefix),
            Self::Contains(substr) => name.contains(substr),
            Self::Exact(exact) => name == *exact,
        }
    }
}

/// Classifies columns into roles from catalog metadata.
#[derive(Debug, Clone)]
pub struct FeatureClassifier {
    /// Sequence/position counter shapes. Matching columns become
    /// [`ColumnRole::Ordinal`] unconditionally.
    ordinal_patterns: Vec<NamePattern>,
    /// Shapes that disqualify a column from reference roles (timestamps,
    /// flags, free text) without making it ordinal.
    non_reference_patterns: Vec<NamePattern>,
    /// Reference-shaped suffixes for undeclared FK detection.
    reference_suffixes: Vec<&'static str>,
}

impl Default for FeatureClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl FeatureClassifier {
    pub fn new() -> Self {
        let ordinal_patterns = vec![
            NamePattern::EndsWith("_number"),
            NamePattern::EndsWith("_offset"),
            NamePattern::EndsWith("_step"),
            NamePattern::EndsWith("_position"),
            NamePattern::EndsWith("_index"),
            NamePattern::EndsWith("_rank"),
            NamePattern::EndsWith("_seq"),
            NamePattern::Contains("sequence"),
            NamePattern::Exact("position"),
            NamePattern::Exact("ordinal"),
        ];

        let non_reference_patterns = vec![
            NamePattern::EndsWith("_at"),
            NamePattern::EndsWith("_timestamp"),
            NamePattern::EndsWith("_date"),
            NamePattern::EndsWith("_time"),
            NamePattern::StartsWith("is_"),
            NamePattern::StartsWith("has_"),
            NamePattern::EndsWith("_flag"),
            NamePattern::EndsWith("_count"),
            NamePattern::EndsWith("_total"),
            NamePattern::EndsWith("_amount"),
            NamePattern::EndsWith("_hash"),
            NamePattern::Exact("created"),
            NamePattern::Exact("updated"),
            NamePattern::Exact("version"),
            NamePattern::Exact("description"),
            NamePattern::Exact("notes"),
        ];

        Self {
            ordinal_patterns,
            non_reference_patterns,
            reference_suffixes: vec!["_id", "_key", "_code", "_ref", "_fk"],
        }
    }

    /// Check whether a column name is an ordinal/sequence counter.
    pub fn is_ordinal(&self, name: &str) -> bool {
        self.ordinal_patterns.iter().any(|p| p.matches(name))
    }

    fn is_non_reference(&self, name: &str, data_type: &str) -> bool {
        if self.non_reference_patterns.iter().any(|p| p.matches(name)) {
            return true;
        }
        let dt = data_type.to_lowercase();
        dt.contains("bool")
            || dt.contains("timestamp")
            || dt.contains("date")
            || dt.contains("json")
            || dt.contains("blob")
    }

    fn has_reference_suffix(&self, name: &str) -> bool {
        let name = name.to_lowercase();
        self.reference_suffixes.iter().any(|s| name.ends_with(s))
    }

    fn classify_column(
        &self,
        table: &TableMeta,
        column: &ColumnMeta,
        declared_fk_columns: &HashSet<String>,
    ) -> ColumnProfile {
        let col_ref = ColumnRef::new(&table.schema, &table.name, &column.name);
        let name_lower = column.name.to_lowercase();

        // Ordinal wins over everything else, including declared-looking
        // names: week_number stays ordinal no matter what it overlaps.
        if self.is_ordinal(&column.name) {
            return ColumnProfile {
                column: col_ref,
                role: ColumnRole::Ordinal,
                purpose: "sequence or position counter".to_string(),
                data_type: column.data_type.clone(),
            };
        }

        if table.primary_key.len() == 1 && table.primary_key[0].eq_ignore_ascii_case(&column.name)
        {
            return ColumnProfile {
                column: col_ref,
                role: ColumnRole::PrimaryKey,
                purpose: "row identifier".to_string(),
                data_type: column.data_type.clone(),
            };
        }

        // Declared FK membership makes the role unambiguous.
        if declared_fk_columns.contains(&name_lower) {
            return ColumnProfile {
                column: col_ref,
                role: ColumnRole::ForeignKey,
                purpose: "declared reference to another table".to_string(),
                data_type: column.data_type.clone(),
            };
        }

        if self.is_non_reference(&column.name, &column.data_type) {
            return ColumnProfile {
                column: col_ref,
                role: ColumnRole::Attribute,
                purpose: "descriptive or measured value".to_string(),
                data_type: column.data_type.clone(),
            };
        }

        if self.has_reference_suffix(&column.name) {
            return ColumnProfile {
                column: col_ref,
                role: ColumnRole::ForeignKey,
                purpose: "reference-shaped column".to_string(),
                data_type: column.data_type.clone(),
            };
        }

        // Composite-PK members are usually dimension keys in fact tables.
        if table.primary_key.len() > 1
            && table
                .primary_key
                .iter()
                .any(|pk| pk.eq_ignore_ascii_case(&column.name))
        {
            return ColumnProfile {
                column: col_ref,
                role: ColumnRole::ForeignKey,
                purpose: "composite key member".to_string(),
                data_type: column.data_type.clone(),
            };
        }

        ColumnProfile {
            column: col_ref,
            role: ColumnRole::Attribute,
            purpose: "descriptive or measured value".to_string(),
            data_type: column.data_type.clone(),
        }
    }

    /// Classify every column of a table.
    pub fn classify_table(&self, table: &TableMeta) -> Vec<ColumnProfile> {
        let declared_fk_columns: HashSet<String> = table
            .foreign_keys
            .iter()
            .flat_map(|fk| fk.columns.iter().map(|c| c.to_lowercase()))
            .collect();

        table
            .columns
            .iter()
            .map(|c| self.classify_column(table, c, &declared_fk_columns))
            .collect()
    }

    /// Classify every column across a table set.
    pub fn classify_all(&self, tables: &[TableMeta]) -> Vec<ColumnProfile> {
        tables
            .iter()
            .flat_map(|t| self.classify_table(t))
            .collect()
    }
}
