//! Foreign key and index declarations attached to a table

use serde::{Deserialize, Serialize};

/// `column` references `ref_table(ref_column)` in the same schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub column: String,
    pub ref_table: String,
    pub ref_column: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexProperty {
    Primary,
    Unique,
}

/// An index over one or more columns. A `primary` index becomes the
/// table's primary key constraint; anything else is a plain or unique
/// index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub columns: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property: Option<IndexProperty>,
}

impl IndexSpec {
    pub fn is_primary(&self) -> bool {
        self.property == Some(IndexProperty::Primary)
    }

    pub fn is_unique(&self) -> bool {
        self.property == Some(IndexProperty::Unique)
    }

    /// Deterministic index name: `{table}_{col1}_{col2}_idx`.
    pub fn index_name(&self, table: &str) -> String {
        format!("{}_{}_idx", table, self.columns.join("_"))
    }
}

/// `{table}_pkey`
pub fn primary_key_name(table: &str) -> String {
    format!("{}_pkey", table)
}

/// `{table}_{column}_fk`
pub fn foreign_key_name(table: &str, column: &str) -> String {
    format!("{}_{}_fk", table, column)
}
