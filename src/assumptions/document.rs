//! Assumptions document: the YAML shape and its structural checks
//!
//! ```yaml
//! symbols: []
//! ignores:
//!   - ".*_flag_bad"
//! tables:
//!   - table:
//!       name: forcedsource
//!       doubles: [coord_ra, coord_dec]
//!       index:
//!         - columns: [objectId, ccdVisitId]
//!           property: primary
//!       columns:
//!         - column: { name: objectId, dtype: int64 }
//!         - column_group: { name_re: "base_PsfFlux_.*" }
//!         - column:
//!             name: ccdVisitId
//!             dtype: int64
//!             compute: ["{visit}", "8", "zerofill(,)", "{sensor}", "prepend(,)"]
//! constraints:
//!   - table: forcedsource
//!     foreign:
//!       - { column: objectId, ref_table: object, ref_column: objectId }
//! ```
//!
//! The raw YAML value is checked for structure first so a malformed
//! document fails with a message naming the offending section, before any
//! typed deserialization or I/O against the store.

use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use tracing::warn;

use super::{AssumptionsError, AssumptionsResult};
use crate::models::ScalarType;
use crate::table::{ForeignKey, IndexSpec};

const KNOWN_SECTIONS: &[&str] = &["symbols", "ignores", "tables", "constraints"];

/// Top-level document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssumptionsDocument {
    /// Substitution aliases; carried but not interpreted
    #[serde(default)]
    pub symbols: Vec<Value>,
    /// Regular expressions for raw fields to drop
    #[serde(default)]
    pub ignores: Vec<String>,
    #[serde(default)]
    pub tables: Vec<TableEntry>,
    /// Foreign keys declared apart from their tables
    #[serde(default)]
    pub constraints: Vec<ConstraintSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableEntry {
    pub table: TableSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSpec {
    pub name: String,
    #[serde(default)]
    pub columns: Vec<ColumnEntry>,
    #[serde(default)]
    pub doubles: Vec<String>,
    #[serde(default)]
    pub foreign: Vec<ForeignKey>,
    #[serde(default)]
    pub index: Vec<IndexSpec>,
}

/// One entry of a table's `columns` list: exactly one of the two keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<ColumnSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_group: Option<ColumnGroupSpec>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    Single,
    Double,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    #[serde(default)]
    pub dtype: Option<ScalarType>,
    #[serde(default)]
    pub doc: Option<String>,
    #[serde(default)]
    pub compute: Option<ComputeSpec>,
    #[serde(default)]
    pub precision: Option<Precision>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnGroupSpec {
    pub name_re: String,
    #[serde(default)]
    pub dtype: Option<ScalarType>,
    #[serde(default)]
    pub doc: Option<String>,
    #[serde(default)]
    pub precision: Option<Precision>,
}

/// A compute expression, either as a token list or as one
/// whitespace-separated string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ComputeSpec {
    Tokens(Vec<String>),
    Inline(String),
}

impl ComputeSpec {
    pub fn tokens(&self) -> Vec<String> {
        match self {
            ComputeSpec::Tokens(tokens) => tokens.clone(),
            ComputeSpec::Inline(text) => text.split_whitespace().map(str::to_string).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintSpec {
    pub table: String,
    #[serde(default)]
    pub foreign: Vec<ForeignKey>,
}

fn invalid(message: impl Into<String>) -> AssumptionsError {
    AssumptionsError::Validation(message.into())
}

fn expect_list<'a>(value: &'a Value, what: &str) -> AssumptionsResult<&'a Vec<Value>> {
    value
        .as_sequence()
        .ok_or_else(|| invalid(format!("contents of {} is not a list", what)))
}

/// Structural checks on the untyped document.
fn verify(root: &Value) -> AssumptionsResult<()> {
    let mapping = root
        .as_mapping()
        .ok_or_else(|| invalid("document is not a mapping"))?;

    for (key, value) in mapping {
        let Some(key) = key.as_str() else {
            return Err(invalid("section names must be strings"));
        };
        if !KNOWN_SECTIONS.contains(&key) {
            warn!("Unknown assumptions section {} will be ignored", key);
            continue;
        }
        if value.is_null() {
            continue;
        }
        let entries = expect_list(value, key)?;
        if key == "tables" {
            for (i, entry) in entries.iter().enumerate() {
                verify_table(i, entry)?;
            }
        }
    }
    Ok(())
}

fn verify_table(position: usize, entry: &Value) -> AssumptionsResult<()> {
    let table = entry
        .as_mapping()
        .and_then(|m| m.get("table"))
        .ok_or_else(|| invalid(format!("table entry {} has no 'table' key", position)))?;
    let table = table
        .as_mapping()
        .ok_or_else(|| invalid(format!("table entry {} is not a mapping", position)))?;
    let name = table
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| invalid(format!("table entry {} is missing its name", position)))?;

    for section in ["columns", "doubles", "foreign", "index"] {
        if let Some(value) = table.get(section)
            && !value.is_null()
        {
            expect_list(value, &format!("{}.{}", name, section))?;
        }
    }

    if let Some(columns) = table.get("columns").and_then(Value::as_sequence) {
        for (i, column) in columns.iter().enumerate() {
            let Some(column) = column.as_mapping() else {
                return Err(invalid(format!("{}: column entry {} is not a mapping", name, i)));
            };
            let kinds = ["column", "column_group"]
                .iter()
                .filter(|k| column.contains_key(**k))
                .count();
            if kinds != 1 || column.len() != 1 {
                return Err(invalid(format!(
                    "{}: column entry {} must have exactly one of 'column' or 'column_group'",
                    name, i
                )));
            }
        }
    }
    Ok(())
}

impl AssumptionsDocument {
    /// Parse and structurally verify YAML text.
    pub fn from_yaml_str(text: &str) -> AssumptionsResult<Self> {
        let value: Value = serde_yaml::from_str(text)?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> AssumptionsResult<Self> {
        verify(&value)?;
        let mut value = value;
        if let Some(mapping) = value.as_mapping_mut() {
            mapping.retain(|k, _| k.as_str().is_some_and(|k| KNOWN_SECTIONS.contains(&k)));
            // `key:` with no value means an empty list
            for (_, section) in mapping.iter_mut() {
                if section.is_null() {
                    *section = Value::Sequence(Vec::new());
                }
            }
        }
        Ok(serde_yaml::from_value(value)?)
    }
}
