//! Assumptions: the declared schema of the target tables
//!
//! An assumptions document says which raw input fields to keep, which to
//! ignore, how families of repeated fields are grouped, and how columns
//! absent from the input are computed from the unit's determiners.
//!
//! [`Assumptions`] is built once from the document and never changes;
//! [`Assumptions::resolve`] maps one raw table onto the declared schema and
//! returns a fresh [`Resolution`] each time.

pub mod document;
pub mod resolver;

pub use document::{AssumptionsDocument, ColumnEntry, ComputeSpec, Precision};
pub use resolver::{Assumptions, ColumnDeclaration, Diagnostic, Resolution, TableDeclaration};

use std::path::PathBuf;
use thiserror::Error;

use crate::expression::ExpressionError;
use crate::models::FieldError;
use crate::table::TableError;
use crate::validation::ValidationError;

/// Errors from loading assumptions or resolving a raw table against them
#[derive(Debug, Error)]
pub enum AssumptionsError {
    #[error("Failed to read assumptions file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse assumptions YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// The document is structurally malformed
    #[error("Invalid assumptions: {0}")]
    Validation(String),

    #[error("Invalid identifier in assumptions: {0}")]
    Identifier(#[from] ValidationError),

    #[error("Cannot compute column {column}: {source}")]
    Compute {
        column: String,
        #[source]
        source: ExpressionError,
    },

    #[error("Column {column} of table {table} is computed but no other column gives a row count")]
    NoRowCount { table: String, column: String },

    #[error("Cannot convert raw field: {0}")]
    Field(#[from] FieldError),

    #[error(transparent)]
    Table(#[from] TableError),

    #[error("{} column(s) could not be resolved: {}", .0.len(), join_diagnostics(.0))]
    Unresolved(Vec<Diagnostic>),
}

fn join_diagnostics(diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type for assumptions operations
pub type AssumptionsResult<T> = Result<T, AssumptionsError>;
