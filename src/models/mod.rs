//! Models module
//!
//! Core data structures shared by the resolver, the finder and the table
//! materializer: fields and their column data, raw tables read from input
//! files, and the determiner tuples that identify a unit of input.

pub mod determiners;
pub mod field;
pub mod raw_table;

pub use determiners::{DeterminerKind, DeterminerValue, Determiners};
pub use field::{ColumnData, Field, FieldError, FieldKind, ScalarType};
pub use raw_table::RawTable;
