//! Validation functionality
//!
//! Identifier validation and quoting for injection-safe SQL generation.

pub mod input;

pub use input::{
    ValidationError, ValidationResult, qualified_name, quote_identifier, validate_column_name,
    validate_pattern, validate_schema_name, validate_table_name,
};
