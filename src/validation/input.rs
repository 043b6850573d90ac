//! Input validation and sanitization utilities.
//!
//! Every schema, table and column name that ends up in generated SQL passes
//! through this module first. Names come from the assumptions document and
//! from the column names of input files, so they are treated as untrusted.
//!
//! # Security
//!
//! Input validation prevents:
//! - SQL injection via malicious table/column names
//! - Identifiers silently truncated by the server (PostgreSQL keeps 63 bytes)
//!
//! Values (determiners, row data) never go through here: they are bound as
//! query parameters or streamed through COPY.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum identifier length PostgreSQL keeps without truncation
pub const MAX_IDENTIFIER_LENGTH: usize = 63;

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("Invalid regex"));

/// Errors that can occur during input validation.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum ValidationError {
    /// Input is empty when a value is required
    #[error("{0} cannot be empty")]
    Empty(&'static str),

    /// Input exceeds maximum allowed length
    #[error("{field} exceeds maximum length (max: {max}, got: {actual})")]
    TooLong {
        field: &'static str,
        max: usize,
        actual: usize,
    },

    /// Input contains invalid characters
    #[error("{field} contains invalid characters: {reason}")]
    InvalidCharacters { field: &'static str, reason: String },

    /// Input has invalid format
    #[error("{0}: {1}")]
    InvalidFormat(&'static str, String),

    /// Input is a reserved word
    #[error("{field} cannot be a reserved word: {word}")]
    ReservedWord { field: &'static str, word: String },
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

fn validate_identifier(field: &'static str, name: &str) -> ValidationResult<()> {
    if name.is_empty() {
        return Err(ValidationError::Empty(field));
    }

    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(ValidationError::TooLong {
            field,
            max: MAX_IDENTIFIER_LENGTH,
            actual: name.len(),
        });
    }

    if IDENTIFIER.is_match(name) {
        return Ok(());
    }

    // Say which rule failed
    let starts_ok = name
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if !starts_ok {
        return Err(ValidationError::InvalidFormat(
            field,
            "must start with a letter or underscore".to_string(),
        ));
    }
    let bad = name
        .chars()
        .find(|c| !c.is_ascii_alphanumeric() && *c != '_')
        .unwrap_or('?');
    Err(ValidationError::InvalidCharacters {
        field,
        reason: format!("invalid character: '{}'", bad),
    })
}

/// Validate a table name.
///
/// # Rules
///
/// - Must not be empty
/// - Must not exceed 63 bytes
/// - Must start with an ASCII letter or underscore
/// - May contain ASCII letters, digits and underscores
/// - Cannot be a SQL reserved word
///
/// # Examples
///
/// ```
/// use catalog_ingest::validation::input::validate_table_name;
///
/// assert!(validate_table_name("forcedsource").is_ok());
/// assert!(validate_table_name("").is_err());
/// assert!(validate_table_name("123_invalid").is_err());
/// assert!(validate_table_name("source; drop").is_err());
/// ```
pub fn validate_table_name(name: &str) -> ValidationResult<()> {
    validate_identifier("table name", name)?;
    if is_sql_reserved_word(name) {
        return Err(ValidationError::ReservedWord {
            field: "table name",
            word: name.to_string(),
        });
    }
    Ok(())
}

/// Validate a schema (namespace) name. Same rules as table names.
pub fn validate_schema_name(name: &str) -> ValidationResult<()> {
    validate_identifier("schema name", name)?;
    if is_sql_reserved_word(name) {
        return Err(ValidationError::ReservedWord {
            field: "schema name",
            word: name.to_string(),
        });
    }
    Ok(())
}

/// Validate a column name.
///
/// Column names are always quoted in generated SQL, so reserved words such
/// as `time` are accepted.
///
/// ```
/// use catalog_ingest::validation::input::validate_column_name;
///
/// assert!(validate_column_name("base_PsfFlux_instFlux").is_ok());
/// assert!(validate_column_name("time").is_ok());
/// assert!(validate_column_name("flux\"x").is_err());
/// ```
pub fn validate_column_name(name: &str) -> ValidationResult<()> {
    validate_identifier("column name", name)
}

/// Validate a regular expression used as a column-group or ignore pattern.
pub fn validate_pattern(pattern: &str) -> ValidationResult<()> {
    if pattern.is_empty() {
        return Err(ValidationError::Empty("pattern"));
    }
    Regex::new(pattern)
        .map(|_| ())
        .map_err(|e| ValidationError::InvalidFormat("pattern", e.to_string()))
}

/// Quote a PostgreSQL identifier, doubling any embedded quotes.
///
/// ```
/// use catalog_ingest::validation::input::quote_identifier;
///
/// assert_eq!(quote_identifier("objectId"), "\"objectId\"");
/// assert_eq!(quote_identifier("a\"b"), "\"a\"\"b\"");
/// ```
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// `"schema"."table"`
pub fn qualified_name(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_identifier(schema), quote_identifier(table))
}

fn is_sql_reserved_word(word: &str) -> bool {
    const RESERVED_WORDS: &[&str] = &[
        "all",
        "alter",
        "and",
        "as",
        "asc",
        "begin",
        "between",
        "by",
        "case",
        "check",
        "column",
        "commit",
        "constraint",
        "create",
        "cross",
        "default",
        "delete",
        "desc",
        "distinct",
        "drop",
        "else",
        "end",
        "except",
        "foreign",
        "from",
        "full",
        "grant",
        "group",
        "having",
        "in",
        "index",
        "inner",
        "insert",
        "intersect",
        "into",
        "is",
        "join",
        "key",
        "left",
        "like",
        "limit",
        "natural",
        "not",
        "null",
        "offset",
        "on",
        "or",
        "order",
        "outer",
        "primary",
        "references",
        "revoke",
        "right",
        "rollback",
        "schema",
        "select",
        "set",
        "table",
        "then",
        "union",
        "unique",
        "update",
        "user",
        "using",
        "values",
        "view",
        "when",
        "where",
    ];

    let lower = word.to_lowercase();
    RESERVED_WORDS.contains(&lower.as_str())
}
