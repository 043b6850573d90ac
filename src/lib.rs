//! Catalog Ingest - assumption-driven loading of measurement files
//!
//! Provides:
//! - Declared table schemas ("assumptions") and their resolution against
//!   raw input tables, including computed columns
//! - A finder that maps a file hierarchy's naming convention to
//!   determiner tuples without opening files
//! - Table images: DDL and tab-separated row streams for bulk copy
//! - An ingestion driver that loads each unit at most once, buffered or
//!   pipelined
//! - Store sessions for PostgreSQL and dry runs

pub mod assumptions;
#[cfg(feature = "cli")]
pub mod cli;
pub mod database;
pub mod expression;
pub mod finder;
pub mod ingest;
pub mod models;
pub mod reader;
pub mod table;
pub mod validation;

// Re-export commonly used types
pub use assumptions::{Assumptions, AssumptionsError, Diagnostic, Resolution};
#[cfg(feature = "postgres-backend")]
pub use database::PostgresStore;
pub use database::{DryRunStore, StoreError, StoreSession};
pub use expression::{ExpressionError, Value, rpn_eval, rpn_to_expression};
pub use finder::{Finder, FinderError, NamingGrammar};
pub use ingest::{IngestError, IngestOptions, IngestStats, Ingestor, LoadStrategy};
pub use models::{ColumnData, DeterminerValue, Determiners, Field, FieldKind, RawTable, ScalarType};
#[cfg(feature = "parquet-reader")]
pub use reader::ParquetReader;
pub use reader::{RawTableReader, ReadError};
pub use table::{RowStream, TableError, TableImage};
