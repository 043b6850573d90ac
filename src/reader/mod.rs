//! Raw table readers
//!
//! A reader turns one input file into a [`RawTable`]: named, typed
//! columns in file order. The ingestion driver only sees this trait; the
//! Parquet implementation lives behind the `parquet-reader` feature.

#[cfg(feature = "parquet-reader")]
pub mod parquet;

#[cfg(feature = "parquet-reader")]
pub use self::parquet::ParquetReader;

use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::models::{FieldError, RawTable};

/// Errors from reading an input file
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("Failed to open {}: {message}", path.display())]
    Io { path: PathBuf, message: String },

    #[error("Failed to decode {}: {message}", path.display())]
    Format { path: PathBuf, message: String },

    #[error("Field {field} has unsupported type {data_type}")]
    UnsupportedType { field: String, data_type: String },

    #[error("Field {field} has null values")]
    Nulls { field: String },

    #[error("Field {field} has values out of range for a signed 64-bit column")]
    Overflow { field: String },

    #[error("Field {field} changes type between record batches")]
    Inconsistent { field: String },

    #[error(transparent)]
    Field(#[from] FieldError),
}

/// Result type for read operations
pub type ReadResult<T> = Result<T, ReadError>;

/// Reads one input file into memory.
pub trait RawTableReader: Send + Sync {
    fn read(&self, path: &Path) -> ReadResult<RawTable>;
}

impl<F> RawTableReader for F
where
    F: Fn(&Path) -> ReadResult<RawTable> + Send + Sync,
{
    fn read(&self, path: &Path) -> ReadResult<RawTable> {
        self(path)
    }
}
