//! CLI-specific error types

use std::path::PathBuf;
use thiserror::Error;

use crate::assumptions::AssumptionsError;
use crate::database::StoreError;
use crate::database::config::ConfigError;
use crate::ingest::IngestError;

/// CLI-specific error type
#[derive(Error, Debug)]
pub enum CliError {
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Assumptions error: {0}")]
    Assumptions(#[from] AssumptionsError),

    #[error("Database error: {0}")]
    Database(#[from] StoreError),

    #[error("Ingestion error: {0}")]
    Ingest(#[from] IngestError),

    #[error("IO error: {0}")]
    IoError(String),
}
