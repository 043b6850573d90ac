//! Command line support for the `catalog-ingest` binary

pub mod commands;
pub mod error;

pub use error::CliError;
