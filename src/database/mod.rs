//! Relational store abstraction for loading table images
//!
//! This module provides:
//! - [`StoreSession`]: the session/transaction primitive the ingestion
//!   driver talks to (execute, transactions, streaming bulk copy)
//! - PostgreSQL: the production backend (feature `postgres-backend`)
//! - [`DryRunStore`]: prints every statement and a preview of each copy
//!   payload instead of touching a database
//! - [`Bookkeeping`]: the table recording which units are loaded

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

#[cfg(feature = "postgres-backend")]
pub mod postgres;

pub mod bookkeeping;
#[cfg(feature = "config")]
pub mod config;
pub mod dry_run;

#[cfg(feature = "postgres-backend")]
pub use self::postgres::PostgresStore;

pub use bookkeeping::Bookkeeping;
#[cfg(feature = "config")]
pub use config::IngestConfig;
pub use dry_run::DryRunStore;

use crate::models::DeterminerValue;
use crate::validation::quote_identifier;

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Failed to connect to database
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Statement execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// BEGIN, COMMIT or ROLLBACK failed
    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    /// Bulk copy was rejected or aborted by the server
    #[error("Copy failed: {0}")]
    CopyFailed(String),

    /// The row producer feeding a pipelined copy failed
    #[error("Row producer failed: {0}")]
    ProducerFailed(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(String),
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Target of a bulk copy: table, column list and the row template used to
/// format the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyStatement {
    /// Already-quoted `"schema"."table"`
    pub table: String,
    pub columns: Vec<String>,
    pub template: String,
}

impl CopyStatement {
    /// `COPY "schema"."table" ("a","b") FROM STDIN` in text format (tab
    /// separated, newline terminated).
    pub fn sql(&self) -> String {
        let columns: Vec<String> = self.columns.iter().map(|c| quote_identifier(c)).collect();
        format!("COPY {} ({}) FROM STDIN", self.table, columns.join(","))
    }
}

/// Bytes for a bulk copy.
#[derive(Debug)]
pub enum CopyPayload {
    /// The whole payload, formatted up front
    Buffered(Bytes),
    /// Chunks arriving from a concurrent producer. The copy ends when the
    /// sender is dropped; an `Err` chunk aborts it.
    Pipelined(mpsc::Receiver<std::io::Result<Bytes>>),
}

/// Store session used by the ingestion driver
///
/// One session is never shared between concurrent loaders. Transactions
/// are explicit: the driver claims a unit's bookkeeping row and copies its
/// data between [`begin`](StoreSession::begin) and
/// [`commit`](StoreSession::commit).
#[async_trait(?Send)]
pub trait StoreSession: Send + Sync {
    /// Execute a statement without parameters
    ///
    /// # Returns
    /// Number of rows affected
    async fn execute(&self, sql: &str) -> StoreResult<u64>;

    /// Execute a statement with `$1, $2, ...` placeholders bound to values
    ///
    /// # Returns
    /// Number of rows affected
    async fn execute_params(&self, sql: &str, params: &[DeterminerValue]) -> StoreResult<u64>;

    /// Check whether `schema.table` exists
    async fn table_exists(&self, schema: &str, table: &str) -> StoreResult<bool>;

    async fn begin(&self) -> StoreResult<()>;

    async fn commit(&self) -> StoreResult<()>;

    async fn rollback(&self) -> StoreResult<()>;

    /// Stream a payload into a table
    ///
    /// # Returns
    /// Number of rows copied
    async fn copy_in(&self, statement: &CopyStatement, payload: CopyPayload) -> StoreResult<u64>;

    /// True for sessions that only print what they would do
    fn is_dry_run(&self) -> bool {
        false
    }

    /// Backend type name
    fn backend_type(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_statement_sql() {
        let statement = CopyStatement {
            table: "\"dc2\".\"forcedsource\"".to_string(),
            columns: vec!["objectId".to_string(), "psFlux".to_string()],
            template: "%d\t%.8e\n".to_string(),
        };
        assert_eq!(
            statement.sql(),
            "COPY \"dc2\".\"forcedsource\" (\"objectId\",\"psFlux\") FROM STDIN"
        );
    }
}
