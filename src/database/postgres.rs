//! PostgreSQL store implementation
//!
//! One client per session. Bulk loads go through `COPY ... FROM STDIN` in
//! text format, either from a buffer or from a channel fed by a concurrent
//! row producer.

use async_trait::async_trait;
use bytes::Bytes;
use futures::SinkExt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_postgres::CopyInSink;
use tokio_postgres::types::ToSql;
use tracing::{debug, error};

use super::{CopyPayload, CopyStatement, StoreError, StoreResult, StoreSession};
use crate::models::DeterminerValue;

/// PostgreSQL store session
pub struct PostgresStore {
    /// Connection string
    connection_string: String,
    /// PostgreSQL client (wrapped for async access)
    client: Arc<Mutex<tokio_postgres::Client>>,
}

impl PostgresStore {
    /// Connect to PostgreSQL
    ///
    /// # Arguments
    /// * `connection_string` - libpq-style connection string or URL
    pub async fn connect(connection_string: &str) -> StoreResult<Self> {
        let (client, connection) =
            tokio_postgres::connect(connection_string, tokio_postgres::NoTls)
                .await
                .map_err(|e| {
                    StoreError::ConnectionFailed(format!("Failed to connect to PostgreSQL: {}", e))
                })?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!("PostgreSQL connection error: {}", e);
            }
        });

        Ok(Self {
            connection_string: connection_string.to_string(),
            client: Arc::new(Mutex::new(client)),
        })
    }

    /// Get the connection string (masked for security)
    pub fn connection_string_masked(&self) -> String {
        mask_password(&self.connection_string)
    }
}

/// Replace the password of a URL-style or key=value connection string.
pub fn mask_password(connection_string: &str) -> String {
    if let Some(at_pos) = connection_string.find('@')
        && let Some(colon_pos) = connection_string[..at_pos].rfind(':')
        && connection_string[..colon_pos].contains("://")
    {
        let prefix = &connection_string[..colon_pos + 1];
        let suffix = &connection_string[at_pos..];
        return format!("{}****{}", prefix, suffix);
    }
    connection_string
        .split_whitespace()
        .map(|part| {
            if part.starts_with("password=") {
                "password=****".to_string()
            } else {
                part.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn boxed_params(params: &[DeterminerValue]) -> Vec<Box<dyn ToSql + Sync + Send>> {
    params
        .iter()
        .map(|p| -> Box<dyn ToSql + Sync + Send> {
            match p {
                DeterminerValue::Int(v) => Box::new(*v),
                DeterminerValue::Text(v) => Box::new(v.clone()),
            }
        })
        .collect()
}

#[async_trait(?Send)]
impl StoreSession for PostgresStore {
    async fn execute(&self, sql: &str) -> StoreResult<u64> {
        let client = self.client.lock().await;
        debug!("{}", sql);
        client
            .execute(sql, &[])
            .await
            .map_err(|e| StoreError::QueryFailed(format!("{}: {}", sql, e)))
    }

    async fn execute_params(&self, sql: &str, params: &[DeterminerValue]) -> StoreResult<u64> {
        let client = self.client.lock().await;
        let boxed = boxed_params(params);
        let param_refs: Vec<&(dyn ToSql + Sync)> = boxed
            .iter()
            .map(|b| b.as_ref() as &(dyn ToSql + Sync))
            .collect();
        client
            .execute(sql, &param_refs)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("{}: {}", sql, e)))
    }

    async fn table_exists(&self, schema: &str, table: &str) -> StoreResult<bool> {
        let client = self.client.lock().await;
        let rows = client
            .query(
                "SELECT 1 FROM information_schema.tables WHERE table_schema = $1 AND table_name = $2",
                &[&schema, &table],
            )
            .await
            .map_err(|e| StoreError::QueryFailed(format!("Failed to look up table: {}", e)))?;
        Ok(!rows.is_empty())
    }

    async fn begin(&self) -> StoreResult<()> {
        let client = self.client.lock().await;
        client
            .batch_execute("BEGIN")
            .await
            .map_err(|e| StoreError::TransactionFailed(format!("BEGIN: {}", e)))
    }

    async fn commit(&self) -> StoreResult<()> {
        let client = self.client.lock().await;
        client
            .batch_execute("COMMIT")
            .await
            .map_err(|e| StoreError::TransactionFailed(format!("COMMIT: {}", e)))
    }

    async fn rollback(&self) -> StoreResult<()> {
        let client = self.client.lock().await;
        client
            .batch_execute("ROLLBACK")
            .await
            .map_err(|e| StoreError::TransactionFailed(format!("ROLLBACK: {}", e)))
    }

    async fn copy_in(&self, statement: &CopyStatement, payload: CopyPayload) -> StoreResult<u64> {
        let client = self.client.lock().await;
        let sql = statement.sql();
        debug!("{}", sql);

        let sink: CopyInSink<Bytes> = client
            .copy_in(sql.as_str())
            .await
            .map_err(|e| StoreError::CopyFailed(format!("{}: {}", sql, e)))?;
        futures::pin_mut!(sink);

        match payload {
            CopyPayload::Buffered(buffer) => {
                sink.send(buffer)
                    .await
                    .map_err(|e| StoreError::CopyFailed(e.to_string()))?;
            }
            CopyPayload::Pipelined(mut chunks) => {
                while let Some(chunk) = chunks.recv().await {
                    // Returning drops the sink unfinished, which aborts the COPY
                    let chunk = chunk.map_err(|e| StoreError::ProducerFailed(e.to_string()))?;
                    sink.send(chunk)
                        .await
                        .map_err(|e| StoreError::CopyFailed(e.to_string()))?;
                }
            }
        }

        sink.finish()
            .await
            .map_err(|e| StoreError::CopyFailed(format!("{}: {}", sql, e)))
    }

    fn backend_type(&self) -> &'static str {
        "postgres"
    }
}
