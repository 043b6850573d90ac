//! Print-only store
//!
//! Every statement is written to the output instead of being executed.
//! Bulk copies are drained and summarized: column list, row template and
//! the first [`PREVIEW_BYTES`] bytes of the payload.

use async_trait::async_trait;
use bytes::BytesMut;
use std::io::Write;
use std::sync::Mutex;

use super::{CopyPayload, CopyStatement, StoreError, StoreResult, StoreSession};
use crate::models::DeterminerValue;

/// Bytes of each copy payload shown in the preview
pub const PREVIEW_BYTES: usize = 600;

/// Store session that only prints what it would do
pub struct DryRunStore<W: Write + Send> {
    out: Mutex<W>,
}

impl DryRunStore<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> DryRunStore<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(|e| e.into_inner())
    }

    fn print(&self, text: &str) -> StoreResult<()> {
        let mut out = self.out.lock().unwrap_or_else(|e| e.into_inner());
        writeln!(out, "{}", text).map_err(|e| StoreError::IoError(e.to_string()))
    }
}

#[async_trait(?Send)]
impl<W: Write + Send> StoreSession for DryRunStore<W> {
    async fn execute(&self, sql: &str) -> StoreResult<u64> {
        self.print(&format!("{};", sql))?;
        Ok(0)
    }

    async fn execute_params(&self, sql: &str, params: &[DeterminerValue]) -> StoreResult<u64> {
        let values: Vec<String> = params.iter().map(|p| p.to_string()).collect();
        self.print(&format!("{}; -- ({})", sql, values.join(", ")))?;
        // Claims always succeed so every file is previewed
        Ok(1)
    }

    async fn table_exists(&self, _schema: &str, _table: &str) -> StoreResult<bool> {
        Ok(false)
    }

    async fn begin(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn commit(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn rollback(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn copy_in(&self, statement: &CopyStatement, payload: CopyPayload) -> StoreResult<u64> {
        let buffer = match payload {
            CopyPayload::Buffered(buffer) => buffer,
            CopyPayload::Pipelined(mut chunks) => {
                let mut buffer = BytesMut::new();
                while let Some(chunk) = chunks.recv().await {
                    let chunk = chunk.map_err(|e| StoreError::ProducerFailed(e.to_string()))?;
                    buffer.extend_from_slice(&chunk);
                }
                buffer.freeze()
            }
        };
        let rows = buffer.iter().filter(|&&b| b == b'\n').count() as u64;

        let preview = &buffer[..buffer.len().min(PREVIEW_BYTES)];
        self.print(&format!("{};", statement.sql()))?;
        self.print(&format!("All fields: {}", statement.columns.join(" ")))?;
        self.print(&format!("Format is:\n{}", statement.template.trim_end()))?;
        self.print(&format!("First {} of {} bytes:", preview.len(), buffer.len()))?;
        self.print(&String::from_utf8_lossy(preview))?;
        Ok(rows)
    }

    fn is_dry_run(&self) -> bool {
        true
    }

    fn backend_type(&self) -> &'static str {
        "dry-run"
    }
}
