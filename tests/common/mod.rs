//! Shared fixtures: a forced-source directory tree, an in-memory reader and
//! a store that records what it is asked to do.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};

use catalog_ingest::database::{CopyPayload, CopyStatement, StoreError, StoreResult, StoreSession};
use catalog_ingest::models::{ColumnData, DeterminerValue, Field, FieldKind, RawTable};
use catalog_ingest::reader::{ReadError, ReadResult};

pub const ASSUMPTIONS: &str = r#"
symbols: []
ignores: ["junk_.*"]
tables:
  - table:
      name: forcedsource
      columns:
        - column: { name: objectId, dtype: int64, doc: "Object <id>" }
        - column:
            name: ccdVisitId
            dtype: int64
            compute: ["{visit}", "8", "zerofill(,)", "{sensor}", "2", "zerofill(,)", "prepend(,)", "{raft}", "2", "zerofill(,)", "prepend(,)"]
        - column_group: { name_re: "psFlux.*" }
        - column: { name: centroid, precision: double }
      index:
        - { columns: [objectId, ccdVisitId], property: primary }
        - { columns: [ccdVisitId] }
constraints:
  - table: forcedsource
    foreign:
      - { column: objectId, ref_table: object, ref_column: objectId }
"#;

/// Rows every fixture file holds
pub const ROWS: usize = 4;

/// Bytes of a file that carries rows; smaller files are header-only
pub const FULL_SIZE: usize = 46081;

pub fn file_name(visit: u32, filter: char, raft: &str, sensor: &str) -> String {
    format!("forced_{:08}-{}-R{}-S{}-det000.fits", visit, filter, raft, sensor)
}

/// Write one file into `root/<visit>-<filter>/R<raft>/`.
pub fn write_file(root: &Path, visit: u32, filter: char, raft: &str, sensor: &str, size: usize) -> PathBuf {
    let dir = root.join(format!("{:08}-{}", visit, filter)).join(format!("R{}", raft));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(file_name(visit, filter, raft, sensor));
    std::fs::write(&path, vec![0u8; size]).unwrap();
    path
}

/// Two units: visit 210472 with three loadable files and one header-only
/// file, visit 210480 with one loadable file. Also some noise.
pub fn forced_tree(root: &Path) {
    write_file(root, 210472, 'g', "01", "00", FULL_SIZE);
    write_file(root, 210472, 'g', "01", "01", FULL_SIZE);
    write_file(root, 210472, 'g', "22", "20", FULL_SIZE);
    write_file(root, 210472, 'g', "22", "21", 100);
    write_file(root, 210480, 'r', "10", "11", FULL_SIZE);

    std::fs::write(root.join("README"), "not data").unwrap();
    std::fs::create_dir_all(root.join("calexp")).unwrap();
    std::fs::write(root.join("00210472-g").join("R01").join("notes.txt"), "x").unwrap();
}

/// Raw table as a measurement pipeline would write it.
pub fn raw_table(extra: Option<&str>) -> RawTable {
    let mut fields = vec![
        Field::scalar("objectId", ColumnData::Int64((0..ROWS as i64).map(|i| 1000 + i).collect())),
        Field::scalar(
            "psFlux",
            ColumnData::Float64((0..ROWS).map(|i| i as f64 * 1.25).collect()),
        ),
        Field::scalar("junk_flag", ColumnData::Bool(vec![false; ROWS])),
        Field::scalar("psFluxErr", ColumnData::Float64(vec![0.5; ROWS])),
        Field::compound(
            "centroid",
            FieldKind::Point,
            vec![
                ColumnData::Float64(vec![0.123456789012345; ROWS]),
                ColumnData::Float64(vec![9.0; ROWS]),
            ],
        )
        .unwrap(),
    ];
    if let Some(name) = extra {
        fields.push(Field::scalar(name, ColumnData::Int32(vec![7; ROWS])));
    }
    RawTable::new(fields)
}

/// Reader that ignores file contents and returns [`raw_table`].
pub fn fixture_reader(extra: Option<&'static str>) -> impl Fn(&Path) -> ReadResult<RawTable> + Send + Sync {
    move |path: &Path| {
        if !path.exists() {
            return Err(ReadError::Io {
                path: path.to_path_buf(),
                message: "missing".to_string(),
            });
        }
        Ok(raw_table(extra))
    }
}

/// Tables, committed bookkeeping and copies, seen by every session.
#[derive(Default)]
struct Shared {
    statements: Vec<String>,
    tables: HashSet<(String, String)>,
    claims: HashSet<Vec<String>>,
    /// Uncommitted claims by session
    pending_claims: HashMap<usize, Vec<Vec<String>>>,
    copies: Vec<(CopyStatement, Bytes)>,
    sessions: usize,
}

#[derive(Default)]
struct Session {
    pending_copies: Vec<(CopyStatement, Bytes)>,
    in_transaction: bool,
}

/// In-memory store with transactional claims and copies. Sessions made
/// with [`RecordingStore::session`] share tables and bookkeeping; a claim
/// held by an open transaction of one session blocks the same claim in
/// every other session.
pub struct RecordingStore {
    id: usize,
    shared: Arc<Mutex<Shared>>,
    session: Mutex<Session>,
    fail_copies: AtomicBool,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::attach(Arc::new(Mutex::new(Shared::default())))
    }

    fn attach(shared: Arc<Mutex<Shared>>) -> Self {
        let id = {
            let mut state = shared.lock().unwrap();
            state.sessions += 1;
            state.sessions
        };
        Self {
            id,
            shared,
            session: Mutex::new(Session::default()),
            fail_copies: AtomicBool::new(false),
        }
    }

    /// Another session against the same database.
    pub fn session(&self) -> Self {
        Self::attach(Arc::clone(&self.shared))
    }

    pub fn set_fail_copies(&self, fail: bool) {
        self.fail_copies.store(fail, Ordering::SeqCst);
    }

    pub fn statements(&self) -> Vec<String> {
        self.shared.lock().unwrap().statements.clone()
    }

    pub fn copies(&self) -> Vec<(CopyStatement, Bytes)> {
        self.shared.lock().unwrap().copies.clone()
    }

    pub fn claim_count(&self) -> usize {
        self.shared.lock().unwrap().claims.len()
    }

    pub fn in_transaction(&self) -> bool {
        self.session.lock().unwrap().in_transaction
    }

    fn created_table(sql: &str) -> Option<(String, String)> {
        let rest = sql.strip_prefix("CREATE TABLE IF NOT EXISTS ")?;
        let name = rest.split_whitespace().next()?;
        let (schema, table) = name.split_once('.')?;
        Some((schema.trim_matches('"').to_string(), table.trim_matches('"').to_string()))
    }
}

#[async_trait(?Send)]
impl StoreSession for RecordingStore {
    async fn execute(&self, sql: &str) -> StoreResult<u64> {
        let mut state = self.shared.lock().unwrap();
        if let Some(table) = Self::created_table(sql) {
            state.tables.insert(table);
        }
        state.statements.push(sql.to_string());
        Ok(0)
    }

    async fn execute_params(&self, sql: &str, params: &[DeterminerValue]) -> StoreResult<u64> {
        let mut state = self.shared.lock().unwrap();
        state.statements.push(sql.to_string());
        let key: Vec<String> = params.iter().map(ToString::to_string).collect();
        let held = state.claims.contains(&key)
            || state.pending_claims.values().any(|keys| keys.contains(&key));
        if held {
            return Ok(0);
        }
        state.pending_claims.entry(self.id).or_default().push(key);
        Ok(1)
    }

    async fn table_exists(&self, schema: &str, table: &str) -> StoreResult<bool> {
        let state = self.shared.lock().unwrap();
        Ok(state
            .tables
            .contains(&(schema.to_string(), table.to_string())))
    }

    async fn begin(&self) -> StoreResult<()> {
        let mut session = self.session.lock().unwrap();
        if session.in_transaction {
            return Err(StoreError::TransactionFailed("already in a transaction".into()));
        }
        session.in_transaction = true;
        Ok(())
    }

    async fn commit(&self) -> StoreResult<()> {
        let mut session = self.session.lock().unwrap();
        let mut state = self.shared.lock().unwrap();
        let claims = state.pending_claims.remove(&self.id).unwrap_or_default();
        state.claims.extend(claims);
        state.copies.append(&mut session.pending_copies);
        session.in_transaction = false;
        Ok(())
    }

    async fn rollback(&self) -> StoreResult<()> {
        let mut session = self.session.lock().unwrap();
        self.shared.lock().unwrap().pending_claims.remove(&self.id);
        session.pending_copies.clear();
        session.in_transaction = false;
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
        if self.fail_copies.load(Ordering::SeqCst) {
            return Err(StoreError::CopyFailed("disk full".to_string()));
        }
        let rows = buffer.iter().filter(|&&b| b == b'\n').count() as u64;
        self.session
            .lock()
            .unwrap()
            .pending_copies
            .push((statement.clone(), buffer));
        Ok(rows)
    }

    fn backend_type(&self) -> &'static str {
        "recording"
    }
}
