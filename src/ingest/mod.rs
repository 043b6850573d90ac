//! Ingestion driver
//!
//! One run goes through:
//!
//! 1. discover the table shape from some file of the hierarchy;
//! 2. create the schema and tables that do not exist yet;
//! 3. for each requested unit, find its non-empty files and load each one
//!    that is not recorded in the bookkeeping table.
//!
//! A file is loaded in one transaction: its bookkeeping row is claimed
//! first (`INSERT ... ON CONFLICT DO NOTHING`), then its rows are copied.
//! A claim that inserts nothing means another run already loaded the
//! file. Any failure rolls the transaction back, so the file has no
//! bookkeeping row and is retried on the next run.

pub mod pipe;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::assumptions::{Assumptions, AssumptionsError, Resolution};
use crate::database::{
    Bookkeeping, CopyPayload, CopyStatement, StoreError, StoreResult, StoreSession,
};
use crate::finder::{Finder, FinderError};
use crate::models::{DeterminerValue, Determiners};
use crate::reader::{RawTableReader, ReadError};
use crate::table::{TableError, TableImage};

/// Files of a unit shown by a dry run
pub const DRY_RUN_FILES_PER_UNIT: usize = 3;

/// Errors from an ingestion run
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Finder(#[from] FinderError),

    #[error(transparent)]
    Assumptions(#[from] AssumptionsError),

    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: ReadError,
    },

    #[error(transparent)]
    Table(#[from] TableError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("No input file under {} follows the naming grammar", .0.display())]
    NoInput(PathBuf),

    #[error("Unit {value} does not fit determiner {name}")]
    BadUnit { name: String, value: String },
}

/// Result type for ingestion
pub type IngestResult<T> = Result<T, IngestError>;

/// How rows reach the store's bulk copy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadStrategy {
    /// Format the whole file into one buffer, then copy it
    #[default]
    Buffered,
    /// Format rows on a producer task while the copy consumes them
    Pipelined,
}

impl std::str::FromStr for LoadStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "buffered" => Ok(LoadStrategy::Buffered),
            "pipelined" | "pipe" => Ok(LoadStrategy::Pipelined),
            _ => Err(format!(
                "Unknown load strategy: {}. Use 'buffered' or 'pipelined'.",
                s
            )),
        }
    }
}

impl fmt::Display for LoadStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadStrategy::Buffered => write!(f, "buffered"),
            LoadStrategy::Pipelined => write!(f, "pipelined"),
        }
    }
}

/// Key maintenance instead of data loading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    Create,
    Drop,
}

/// Settings of one run
#[derive(Debug, Clone, PartialEq)]
pub struct IngestOptions {
    pub schema: String,
    pub strategy: LoadStrategy,
    pub pipe_capacity: usize,
    pub chunk_rows: usize,
    pub table_space: Option<String>,
    pub index_space: Option<String>,
    /// Fail a file on any resolution diagnostic
    pub strict: bool,
    /// Create tables but load no data
    pub no_insert: bool,
    /// Only create or drop keys and indexes
    pub keys: Option<KeyAction>,
}

impl IngestOptions {
    pub fn new(schema: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            strategy: LoadStrategy::default(),
            pipe_capacity: 8,
            chunk_rows: 4096,
            table_space: None,
            index_space: None,
            strict: false,
            no_insert: false,
            keys: None,
        }
    }
}

/// What happened to one file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOutcome {
    Loaded { rows: u64 },
    AlreadyLoaded,
}

/// Counters for one run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestStats {
    pub started_at: DateTime<Utc>,
    pub units: usize,
    pub units_failed: usize,
    pub files_loaded: usize,
    pub files_already_loaded: usize,
    pub files_failed: usize,
    pub rows_loaded: u64,
    pub unrecognized_paths: usize,
    pub diagnostics: usize,
    pub duration_ms: u64,
}

impl IngestStats {
    /// Empty counters, started now.
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            units: 0,
            units_failed: 0,
            files_loaded: 0,
            files_already_loaded: 0,
            files_failed: 0,
            rows_loaded: 0,
            unrecognized_paths: 0,
            diagnostics: 0,
            duration_ms: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.files_failed == 0 && self.units_failed == 0
    }
}

impl Default for IngestStats {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for IngestStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} unit(s) ({} failed): {} file(s) loaded ({} rows), {} already loaded, {} failed, {} unrecognized, {} diagnostic(s) in {} ms",
            self.units,
            self.units_failed,
            self.files_loaded,
            self.rows_loaded,
            self.files_already_loaded,
            self.files_failed,
            self.unrecognized_paths,
            self.diagnostics,
            self.duration_ms
        )
    }
}

/// Drives one ingestion run against a store session.
pub struct Ingestor<'a> {
    finder: &'a Finder,
    assumptions: &'a Assumptions,
    reader: &'a dyn RawTableReader,
    store: &'a dyn StoreSession,
    bookkeeping: Bookkeeping,
    options: IngestOptions,
}

impl<'a> Ingestor<'a> {
    pub fn new(
        finder: &'a Finder,
        assumptions: &'a Assumptions,
        reader: &'a dyn RawTableReader,
        store: &'a dyn StoreSession,
        options: IngestOptions,
    ) -> IngestResult<Self> {
        let bookkeeping = Bookkeeping::new(
            &options.schema,
            &assumptions.primary_table().name,
            finder.grammar().determiners(),
        )?;
        Ok(Self {
            finder,
            assumptions,
            reader,
            store,
            bookkeeping,
            options,
        })
    }

    pub fn options(&self) -> &IngestOptions {
        &self.options
    }

    pub fn bookkeeping(&self) -> &Bookkeeping {
        &self.bookkeeping
    }

    /// Partial key naming one unit, checked against the first determiner.
    pub fn unit_key(&self, unit: DeterminerValue) -> IngestResult<Determiners> {
        let spec = &self.finder.grammar().determiners()[0];
        if unit.kind() != spec.kind {
            return Err(IngestError::BadUnit {
                name: spec.name.clone(),
                value: unit.to_string(),
            });
        }
        Ok(Determiners::new().with(spec.name.clone(), unit))
    }

    /// Parse a unit given as text, e.g. on the command line.
    pub fn parse_unit(&self, raw: &str) -> IngestResult<DeterminerValue> {
        let spec = &self.finder.grammar().determiners()[0];
        spec.kind.parse(raw).ok_or_else(|| IngestError::BadUnit {
            name: spec.name.clone(),
            value: raw.to_string(),
        })
    }

    fn read(&self, path: &Path) -> IngestResult<crate::models::RawTable> {
        self.reader.read(path).map_err(|source| IngestError::Read {
            path: path.to_path_buf(),
            source,
        })
    }

    fn place(&self, image: TableImage) -> TableImage {
        image
            .with_table_space(self.options.table_space.clone())
            .with_index_space(self.options.index_space.clone())
    }

    /// Resolve some file of the hierarchy to learn the shape of the tables.
    pub async fn discover_schema(&self) -> IngestResult<Vec<TableImage>> {
        let (path, determiners) = self
            .finder
            .some_file()?
            .ok_or_else(|| IngestError::NoInput(self.finder.root().to_path_buf()))?;
        info!("Discovering table shape from {}", path.display());

        let raw = self.read(&path)?;
        let resolution = self
            .assumptions
            .resolve(raw, &self.options.schema, &determiners)?;
        let tables = if self.options.strict {
            resolution.into_strict()?
        } else {
            resolution.tables
        };
        Ok(tables
            .into_iter()
            .map(|mut image| {
                image.normalize_precision();
                self.place(image)
            })
            .collect())
    }

    /// Create the schema and every table that does not exist yet.
    ///
    /// # Returns
    /// Names of the tables created (every table on a dry run)
    pub async fn ensure_tables(&self, tables: &[TableImage]) -> IngestResult<Vec<String>> {
        let mut created = Vec::new();
        for table in tables {
            if !self.store.is_dry_run()
                && self
                    .store
                    .table_exists(&table.schema_name, &table.name)
                    .await?
            {
                info!("Table {} already exists", table.qualified_name());
                continue;
            }
            self.store.execute(&table.create_schema_ddl()).await?;
            self.store.execute(&table.definition_ddl()?).await?;
            info!("Created table {}", table.qualified_name());
            created.push(table.name.clone());
        }
        Ok(created)
    }

    /// Create the bookkeeping table if needed.
    pub async fn ensure_bookkeeping(&self) -> StoreResult<()> {
        self.store.execute(&self.bookkeeping.create_ddl()).await?;
        Ok(())
    }

    /// Add primary keys, foreign keys and indexes to every table.
    pub async fn create_keys(&self, tables: &[TableImage]) -> IngestResult<usize> {
        let mut count = 0;
        for table in tables {
            for statement in table.create_keys_ddl()? {
                self.store.execute(&statement).await?;
                count += 1;
            }
        }
        info!("Applied {} key statement(s)", count);
        Ok(count)
    }

    /// Remove what [`create_keys`](Self::create_keys) added.
    pub async fn drop_keys(&self, tables: &[TableImage]) -> IngestResult<usize> {
        let mut count = 0;
        for table in tables {
            for statement in table.drop_keys_ddl()? {
                self.store.execute(&statement).await?;
                count += 1;
            }
        }
        info!("Applied {} drop statement(s)", count);
        Ok(count)
    }

    /// Load every non-empty file of one unit.
    ///
    /// A failing file is counted and stops the unit; files already loaded
    /// stay loaded. A unit whose files cannot be listed is counted as
    /// failed and skipped.
    pub async fn ingest_unit(&self, unit: &Determiners, stats: &mut IngestStats) -> IngestResult<()> {
        stats.units += 1;
        let files = match self.finder.files_for_unit(unit, true) {
            Ok(files) => files,
            Err(e) => {
                error!("Failed to list unit ({}): {}", unit, e);
                stats.units_failed += 1;
                return Ok(());
            }
        };
        info!("Unit ({}): {} file(s)", unit, files.len());

        for (index, path) in files.iter().enumerate() {
            if self.store.is_dry_run() && index >= DRY_RUN_FILES_PER_UNIT {
                debug!("Dry run shows only {} files per unit", DRY_RUN_FILES_PER_UNIT);
                break;
            }
            match self.ingest_file(path, stats).await {
                Ok(FileOutcome::Loaded { rows }) => {
                    stats.files_loaded += 1;
                    stats.rows_loaded += rows;
                }
                Ok(FileOutcome::AlreadyLoaded) => stats.files_already_loaded += 1,
                Err(IngestError::Finder(FinderError::UnrecognizedPath(path))) => {
                    warn!("Skipping unrecognized path {}", path.display());
                    stats.unrecognized_paths += 1;
                }
                Err(e) => {
                    error!("Failed to load {}: {}", path.display(), e);
                    stats.files_failed += 1;
                    warn!("Abandoning unit ({})", unit);
                    break;
                }
            }
        }
        Ok(())
    }

    /// Load one file unless its bookkeeping row already exists.
    pub async fn ingest_file(&self, path: &Path, stats: &mut IngestStats) -> IngestResult<FileOutcome> {
        let determiners = self.finder.determiners_of(path)?;

        self.store.begin().await?;
        match self.load_claimed(path, &determiners, stats).await {
            Ok(Some(rows)) => {
                self.store.commit().await?;
                info!("Loaded {} rows for ({}) from {}", rows, determiners, path.display());
                Ok(FileOutcome::Loaded { rows })
            }
            Ok(None) => {
                self.store.rollback().await?;
                debug!("({}) already loaded", determiners);
                Ok(FileOutcome::AlreadyLoaded)
            }
            Err(e) => {
                if let Err(rollback) = self.store.rollback().await {
                    warn!("Rollback after failure also failed: {}", rollback);
                }
                Err(e)
            }
        }
    }

    /// Claim the file's bookkeeping row and copy its rows. `None` when the
    /// claim found the row already present.
    async fn load_claimed(
        &self,
        path: &Path,
        determiners: &Determiners,
        stats: &mut IngestStats,
    ) -> IngestResult<Option<u64>> {
        let params = self.bookkeeping.params(determiners)?;
        let claimed = self
            .store
            .execute_params(&self.bookkeeping.claim_sql(), &params)
            .await?;
        if claimed == 0 {
            return Ok(None);
        }

        let raw = self.read(path)?;
        let resolution = self
            .assumptions
            .resolve(raw, &self.options.schema, determiners)?;
        let tables = self.accept(resolution, stats)?;

        let mut rows = 0;
        for mut image in tables {
            image.normalize_precision();
            rows += self.copy(image).await?;
        }
        Ok(Some(rows))
    }

    fn accept(&self, resolution: Resolution, stats: &mut IngestStats) -> IngestResult<Vec<TableImage>> {
        stats.diagnostics += resolution.diagnostics.len();
        if self.options.strict {
            Ok(resolution.into_strict()?)
        } else {
            Ok(resolution.tables)
        }
    }

    async fn copy(&self, image: TableImage) -> IngestResult<u64> {
        let table = image.qualified_name();
        let stream = image.into_row_stream()?;
        let statement = CopyStatement {
            table,
            columns: stream.column_names().into_iter().map(String::from).collect(),
            template: stream.template(),
        };
        let expected = stream.row_count();

        let copied = match self.options.strategy {
            LoadStrategy::Buffered => {
                self.store
                    .copy_in(&statement, CopyPayload::Buffered(stream.encode_all()))
                    .await?
            }
            LoadStrategy::Pipelined => {
                let (rx, producer) =
                    pipe::spawn_producer(stream, self.options.chunk_rows, self.options.pipe_capacity);
                let copied = self
                    .store
                    .copy_in(&statement, CopyPayload::Pipelined(rx))
                    .await;
                let produced = producer
                    .await
                    .map_err(|e| StoreError::ProducerFailed(e.to_string()))?;
                let copied = copied?;
                if produced != expected {
                    return Err(StoreError::ProducerFailed(format!(
                        "produced {} of {} rows",
                        produced, expected
                    ))
                    .into());
                }
                copied
            }
        };

        if copied != expected as u64 {
            return Err(StoreError::CopyFailed(format!(
                "copied {} rows into {}, expected {}",
                copied, statement.table, expected
            ))
            .into());
        }
        Ok(copied)
    }

    /// Run the whole pipeline for `units`, or for every unit under the root
    /// when none are given.
    pub async fn run(&self, units: &[DeterminerValue]) -> IngestResult<IngestStats> {
        let started = Instant::now();
        let mut stats = IngestStats::new();

        let tables = self.discover_schema().await?;

        match self.options.keys {
            Some(KeyAction::Create) => {
                self.create_keys(&tables).await?;
            }
            Some(KeyAction::Drop) => {
                self.drop_keys(&tables).await?;
            }
            None => {
                self.ensure_tables(&tables).await?;
                if self.options.no_insert {
                    info!("Tables ensured; not loading data");
                } else {
                    self.ensure_bookkeeping().await?;
                    let units = if units.is_empty() {
                        self.finder.units()?
                    } else {
                        units.to_vec()
                    };
                    for unit in units {
                        let key = self.unit_key(unit)?;
                        self.ingest_unit(&key, &mut stats).await?;
                    }
                }
            }
        }

        stats.duration_ms = started.elapsed().as_millis() as u64;
        info!("{}", stats);
        Ok(stats)
    }
}
