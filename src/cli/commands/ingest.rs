//! Ingest CLI command
//!
//! Loads configuration and assumptions, connects to the store (or prints
//! instead on a dry run) and drives one ingestion run.

use std::path::PathBuf;
use tracing::info;

use crate::assumptions::Assumptions;
use crate::cli::error::CliError;
use crate::database::config::IngestConfig;
use crate::database::{DryRunStore, PostgresStore, StoreSession};
use crate::finder::Finder;
use crate::ingest::{IngestOptions, IngestStats, Ingestor, KeyAction, LoadStrategy};
use crate::reader::ParquetReader;

/// Ingest command arguments
#[derive(Debug, Clone)]
pub struct IngestArgs {
    /// Root of the input hierarchy
    pub root: PathBuf,
    /// Target schema
    pub schema: String,
    /// Assumptions YAML
    pub assumptions: PathBuf,
    /// Explicit configuration file
    pub config: Option<PathBuf>,
    /// `key=value` server parameters
    pub db_server: Vec<String>,
    /// Units to load; all units when empty
    pub units: Vec<String>,
    pub dry_run: bool,
    pub no_insert: bool,
    pub keys: Option<KeyAction>,
    pub strategy: Option<LoadStrategy>,
    pub strict: bool,
}

fn load_config(args: &IngestArgs) -> Result<IngestConfig, CliError> {
    let mut config = match &args.config {
        Some(path) if !path.exists() => return Err(CliError::FileNotFound(path.clone())),
        Some(path) => IngestConfig::load_file(path)?,
        None => {
            let cwd = std::env::current_dir()
                .map_err(|e| CliError::IoError(format!("Failed to get current directory: {}", e)))?;
            IngestConfig::load(&cwd)?
        }
    };
    config.apply_db_server(&args.db_server)?;
    if let Some(strategy) = args.strategy {
        config.load.strategy = strategy;
    }
    if args.strict {
        config.load.strict = true;
    }
    Ok(config)
}

fn options(args: &IngestArgs, config: &IngestConfig) -> IngestOptions {
    IngestOptions {
        strategy: config.load.strategy,
        pipe_capacity: config.load.pipe_capacity,
        chunk_rows: config.load.chunk_rows,
        table_space: config.load.table_space.clone(),
        index_space: config.load.index_space.clone(),
        strict: config.load.strict,
        no_insert: args.no_insert,
        keys: args.keys,
        ..IngestOptions::new(args.schema.clone())
    }
}

/// Run one ingestion
pub fn handle_ingest(args: &IngestArgs) -> Result<IngestStats, CliError> {
    if !args.root.is_dir() {
        return Err(CliError::FileNotFound(args.root.clone()));
    }
    if !args.assumptions.exists() {
        return Err(CliError::FileNotFound(args.assumptions.clone()));
    }

    let config = load_config(args)?;
    let assumptions = Assumptions::from_path(&args.assumptions)?;
    let finder = Finder::new(&args.root, config.finder.to_grammar()?);
    let reader = ParquetReader::new();
    let options = options(args, &config);

    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| CliError::IoError(format!("Failed to create runtime: {}", e)))?;

    rt.block_on(async {
        let store: Box<dyn StoreSession> = if args.dry_run {
            Box::new(DryRunStore::stdout())
        } else {
            let connection_string = config.get_postgres_connection_string().ok_or_else(|| {
                CliError::InvalidArgument(
                    "No PostgreSQL connection configured. Use --db-server or [postgres] connection_string."
                        .to_string(),
                )
            })?;
            let store = PostgresStore::connect(connection_string).await?;
            info!("Connected to {}", store.connection_string_masked());
            Box::new(store)
        };

        let ingestor = Ingestor::new(&finder, &assumptions, &reader, store.as_ref(), options)?;
        let units = args
            .units
            .iter()
            .map(|u| ingestor.parse_unit(u))
            .collect::<Result<Vec<_>, _>>()?;
        Ok::<_, CliError>(ingestor.run(&units).await?)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn args(root: PathBuf, assumptions: PathBuf) -> IngestArgs {
        IngestArgs {
            root,
            schema: "dc2".to_string(),
            assumptions,
            config: None,
            db_server: vec!["host=db".to_string(), "dbname=catalog".to_string()],
            units: Vec::new(),
            dry_run: true,
            no_insert: false,
            keys: None,
            strategy: Some(LoadStrategy::Pipelined),
            strict: true,
        }
    }

    #[test]
    fn test_missing_inputs() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nowhere");
        let err = handle_ingest(&args(missing.clone(), missing.clone())).unwrap_err();
        assert!(matches!(err, CliError::FileNotFound(p) if p == missing));

        let err = handle_ingest(&args(dir.path().to_path_buf(), missing.clone())).unwrap_err();
        assert!(matches!(err, CliError::FileNotFound(p) if p == missing));
    }

    #[test]
    fn test_flags_override_config() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("ingest.toml");
        std::fs::write(&config_path, "[load]\nstrategy = \"buffered\"\ntable_space = \"fast\"\n")
            .unwrap();
        let mut a = args(dir.path().to_path_buf(), dir.path().join("a.yaml"));
        a.config = Some(config_path);

        let config = load_config(&a).unwrap();
        assert_eq!(config.load.strategy, LoadStrategy::Pipelined);
        assert!(config.load.strict);
        assert_eq!(
            config.get_postgres_connection_string(),
            Some("host=db dbname=catalog")
        );

        let options = options(&a, &config);
        assert_eq!(options.schema, "dc2");
        assert_eq!(options.table_space.as_deref(), Some("fast"));
        assert_eq!(options.chunk_rows, 4096);
    }
}
