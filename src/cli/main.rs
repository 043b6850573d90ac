//! CLI binary entry point for catalog-ingest

#[cfg(feature = "cli")]
use anyhow::Context;
#[cfg(feature = "cli")]
use catalog_ingest::cli::commands::ingest::{IngestArgs, handle_ingest};
#[cfg(feature = "cli")]
use catalog_ingest::ingest::{KeyAction, LoadStrategy};
#[cfg(feature = "cli")]
use clap::{Parser, ValueEnum};
#[cfg(feature = "cli")]
use std::path::PathBuf;

#[cfg(feature = "cli")]
#[derive(Parser)]
#[command(name = "catalog-ingest")]
#[command(about = "Load measurement files into PostgreSQL under a declared schema")]
#[command(version)]
struct Cli {
    /// Root directory of the input hierarchy
    root: PathBuf,
    /// Target schema
    schema: String,
    /// Assumptions YAML describing the target table
    #[arg(short, long, default_value = "assumptions.yaml")]
    assumptions: PathBuf,
    /// Configuration file (defaults to .catalog-ingest.toml in the current directory)
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Server connection parameter, e.g. --db-server host=db --db-server dbname=catalog
    #[arg(long = "db-server", value_name = "KEY=VALUE")]
    db_server: Vec<String>,
    /// Units (values of the first determiner) to load; all units when omitted
    #[arg(short, long = "unit", value_name = "UNIT")]
    units: Vec<String>,
    /// Print SQL and a preview of the data instead of executing
    #[arg(long)]
    dry_run: bool,
    /// Create tables but do not load data
    #[arg(long)]
    no_insert: bool,
    /// Only create primary keys, foreign keys and indexes
    #[arg(long, conflicts_with = "drop_keys")]
    create_keys: bool,
    /// Only drop primary keys, foreign keys and indexes
    #[arg(long)]
    drop_keys: bool,
    /// How rows are streamed into the table
    #[arg(long, value_enum)]
    strategy: Option<StrategyArg>,
    /// Fail a file when a field or column cannot be resolved
    #[arg(long)]
    strict: bool,
    /// Print run statistics as JSON
    #[arg(long)]
    json: bool,
    /// More logging
    #[arg(short, long)]
    verbose: bool,
}

#[cfg(feature = "cli")]
#[derive(Clone, Copy, ValueEnum)]
enum StrategyArg {
    Buffered,
    Pipelined,
}

#[cfg(feature = "cli")]
impl From<StrategyArg> for LoadStrategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Buffered => LoadStrategy::Buffered,
            StrategyArg::Pipelined => LoadStrategy::Pipelined,
        }
    }
}

#[cfg(feature = "cli")]
fn init_logging(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let default = if verbose {
        "catalog_ingest=debug"
    } else {
        "catalog_ingest=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(feature = "cli")]
fn run(cli: Cli) -> anyhow::Result<bool> {
    let keys = match (cli.create_keys, cli.drop_keys) {
        (true, _) => Some(KeyAction::Create),
        (_, true) => Some(KeyAction::Drop),
        _ => None,
    };
    let args = IngestArgs {
        root: cli.root,
        schema: cli.schema,
        assumptions: cli.assumptions,
        config: cli.config,
        db_server: cli.db_server,
        units: cli.units,
        dry_run: cli.dry_run,
        no_insert: cli.no_insert,
        keys,
        strategy: cli.strategy.map(Into::into),
        strict: cli.strict,
    };

    let stats = handle_ingest(&args)
        .with_context(|| format!("Ingestion into schema {} failed", args.schema))?;
    if cli.json {
        let json = serde_json::to_string_pretty(&stats).context("Failed to serialize stats")?;
        println!("{}", json);
    } else {
        eprintln!("{}", stats);
    }
    Ok(stats.is_success())
}

#[cfg(feature = "cli")]
fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(true) => {}
        Ok(false) => std::process::exit(2),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("CLI feature is not enabled. Build with --features cli");
    std::process::exit(1);
}
