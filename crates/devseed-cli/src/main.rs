mod logging;
mod prompt;

use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use thiserror::Error;
use tokio::process::Command as ProcessCommand;

use devseed_core::{EntityName, Error as CoreError, redact_connection_string};
use devseed_transfer::{
    AlwaysConfirm, Config, Confirm, DEFAULT_CONFIG_FILE, DEFAULT_PROFILE, ExportOptions,
    ImportOptions, PgBackend, ResetMode, StrategyRegistry, Transfer, TransferError, TransferReport,
    WorkerClient, serve,
};

use logging::init_logging;
use prompt::TerminalConfirm;

const DEFAULT_SNAPSHOT_DIR: &str = "./devdata";

#[derive(Debug, Error)]
pub enum CliError {
    #[error("{0}")]
    Transfer(#[from] TransferError),
    #[error("core error: {0}")]
    Core(#[from] CoreError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("logging error: {0}")]
    Logging(String),
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),
}

#[derive(Parser, Debug)]
#[command(
    name = "devseed",
    version,
    about = "Snapshot a consistent, scrubbed subset of a database and load it elsewhere"
)]
struct Cli {
    /// Configuration file.
    #[arg(long, global = true, env = "DEVSEED_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    /// Also append JSON logs to this file.
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Export a snapshot from the source database.
    Export(ExportArgs),
    /// Reset the target database and import a snapshot into it.
    Import(ImportArgs),
    /// Serve export requests on stdin/stdout for `export --worker`.
    #[command(hide = true)]
    Worker(WorkerArgs),
}

#[derive(Args, Debug)]
struct ExportArgs {
    /// Snapshot directory.
    #[arg(default_value = DEFAULT_SNAPSHOT_DIR)]
    dest: PathBuf,
    /// Only export these entities (`namespace.name`).
    #[arg(value_name = "ENTITY")]
    only: Vec<String>,
    /// Database profile to read from.
    #[arg(long, default_value = DEFAULT_PROFILE)]
    source: String,
    /// Keep strategy files that already hold records.
    #[arg(long, default_value_t = false)]
    no_update: bool,
    /// Run extraction in a separate worker process.
    #[arg(long, default_value_t = false)]
    worker: bool,
}

#[derive(Args, Debug)]
struct ImportArgs {
    /// Snapshot directory.
    #[arg(default_value = DEFAULT_SNAPSHOT_DIR)]
    src: PathBuf,
    /// Database profile to write to.
    #[arg(long, default_value = DEFAULT_PROFILE)]
    target: String,
    /// How to empty the target first: drop-store, drop-tables or none.
    #[arg(long, default_value = "drop-store")]
    reset_mode: ResetMode,
    /// Skip the confirmation before destructive resets.
    #[arg(long, default_value_t = false)]
    no_confirm: bool,
    /// SQL script creating the schema, applied after the reset.
    #[arg(long, value_name = "FILE")]
    schema: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct WorkerArgs {
    /// Database profile to read from.
    #[arg(long, default_value = DEFAULT_PROFILE)]
    source: String,
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let cli = Cli::parse();

    // A worker's stdout carries frames, so it never logs to a file of its own.
    let log_file = match cli.command {
        Command::Worker(_) => None,
        _ => cli.log_file.as_deref(),
    };
    init_logging(log_file)?;

    if !cli.config.exists() {
        return Err(CliError::InvalidArgs(format!(
            "config file {} not found",
            cli.config.display()
        )));
    }
    let config = Config::load(&cli.config)?;
    let registry = StrategyRegistry::new();

    match cli.command {
        Command::Export(args) => run_export(&cli.config, &config, &registry, args).await,
        Command::Import(args) => run_import(&config, &registry, args).await,
        Command::Worker(args) => run_worker(&config, &registry, args).await,
    }
}

async fn connect(config: &Config, profile: &str) -> Result<PgBackend, CliError> {
    let url = config.database_url(profile)?;
    let redacted = redact_connection_string(&url);
    tracing::info!(event = "connecting", profile, connection = %redacted.redacted);
    Ok(PgBackend::connect(&url, config.introspect_options()).await?)
}

async fn run_export(
    config_path: &Path,
    config: &Config,
    registry: &StrategyRegistry,
    args: ExportArgs,
) -> Result<(), CliError> {
    let only = args
        .only
        .iter()
        .map(|label| label.parse::<EntityName>())
        .collect::<Result<Vec<_>, _>>()?;
    let options = ExportOptions {
        only,
        no_update: args.no_update,
    };

    let backend = connect(config, &args.source).await?;
    let transfer = Transfer::new(config, registry);

    let report = if args.worker {
        let mut command = ProcessCommand::new(std::env::current_exe()?);
        command
            .arg("--config")
            .arg(config_path)
            .arg("worker")
            .arg("--source")
            .arg(&args.source);
        let mut client = WorkerClient::spawn(command)?;
        let report = transfer
            .export(&backend, &args.dest, &options, Some(&mut client))
            .await?;
        client.finish().await?;
        report
    } else {
        transfer.export(&backend, &args.dest, &options, None).await?
    };

    log_report(&report);
    Ok(())
}

async fn run_import(
    config: &Config,
    registry: &StrategyRegistry,
    args: ImportArgs,
) -> Result<(), CliError> {
    let schema_script = match &args.schema {
        Some(path) => Some(tokio::fs::read_to_string(path).await?),
        None => None,
    };
    let options = ImportOptions {
        reset_mode: args.reset_mode,
        schema_script,
    };

    let backend = connect(config, &args.target).await?;
    let confirm: Box<dyn Confirm> = if args.no_confirm {
        Box::new(AlwaysConfirm)
    } else {
        Box::new(TerminalConfirm)
    };

    let report = Transfer::new(config, registry)
        .import(&backend, &args.src, &options, confirm.as_ref())
        .await?;

    log_report(&report);
    Ok(())
}

async fn run_worker(
    config: &Config,
    registry: &StrategyRegistry,
    args: WorkerArgs,
) -> Result<(), CliError> {
    let backend = connect(config, &args.source).await?;
    let catalog = devseed_transfer::Backend::catalog(&backend).await?;
    let transfer = Transfer::new(config, registry);
    let mut handler = transfer.worker(&backend, &catalog)?;

    let served = serve(tokio::io::stdin(), tokio::io::stdout(), &mut handler).await?;
    tracing::debug!(served, "worker input closed");
    Ok(())
}

fn log_report(report: &TransferReport) {
    match serde_json::to_string(report) {
        Ok(json) => tracing::info!(
            event = "report",
            run_id = %report.run_id,
            rows = report.total_rows(),
            duration_ms = report.duration_ms,
            report = %json,
            "run complete"
        ),
        Err(err) => tracing::warn!(error = %err, "failed to serialize run report"),
    }
}
