// crates/llama-dashboard-cli/src/main.rs
// ============================================================================
// Module: Llama Dashboard CLI Entry Point
// Description: Command dispatcher for dashboard database maintenance.
// Purpose: Inspect, back up, restore, and compact the dashboard store.
// Dependencies: clap, llama-dashboard-store, serde_json, thiserror, tracing.
// ============================================================================

//! ## Overview
//! `llama-dashboard` opens the dashboard database described by the store
//! configuration (or `--db`), runs one command, and closes the store again.
//! Results are written to stdout as JSON; diagnostics and errors go to
//! stderr so stdout stays machine-readable.

// ============================================================================
// SECTION: Modules
// ============================================================================

#[cfg(test)]
mod main_tests;

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Args;
use clap::Parser;
use clap::Subcommand;
use llama_dashboard_store::DashboardStore;
use llama_dashboard_store::ModelFilter;
use llama_dashboard_store::ModelKind;
use llama_dashboard_store::ModelStatus;
use llama_dashboard_store::SCHEMA_VERSION;
use llama_dashboard_store::StoreConfig;
use llama_dashboard_store::config::CONFIG_ENV_VAR;
use llama_dashboard_store::config::DEFAULT_CONFIG_NAME;
use llama_dashboard_store::schema::DB_VERSION_KEY;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;
use tracing_subscriber::EnvFilter;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default window for `metrics history`, in minutes.
const DEFAULT_HISTORY_MINUTES: u32 = 10;

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Llama dashboard database tool.
#[derive(Parser, Debug)]
#[command(name = "llama-dashboard", version)]
struct Cli {
    /// Store configuration file (overrides `LLAMA_DASHBOARD_CONFIG`).
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,
    /// Database file (overrides the configured path).
    #[arg(long, value_name = "FILE", global = true)]
    db: Option<PathBuf>,
    /// Log at debug level unless `RUST_LOG` says otherwise.
    #[arg(long, short, global = true)]
    verbose: bool,
    /// Selected subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Top-level commands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Show database path, size, and row counts.
    Info,
    /// Checkpoint the WAL and compact the database.
    Vacuum,
    /// Checkpoint the WAL into the main database file.
    Checkpoint,
    /// Write a consistent snapshot to a file.
    Export {
        /// Snapshot destination.
        #[arg(value_name = "FILE")]
        path: PathBuf,
    },
    /// Merge a snapshot into the database.
    Import {
        /// Snapshot source.
        #[arg(value_name = "FILE")]
        path: PathBuf,
    },
    /// Delete all models, metrics, and server settings (metadata is kept).
    Clear {
        /// Confirm the deletion.
        #[arg(long)]
        yes: bool,
    },
    /// Metrics history commands.
    Metrics {
        /// Selected metrics subcommand.
        #[command(subcommand)]
        command: MetricsCommand,
    },
    /// Model commands.
    Models {
        /// Selected models subcommand.
        #[command(subcommand)]
        command: ModelsCommand,
    },
    /// Metadata commands.
    Metadata {
        /// Selected metadata subcommand.
        #[command(subcommand)]
        command: MetadataCommand,
    },
}

/// Metrics history subcommands.
#[derive(Subcommand, Debug)]
enum MetricsCommand {
    /// Show the most recent sample.
    Latest,
    /// Show samples from the last N minutes.
    History {
        /// Window size in minutes.
        #[arg(long, default_value_t = DEFAULT_HISTORY_MINUTES)]
        minutes: u32,
    },
}

/// Model subcommands.
#[derive(Subcommand, Debug)]
enum ModelsCommand {
    /// List models, newest first.
    List(ModelsListCommand),
    /// Show a model with all of its settings.
    Show {
        /// Model id.
        id: i64,
    },
    /// Delete a model and its settings.
    Delete {
        /// Model id.
        id: i64,
    },
}

/// Arguments for `models list`.
#[derive(Args, Debug)]
struct ModelsListCommand {
    /// Exact status match.
    #[arg(long, value_parser = parse_status)]
    status: Option<ModelStatus>,
    /// Exact type match.
    #[arg(long = "type", value_name = "TYPE")]
    kind: Option<String>,
    /// Case-sensitive name substring.
    #[arg(long)]
    name: Option<String>,
}

/// Metadata subcommands.
#[derive(Subcommand, Debug)]
enum MetadataCommand {
    /// Print a metadata entry.
    Get {
        /// Entry key.
        key: String,
    },
    /// Set a metadata entry.
    Set {
        /// Entry key.
        key: String,
        /// Entry value.
        value: String,
    },
    /// Delete a metadata entry.
    Delete {
        /// Entry key.
        key: String,
    },
}

// ============================================================================
// SECTION: Output Types
// ============================================================================

/// Output of `info`.
#[derive(Debug, Serialize)]
struct InfoOutput {
    /// Database file.
    path: PathBuf,
    /// Primary file size in bytes.
    size_bytes: u64,
    /// Stored schema version.
    schema_version: Option<String>,
    /// Schema version this build writes.
    supported_schema_version: &'static str,
    /// Model rows.
    models: u64,
    /// Retained metrics samples.
    metrics_samples: u64,
    /// Whether server settings are stored.
    server_config: bool,
}

/// Output of `export`.
#[derive(Debug, Serialize)]
struct ExportOutput {
    /// Snapshot path.
    path: PathBuf,
    /// Snapshot size in bytes.
    bytes: u64,
}

/// Output of commands that only report success.
#[derive(Debug, Serialize)]
struct DoneOutput {
    /// Operation performed.
    action: &'static str,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI error wrapper.
#[derive(Debug, Error)]
#[error("{message}")]
struct CliError {
    /// Human-readable error message.
    message: String,
}

impl CliError {
    /// Constructs a new [`CliError`].
    const fn new(message: String) -> Self {
        Self {
            message,
        }
    }
}

/// CLI result alias for fallible operations.
type CliResult<T> = Result<T, CliError>;

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point returning an exit code.
fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match run(cli) {
        Ok(code) => code,
        Err(err) => emit_error(&err.to_string()),
    }
}

/// Installs the stderr log subscriber.
fn init_tracing(verbose: bool) {
    let fallback = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

/// Executes the CLI command dispatcher.
fn run(cli: Cli) -> CliResult<ExitCode> {
    if let Commands::Clear {
        yes: false,
    } = cli.command
    {
        return Err(CliError::new("refusing to clear without --yes".to_string()));
    }
    let config = resolve_config(cli.config.as_deref(), cli.db.as_deref())?;
    debug!(path = %config.path.display(), "opening dashboard store");
    let store = DashboardStore::open(config)
        .map_err(|err| CliError::new(format!("failed to open store: {err}")))?;
    let result = dispatch(&store, cli.command);
    let closed = store.close().map_err(|err| CliError::new(format!("failed to close store: {err}")));
    let code = result?;
    closed?;
    Ok(code)
}

/// Routes a parsed command to its handler.
fn dispatch(store: &DashboardStore, command: Commands) -> CliResult<ExitCode> {
    match command {
        Commands::Info => command_info(store),
        Commands::Vacuum => {
            store.vacuum().map_err(store_error)?;
            write_json(&DoneOutput {
                action: "vacuum",
            })
        }
        Commands::Checkpoint => write_json(&store.checkpoint().map_err(store_error)?),
        Commands::Export {
            path,
        } => {
            let bytes = store.export(&path).map_err(store_error)?;
            write_json(&ExportOutput {
                path,
                bytes,
            })
        }
        Commands::Import {
            path,
        } => write_json(&store.import(&path).map_err(store_error)?),
        Commands::Clear {
            ..
        } => write_json(&store.clear_all().map_err(store_error)?),
        Commands::Metrics {
            command,
        } => command_metrics(store, command),
        Commands::Models {
            command,
        } => command_models(store, command),
        Commands::Metadata {
            command,
        } => command_metadata(store, command),
    }
}

// ============================================================================
// SECTION: Commands
// ============================================================================

/// Executes `info`.
fn command_info(store: &DashboardStore) -> CliResult<ExitCode> {
    let output = InfoOutput {
        path: store.path().to_path_buf(),
        size_bytes: store.size().map_err(store_error)?,
        schema_version: store.metadata(DB_VERSION_KEY).map_err(store_error)?,
        supported_schema_version: SCHEMA_VERSION,
        models: store.model_count().map_err(store_error)?,
        metrics_samples: store.metrics_count().map_err(store_error)?,
        server_config: store.server_config().map_err(store_error)?.is_some(),
    };
    write_json(&output)
}

/// Dispatches metrics subcommands.
fn command_metrics(store: &DashboardStore, command: MetricsCommand) -> CliResult<ExitCode> {
    match command {
        MetricsCommand::Latest => write_json(&store.latest_metrics().map_err(store_error)?),
        MetricsCommand::History {
            minutes,
        } => write_json(&store.metrics_history(minutes).map_err(store_error)?),
    }
}

/// Dispatches model subcommands.
fn command_models(store: &DashboardStore, command: ModelsCommand) -> CliResult<ExitCode> {
    match command {
        ModelsCommand::List(args) => {
            let filter = ModelFilter {
                status: args.status,
                kind: args.kind.map(ModelKind::from),
                name: args.name,
            };
            write_json(&store.list_models(&filter).map_err(store_error)?)
        }
        ModelsCommand::Show {
            id,
        } => {
            let Some(model) = store.complete_model_config(id).map_err(store_error)? else {
                return Err(CliError::new(format!("model {id} not found")));
            };
            write_json(&model)
        }
        ModelsCommand::Delete {
            id,
        } => {
            store.delete_model(id).map_err(store_error)?;
            write_json(&DoneOutput {
                action: "delete",
            })
        }
    }
}

/// Dispatches metadata subcommands.
fn command_metadata(store: &DashboardStore, command: MetadataCommand) -> CliResult<ExitCode> {
    match command {
        MetadataCommand::Get {
            key,
        } => {
            let Some(entry) = store.metadata_entry(&key).map_err(store_error)? else {
                return Err(CliError::new(format!("metadata key {key} not found")));
            };
            write_json(&entry)
        }
        MetadataCommand::Set {
            key,
            value,
        } => {
            store.set_metadata(&key, &value).map_err(store_error)?;
            write_json(&store.metadata_entry(&key).map_err(store_error)?)
        }
        MetadataCommand::Delete {
            key,
        } => {
            store.delete_metadata(&key).map_err(store_error)?;
            write_json(&DoneOutput {
                action: "delete",
            })
        }
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Resolves the store configuration from flags, environment, and defaults.
fn resolve_config(config_path: Option<&Path>, db: Option<&Path>) -> CliResult<StoreConfig> {
    let loaded = match config_path {
        Some(path) => StoreConfig::load(Some(path)),
        None if std::env::var_os(CONFIG_ENV_VAR).is_some()
            || Path::new(DEFAULT_CONFIG_NAME).is_file() =>
        {
            StoreConfig::load(None)
        }
        None => Ok(StoreConfig::default()),
    };
    let mut config = loaded.map_err(|err| CliError::new(err.to_string()))?;
    if let Some(db) = db {
        config.path = db.to_path_buf();
    }
    Ok(config)
}

/// Parses a model status flag.
fn parse_status(value: &str) -> Result<ModelStatus, String> {
    value.parse().map_err(|_| format!("expected one of running, stopped, loading, error; got {value}"))
}

/// Converts a store error into a CLI error.
fn store_error(err: llama_dashboard_store::StoreError) -> CliError {
    CliError::new(err.to_string())
}

/// Writes a JSON value to stdout.
fn write_json<T: Serialize>(value: &T) -> CliResult<ExitCode> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|err| CliError::new(format!("failed to encode output: {err}")))?;
    write_stdout_line(&text).map_err(|err| CliError::new(output_error("stdout", &err)))?;
    Ok(ExitCode::SUCCESS)
}

/// Writes a single line to stdout.
fn write_stdout_line(message: &str) -> std::io::Result<()> {
    let mut stdout = std::io::stdout();
    writeln!(&mut stdout, "{message}")
}

/// Writes a single line to stderr.
fn write_stderr_line(message: &str) -> std::io::Result<()> {
    let mut stderr = std::io::stderr();
    writeln!(&mut stderr, "{message}")
}

/// Formats an output stream failure.
fn output_error(stream: &str, error: &std::io::Error) -> String {
    format!("failed to write to {stream}: {error}")
}

/// Emits an error message to stderr and returns a failure exit code.
fn emit_error(message: &str) -> ExitCode {
    let _ = write_stderr_line(message);
    ExitCode::FAILURE
}
