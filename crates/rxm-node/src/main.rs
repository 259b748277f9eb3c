mod commands;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::Deserialize;

use rxm_migration::MigrationRollbackLog;
use rxm_retry::{RetryPolicy, RetryableQueryExecutor};
use rxm_storage::fjall::{FjallMigrationLog, FjallRecordStore, FjallStore};
use rxm_types::RecordCategory;

#[derive(clap::Parser, Debug)]
#[command(name = "rxm-node", about = "Pharmacy record migration toolkit")]
struct Cli {
    #[arg(long)]
    config: Option<PathBuf>,
    /// Overrides `storage.data_dir` from the config.
    #[arg(long)]
    data_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Import a JSON array of rows as a new migration batch
    Import { category: RecordCategory, file: PathBuf },
    /// Delete the records of a migration batch
    Rollback {
        migration_id: String,
        /// Only this category; every logged category when omitted
        #[arg(long)]
        category: Option<RecordCategory>,
    },
    /// Show migration log entries
    History {
        #[arg(long)]
        migration_id: Option<String>,
    },
    /// Print all records of a category
    List { category: RecordCategory },
    /// Show whether a batch is active or rolled back
    Status { migration_id: String, category: RecordCategory },
}

#[derive(Debug, Deserialize)]
struct StorageConfig {
    data_dir: PathBuf,
}

#[derive(Debug, Deserialize)]
struct ObservabilityConfig {
    log_level: String,
    log_format: String,
}

#[derive(Debug, Deserialize)]
struct Config {
    storage: StorageConfig,
    retry: RetryPolicy,
    observability: ObservabilityConfig,
}

fn init_logging(config: &ObservabilityConfig) {
    // stdout carries command output; logs go to stderr.
    match config.log_format.as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(&config.log_level)
                .with_writer(std::io::stderr)
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .pretty()
                .with_env_filter(&config.log_level)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use clap::Parser;
    let cli = Cli::parse();

    let mut figment = Figment::new()
        .merge(Toml::string(include_str!("../../../config/default.toml")));

    if let Some(ref config_path) = cli.config {
        figment = figment.merge(Toml::file_exact(config_path));
    }

    let config: Config = figment
        .merge(Env::prefixed("RXM_").split("__"))
        .extract()
        .context("failed to load configuration")?;

    init_logging(&config.observability);

    let data_dir = cli.data_dir.unwrap_or(config.storage.data_dir);
    let policy = config.retry.validated().with_context("rxm-node");

    tracing::debug!(data_dir = %data_dir.display(), ?policy, "node starting");

    let store = FjallStore::open(&data_dir)
        .with_context(|| format!("failed to open store at {}", data_dir.display()))?;
    let rollback_log = MigrationRollbackLog::new(
        Arc::new(FjallRecordStore(store.clone())),
        Arc::new(FjallMigrationLog(store)),
    );
    let executor = RetryableQueryExecutor::new(policy);

    match cli.command {
        Command::Import { category, file } => {
            commands::import(&rollback_log, &executor, category, &file).await
        }
        Command::Rollback { migration_id, category } => {
            commands::rollback(&rollback_log, migration_id.into(), category).await
        }
        Command::History { migration_id } => {
            commands::history(&rollback_log, migration_id.map(Into::into)).await
        }
        Command::List { category } => commands::list(&rollback_log, category).await,
        Command::Status { migration_id, category } => {
            commands::status(&rollback_log, migration_id.into(), category).await
        }
    }
}
