//! CLI command definitions and dispatch.

pub mod allocation;
pub mod lock;
pub mod migrate;
pub mod pool;

use clap::{Parser, Subcommand};

use crate::output::OutputFormat;
use allotment_core::config::AppConfig;
use allotment_core::error::AppError;
use allotment_database::{DatabasePool, PgStore};

/// Allotment: capacity-limited resource pools
#[derive(Debug, Parser)]
#[command(name = "allotment", version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/default.toml")]
    pub config: String,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    pub format: OutputFormat,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Database migration management
    Migrate(migrate::MigrateArgs),
    /// Resource pool management
    Pool(pool::PoolArgs),
    /// Allocation management
    Allocation(allocation::AllocationArgs),
    /// Named lock probe
    Lock(lock::LockArgs),
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(&self, config: &AppConfig) -> Result<(), AppError> {
        match &self.command {
            Commands::Migrate(args) => migrate::execute(args, config).await,
            Commands::Pool(args) => pool::execute(args, config, self.format).await,
            Commands::Allocation(args) => allocation::execute(args, config, self.format).await,
            Commands::Lock(args) => lock::execute(args, config).await,
        }
    }
}

/// Helper: connect to the database and build a store over it
pub async fn connect_store(config: &AppConfig) -> Result<PgStore, AppError> {
    let pool = DatabasePool::connect(&config.database).await?;
    Ok(pool.store(&config.locking))
}
