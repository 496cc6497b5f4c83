//! Named lock probe.
//!
//! Takes a named lock, holds it for a while, then releases it. Running two
//! probes against the same name shows the second one waiting.

use std::time::Duration;

use clap::{Args, ValueEnum};

use crate::output;
use allotment_core::config::AppConfig;
use allotment_core::error::AppError;
use allotment_core::types::LockMode;
use allotment_database::Session;

/// Lock strength accepted on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ProbeMode {
    /// Shared: other shared holders may proceed
    Read,
    /// Exclusive: every other holder waits
    Write,
}

impl From<ProbeMode> for LockMode {
    fn from(mode: ProbeMode) -> Self {
        match mode {
            ProbeMode::Read => LockMode::PessimisticRead,
            ProbeMode::Write => LockMode::PessimisticWrite,
        }
    }
}

/// Arguments for the lock command
#[derive(Debug, Args)]
pub struct LockArgs {
    /// Lock name
    pub name: String,
    /// Lock strength
    #[arg(short, long, value_enum, default_value = "write")]
    pub mode: ProbeMode,
    /// How long to hold the lock, in milliseconds
    #[arg(long, default_value_t = 5_000)]
    pub hold_ms: u64,
}

/// Execute the lock probe
pub async fn execute(args: &LockArgs, config: &AppConfig) -> Result<(), AppError> {
    let store = super::connect_store(config).await?;
    let mut session = Session::begin(&store).await?;

    println!("Acquiring '{}' ({:?})...", args.name, args.mode);
    session
        .acquire_named_lock(&args.name, args.mode.into())
        .await?;
    output::print_success(&format!("Holding '{}' for {}ms.", args.name, args.hold_ms));

    tokio::time::sleep(Duration::from_millis(args.hold_ms)).await;
    session.commit().await?;
    output::print_success(&format!("Released '{}'.", args.name));
    Ok(())
}
