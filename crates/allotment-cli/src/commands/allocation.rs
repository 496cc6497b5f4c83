//! Allocation CLI commands.

use clap::{Args, Subcommand};

use crate::output::{self, OutputFormat};
use allotment_core::config::AppConfig;
use allotment_core::error::AppError;
use allotment_core::types::{AllocationId, ConsumerId, PoolId};
use allotment_service::{AdmissionController, AllocationResult};

/// Arguments for allocation commands
#[derive(Debug, Args)]
pub struct AllocationArgs {
    /// Allocation subcommand
    #[command(subcommand)]
    pub command: AllocationCommand,
}

/// Allocation subcommands
#[derive(Debug, Subcommand)]
pub enum AllocationCommand {
    /// Draw units from a pool
    Create {
        /// Pool ID
        #[arg(short, long)]
        pool: PoolId,
        /// Consumer ID (a new one is generated when omitted)
        #[arg(short, long)]
        consumer: Option<ConsumerId>,
        /// Units to draw
        #[arg(short, long, default_value_t = 1)]
        quantity: i64,
    },
    /// Change the units held by an allocation
    Adjust {
        /// Allocation ID
        id: AllocationId,
        /// New number of units
        #[arg(short, long)]
        quantity: i64,
    },
    /// Revoke an allocation and return its units to the pool
    Revoke {
        /// Allocation ID
        id: AllocationId,
    },
}

fn print_result(result: &AllocationResult, format: OutputFormat) {
    match result {
        AllocationResult::Committed { allocation_id } => {
            if format == OutputFormat::Table {
                output::print_success("Allocation committed.");
            }
            output::print_json_or(
                result,
                format,
                &[("Allocation", allocation_id.to_string())],
            );
        }
        AllocationResult::Refused(refusal) => {
            if format == OutputFormat::Table {
                output::print_warning(&refusal.reason);
            }
            output::print_json_or(
                result,
                format,
                &[
                    ("Pool", refusal.pool_id.to_string()),
                    ("Requested", refusal.requested.to_string()),
                    ("Available", refusal.available.to_string()),
                ],
            );
        }
    }
}

/// Execute allocation commands
pub async fn execute(
    args: &AllocationArgs,
    config: &AppConfig,
    format: OutputFormat,
) -> Result<(), AppError> {
    let controller = AdmissionController::new(super::connect_store(config).await?);

    match &args.command {
        AllocationCommand::Create {
            pool,
            consumer,
            quantity,
        } => {
            let consumer = consumer.unwrap_or_default();
            let result = controller
                .attempt_allocation(*pool, consumer, *quantity)
                .await?;
            print_result(&result, format);
        }
        AllocationCommand::Adjust { id, quantity } => {
            let result = controller.adjust_allocation(*id, *quantity).await?;
            print_result(&result, format);
        }
        AllocationCommand::Revoke { id } => {
            let revoked = controller.revoke_allocation(*id).await?;
            output::print_success(&format!(
                "Allocation {} revoked; {} unit(s) returned to pool {}.",
                revoked.id, revoked.quantity, revoked.pool_id
            ));
        }
    }

    Ok(())
}
