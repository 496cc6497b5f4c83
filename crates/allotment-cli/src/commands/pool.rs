//! Resource pool CLI commands.

use clap::{Args, Subcommand};
use serde::Serialize;
use tabled::Tabled;

use crate::output::{self, OutputFormat};
use allotment_core::config::AppConfig;
use allotment_core::error::AppError;
use allotment_core::types::PoolId;
use allotment_database::repositories::{AllocationRepository, PoolRepository};
use allotment_entity::ResourcePool;
use allotment_service::AdmissionController;

/// Arguments for pool commands
#[derive(Debug, Args)]
pub struct PoolArgs {
    /// Pool subcommand
    #[command(subcommand)]
    pub command: PoolCommand,
}

/// Pool subcommands
#[derive(Debug, Subcommand)]
pub enum PoolCommand {
    /// List all pools
    List,
    /// Show one pool and its allocations
    Show {
        /// Pool ID
        id: PoolId,
    },
    /// Create a new pool
    Create {
        /// Pool name
        #[arg(short, long)]
        name: String,
        /// Units in the pool, or "unlimited"
        #[arg(short, long)]
        quantity: String,
    },
    /// Grow or shrink a pool by a number of units
    Resize {
        /// Pool ID
        id: PoolId,
        /// Units to add (negative to remove)
        #[arg(short, long, allow_hyphen_values = true)]
        delta: i64,
    },
}

/// Pool display row
#[derive(Debug, Serialize, Tabled)]
pub struct PoolRow {
    /// Pool ID
    id: String,
    /// Name
    name: String,
    /// Total units
    quantity: String,
    /// Consumed units
    consumed: i64,
    /// Units still grantable
    available: String,
}

impl From<&ResourcePool> for PoolRow {
    fn from(pool: &ResourcePool) -> Self {
        let unlimited = || "unlimited".to_string();
        Self {
            id: pool.id.to_string(),
            name: pool.name.clone(),
            quantity: if pool.is_unlimited() {
                unlimited()
            } else {
                pool.quantity.to_string()
            },
            consumed: pool.consumed,
            available: pool.available().map_or_else(unlimited, |a| a.to_string()),
        }
    }
}

/// Allocation display row
#[derive(Debug, Serialize, Tabled)]
struct AllocationRow {
    /// Allocation ID
    id: String,
    /// Consumer ID
    consumer: String,
    /// Units
    quantity: i64,
    /// Created at
    created: String,
}

/// Execute pool commands
pub async fn execute(
    args: &PoolArgs,
    config: &AppConfig,
    format: OutputFormat,
) -> Result<(), AppError> {
    let store = super::connect_store(config).await?;
    let pools = PoolRepository::new(store.clone());

    match &args.command {
        PoolCommand::List => {
            let rows: Vec<PoolRow> = pools.find_all().await?.iter().map(PoolRow::from).collect();
            output::print_list(&rows, format);
        }
        PoolCommand::Show { id } => {
            let pool = pools
                .find_by_id(*id)
                .await?
                .ok_or_else(|| AppError::not_found(format!("Pool {id} not found")))?;
            output::print_item(&PoolRow::from(&pool), format);

            let allocations = AllocationRepository::new(store).find_by_pool(*id).await?;
            let rows: Vec<AllocationRow> = allocations
                .iter()
                .map(|a| AllocationRow {
                    id: a.id.to_string(),
                    consumer: a.consumer_id.to_string(),
                    quantity: a.quantity,
                    created: a.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                })
                .collect();
            output::print_list(&rows, format);
        }
        PoolCommand::Create { name, quantity } => {
            let parsed = ResourcePool::parse_quantity(quantity);
            if parsed == 0 && quantity.trim() != "0" {
                output::print_warning(&format!("'{quantity}' is not a quantity; using 0"));
            }

            let pool = pools.create(name, parsed).await?;
            output::print_success(&format!("Pool '{}' created.", pool.name));
            output::print_item(&PoolRow::from(&pool), format);
        }
        PoolCommand::Resize { id, delta } => {
            let pool = AdmissionController::new(store).resize_pool(*id, *delta).await?;
            output::print_success(&format!("Pool '{}' resized.", pool.name));
            output::print_item(&PoolRow::from(&pool), format);
        }
    }

    Ok(())
}
