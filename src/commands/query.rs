//! `fleetgate query` — query a fleetgate daemon via its REST API.

use std::path::Path;

use anyhow::Result;
use clap::Subcommand;

use super::output::print_output;
use crate::client::FleetgateClient;

#[derive(Subcommand)]
pub enum QueryCommands {
    /// Daemon liveness
    Health,
    /// Version and deployed add-ons
    Status,
    /// Upgrade progress
    Upgrade,
    /// Start the admin server upgrade
    StartUpgrade,
    /// Cached readiness report
    Report,
    /// Re-run all checks on the daemon
    RefreshReport,
    /// Run one check
    Check { name: String },
    /// Repository check for a cloud version
    Repocheck { version: String },
    /// Role applicability for a node
    Role {
        node: String,
        barclamp: String,
        role: String,
    },
    /// Reload the daemon's inventory file
    ReloadInventory,
}

pub fn run(
    config_path: Option<&Path>,
    node: Option<&str>,
    format: &str,
    command: &QueryCommands,
) -> Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run_async(config_path, node, format, command))
}

async fn run_async(
    config_path: Option<&Path>,
    node: Option<&str>,
    format: &str,
    command: &QueryCommands,
) -> Result<()> {
    let cfg = super::load_config(config_path)?;
    let client = FleetgateClient::from_node(node, &cfg.nodes)?;

    match command {
        QueryCommands::Health => print_output(format, &client.health().await?),
        QueryCommands::Status => print_output(format, &client.status().await?),
        QueryCommands::Upgrade => print_output(format, &client.upgrade().await?),
        QueryCommands::StartUpgrade => print_output(format, &client.start_upgrade().await?),
        QueryCommands::Report => print_output(format, &client.report().await?),
        QueryCommands::RefreshReport => print_output(format, &client.refresh_report().await?),
        QueryCommands::Check { name } => print_output(format, &client.check(name).await?),
        QueryCommands::Repocheck { version } => {
            print_output(format, &client.repocheck(version).await?)
        }
        QueryCommands::Role {
            node,
            barclamp,
            role,
        } => print_output(format, &client.role(node, barclamp, role).await?),
        QueryCommands::ReloadInventory => {
            print_output(format, &client.reload_inventory().await?)
        }
    }
}
