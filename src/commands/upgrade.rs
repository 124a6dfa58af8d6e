//! `fleetgate upgrade` — inspect, start or conclude the admin server upgrade.
//!
//! Only the marker files are touched, so these work without the inventory.

use std::path::Path;

use anyhow::Result;
use clap::Subcommand;
use colored::Colorize;

use crate::domain::upgrade_state::{UpgradePhase, UpgradeState};

#[derive(Subcommand)]
pub enum UpgradeCommands {
    /// Show the upgrade phase
    Status,
    /// Launch the upgrade in the background
    Start,
    /// Record the outcome (called by the upgrade script)
    Finish {
        /// The upgrade failed
        #[arg(long)]
        failed: bool,

        /// Diagnostic stored with a failure
        #[arg(long)]
        message: Option<String>,
    },
}

pub fn run(config_path: Option<&Path>, format: &str, command: &UpgradeCommands) -> Result<()> {
    let cfg = super::load_config(config_path)?;
    let state = UpgradeState::new(&cfg.upgrade);

    match command {
        UpgradeCommands::Status => {
            let flags = state.flags();
            if format == "json" {
                return super::output::print_output(format, &flags);
            }
            let phase = flags.phase();
            let label = match phase {
                UpgradePhase::Idle => "idle".normal(),
                UpgradePhase::Upgrading => "upgrading".yellow(),
                UpgradePhase::Succeeded => "succeeded".green(),
                UpgradePhase::Failed => "failed".red(),
            };
            println!("upgrade: {}", label);
            if phase == UpgradePhase::Failed {
                if let Some(details) = super::block_on(state.failure_details())? {
                    super::output::print_value(&details, 1);
                }
            }
            Ok(())
        }
        UpgradeCommands::Start => {
            let pid = super::block_on(state.start())??;
            match pid {
                Some(pid) => println!("{} (pid {})", "upgrade started".green(), pid),
                None => println!("{}", "upgrade started".green()),
            }
            println!("  poll with `fleetgate upgrade status`");
            Ok(())
        }
        UpgradeCommands::Finish { failed, message } => {
            super::block_on(state.finish(!failed, message.as_deref()))??;
            Ok(())
        }
    }
}
