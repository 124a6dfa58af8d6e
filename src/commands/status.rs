//! `fleetgate status` — installed version, add-ons and upgrade progress.

use std::path::Path;

use anyhow::Result;
use colored::Colorize;

use crate::domain::upgrade_state::UpgradePhase;

pub fn run(config_path: Option<&Path>, format: &str) -> Result<()> {
    let cfg = super::load_config(config_path)?;
    let plane = super::local_plane(cfg)?;
    let status = super::block_on(plane.upgrade_status())?;

    if format == "json" {
        return super::output::print_output(format, &status);
    }

    println!("{}", "fleetgate status".bold());
    println!(
        "  version:  {}",
        status.version.as_deref().unwrap_or("unknown")
    );
    println!(
        "  add-ons:  {}",
        if status.addons.is_empty() {
            "none".dimmed().to_string()
        } else {
            status.addons.join(", ")
        }
    );
    let phase = match status.phase {
        UpgradePhase::Idle => "idle".normal(),
        UpgradePhase::Upgrading => "upgrading".yellow(),
        UpgradePhase::Succeeded => "succeeded".green(),
        UpgradePhase::Failed => "failed".red(),
    };
    println!("  upgrade:  {}", phase);
    Ok(())
}
