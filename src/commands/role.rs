//! `fleetgate role` — would a role run on a node in its current state?

use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;

pub fn run(config_path: Option<&Path>, node: &str, barclamp: &str, role: &str, format: &str) -> Result<()> {
    let cfg = super::load_config(config_path)?;
    let plane = super::local_plane(cfg)?;
    let decision = super::block_on(plane.role_decision(node, barclamp, role))?
        .with_context(|| format!("node {node} is not in the inventory"))?;

    if format == "json" {
        return super::output::print_output(format, &decision);
    }

    let verdict = if decision.applicable {
        "applicable".green()
    } else {
        "skipped".yellow()
    };
    println!("{} {} on {}: {}", barclamp, role.bold(), node, verdict);
    if let Some(reason) = &decision.skip {
        println!("  {}", reason.to_string().dimmed());
    }
    Ok(())
}
