//! `fleetgate check` — run readiness checks against the inventory.
//!
//! Exits 1 when anything was found, so scripts can gate on it.

use std::path::Path;

use anyhow::Result;
use colored::Colorize;

use crate::domain::health_report::{Check, HealthReport};

pub fn run(config_path: Option<&Path>, name: Option<&str>, save: bool, format: &str) -> Result<()> {
    let check = name
        .map(|n| n.parse::<Check>().map_err(anyhow::Error::msg))
        .transpose()?;

    let cfg = super::load_config(config_path)?;
    let plane = super::local_plane(cfg)?;

    let report: HealthReport = super::block_on(async {
        match check {
            Some(check) => Ok(plane.run_check(check).await),
            // Full runs are persisted only on request, the daemon owns the file
            None if save => plane.refresh().await.map(|stored| stored.report),
            None => Ok(plane.run_all().await),
        }
    })??;

    match format {
        "json" => super::output::print_output(format, &report)?,
        _ => {
            let title = match check {
                Some(check) => format!("fleetgate check {check}"),
                None => "fleetgate check".to_string(),
            };
            println!("{}", title.bold());
            super::output::print_report(&report)?;
        }
    }

    if !report.is_empty() {
        std::process::exit(1);
    }
    Ok(())
}
