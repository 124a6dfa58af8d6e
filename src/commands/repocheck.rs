//! `fleetgate repocheck` — are the repositories for a cloud version in place?

use std::path::Path;

use anyhow::Result;
use colored::Colorize;

use crate::domain::repocheck::ProductAvailability;

pub fn run(config_path: Option<&Path>, version: &str, format: &str) -> Result<()> {
    let cfg = super::load_config(config_path)?;
    let plane = super::local_plane(cfg)?;
    let report = super::block_on(plane.repocheck(version))??;

    if format == "json" {
        return super::output::print_output(format, &report);
    }

    println!("{}", format!("fleetgate repocheck {version}").bold());
    print_product("os", &report.os);
    print_product("openstack", &report.openstack);
    Ok(())
}

fn print_product(label: &str, product: &ProductAvailability) {
    if product.available {
        println!("  {:<10} {}", label, "available".green());
        return;
    }
    println!("  {:<10} {}", label, "missing".red());
    for (arch, missing) in &product.errors {
        println!("    {}: {}", arch.dimmed(), missing.missing.join(", "));
    }
}
