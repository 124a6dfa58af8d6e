use std::path::Path;

use anyhow::Result;

pub fn run(
    http_addr: Option<String>,
    log_level: Option<String>,
    inventory: Option<String>,
    config_path: Option<&Path>,
) -> Result<()> {
    let mut cfg = super::load_config(config_path)?;

    // CLI flags override config values
    if let Some(addr) = http_addr {
        cfg.daemon.http_addr = addr;
    }
    if let Some(level) = log_level {
        cfg.daemon.log_level = level;
    }
    if let Some(path) = inventory {
        cfg.inventory = path.into();
    }

    // Build tokio runtime explicitly (no #[tokio::main] on fn main)
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(crate::server::run(cfg))
}
