pub mod check;
pub mod daemon;
pub mod output;
pub mod query;
pub mod repocheck;
pub mod role;
pub mod status;
pub mod upgrade;

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;

use crate::config::{self, Config};
use crate::domain::control_plane::ControlPlane;
use crate::domain::remote::SshExecutor;

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => config::load_from(path),
        None => config::load(),
    }
}

/// A control plane working directly on the inventory file, without a daemon.
pub fn local_plane(cfg: Config) -> Result<ControlPlane> {
    let executor = Arc::new(SshExecutor::new(&cfg.remote));
    ControlPlane::new(cfg, executor)
}

/// Commands build their runtime explicitly; `main` stays synchronous.
pub fn block_on<F: std::future::Future>(future: F) -> Result<F::Output> {
    let runtime = tokio::runtime::Runtime::new()?;
    Ok(runtime.block_on(future))
}
