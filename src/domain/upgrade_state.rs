//! Admin server upgrade state, persisted as marker files.
//!
//! `Idle → Upgrading → {Succeeded, Failed}`. Each marker is written at most
//! once per attempt and readers only test for existence. The `Upgrading`
//! marker is created with `create_new`, so of two concurrent `start` calls
//! exactly one wins.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_graphql::{Enum, SimpleObject};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::fs;
use tracing::{error, info, warn};

use crate::config::UpgradeConfig;

pub const UPGRADING_MARKER: &str = "admin_server_upgrading";
pub const SUCCEEDED_MARKER: &str = "admin-server-upgraded-ok";
pub const FAILED_MARKER: &str = "admin-server-upgrade-failed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Enum)]
#[serde(rename_all = "snake_case")]
pub enum UpgradePhase {
    Idle,
    Upgrading,
    Succeeded,
    Failed,
}

/// Raw marker presence, as reported by `upgrade()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, SimpleObject)]
pub struct UpgradeFlags {
    pub upgrading: bool,
    pub success: bool,
    pub failed: bool,
}

impl UpgradeFlags {
    pub fn phase(self) -> UpgradePhase {
        if self.upgrading {
            UpgradePhase::Upgrading
        } else if self.failed {
            UpgradePhase::Failed
        } else if self.success {
            UpgradePhase::Succeeded
        } else {
            UpgradePhase::Idle
        }
    }
}

#[derive(Debug, Error)]
pub enum UpgradeError {
    #[error("an upgrade of the admin server is already in progress")]
    InProgress,

    #[error("upgrade launcher {} does not exist", .0.display())]
    LauncherMissing(PathBuf),

    #[error("failed to launch {}: {source}", .launcher.display())]
    Launch {
        launcher: PathBuf,
        source: std::io::Error,
    },

    #[error("updating upgrade marker {}: {source}", .path.display())]
    Marker {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl UpgradeError {
    pub fn key(&self) -> &'static str {
        match self {
            Self::InProgress => "upgrade_ongoing",
            Self::LauncherMissing(_) => "upgrade_script_missing",
            Self::Launch { .. } => "upgrade_launch_failed",
            Self::Marker { .. } => "upgrade_state_error",
        }
    }
}

pub struct UpgradeState {
    dir: PathBuf,
    launcher: PathBuf,
    launcher_prefix: Vec<String>,
}

impl UpgradeState {
    pub fn new(config: &UpgradeConfig) -> Self {
        Self {
            dir: config.state_dir.clone(),
            launcher: config.launcher.clone(),
            launcher_prefix: config.launcher_prefix.clone(),
        }
    }

    fn marker(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    pub fn flags(&self) -> UpgradeFlags {
        UpgradeFlags {
            upgrading: self.marker(UPGRADING_MARKER).exists(),
            success: self.marker(SUCCEEDED_MARKER).exists(),
            failed: self.marker(FAILED_MARKER).exists(),
        }
    }

    pub fn phase(&self) -> UpgradePhase {
        self.flags().phase()
    }

    /// Diagnostic payload recorded with the last failure, if any.
    pub async fn failure_details(&self) -> Option<Value> {
        let content = fs::read_to_string(self.marker(FAILED_MARKER)).await.ok()?;
        serde_json::from_str(&content).ok()
    }

    /// Launch the upgrade in the background and return its pid. The caller
    /// polls `phase()` for the outcome.
    pub async fn start(&self) -> Result<Option<u32>, UpgradeError> {
        if self.phase() == UpgradePhase::Upgrading {
            return Err(UpgradeError::InProgress);
        }
        if !self.launcher.exists() {
            error!(launcher = %self.launcher.display(), "upgrade launcher not found");
            return Err(UpgradeError::LauncherMissing(self.launcher.clone()));
        }

        let launched = match self.claim().await {
            Ok(()) => self.launch().await,
            Err(UpgradeError::InProgress) => return Err(UpgradeError::InProgress),
            Err(e) => {
                // the marker was never ours, so only the outcome is written
                error!(error = %e, "could not claim the upgrade");
                self.write_failure(&e.to_string()).await;
                return Err(e);
            }
        };

        match launched {
            Ok(pid) => {
                info!(launcher = %self.launcher.display(), pid, "admin server upgrade launched");
                Ok(pid)
            }
            Err(e) => {
                error!(error = %e, "admin server upgrade failed to start");
                self.write_failure(&e.to_string()).await;
                remove_marker(&self.marker(UPGRADING_MARKER)).await;
                Err(e)
            }
        }
    }

    /// Create the `Upgrading` marker. Earlier outcome markers stay until
    /// `finish` replaces them.
    async fn claim(&self) -> Result<(), UpgradeError> {
        let marker = self.marker(UPGRADING_MARKER);
        let io_err = |source| UpgradeError::Marker {
            path: marker.clone(),
            source,
        };

        fs::create_dir_all(&self.dir).await.map_err(io_err)?;
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&marker)
            .await
        {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Err(UpgradeError::InProgress),
            Err(e) => return Err(io_err(e)),
        }
        Ok(())
    }

    async fn launch(&self) -> Result<Option<u32>, UpgradeError> {
        let mut command = match self.launcher_prefix.split_first() {
            Some((program, args)) => {
                let mut c = tokio::process::Command::new(program);
                c.args(args).arg(&self.launcher);
                c
            }
            None => tokio::process::Command::new(&self.launcher),
        };
        // The child is dropped right away; tokio reaps it in the background.
        let child = command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| UpgradeError::Launch {
                launcher: self.launcher.clone(),
                source,
            })?;
        Ok(child.id())
    }

    /// Record the outcome reported by the launcher.
    pub async fn finish(&self, success: bool, diagnostic: Option<&str>) -> Result<(), UpgradeError> {
        if self.phase() != UpgradePhase::Upgrading {
            warn!("recording upgrade outcome without an upgrade in progress");
        }
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| UpgradeError::Marker {
                path: self.dir.clone(),
                source,
            })?;

        let (name, stale, content) = if success {
            (SUCCEEDED_MARKER, FAILED_MARKER, String::new())
        } else {
            (
                FAILED_MARKER,
                SUCCEEDED_MARKER,
                failure_payload(diagnostic.unwrap_or("the upgrade script reported a failure")),
            )
        };
        let path = self.marker(name);
        fs::write(&path, content)
            .await
            .map_err(|source| UpgradeError::Marker {
                path: path.clone(),
                source,
            })?;

        remove_marker(&self.marker(stale)).await;
        remove_marker(&self.marker(UPGRADING_MARKER)).await;
        info!(success, "admin server upgrade finished");
        Ok(())
    }

    async fn write_failure(&self, data: &str) {
        let path = self.marker(FAILED_MARKER);
        if let Err(e) = fs::write(&path, failure_payload(data)).await {
            error!(path = %path.display(), error = %e, "could not write failure marker");
        }
    }
}

fn failure_payload(data: &str) -> String {
    json!({
        "admin": {
            "data": data,
            "help": "Inspect the admin server upgrade log, fix the cause and restart the upgrade.",
        }
    })
    .to_string()
}

async fn remove_marker(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "could not remove marker"),
    }
}
