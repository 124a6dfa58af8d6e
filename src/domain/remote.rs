//! Remote command execution on fleet nodes.
//!
//! Every call is a single round-trip with its own timeout and no retry.
//! Callers decide what a failure means for their check.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use crate::config::RemoteConfig;

/// Outcome of one remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteCommandResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl RemoteCommandResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// The command never produced an exit status.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("command on {node} timed out after {timeout_secs}s")]
    Timeout { node: String, timeout_secs: u64 },

    #[error("failed to reach {node}: {source}")]
    Spawn {
        node: String,
        #[source]
        source: std::io::Error,
    },

    #[error("ssh to {node} failed: {detail}")]
    Unreachable { node: String, detail: String },

    #[error("connection to {node} was terminated by a signal")]
    Killed { node: String },
}

impl TransportError {
    pub fn key(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "remote_timeout",
            Self::Spawn { .. } | Self::Unreachable { .. } | Self::Killed { .. } => {
                "remote_unreachable"
            }
        }
    }
}

#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    async fn run(
        &self,
        node: &str,
        command: &str,
        timeout: Duration,
    ) -> Result<RemoteCommandResult, TransportError>;
}

/// Runs commands over `ssh` in batch mode.
pub struct SshExecutor {
    user: String,
    connect_timeout_secs: u64,
    /// DNS domain appended to short node names.
    domain: Option<String>,
}

impl SshExecutor {
    pub fn new(config: &RemoteConfig) -> Self {
        Self {
            user: config.ssh_user.clone(),
            connect_timeout_secs: config.connect_timeout_secs,
            domain: config.domain.clone(),
        }
    }

    fn destination(&self, node: &str) -> String {
        match &self.domain {
            Some(domain) if !node.contains('.') => format!("{}@{node}.{domain}", self.user),
            _ => format!("{}@{node}", self.user),
        }
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn run(
        &self,
        node: &str,
        command: &str,
        timeout: Duration,
    ) -> Result<RemoteCommandResult, TransportError> {
        let destination = self.destination(node);
        debug!(node, command, "running remote command");

        let child = Command::new("ssh")
            .args([
                "-o",
                "BatchMode=yes",
                "-o",
                &format!("ConnectTimeout={}", self.connect_timeout_secs),
                &destination,
                command,
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| TransportError::Spawn {
                node: node.to_string(),
                source,
            })?;

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => {
                return Err(TransportError::Spawn {
                    node: node.to_string(),
                    source,
                })
            }
            Err(_) => {
                return Err(TransportError::Timeout {
                    node: node.to_string(),
                    timeout_secs: timeout.as_secs(),
                })
            }
        };

        // ssh reserves 255 for its own connection failures
        let exit_code = match output.status.code() {
            Some(255) => {
                return Err(TransportError::Unreachable {
                    node: node.to_string(),
                    detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                })
            }
            Some(code) => code,
            None => {
                return Err(TransportError::Killed {
                    node: node.to_string(),
                })
            }
        };

        Ok(RemoteCommandResult {
            exit_code,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
