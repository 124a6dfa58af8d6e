//! Configuration: built-in defaults, then `config.yaml`, then `FLEETGATE_*`
//! environment variables (nested keys split on `__`).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// YAML snapshot backing the fleet directory and proposal store.
    pub inventory: PathBuf,
    /// Environment variable holding the installed cloud version.
    pub version_env: String,
    /// Add-ons whose barclamps are installed on the admin server.
    pub addons: Vec<String>,
    pub daemon: DaemonConfig,
    pub remote: RemoteConfig,
    pub upgrade: UpgradeConfig,
    pub repositories: RepositoryConfig,
    /// Named daemons for `fleetgate query --node`.
    pub nodes: HashMap<String, NodeTarget>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            inventory: PathBuf::from("/etc/fleetgate/inventory.yaml"),
            version_env: "CROWBAR_VERSION".to_string(),
            addons: Vec::new(),
            daemon: DaemonConfig::default(),
            remote: RemoteConfig::default(),
            upgrade: UpgradeConfig::default(),
            repositories: RepositoryConfig::default(),
            nodes: HashMap::new(),
        }
    }
}

impl Config {
    pub fn path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().context("could not determine config directory")?;
        Ok(config_dir.join("fleetgate").join("config.yaml"))
    }

    pub fn addon_installed(&self, addon: &str) -> bool {
        self.addons.iter().any(|a| a == addon)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub http_addr: String,
    pub log_level: String,
    /// Where the last full readiness report is persisted.
    pub report_file: PathBuf,
    /// Re-run all checks this often; 0 disables the timer.
    pub refresh_interval_secs: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            http_addr: "127.0.0.1:9200".to_string(),
            log_level: "info".to_string(),
            report_file: PathBuf::from("/var/lib/fleetgate/readiness-report.json"),
            refresh_interval_secs: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub ssh_user: String,
    pub connect_timeout_secs: u64,
    /// Upper bound for a single remote command, connection included.
    pub command_timeout_secs: u64,
    pub domain: Option<String>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            ssh_user: "root".to_string(),
            connect_timeout_secs: 5,
            command_timeout_secs: 60,
            domain: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpgradeConfig {
    /// Directory holding the upgrade state markers.
    pub state_dir: PathBuf,
    /// Script performing the admin server upgrade.
    pub launcher: PathBuf,
    /// Prefix command for the launcher (e.g. `sudo`); empty runs it directly.
    pub launcher_prefix: Vec<String>,
}

impl Default for UpgradeConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from("/var/lib/crowbar/install"),
            launcher: PathBuf::from("/opt/dell/bin/upgrade_admin_server.sh"),
            launcher_prefix: vec!["sudo".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    pub current_version: String,
    pub next_version: String,
    /// Product inventory command; must print zypper's XML stream.
    pub products_command: String,
    pub patch_check_command: String,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            current_version: "6".to_string(),
            next_version: "7".to_string(),
            products_command: "sudo /usr/bin/zypper-retry --xmlout products".to_string(),
            patch_check_command: "zypper --non-interactive patch-check".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeTarget {
    pub url: String,
}

/// Load from the default path (missing file is fine).
pub fn load() -> Result<Config> {
    load_from(&Config::path()?)
}

/// Load with `path` as the YAML layer.
pub fn load_from(path: &Path) -> Result<Config> {
    Figment::from(Serialized::defaults(Config::default()))
        .merge(Yaml::file(path))
        .merge(Env::prefixed("FLEETGATE_").split("__"))
        .extract()
        .with_context(|| format!("loading configuration from {}", path.display()))
}
