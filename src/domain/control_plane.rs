//! Control plane service — the operations behind the API and CLI.
//!
//! Readiness reports follow a one-way pipeline:
//!   checks → ReportStore (file) → memory cache → API
//!
//! `cached_report()` never runs checks; `refresh()` drives the pipeline.
//! The inventory snapshot can be swapped at runtime; checks already running
//! keep the snapshot they started with.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_graphql::SimpleObject;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::config::Config;

use super::fleet::{FleetDirectory, Inventory};
use super::health_check::{CheckSettings, HealthCheckOrchestrator, CEPH_NODES_QUERY, FOUNDERS_QUERY};
use super::health_report::{Check, HealthReport};
use super::remote::RemoteExecutor;
use super::repocheck::{RepoCheckError, RepositoryCheckReport, RepositoryVersionChecker};
use super::report_store::ReportStore;
use super::role_applicability::{self, RoleDecision};
use super::stored_report::StoredReport;
use super::upgrade_state::{UpgradeError, UpgradeFlags, UpgradePhase, UpgradeState};

/// Add-ons reported by `status()` when installed and deployed.
const ADDONS: [(&str, &str); 2] = [("ceph", CEPH_NODES_QUERY), ("ha", FOUNDERS_QUERY)];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, SimpleObject)]
pub struct PlatformStatus {
    /// Installed cloud version, from the environment.
    pub version: Option<String>,
    pub addons: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, SimpleObject)]
pub struct UpgradeStatus {
    pub version: Option<String>,
    pub addons: Vec<String>,
    pub upgrade: UpgradeFlags,
    pub phase: UpgradePhase,
}

#[derive(Debug, Clone, Serialize, Deserialize, SimpleObject)]
pub struct UpgradeLaunch {
    pub pid: Option<u32>,
    pub message: String,
}

pub struct ControlPlane {
    config: Config,
    inventory: RwLock<Arc<Inventory>>,
    executor: Arc<dyn RemoteExecutor>,
    upgrade: UpgradeState,
    cache: RwLock<Option<StoredReport>>,
    store: ReportStore,
}

impl ControlPlane {
    /// Load the configured inventory and wire up the services.
    pub fn new(config: Config, executor: Arc<dyn RemoteExecutor>) -> Result<Self> {
        let inventory = Inventory::load(&config.inventory)?;
        info!(
            path = %config.inventory.display(),
            nodes = inventory.nodes.len(),
            proposals = inventory.proposals.len(),
            "loaded inventory"
        );
        Ok(Self::with_inventory(config, inventory, executor))
    }

    pub fn with_inventory(
        config: Config,
        inventory: Inventory,
        executor: Arc<dyn RemoteExecutor>,
    ) -> Self {
        let upgrade = UpgradeState::new(&config.upgrade);
        let store = ReportStore::new(config.daemon.report_file.clone());
        Self {
            config,
            inventory: RwLock::new(Arc::new(inventory)),
            executor,
            upgrade,
            cache: RwLock::new(None),
            store,
        }
    }

    async fn snapshot(&self) -> Arc<Inventory> {
        self.inventory.read().await.clone()
    }

    // ── Status ─────────────────────────────────────────────

    pub async fn status(&self) -> PlatformStatus {
        let inventory = self.snapshot().await;
        let addons = ADDONS
            .iter()
            .filter(|(addon, query)| {
                self.config.addon_installed(addon) && !inventory.find_str(query).is_empty()
            })
            .map(|(addon, _)| addon.to_string())
            .collect();
        PlatformStatus {
            version: std::env::var(&self.config.version_env).ok(),
            addons,
        }
    }

    pub async fn upgrade_status(&self) -> UpgradeStatus {
        let PlatformStatus { version, addons } = self.status().await;
        let flags = self.upgrade.flags();
        UpgradeStatus {
            version,
            addons,
            upgrade: flags,
            phase: flags.phase(),
        }
    }

    pub async fn start_upgrade(&self) -> Result<UpgradeLaunch, UpgradeError> {
        let pid = self.upgrade.start().await?;
        Ok(UpgradeLaunch {
            pid,
            message: format!("{} started", self.config.upgrade.launcher.display()),
        })
    }

    // ── Checks ─────────────────────────────────────────────

    fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.config.remote.command_timeout_secs)
    }

    fn repositories(&self, inventory: Arc<Inventory>) -> RepositoryVersionChecker {
        RepositoryVersionChecker::new(
            inventory,
            self.executor.clone(),
            self.config.repositories.products_command.clone(),
            self.command_timeout(),
        )
    }

    async fn orchestrator(&self) -> HealthCheckOrchestrator {
        let inventory = self.snapshot().await;
        let repos = &self.config.repositories;
        HealthCheckOrchestrator::new(
            inventory.clone(),
            inventory.clone(),
            self.executor.clone(),
            inventory.barclamp_catalog(),
            self.repositories(inventory),
            CheckSettings {
                command_timeout: self.command_timeout(),
                ha_installed: self.config.addon_installed("ha"),
                current_version: repos.current_version.clone(),
                next_version: repos.next_version.clone(),
                patch_check_command: repos.patch_check_command.clone(),
            },
        )
    }

    pub async fn run_check(&self, check: Check) -> HealthReport {
        info!(%check, "running check");
        self.orchestrator().await.run(check).await
    }

    /// Run every check without touching the persisted report.
    pub async fn run_all(&self) -> HealthReport {
        self.orchestrator().await.run_all().await
    }

    /// Run every check, persist the report and update the cache.
    pub async fn refresh(&self) -> Result<StoredReport> {
        let report = self.run_all().await;
        let stored = StoredReport::new(report);

        self.store.save(&stored).await?;
        info!(
            path = %self.store.path().display(),
            checksum = %stored.checksum,
            findings = stored.report.len(),
            "readiness report written to disk"
        );

        *self.cache.write().await = Some(stored.clone());
        Ok(stored)
    }

    pub async fn cached_report(&self) -> Option<StoredReport> {
        self.cache.read().await.clone()
    }

    /// Populate the cache from the persisted report (startup). A missing or
    /// corrupt file leaves the cache empty.
    pub async fn load_from_disk(&self) {
        match self.store.load().await {
            Ok(Some(stored)) => {
                info!(
                    age_secs = stored.age_secs(),
                    checksum = %stored.checksum,
                    "loaded readiness report from disk"
                );
                *self.cache.write().await = Some(stored);
            }
            Ok(None) => info!("no persisted readiness report, cache starts empty"),
            Err(e) => warn!(error = %e, "failed to load readiness report, will re-run checks"),
        }
    }

    pub async fn repocheck(&self, version: &str) -> Result<RepositoryCheckReport, RepoCheckError> {
        let inventory = self.snapshot().await;
        self.repositories(inventory).check(version).await
    }

    // ── Inventory ──────────────────────────────────────────

    /// `None` when the node is not in the fleet.
    pub async fn role_decision(&self, node: &str, barclamp: &str, role: &str) -> Option<RoleDecision> {
        let node = self.snapshot().await.node(node)?;
        Some(role_applicability::decide(&node, barclamp, role))
    }

    /// Re-read the inventory file and swap it in. Returns the node count.
    pub async fn reload_inventory(&self) -> Result<usize> {
        let inventory = Inventory::load(&self.config.inventory)?;
        let nodes = inventory.nodes.len();
        *self.inventory.write().await = Arc::new(inventory);
        info!(nodes, "inventory reloaded");
        Ok(nodes)
    }
}
