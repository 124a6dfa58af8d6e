//! Upgrade readiness checks.
//!
//! Each check reads the fleet directory and proposal store, may run remote
//! commands, and returns its own `HealthReport`. Checks share no mutable
//! state and never fail as a whole: unreachable nodes and odd command output
//! become entries in the report. `run_all` runs every check concurrently and
//! merges the results.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, info, warn};

use super::catalog::{BarclampCatalog, Category};
use super::fleet::{FleetDirectory, ProposalStore};
use super::health_report::{Check, CheckKey, Finding, HealthReport};
use super::node::{Node, STATE_UPGRADE};
use super::proposal::is_cluster;
use super::remote::{RemoteCommandResult, RemoteExecutor};
use super::repocheck::{leading_version, RepositoryVersionChecker};
use super::role_applicability::{self, SkipReason};

pub(crate) const FOUNDERS_QUERY: &str = "pacemaker_founder:true AND pacemaker_config_environment:*";
pub(crate) const CEPH_NODES_QUERY: &str = "roles:ceph-* AND ceph_config_environment:*";
const CEPH_MON_QUERY: &str = "run_list_map:ceph-mon AND ceph_config_environment:*";

const CRM_STATUS: &str = "crm status 2>&1";
const CRM_FAILED_ACTIONS: &str = "LANG=C crm status | grep -A 2 '^Failed Actions:'";
const CEPH_HEALTH: &str = "LANG=C ceph health --connect-timeout 5 2>&1";
const CEPH_VERSION: &str = "LANG=C ceph --version | cut -d ' ' -f 3";
const LBAAS_POOLS: &str = "source /root/.openrc; neutron lb-pool-list -f value -c id";

/// Ceph releases before Jewel cannot be upgraded in place.
const CEPH_MIN_VERSION: f64 = 10.2;

const VIRT_BACKENDS: [&str; 2] = ["kvm", "xen"];

/// Roles that must be deployed to a cluster for a non-disruptive upgrade.
const CLUSTERED_ROLES: [&str; 8] = [
    "database-server",
    "rabbitmq-server",
    "keystone-server",
    "glance-server",
    "cinder-controller",
    "neutron-server",
    "neutron-network",
    "nova-controller",
];

const CLUSTERED_BARCLAMPS: [&str; 7] = [
    "database", "rabbitmq", "keystone", "glance", "cinder", "neutron", "nova",
];

/// Controller roles that must not share a node with nova-compute.
const CONFLICTING_ROLES: [&str; 13] = [
    "cinder-controller",
    "glance-server",
    "keystone-server",
    "neutron-server",
    "neutron-network",
    "nova-controller",
    "swift-proxy",
    "swift-ring-compute",
    "ceilometer-server",
    "heat-server",
    "horizon-server",
    "manila-server",
    "trove-server",
];

/// Storage roles checked elsewhere; they do not affect deployment order.
const ORDER_EXEMPT_ROLES: [&str; 2] = ["cinder-volume", "swift-storage"];

/// Knobs the checks need from configuration.
#[derive(Debug, Clone)]
pub struct CheckSettings {
    pub command_timeout: Duration,
    pub ha_installed: bool,
    pub current_version: String,
    pub next_version: String,
    pub patch_check_command: String,
}

pub struct HealthCheckOrchestrator {
    fleet: Arc<dyn FleetDirectory>,
    proposals: Arc<dyn ProposalStore>,
    executor: Arc<dyn RemoteExecutor>,
    catalog: BarclampCatalog,
    repositories: RepositoryVersionChecker,
    settings: CheckSettings,
}

impl HealthCheckOrchestrator {
    pub fn new(
        fleet: Arc<dyn FleetDirectory>,
        proposals: Arc<dyn ProposalStore>,
        executor: Arc<dyn RemoteExecutor>,
        catalog: BarclampCatalog,
        repositories: RepositoryVersionChecker,
        settings: CheckSettings,
    ) -> Self {
        Self {
            fleet,
            proposals,
            executor,
            catalog,
            repositories,
            settings,
        }
    }

    pub fn repositories(&self) -> &RepositoryVersionChecker {
        &self.repositories
    }

    /// Run every check and merge the results.
    pub async fn run_all(&self) -> HealthReport {
        let (clusters, ceph, openstack, maintenance) = tokio::join!(
            self.clusters_health_report(),
            self.ceph_status(),
            self.openstack_check(),
            self.maintenance_updates_check(),
        );

        let report: HealthReport = [
            self.nodes_status(),
            clusters,
            ceph,
            openstack,
            self.compute_status(),
            self.ha_config_check(),
            self.deployment_check(),
            maintenance,
        ]
        .into_iter()
        .collect();

        info!(findings = report.len(), "readiness checks finished");
        report
    }

    pub async fn run(&self, check: Check) -> HealthReport {
        match check {
            Check::NodesStatus => self.nodes_status(),
            Check::ClustersHealth => self.clusters_health_report().await,
            Check::CephStatus => self.ceph_status().await,
            Check::Openstack => self.openstack_check().await,
            Check::ComputeStatus => self.compute_status(),
            Check::HaConfig => self.ha_config_check(),
            Check::Deployment => self.deployment_check(),
            Check::MaintenanceUpdates => self.maintenance_updates_check().await,
        }
    }

    async fn remote(&self, node: &str, command: &str) -> Result<RemoteCommandResult, String> {
        self.executor
            .run(node, command, self.settings.command_timeout)
            .await
            .map_err(|e| {
                warn!(node, command, error = %e, "remote command failed");
                e.to_string()
            })
    }

    // ── Nodes and proposals ────────────────────────────────

    /// Nodes that are not ready and active proposals that failed. Ceph nodes
    /// are skipped: they are expected to be in the upgrade state already.
    pub fn nodes_status(&self) -> HealthReport {
        let mut report = HealthReport::new();

        let unready: Vec<String> = self
            .fleet
            .find_str("NOT roles:ceph-*")
            .into_iter()
            .filter(|n| !n.is_ready())
            .map(|n| n.name)
            .collect();
        if !unready.is_empty() {
            report.insert(CheckKey::NodesNotReady, Finding::Names(unready));
        }

        let failed: Vec<String> = self
            .proposals
            .all()
            .iter()
            .filter(|p| p.active && p.failed)
            .map(|p| p.display_name())
            .collect();
        if !failed.is_empty() {
            report.insert(CheckKey::FailedProposals, Finding::Names(failed));
        }

        report
    }

    // ── Pacemaker ──────────────────────────────────────────

    /// `crm status` on every cluster founder. A founder whose status call
    /// fails is not also checked for failed actions.
    pub async fn clusters_health_report(&self) -> HealthReport {
        let mut report = HealthReport::new();
        let founders = self.fleet.find_str(FOUNDERS_QUERY);
        if founders.is_empty() {
            return report;
        }

        let results = join_all(founders.iter().map(|n| self.founder_health(n))).await;
        for (founder, health) in founders.iter().zip(results) {
            match health {
                FounderHealth::Healthy => {}
                FounderHealth::CrmFailure(message) => {
                    report.insert_for_node(CheckKey::CrmFailures, &founder.name, message)
                }
                FounderHealth::FailedActions(message) => {
                    report.insert_for_node(CheckKey::FailedActions, &founder.name, message)
                }
            }
        }
        report
    }

    async fn founder_health(&self, founder: &Node) -> FounderHealth {
        let name = founder.name.as_str();
        match self.remote(name, CRM_STATUS).await {
            Err(e) => return FounderHealth::CrmFailure(format!("{name}: {e}")),
            Ok(status) if !status.success() => {
                warn!(node = name, output = %status.stdout, "crm status reports error");
                return FounderHealth::CrmFailure(node_output(name, &status));
            }
            Ok(_) => {}
        }

        match self.remote(name, CRM_FAILED_ACTIONS).await {
            Err(e) => FounderHealth::CrmFailure(format!("{name}: {e}")),
            // grep exits 0 only when the section exists
            Ok(actions) if actions.success() => {
                warn!(node = name, output = %actions.stdout, "crm reports failed actions");
                FounderHealth::FailedActions(node_output(name, &actions))
            }
            Ok(_) => FounderHealth::Healthy,
        }
    }

    // ── Ceph ───────────────────────────────────────────────

    pub async fn ceph_status(&self) -> HealthReport {
        let mut report = HealthReport::new();
        let ceph_nodes = self.fleet.find_str(CEPH_NODES_QUERY);
        if ceph_nodes.is_empty() {
            return report;
        }

        let Some(mon) = self.fleet.find_str(CEPH_MON_QUERY).into_iter().next() else {
            report.insert(
                CheckKey::HealthErrors,
                Finding::Text("no Ceph monitor node found".to_string()),
            );
            return report;
        };

        // Some warnings are harmless, but there is no telling them apart; the
        // operator has to bring the cluster to HEALTH_OK.
        let health = match self.remote(&mon.name, CEPH_HEALTH).await {
            Ok(health) => health,
            Err(e) => {
                report.insert(CheckKey::HealthErrors, Finding::Text(e));
                return report;
            }
        };
        if !health.stdout.contains("HEALTH_OK") {
            let mut errors = health.stdout.clone();
            if !health.stderr.is_empty() {
                if !health.stdout.is_empty() {
                    errors.push_str("; ");
                }
                errors.push_str(&health.stderr);
            }
            report.insert(CheckKey::HealthErrors, Finding::Text(errors));
            return report;
        }

        match self.remote(&mon.name, CEPH_VERSION).await {
            Ok(version) if leading_version(&version.stdout) < CEPH_MIN_VERSION => {
                report.insert(CheckKey::OldVersion, Finding::Flag(true));
            }
            Ok(_) => {}
            Err(e) => report.insert_for_node(
                CheckKey::UnreachableNodes,
                &mon.name,
                format!("ceph version: {e}"),
            ),
        }

        let not_prepared: Vec<String> = ceph_nodes
            .into_iter()
            .filter(|n| n.state != STATE_UPGRADE)
            .map(|n| n.name)
            .collect();
        if !not_prepared.is_empty() {
            report.insert(CheckKey::NotPrepared, Finding::Names(not_prepared));
        }
        report
    }

    // ── OpenStack services ─────────────────────────────────

    pub async fn openstack_check(&self) -> HealthReport {
        let mut report = HealthReport::new();

        if let Some(swift) = self.proposals.find("swift") {
            let replicas = swift
                .attribute(&["swift", "replicas"])
                .and_then(|v| v.as_u64())
                .unwrap_or(0);
            let disks: u64 = self
                .fleet
                .find_str("roles:swift-storage")
                .iter()
                .map(|n| match n.attribute(&["swift", "devs"]) {
                    Some(serde_json::Value::Array(devs)) => devs.len() as u64,
                    Some(serde_json::Value::Object(devs)) => devs.len() as u64,
                    _ => 0,
                })
                .sum();
            if replicas > disks {
                report.insert(CheckKey::TooManyReplicas, Finding::Count(replicas));
            }
        }

        if let Some(keystone) = self.proposals.find("keystone") {
            let driver = keystone
                .attribute(&["keystone", "identity", "driver"])
                .and_then(|v| v.as_str())
                .unwrap_or("sql");
            if driver == "hybrid" {
                report.insert(CheckKey::KeystoneHybridBackend, Finding::Flag(true));
            }
        }

        if let Some(neutron) = self.proposals.find("neutron") {
            let flag = |key: &str| {
                neutron
                    .attribute(&["neutron", key])
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false)
            };
            if flag("use_lbaas") && !flag("use_lbaasv2") {
                // v1 is configured; only flag it if pools actually exist
                match self.fleet.find_str("roles:neutron-server").into_iter().next() {
                    Some(server) => match self.remote(&server.name, LBAAS_POOLS).await {
                        Ok(out) if !out.stdout.trim().is_empty() => {
                            report.insert(CheckKey::LbaasV1, Finding::Flag(true));
                        }
                        Ok(_) => debug!("LBaaS v1 configured but no pools defined"),
                        Err(e) => report.insert_for_node(
                            CheckKey::UnreachableNodes,
                            &server.name,
                            format!("lbaas pools: {e}"),
                        ),
                    },
                    None => warn!("LBaaS v1 configured but no neutron-server node found"),
                }
            }
        }

        report
    }

    // ── Compute ────────────────────────────────────────────

    pub fn compute_status(&self) -> HealthReport {
        let mut report = HealthReport::new();

        let lonely: Vec<String> = VIRT_BACKENDS
            .iter()
            .filter(|virt| {
                self.fleet
                    .find_str(&format!("roles:nova-compute-{virt}"))
                    .len()
                    == 1
            })
            .map(|virt| {
                format!(
                    "Found only one compute node of {virt} type; non-disruptive upgrade is not possible"
                )
            })
            .collect();
        if !lonely.is_empty() {
            report.insert(CheckKey::NoResources, Finding::Names(lonely));
        }

        if let Some(nova) = self.fleet.find_str("roles:nova-controller").into_iter().next() {
            let migration = nova
                .attribute(&["nova", "use_migration"])
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            if !migration {
                report.insert(CheckKey::NoLiveMigration, Finding::Flag(true));
            }
        }

        report
    }

    // ── HA topology ────────────────────────────────────────

    pub fn ha_config_check(&self) -> HealthReport {
        if !self.settings.ha_installed {
            return HealthReport::single(CheckKey::HaNotInstalled, Finding::Flag(true));
        }
        if self.fleet.find_str(FOUNDERS_QUERY).is_empty() {
            return HealthReport::single(CheckKey::HaNotConfigured, Finding::Flag(true));
        }

        let mut roles_not_ha: Vec<String> = Vec::new();
        for barclamp in CLUSTERED_BARCLAMPS {
            let Some(proposal) = self.proposals.find(barclamp) else {
                continue;
            };
            for (role, targets) in &proposal.elements {
                if !CLUSTERED_ROLES.contains(&role.as_str()) || roles_not_ha.contains(role) {
                    continue;
                }
                if targets.iter().any(|t| !is_cluster(t)) {
                    roles_not_ha.push(role.clone());
                }
            }
        }
        if !roles_not_ha.is_empty() {
            return HealthReport::single(CheckKey::RolesNotHa, Finding::Names(roles_not_ha));
        }

        let mut conflicts: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for virt in VIRT_BACKENDS {
            for node in self.fleet.find_str(&format!("roles:nova-compute-{virt}")) {
                let conflict: Vec<String> = node
                    .roles
                    .iter()
                    .filter(|r| CONFLICTING_ROLES.contains(&r.as_str()))
                    .filter(|r| self.role_active(&node, r))
                    .cloned()
                    .collect();
                if !conflict.is_empty() {
                    conflicts.insert(node.name.clone(), conflict);
                }
            }
        }

        let mut report = HealthReport::new();
        if !conflicts.is_empty() {
            report.insert(CheckKey::RoleConflicts, Finding::RolesPerNode(conflicts));
        }
        report
    }

    /// Whether an assigned role will actually run on the node in its current
    /// state. Only a state based skip takes a role out; roles the catalog
    /// cannot place, or whose barclamp left no attributes, are still carried.
    fn role_active(&self, node: &Node, role: &str) -> bool {
        let Some(barclamp) = self.catalog.barclamp_for_role(role) else {
            return true;
        };
        match role_applicability::decide(node, barclamp, role).skip {
            Some(reason @ (SkipReason::Applying { .. } | SkipReason::StateNotValid { .. })) => {
                debug!(node = %node.name, role, %reason, "skipping inactive role");
                false
            }
            Some(SkipReason::NoProposal) | None => true,
        }
    }

    // ── Deployment order ───────────────────────────────────

    /// A compute node carrying a role that is applied before nova would get
    /// that role upgraded after nova-compute. Reports the first such node.
    pub fn deployment_check(&self) -> HealthReport {
        let Some(nova_order) = self.catalog.run_order("nova") else {
            warn!("nova missing from barclamp catalog, skipping deployment check");
            return HealthReport::new();
        };

        for virt in VIRT_BACKENDS {
            for node in self.fleet.find_str(&format!("roles:nova-compute-{virt}")) {
                // controller and compute on one node is disruptive, but the
                // order is still right
                if node.has_role("nova-controller") {
                    continue;
                }
                let wrong_roles: Vec<String> = node
                    .roles
                    .iter()
                    .filter(|role| self.applied_before(role, nova_order))
                    .cloned()
                    .collect();
                if !wrong_roles.is_empty() {
                    return HealthReport::single(
                        CheckKey::ControllerRoles,
                        Finding::NodeRoles {
                            node: node.name,
                            roles: wrong_roles,
                        },
                    );
                }
            }
        }
        HealthReport::new()
    }

    fn applied_before(&self, role: &str, nova_order: u32) -> bool {
        if ORDER_EXEMPT_ROLES.contains(&role) || role.starts_with("nova-compute") {
            return false;
        }
        let Some(barclamp) = self.catalog.barclamp_for_role(role) else {
            return false;
        };
        if self.catalog.category(barclamp) != Some(Category::OpenStack) {
            return false;
        }
        self.catalog
            .run_order(barclamp)
            .is_some_and(|order| order < nova_order)
    }

    // ── Repositories and maintenance updates ───────────────

    /// Current-version channels must all be present, next-version channels
    /// must all be absent, and no maintenance updates may be pending.
    pub async fn maintenance_updates_check(&self) -> HealthReport {
        let current = match self.repositories.check(&self.settings.current_version).await {
            Ok(report) => report,
            Err(e) => return HealthReport::single(CheckKey::ZypperErrors, Finding::Text(e.to_string())),
        };
        if !current.all_available() {
            return HealthReport::single(
                CheckKey::RepositoriesMissing,
                Finding::Text(current.missing_repos().join(", ")),
            );
        }

        let next = match self.repositories.check(&self.settings.next_version).await {
            Ok(report) => report,
            Err(e) => return HealthReport::single(CheckKey::ZypperErrors, Finding::Text(e.to_string())),
        };
        if next.any_available() {
            return HealthReport::single(
                CheckKey::RepositoriesTooSoon,
                Finding::Text(next.available_repos().join(", ")),
            );
        }

        let updates = self.updates_status().await;
        if updates.is_empty() {
            HealthReport::new()
        } else {
            HealthReport::single(CheckKey::MaintenanceUpdates, Finding::Names(updates))
        }
    }

    /// Pending maintenance updates on the admin server, from `zypper
    /// patch-check` exit codes.
    async fn updates_status(&self) -> Vec<String> {
        let Some(admin) = self.fleet.admin_node() else {
            return Vec::new();
        };
        match self.remote(&admin.name, &self.settings.patch_check_command).await {
            Ok(out) => match out.exit_code {
                0 => Vec::new(),
                100 => vec!["Maintenance updates are pending on the admin server".to_string()],
                101 => vec![
                    "Security updates are pending on the admin server".to_string(),
                ],
                code => vec![format!(
                    "Checking for pending updates failed (exit code {code}): {}",
                    out.stderr.trim()
                )],
            },
            Err(e) => vec![e],
        }
    }
}

enum FounderHealth {
    Healthy,
    CrmFailure(String),
    FailedActions(String),
}

fn node_output(name: &str, result: &RemoteCommandResult) -> String {
    let mut message = format!("{name}: {}", result.stdout);
    if !result.stderr.trim().is_empty() {
        message.push(' ');
        message.push_str(&result.stderr);
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::fleet::{Inventory, Query};
    use crate::domain::proposal::Proposal;
    use crate::domain::remote::fake::ScriptedExecutor;
    use crate::domain::repocheck::fixtures::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const PRODUCTS: &str = "zypper --xmlout products";
    const PATCH_CHECK: &str = "zypper patch-check";

    fn orchestrator(inventory: &str, executor: ScriptedExecutor, ha: bool) -> HealthCheckOrchestrator {
        orchestrator_with(Inventory::from_yaml(inventory).unwrap(), Arc::new(executor), ha)
    }

    fn orchestrator_with(
        inventory: Inventory,
        executor: Arc<ScriptedExecutor>,
        ha: bool,
    ) -> HealthCheckOrchestrator {
        let catalog = inventory.barclamp_catalog();
        let inventory = Arc::new(inventory);
        let timeout = Duration::from_secs(5);
        let repositories =
            RepositoryVersionChecker::new(inventory.clone(), executor.clone(), PRODUCTS, timeout);
        HealthCheckOrchestrator::new(
            inventory.clone(),
            inventory,
            executor,
            catalog,
            repositories,
            CheckSettings {
                command_timeout: timeout,
                ha_installed: ha,
                current_version: "6".into(),
                next_version: "7".into(),
                patch_check_command: PATCH_CHECK.into(),
            },
        )
    }

    // ── nodes_status ──

    #[test]
    fn unready_nodes_and_failed_proposals() {
        let o = orchestrator(
            r#"
nodes:
  - { name: n1, state: ready }
  - { name: n2, state: applying }
  - { name: ceph1, state: crowbar_upgrade, roles: [ceph-osd] }
  - { name: n3, state: problem }
proposals:
  - { barclamp: nova, failed: true }
  - { barclamp: glance, active: false, failed: true }
  - { barclamp: keystone }
"#,
            ScriptedExecutor::new(),
            true,
        );
        let report = o.nodes_status();
        assert_eq!(
            report.get(CheckKey::NodesNotReady),
            Some(&Finding::Names(vec!["n2".into(), "n3".into()]))
        );
        assert_eq!(
            report.get(CheckKey::FailedProposals),
            Some(&Finding::Names(vec!["Nova: Default".into()]))
        );
    }

    #[test]
    fn healthy_fleet_reports_nothing() {
        let o = orchestrator(
            "nodes:\n  - { name: n1, state: ready }\n",
            ScriptedExecutor::new(),
            true,
        );
        assert!(o.nodes_status().is_empty());
    }

    // ── clusters_health_report ──

    const FOUNDERS: &str = r#"
nodes:
  - name: ctrl1
    state: ready
    attributes: { pacemaker: { founder: true, config: { environment: pacemaker-config-a } } }
  - name: ctrl2
    state: ready
    attributes: { pacemaker: { founder: true, config: { environment: pacemaker-config-b } } }
  - name: ctrl3
    state: ready
    attributes: { pacemaker: { founder: true, config: { environment: pacemaker-config-c } } }
  - name: member
    state: ready
    attributes: { pacemaker: { founder: false, config: { environment: pacemaker-config-a } } }
"#;

    #[tokio::test]
    async fn crm_failure_skips_failed_actions_probe() {
        let exec = Arc::new(
            ScriptedExecutor::new()
                .reply_full(
                    "ctrl1",
                    CRM_STATUS,
                    RemoteCommandResult {
                        exit_code: 1,
                        stdout: "ERROR: cluster is not available".into(),
                        stderr: "connection refused".into(),
                    },
                )
                .reply("ctrl2", CRM_STATUS, 0, "Online: [ ctrl2 ]")
                .reply("ctrl2", CRM_FAILED_ACTIONS, 0, "Failed Actions:\n* neutron-agent_monitor")
                .reply("ctrl3", CRM_STATUS, 0, "Online: [ ctrl3 ]")
                .reply("ctrl3", CRM_FAILED_ACTIONS, 1, ""),
        );
        let o = orchestrator_with(Inventory::from_yaml(FOUNDERS).unwrap(), exec.clone(), true);
        let report = o.clusters_health_report().await;

        assert_eq!(
            report.get(CheckKey::CrmFailures),
            Some(&Finding::PerNode(BTreeMap::from([(
                "ctrl1".to_string(),
                "ctrl1: ERROR: cluster is not available connection refused".to_string()
            )])))
        );
        assert_eq!(
            report.get(CheckKey::FailedActions),
            Some(&Finding::PerNode(BTreeMap::from([(
                "ctrl2".to_string(),
                "ctrl2: Failed Actions:\n* neutron-agent_monitor".to_string()
            )])))
        );
        assert!(!exec
            .calls()
            .contains(&("ctrl1".to_string(), CRM_FAILED_ACTIONS.to_string())));
        assert!(!exec.calls().iter().any(|(node, _)| node == "member"));
    }

    #[tokio::test]
    async fn unreachable_founder_does_not_block_others() {
        let exec = ScriptedExecutor::new()
            .unreachable("ctrl1", CRM_STATUS)
            .reply("ctrl2", CRM_STATUS, 0, "ok")
            .reply("ctrl2", CRM_FAILED_ACTIONS, 1, "")
            .reply("ctrl3", CRM_STATUS, 0, "ok")
            .reply("ctrl3", CRM_FAILED_ACTIONS, 0, "Failed Actions:");
        let report = orchestrator(FOUNDERS, exec, true).clusters_health_report().await;

        match report.get(CheckKey::CrmFailures) {
            Some(Finding::PerNode(map)) => {
                assert_eq!(map.len(), 1);
                assert!(map["ctrl1"].contains("timed out"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(report.contains(CheckKey::FailedActions));
    }

    #[tokio::test]
    async fn no_founders_no_cluster_report() {
        let o = orchestrator("nodes: []\n", ScriptedExecutor::new(), true);
        assert!(o.clusters_health_report().await.is_empty());
    }

    // ── ceph_status ──

    const CEPH: &str = r#"
nodes:
  - name: mon1
    state: crowbar_upgrade
    roles: [ceph-mon, ceph-osd]
    attributes: { ceph: { config: { environment: ceph-config-default } } }
  - name: osd1
    state: ready
    roles: [ceph-osd]
    attributes: { ceph: { config: { environment: ceph-config-default } } }
"#;

    #[tokio::test]
    async fn ceph_unhealthy_short_circuits() {
        let exec = Arc::new(ScriptedExecutor::new().reply_full(
            "mon1",
            CEPH_HEALTH,
            RemoteCommandResult {
                exit_code: 0,
                stdout: "HEALTH_WARN clock skew detected".into(),
                stderr: "mon.1 addr".into(),
            },
        ));
        let o = orchestrator_with(Inventory::from_yaml(CEPH).unwrap(), exec.clone(), true);
        let report = o.ceph_status().await;

        assert_eq!(
            report.get(CheckKey::HealthErrors),
            Some(&Finding::Text("HEALTH_WARN clock skew detected; mon.1 addr".into()))
        );
        assert_eq!(report.len(), 1);
        assert_eq!(exec.calls().len(), 1);
    }

    #[tokio::test]
    async fn ceph_old_version_and_unprepared_nodes() {
        let exec = ScriptedExecutor::new()
            .reply("mon1", CEPH_HEALTH, 0, "HEALTH_OK\n")
            .reply("mon1", CEPH_VERSION, 0, "0.94.9-93-g239fe15\n");
        let report = orchestrator(CEPH, exec, true).ceph_status().await;

        assert_eq!(report.get(CheckKey::OldVersion), Some(&Finding::Flag(true)));
        assert_eq!(
            report.get(CheckKey::NotPrepared),
            Some(&Finding::Names(vec!["osd1".into()]))
        );
    }

    #[tokio::test]
    async fn ceph_current_version_passes() {
        let exec = ScriptedExecutor::new()
            .reply("mon1", CEPH_HEALTH, 0, "HEALTH_OK")
            .reply("mon1", CEPH_VERSION, 0, "10.2.4-211-g12b091b");
        let report = orchestrator(CEPH, exec, true).ceph_status().await;
        assert!(!report.contains(CheckKey::OldVersion));
    }

    #[tokio::test]
    async fn no_ceph_nodes_no_remote_calls() {
        let exec = Arc::new(ScriptedExecutor::new());
        let o = orchestrator_with(Inventory::default(), exec.clone(), true);
        assert!(o.ceph_status().await.is_empty());
        assert!(exec.calls().is_empty());
    }

    // ── openstack_check ──

    const OPENSTACK: &str = r#"
nodes:
  - name: storage1
    state: ready
    roles: [swift-storage]
    attributes: { swift: { devs: [sdb] } }
  - name: net1
    state: ready
    roles: [neutron-server]
proposals:
  - barclamp: swift
    attributes: { swift: { replicas: 3 } }
  - barclamp: keystone
    attributes: { keystone: { identity: { driver: hybrid } } }
  - barclamp: neutron
    attributes: { neutron: { use_lbaas: true, use_lbaasv2: false } }
"#;

    #[tokio::test]
    async fn openstack_flags() {
        let exec = ScriptedExecutor::new().reply("net1", LBAAS_POOLS, 0, "5f1c\n9a2e\n");
        let report = orchestrator(OPENSTACK, exec, true).openstack_check().await;

        assert_eq!(report.get(CheckKey::TooManyReplicas), Some(&Finding::Count(3)));
        assert_eq!(report.get(CheckKey::KeystoneHybridBackend), Some(&Finding::Flag(true)));
        assert_eq!(report.get(CheckKey::LbaasV1), Some(&Finding::Flag(true)));
    }

    #[tokio::test]
    async fn lbaas_v1_without_pools_is_not_flagged() {
        let exec = ScriptedExecutor::new().reply("net1", LBAAS_POOLS, 0, "");
        let report = orchestrator(OPENSTACK, exec, true).openstack_check().await;
        assert!(!report.contains(CheckKey::LbaasV1));
    }

    // ── compute_status ──

    #[test]
    fn compute_no_resources_scenarios() {
        let two_xen = r#"
nodes:
  - { name: x1, state: ready, roles: [nova-compute-xen] }
  - { name: x2, state: ready, roles: [nova-compute-xen] }
"#;
        let report = orchestrator(two_xen, ScriptedExecutor::new(), true).compute_status();
        assert!(!report.contains(CheckKey::NoResources));

        let one_kvm = r#"
nodes:
  - { name: k1, state: ready, roles: [nova-compute-kvm] }
"#;
        let report = orchestrator(one_kvm, ScriptedExecutor::new(), true).compute_status();
        assert_eq!(
            report.get(CheckKey::NoResources),
            Some(&Finding::Names(vec![
                "Found only one compute node of kvm type; non-disruptive upgrade is not possible"
                    .into()
            ]))
        );
    }

    #[test]
    fn live_migration_flag_is_independent() {
        let inventory = r#"
nodes:
  - { name: k1, state: ready, roles: [nova-compute-kvm] }
  - { name: k2, state: ready, roles: [nova-compute-kvm] }
  - name: ctrl
    state: ready
    roles: [nova-controller]
    attributes: { nova: { use_migration: false } }
"#;
        let report = orchestrator(inventory, ScriptedExecutor::new(), true).compute_status();
        assert_eq!(report.get(CheckKey::NoLiveMigration), Some(&Finding::Flag(true)));
        assert!(!report.contains(CheckKey::NoResources));
    }

    // ── ha_config_check ──

    #[test]
    fn ha_not_installed_is_exclusive() {
        let o = orchestrator(FOUNDERS, ScriptedExecutor::new(), false);
        assert_eq!(
            o.ha_config_check(),
            HealthReport::single(CheckKey::HaNotInstalled, Finding::Flag(true))
        );
    }

    #[test]
    fn ha_installed_without_founder() {
        let o = orchestrator("nodes: []\n", ScriptedExecutor::new(), true);
        assert_eq!(
            o.ha_config_check(),
            HealthReport::single(CheckKey::HaNotConfigured, Finding::Flag(true))
        );
    }

    const HA: &str = r#"
nodes:
  - name: ctrl1
    state: ready
    roles: [database-server]
    attributes: { pacemaker: { founder: true, config: { environment: pacemaker-config-a } } }
  - name: compute1
    state: ready
    roles: [nova-compute-kvm, glance-server, swift-storage]
    attributes:
      glance: {}
  - name: compute2
    state: crowbar_upgrade
    roles: [nova-compute-kvm, heat-server]
    attributes:
      heat:
        element_states: { heat-server: [ready, applying] }
  - name: compute3
    state: ready
    roles: [nova-compute-xen]
"#;

    #[test]
    fn roles_not_ha_stops_before_conflict_analysis() {
        let inventory = format!(
            "{HA}proposals:\n  - barclamp: database\n    elements:\n      database-server: [\"cluster:a\"]\n  - barclamp: keystone\n    elements:\n      keystone-server: [ctrl1, \"cluster:a\"]\n      keystone-ldap: [ctrl1]\n"
        );
        let report = orchestrator(&inventory, ScriptedExecutor::new(), true).ha_config_check();
        assert_eq!(
            report,
            HealthReport::single(
                CheckKey::RolesNotHa,
                Finding::Names(vec!["keystone-server".into()])
            )
        );
    }

    #[test]
    fn role_conflicts_count_only_active_roles() {
        let inventory = format!(
            "{HA}proposals:\n  - barclamp: database\n    elements:\n      database-server: [\"cluster:a\"]\n"
        );
        let report = orchestrator(&inventory, ScriptedExecutor::new(), true).ha_config_check();
        assert_eq!(
            report,
            HealthReport::single(
                CheckKey::RoleConflicts,
                Finding::RolesPerNode(BTreeMap::from([(
                    "compute1".to_string(),
                    vec!["glance-server".to_string()]
                )]))
            )
        );
    }

    #[test]
    fn role_conflicts_include_roles_without_barclamp_attributes() {
        let inventory = r#"
nodes:
  - name: ctrl1
    state: ready
    attributes: { pacemaker: { founder: true, config: { environment: pacemaker-config-a } } }
  - name: compute1
    state: ready
    roles: [nova-compute-kvm, keystone-server]
"#;
        let o = orchestrator(inventory, ScriptedExecutor::new(), true);
        assert_eq!(
            o.ha_config_check(),
            HealthReport::single(
                CheckKey::RoleConflicts,
                Finding::RolesPerNode(BTreeMap::from([(
                    "compute1".to_string(),
                    vec!["keystone-server".to_string()]
                )]))
            )
        );
        assert!(o.deployment_check().contains(CheckKey::ControllerRoles));
    }

    /// Inventory wrapper that counts every directory lookup.
    struct CountingFleet {
        inventory: Inventory,
        lookups: AtomicUsize,
    }

    impl FleetDirectory for CountingFleet {
        fn find(&self, query: &Query) -> Vec<Node> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            FleetDirectory::find(&self.inventory, query)
        }

        fn node(&self, name: &str) -> Option<Node> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            FleetDirectory::node(&self.inventory, name)
        }

        fn admin_node(&self) -> Option<Node> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            self.inventory.admin_node()
        }
    }

    impl ProposalStore for CountingFleet {
        fn find(&self, barclamp: &str) -> Option<Proposal> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            ProposalStore::find(&self.inventory, barclamp)
        }

        fn all(&self) -> Vec<Proposal> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            self.inventory.all()
        }
    }

    #[test]
    fn ha_not_installed_queries_nothing() {
        let inventory = Inventory::from_yaml(FOUNDERS).unwrap();
        let catalog = inventory.barclamp_catalog();
        let fleet = Arc::new(CountingFleet {
            inventory,
            lookups: AtomicUsize::new(0),
        });
        let executor = Arc::new(ScriptedExecutor::new());
        let timeout = Duration::from_secs(5);
        let o = HealthCheckOrchestrator::new(
            fleet.clone(),
            fleet.clone(),
            executor.clone(),
            catalog,
            RepositoryVersionChecker::new(fleet.clone(), executor, PRODUCTS, timeout),
            CheckSettings {
                command_timeout: timeout,
                ha_installed: false,
                current_version: "6".into(),
                next_version: "7".into(),
                patch_check_command: PATCH_CHECK.into(),
            },
        );

        assert_eq!(
            o.ha_config_check(),
            HealthReport::single(CheckKey::HaNotInstalled, Finding::Flag(true))
        );
        assert_eq!(fleet.lookups.load(Ordering::SeqCst), 0);
    }

    // ── deployment_check ──

    #[test]
    fn deployment_order_reports_first_offender_only() {
        let inventory = r#"
nodes:
  - { name: c1, state: ready, roles: [nova-compute-kvm, cinder-volume, ceilometer-agent] }
  - { name: c2, state: ready, roles: [nova-compute-kvm, nova-controller, database-server] }
  - { name: c3, state: ready, roles: [nova-compute-kvm, keystone-server, nova-config-default, ceph-osd] }
  - { name: c4, state: ready, roles: [nova-compute-xen, rabbitmq-server] }
"#;
        let report = orchestrator(inventory, ScriptedExecutor::new(), true).deployment_check();
        assert_eq!(
            report,
            HealthReport::single(
                CheckKey::ControllerRoles,
                Finding::NodeRoles {
                    node: "c3".into(),
                    roles: vec!["keystone-server".into()],
                }
            )
        );
    }

    #[test]
    fn deployment_order_clean() {
        let inventory = r#"
nodes:
  - { name: c1, state: ready, roles: [nova-compute-kvm, swift-storage, heat-server] }
"#;
        let report = orchestrator(inventory, ScriptedExecutor::new(), true).deployment_check();
        assert!(report.is_empty());
    }

    // ── maintenance_updates_check ──

    const ADMIN: &str = "nodes:\n  - { name: admin, state: ready, admin: true }\n";

    #[tokio::test]
    async fn missing_current_repositories_stop_the_chain() {
        let exec = Arc::new(ScriptedExecutor::new().reply("admin", PRODUCTS, 0, PRODUCTS_CLOUD6_OS_ONLY));
        let o = orchestrator_with(Inventory::from_yaml(ADMIN).unwrap(), exec.clone(), true);
        let report = o.maintenance_updates_check().await;

        assert_eq!(
            report,
            HealthReport::single(
                CheckKey::RepositoriesMissing,
                Finding::Text("SUSE-OpenStack-Cloud-6-Pool, SUSE-OpenStack-Cloud-6-Updates".into())
            )
        );
        assert_eq!(exec.calls().len(), 1);
    }

    #[tokio::test]
    async fn next_version_repositories_too_soon() {
        let exec = ScriptedExecutor::new().reply("admin", PRODUCTS, 0, PRODUCTS_WITH_CLOUD7);
        let report = orchestrator(ADMIN, exec, true).maintenance_updates_check().await;
        assert_eq!(
            report,
            HealthReport::single(
                CheckKey::RepositoriesTooSoon,
                Finding::Text("SUSE-OpenStack-Cloud-7-Pool, SUSE-OpenStack-Cloud-7-Updates".into())
            )
        );
    }

    #[tokio::test]
    async fn zypper_lock_is_reported() {
        let exec = ScriptedExecutor::new().reply("admin", PRODUCTS, 7, LOCKED);
        let report = orchestrator(ADMIN, exec, true).maintenance_updates_check().await;
        match report.get(CheckKey::ZypperErrors) {
            Some(Finding::Text(text)) => assert!(text.contains("System management is locked")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn pending_updates_are_reported_last() {
        let exec = ScriptedExecutor::new()
            .reply("admin", PRODUCTS, 0, PRODUCTS_CLOUD6_COMPLETE)
            .reply("admin", PATCH_CHECK, 101, "");
        let report = orchestrator(ADMIN, exec, true).maintenance_updates_check().await;
        assert_eq!(
            report,
            HealthReport::single(
                CheckKey::MaintenanceUpdates,
                Finding::Names(vec!["Security updates are pending on the admin server".into()])
            )
        );

        let exec = ScriptedExecutor::new()
            .reply("admin", PRODUCTS, 0, PRODUCTS_CLOUD6_COMPLETE)
            .reply("admin", PATCH_CHECK, 0, "");
        let report = orchestrator(ADMIN, exec, true).maintenance_updates_check().await;
        assert!(report.is_empty());
    }

    // ── aggregation ──

    #[tokio::test]
    async fn run_all_unions_independent_checks() {
        let inventory = r#"
nodes:
  - { name: admin, state: ready, admin: true }
  - { name: k1, state: applying, roles: [nova-compute-kvm] }
"#;
        let exec = ScriptedExecutor::new()
            .reply("admin", PRODUCTS, 0, PRODUCTS_CLOUD6_COMPLETE)
            .reply("admin", PATCH_CHECK, 0, "");
        let o = orchestrator(inventory, exec, false);

        let all = o.run_all().await;
        let keys: Vec<CheckKey> = all.keys().collect();
        assert_eq!(
            keys,
            [CheckKey::NodesNotReady, CheckKey::NoResources, CheckKey::HaNotInstalled]
        );

        // a subset run produces the same keys for its own checks
        let compute = o.run(Check::ComputeStatus).await;
        for key in compute.keys() {
            assert_eq!(all.get(key), compute.get(key));
        }
    }
}
