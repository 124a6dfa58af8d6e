//! Health report — what the upgrade readiness checks found.
//!
//! A report only ever gains keys. A key that is absent means the check that
//! owns it found nothing wrong, so an empty report after every check ran means
//! the fleet is ready for the upgrade.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKey {
    NodesNotReady,
    FailedProposals,
    CrmFailures,
    FailedActions,
    HealthErrors,
    OldVersion,
    NotPrepared,
    TooManyReplicas,
    KeystoneHybridBackend,
    LbaasV1,
    NoResources,
    NoLiveMigration,
    HaNotInstalled,
    HaNotConfigured,
    RolesNotHa,
    RoleConflicts,
    ControllerRoles,
    ZypperErrors,
    RepositoriesMissing,
    RepositoriesTooSoon,
    MaintenanceUpdates,
    /// Nodes a check could not reach and has no better key for.
    UnreachableNodes,
}

/// Diagnostic payload attached to a key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Finding {
    Flag(bool),
    Count(u64),
    Text(String),
    Names(Vec<String>),
    NodeRoles { node: String, roles: Vec<String> },
    PerNode(BTreeMap<String, String>),
    RolesPerNode(BTreeMap<String, Vec<String>>),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HealthReport(BTreeMap<CheckKey, Finding>);

impl HealthReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(key: CheckKey, finding: Finding) -> Self {
        let mut report = Self::new();
        report.insert(key, finding);
        report
    }

    pub fn insert(&mut self, key: CheckKey, finding: Finding) {
        self.0.insert(key, finding);
    }

    /// Add a per-node entry under `key`, creating the map on first use. A
    /// second message for the same node is appended, not replaced.
    pub fn insert_for_node(&mut self, key: CheckKey, node: &str, message: String) {
        let entry = self
            .0
            .entry(key)
            .or_insert_with(|| Finding::PerNode(BTreeMap::new()));
        if let Finding::PerNode(map) = entry {
            append_message(map, node.to_string(), message);
        }
    }

    pub fn get(&self, key: CheckKey) -> Option<&Finding> {
        self.0.get(&key)
    }

    pub fn contains(&self, key: CheckKey) -> bool {
        self.0.contains_key(&key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn keys(&self) -> impl Iterator<Item = CheckKey> + '_ {
        self.0.keys().copied()
    }

    /// Union with another report. Checks own disjoint keys; for the shared
    /// per-node key the entries are combined.
    pub fn merge(&mut self, other: HealthReport) {
        for (key, finding) in other.0 {
            match finding {
                Finding::PerNode(theirs) => {
                    if let Some(Finding::PerNode(mine)) = self.0.get_mut(&key) {
                        for (node, message) in theirs {
                            append_message(mine, node, message);
                        }
                    } else {
                        self.0.insert(key, Finding::PerNode(theirs));
                    }
                }
                finding => {
                    self.0.insert(key, finding);
                }
            }
        }
    }
}

fn append_message(map: &mut BTreeMap<String, String>, node: String, message: String) {
    match map.get_mut(&node) {
        Some(existing) if *existing != message => {
            existing.push_str("; ");
            existing.push_str(&message);
        }
        Some(_) => {}
        None => {
            map.insert(node, message);
        }
    }
}

impl FromIterator<HealthReport> for HealthReport {
    fn from_iter<I: IntoIterator<Item = HealthReport>>(iter: I) -> Self {
        let mut report = Self::new();
        for part in iter {
            report.merge(part);
        }
        report
    }
}

/// An individually invocable check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Check {
    NodesStatus,
    ClustersHealth,
    CephStatus,
    Openstack,
    ComputeStatus,
    HaConfig,
    Deployment,
    MaintenanceUpdates,
}

impl Check {
    pub const ALL: [Check; 8] = [
        Check::NodesStatus,
        Check::ClustersHealth,
        Check::CephStatus,
        Check::Openstack,
        Check::ComputeStatus,
        Check::HaConfig,
        Check::Deployment,
        Check::MaintenanceUpdates,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::NodesStatus => "nodes_status",
            Self::ClustersHealth => "clusters_health",
            Self::CephStatus => "ceph_status",
            Self::Openstack => "openstack",
            Self::ComputeStatus => "compute_status",
            Self::HaConfig => "ha_config",
            Self::Deployment => "deployment",
            Self::MaintenanceUpdates => "maintenance_updates",
        }
    }
}

impl fmt::Display for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Check {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Check::ALL
            .into_iter()
            .find(|c| c.name() == s)
            .ok_or_else(|| {
                let known: Vec<&str> = Check::ALL.iter().map(|c| c.name()).collect();
                format!("unknown check '{s}' (known: {})", known.join(", "))
            })
    }
}
