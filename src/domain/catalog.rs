//! Barclamp catalog — run order, category and owned roles per barclamp.
//!
//! Run order decides the sequence in which barclamps are applied (and
//! upgraded); the deployment-ordering check compares it across the roles
//! sharing a compute node.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Category {
    Crowbar,
    #[serde(rename = "OpenStack")]
    OpenStack,
    #[serde(rename = "HA")]
    Ha,
    Storage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BarclampEntry {
    pub run_order: u32,
    pub category: Category,
    #[serde(default)]
    pub roles: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BarclampCatalog {
    entries: BTreeMap<String, BarclampEntry>,
}

impl Default for BarclampCatalog {
    fn default() -> Self {
        use Category::*;

        let table: &[(&str, u32, Category, &[&str])] = &[
            ("crowbar", 0, Crowbar, &["crowbar"]),
            ("deployer", 10, Crowbar, &["deployer-client"]),
            ("network", 20, Crowbar, &["switch_config"]),
            ("provisioner", 30, Crowbar, &["provisioner-server", "provisioner-base"]),
            ("dns", 40, Crowbar, &["dns-server", "dns-client"]),
            ("logging", 50, Crowbar, &["logging-server", "logging-client"]),
            ("ntp", 60, Crowbar, &["ntp-server", "ntp-client"]),
            ("pacemaker", 70, Ha, &["pacemaker-cluster-member", "hawk-server", "pacemaker-remote"]),
            ("ceph", 80, Storage, &["ceph-mon", "ceph-osd", "ceph-radosgw", "ceph-calamari", "ceph-mds"]),
            ("database", 90, OpenStack, &["database-server"]),
            ("rabbitmq", 100, OpenStack, &["rabbitmq-server"]),
            ("keystone", 110, OpenStack, &["keystone-server"]),
            ("swift", 120, OpenStack, &["swift-proxy", "swift-ring-compute", "swift-storage", "swift-dispersion"]),
            ("glance", 130, OpenStack, &["glance-server"]),
            ("cinder", 140, OpenStack, &["cinder-controller", "cinder-volume"]),
            ("manila", 145, OpenStack, &["manila-server", "manila-share"]),
            ("neutron", 150, OpenStack, &["neutron-server", "neutron-network"]),
            ("nova", 160, OpenStack, &[
                "nova-controller",
                "nova-compute-kvm",
                "nova-compute-xen",
                "nova-compute-qemu",
                "nova-compute-hyperv",
                "nova-compute-vmware",
            ]),
            ("horizon", 170, OpenStack, &["horizon-server"]),
            ("ceilometer", 180, OpenStack, &["ceilometer-server", "ceilometer-agent", "ceilometer-polling"]),
            ("heat", 190, OpenStack, &["heat-server"]),
            ("aodh", 195, OpenStack, &["aodh-server"]),
            ("trove", 200, OpenStack, &["trove-server"]),
            ("tempest", 210, OpenStack, &["tempest"]),
        ];

        let entries = table
            .iter()
            .map(|(name, run_order, category, roles)| {
                (
                    name.to_string(),
                    BarclampEntry {
                        run_order: *run_order,
                        category: *category,
                        roles: roles.iter().map(|r| r.to_string()).collect(),
                    },
                )
            })
            .collect();

        Self { entries }
    }
}

impl BarclampCatalog {
    pub fn get(&self, barclamp: &str) -> Option<&BarclampEntry> {
        self.entries.get(barclamp)
    }

    pub fn run_order(&self, barclamp: &str) -> Option<u32> {
        self.get(barclamp).map(|e| e.run_order)
    }

    pub fn category(&self, barclamp: &str) -> Option<Category> {
        self.get(barclamp).map(|e| e.category)
    }

    /// The barclamp owning `role`. Proposal roles (`<barclamp>-config-<inst>`)
    /// do not belong to any barclamp's role set and resolve to `None`.
    pub fn barclamp_for_role(&self, role: &str) -> Option<&str> {
        if is_proposal_role(role) {
            return None;
        }
        self.entries
            .iter()
            .find(|(_, e)| e.roles.iter().any(|r| r == role))
            .map(|(name, _)| name.as_str())
    }

    /// Merge entries over the built-in table.
    pub fn extend(&mut self, overrides: BTreeMap<String, BarclampEntry>) {
        self.entries.extend(overrides);
    }
}

/// Roles named `<barclamp>-config-<instance>` tag a node with the proposal
/// it belongs to; they carry no recipes of their own.
pub fn is_proposal_role(role: &str) -> bool {
    role.split_once("-config-")
        .is_some_and(|(barclamp, instance)| !barclamp.is_empty() && !instance.is_empty())
}
