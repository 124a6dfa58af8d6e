//! Proposal — a concrete deployment of one barclamp onto fleet targets.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Prefix marking a deployment target as a cluster rather than a node.
pub const CLUSTER_PREFIX: &str = "cluster:";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    pub barclamp: String,

    /// Proposal instance name.
    #[serde(default = "default_instance")]
    pub name: String,

    #[serde(default = "default_true")]
    pub active: bool,

    #[serde(default)]
    pub failed: bool,

    /// Barclamp configuration values.
    #[serde(default)]
    pub attributes: Value,

    /// Role → deployment targets (node names or `cluster:<name>`).
    #[serde(default)]
    pub elements: BTreeMap<String, Vec<String>>,
}

fn default_instance() -> String {
    "default".to_string()
}

fn default_true() -> bool {
    true
}

impl Proposal {
    pub fn new(barclamp: impl Into<String>) -> Self {
        Self {
            barclamp: barclamp.into(),
            name: default_instance(),
            active: true,
            failed: false,
            attributes: Value::Null,
            elements: BTreeMap::new(),
        }
    }

    /// Human-facing name, e.g. `Keystone: Default`.
    pub fn display_name(&self) -> String {
        format!("{}: {}", titleize(&self.barclamp), titleize(&self.name))
    }

    /// Walk the proposal attributes along `path`.
    pub fn attribute(&self, path: &[&str]) -> Option<&Value> {
        let mut current = &self.attributes;
        for key in path {
            current = current.get(*key)?;
        }
        Some(current)
    }
}

/// Whether a deployment target names a cluster.
pub fn is_cluster(target: &str) -> bool {
    target
        .strip_prefix(CLUSTER_PREFIX)
        .is_some_and(|name| !name.is_empty())
}

fn titleize(s: &str) -> String {
    s.split(['_', '-'])
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
