//! Fleet directory and proposal store.
//!
//! Both are read-only query interfaces. The shipped implementation is
//! `Inventory`, a YAML snapshot of nodes, proposals and catalog overrides.
//! Node lookups go through a small predicate language:
//!
//! ```text
//! roles:nova-compute-kvm
//! NOT roles:ceph-*
//! pacemaker_founder:true AND pacemaker_config_environment:*
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::catalog::{BarclampCatalog, BarclampEntry};
use super::node::Node;
use super::proposal::Proposal;

// ── Query language ─────────────────────────────────────────

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueryParseError {
    #[error("empty query")]
    Empty,
    #[error("clause '{0}' is not of the form key:value")]
    MalformedClause(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Pattern {
    /// `key:*` — the key is present with any value.
    Present,
    /// `key:foo*`
    Prefix(String),
    Exact(String),
}

impl Pattern {
    fn matches(&self, value: &str) -> bool {
        match self {
            Self::Present => true,
            Self::Prefix(prefix) => value.starts_with(prefix.as_str()),
            Self::Exact(exact) => value == exact,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Clause {
    negated: bool,
    key: String,
    pattern: Pattern,
}

impl Clause {
    fn matches(&self, node: &Node, flat: &BTreeMap<String, Value>) -> bool {
        let hit = match self.key.as_str() {
            "roles" | "run_list_map" => node.roles.iter().any(|r| self.pattern.matches(r)),
            "name" => self.pattern.matches(&node.name),
            "state" => self.pattern.matches(&node.state),
            "architecture" => self.pattern.matches(&node.architecture),
            key => match flat.get(key) {
                None | Some(Value::Null) => false,
                Some(Value::Array(items)) => items
                    .iter()
                    .any(|item| self.pattern.matches(&scalar_text(item))),
                Some(value) => self.pattern.matches(&scalar_text(value)),
            },
        };
        hit != self.negated
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// A conjunction of `[NOT ]key:value` clauses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    clauses: Vec<Clause>,
}

impl Query {
    pub fn matches(&self, node: &Node) -> bool {
        let flat = node.flattened_attributes();
        self.clauses.iter().all(|c| c.matches(node, &flat))
    }
}

impl FromStr for Query {
    type Err = QueryParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut clauses = Vec::new();
        for raw in s.split(" AND ") {
            let raw = raw.trim();
            if raw.is_empty() {
                continue;
            }
            let (negated, body) = match raw.strip_prefix("NOT ") {
                Some(rest) => (true, rest.trim()),
                None => (false, raw),
            };
            let (key, value) = body
                .split_once(':')
                .filter(|(k, v)| !k.is_empty() && !v.is_empty())
                .ok_or_else(|| QueryParseError::MalformedClause(raw.to_string()))?;
            let pattern = if value == "*" {
                Pattern::Present
            } else if let Some(prefix) = value.strip_suffix('*') {
                Pattern::Prefix(prefix.to_string())
            } else {
                Pattern::Exact(value.to_string())
            };
            clauses.push(Clause {
                negated,
                key: key.to_string(),
                pattern,
            });
        }
        if clauses.is_empty() {
            return Err(QueryParseError::Empty);
        }
        Ok(Self { clauses })
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .clauses
            .iter()
            .map(|c| {
                let value = match &c.pattern {
                    Pattern::Present => "*".to_string(),
                    Pattern::Prefix(p) => format!("{p}*"),
                    Pattern::Exact(v) => v.clone(),
                };
                let not = if c.negated { "NOT " } else { "" };
                format!("{not}{}:{value}", c.key)
            })
            .collect();
        f.write_str(&parts.join(" AND "))
    }
}

// ── Directory interfaces ───────────────────────────────────

/// Read-only node lookup. Results come back in fleet order.
pub trait FleetDirectory: Send + Sync {
    fn find(&self, query: &Query) -> Vec<Node>;

    fn node(&self, name: &str) -> Option<Node>;

    /// The admin (bootstrap) server, if the fleet has one.
    fn admin_node(&self) -> Option<Node>;

    /// Convenience for the built-in query strings used by the checks.
    fn find_str(&self, query: &str) -> Vec<Node> {
        match query.parse::<Query>() {
            Ok(q) => self.find(&q),
            Err(e) => {
                tracing::error!(query, error = %e, "invalid fleet query");
                Vec::new()
            }
        }
    }
}

/// Read-only proposal lookup.
pub trait ProposalStore: Send + Sync {
    /// The first proposal for `barclamp`.
    fn find(&self, barclamp: &str) -> Option<Proposal>;

    fn all(&self) -> Vec<Proposal>;
}

// ── Inventory ──────────────────────────────────────────────

/// A YAML snapshot of the fleet.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Inventory {
    #[serde(default)]
    pub nodes: Vec<Node>,

    #[serde(default)]
    pub proposals: Vec<Proposal>,

    /// Entries merged over the built-in barclamp catalog.
    #[serde(default)]
    pub catalog: BTreeMap<String, BarclampEntry>,
}

impl Inventory {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading inventory {}", path.display()))?;
        Self::from_yaml(&content).with_context(|| format!("parsing inventory {}", path.display()))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let inventory: Inventory = serde_yaml::from_str(content)?;
        Ok(inventory)
    }

    /// The built-in catalog with this inventory's overrides applied.
    pub fn barclamp_catalog(&self) -> BarclampCatalog {
        let mut catalog = BarclampCatalog::default();
        catalog.extend(self.catalog.clone());
        catalog
    }
}

impl FleetDirectory for Inventory {
    fn find(&self, query: &Query) -> Vec<Node> {
        self.nodes.iter().filter(|n| query.matches(n)).cloned().collect()
    }

    fn node(&self, name: &str) -> Option<Node> {
        self.nodes.iter().find(|n| n.name == name).cloned()
    }

    fn admin_node(&self) -> Option<Node> {
        self.nodes.iter().find(|n| n.admin).cloned()
    }
}

impl ProposalStore for Inventory {
    fn find(&self, barclamp: &str) -> Option<Proposal> {
        self.proposals.iter().find(|p| p.barclamp == barclamp).cloned()
    }

    fn all(&self) -> Vec<Proposal> {
        self.proposals.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INVENTORY: &str = r#"
nodes:
  - name: admin
    state: ready
    admin: true
    roles: [crowbar, deployer-client]
  - name: ctrl1
    state: ready
    roles: [pacemaker-cluster-member, database-server, nova-controller]
    attributes:
      pacemaker:
        founder: true
        config:
          environment: pacemaker-config-services
  - name: ctrl2
    state: ready
    roles: [pacemaker-cluster-member, database-server]
    attributes:
      pacemaker:
        founder: false
        config:
          environment: pacemaker-config-services
  - name: storage1
    state: crowbar_upgrade
    roles: [ceph-osd, ceph-mon]
proposals:
  - barclamp: nova
    failed: true
    elements:
      nova-controller: ["cluster:services"]
"#;

    #[test]
    fn parse_and_display_round_trip_text() {
        let q: Query = "pacemaker_founder:true AND NOT roles:ceph-* AND name:*"
            .parse()
            .unwrap();
        assert_eq!(
            q.to_string(),
            "pacemaker_founder:true AND NOT roles:ceph-* AND name:*"
        );
    }

    #[test]
    fn parse_rejects_malformed_clauses() {
        assert_eq!("".parse::<Query>(), Err(QueryParseError::Empty));
        assert!(matches!(
            "roles".parse::<Query>(),
            Err(QueryParseError::MalformedClause(_))
        ));
        assert!(matches!(
            "roles: AND state:ready".parse::<Query>(),
            Err(QueryParseError::MalformedClause(_))
        ));
    }

    #[test]
    fn find_preserves_fleet_order() {
        let inv = Inventory::from_yaml(INVENTORY).unwrap();
        let names: Vec<String> = inv
            .find_str("roles:database-server")
            .into_iter()
            .map(|n| n.name)
            .collect();
        assert_eq!(names, ["ctrl1", "ctrl2"]);
    }

    #[test]
    fn find_by_flattened_attributes() {
        let inv = Inventory::from_yaml(INVENTORY).unwrap();
        let founders =
            inv.find_str("pacemaker_founder:true AND pacemaker_config_environment:*");
        assert_eq!(founders.len(), 1);
        assert_eq!(founders[0].name, "ctrl1");
    }

    #[test]
    fn negated_prefix_excludes_storage_nodes() {
        let inv = Inventory::from_yaml(INVENTORY).unwrap();
        let names: Vec<String> = inv
            .find_str("NOT roles:ceph-*")
            .into_iter()
            .map(|n| n.name)
            .collect();
        assert_eq!(names, ["admin", "ctrl1", "ctrl2"]);
    }

    #[test]
    fn invalid_query_string_finds_nothing() {
        let inv = Inventory::from_yaml(INVENTORY).unwrap();
        assert!(inv.find_str("nonsense").is_empty());
    }

    #[test]
    fn proposal_lookup_and_admin_node() {
        let inv = Inventory::from_yaml(INVENTORY).unwrap();
        let nova = ProposalStore::find(&inv, "nova").unwrap();
        assert!(nova.active && nova.failed);
        assert!(ProposalStore::find(&inv, "keystone").is_none());
        assert_eq!(inv.admin_node().unwrap().name, "admin");
    }
}
