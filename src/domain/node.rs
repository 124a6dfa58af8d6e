//! Node — a single machine in the fleet, as the control plane sees it.
//!
//! Nodes are owned by the fleet directory and are read-only here. The
//! attribute bag stays loosely typed (it is keyed by barclamp and carries
//! whatever the recipes wrote), but the parts the role resolver depends on
//! are read through typed views: `applying_for` and `ElementStates`.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

/// Lifecycle state of a node that finished its last chef run.
pub const STATE_READY: &str = "ready";
/// Transitional state while a proposal is being applied to the node.
pub const STATE_APPLYING: &str = "applying";
/// State a node is moved to once it has been prepared for the upgrade.
pub const STATE_UPGRADE: &str = "crowbar_upgrade";

/// A fleet node with its lifecycle state, roles and attribute bag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub name: String,

    #[serde(default = "default_state")]
    pub state: String,

    /// Roles currently assigned, in run-list order.
    #[serde(default)]
    pub roles: Vec<String>,

    #[serde(default = "default_architecture")]
    pub architecture: String,

    /// Set on the admin (bootstrap) server.
    #[serde(default)]
    pub admin: bool,

    /// Barclamp → roles being applied while the node is in `applying`.
    #[serde(default)]
    pub applying_for: BTreeMap<String, BTreeSet<String>>,

    /// Nested attributes keyed by barclamp name.
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

fn default_state() -> String {
    "unknown".to_string()
}

fn default_architecture() -> String {
    "x86_64".to_string()
}

impl Node {
    pub fn new(name: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: state.into(),
            roles: Vec::new(),
            architecture: default_architecture(),
            admin: false,
            applying_for: BTreeMap::new(),
            attributes: Map::new(),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state == STATE_READY
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    /// Walk the attribute bag along `path`.
    pub fn attribute(&self, path: &[&str]) -> Option<&Value> {
        let (first, rest) = path.split_first()?;
        let mut current = self.attributes.get(*first)?;
        for key in rest {
            current = current.get(*key)?;
        }
        Some(current)
    }

    /// Typed view of `attributes[barclamp].element_states`.
    ///
    /// Returns `None` when the node has no attributes for the barclamp at all.
    /// A barclamp without an `element_states` section declares nothing, which
    /// makes every role valid in every state. Entries are decoded one role at
    /// a time; a malformed entry permits no state for that role only.
    pub fn element_states(&self, barclamp: &str) -> Option<ElementStates> {
        let section = self.attributes.get(barclamp)?;
        let raw = match section.get("element_states") {
            None | Some(Value::Null) => return Some(ElementStates::default()),
            Some(Value::Object(raw)) => raw,
            Some(other) => {
                warn!(
                    node = %self.name,
                    barclamp,
                    found = %other,
                    "element_states is not a map, no role of the barclamp may run"
                );
                return Some(ElementStates::deny_all());
            }
        };

        let rules = raw
            .iter()
            .map(|(role, value)| {
                let rule = RoleStateRule::deserialize(value).unwrap_or_else(|e| {
                    warn!(
                        node = %self.name,
                        barclamp,
                        role = %role,
                        error = %e,
                        "malformed element_states entry, role may not run"
                    );
                    RoleStateRule::Only(BTreeSet::new())
                });
                (role.clone(), rule)
            })
            .collect();
        Some(rules)
    }

    /// Flatten the attribute bag into `_`-joined keys, e.g.
    /// `pacemaker.founder` becomes `pacemaker_founder`. Only leaves
    /// (scalars and arrays) are emitted.
    pub fn flattened_attributes(&self) -> BTreeMap<String, Value> {
        let mut out = BTreeMap::new();
        for (key, value) in &self.attributes {
            flatten_into(key, value, &mut out);
        }
        out
    }
}

fn flatten_into(prefix: &str, value: &Value, out: &mut BTreeMap<String, Value>) {
    match value {
        Value::Object(map) => {
            for (key, nested) in map {
                flatten_into(&format!("{prefix}_{key}"), nested, out);
            }
        }
        leaf => {
            out.insert(prefix.to_string(), leaf.clone());
        }
    }
}

/// The states a role is allowed to run under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum RoleStateRule {
    AllStates,
    Only(BTreeSet<String>),
}

impl RoleStateRule {
    pub fn permits(&self, state: &str) -> bool {
        match self {
            Self::AllStates => true,
            Self::Only(states) => states.contains(state),
        }
    }

    /// The declared states, for diagnostics.
    pub fn states(&self) -> Vec<String> {
        match self {
            Self::AllStates => vec!["all".to_string()],
            Self::Only(states) => states.iter().cloned().collect(),
        }
    }
}

impl<'de> Deserialize<'de> for RoleStateRule {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            One(String),
            Many(Vec<String>),
        }

        let rule = match Option::<Raw>::deserialize(deserializer)? {
            None => Self::AllStates,
            Some(Raw::One(state)) if state == "all" => Self::AllStates,
            Some(Raw::One(state)) => Self::Only(BTreeSet::from([state])),
            Some(Raw::Many(states)) if states.is_empty() || states.iter().any(|s| s == "all") => {
                Self::AllStates
            }
            Some(Raw::Many(states)) => Self::Only(states.into_iter().collect()),
        };
        Ok(rule)
    }
}

/// Role → valid node states, as declared by a barclamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementStates {
    rules: BTreeMap<String, RoleStateRule>,
    undeclared: RoleStateRule,
}

impl Default for ElementStates {
    fn default() -> Self {
        Self {
            rules: BTreeMap::new(),
            undeclared: RoleStateRule::AllStates,
        }
    }
}

impl ElementStates {
    fn deny_all() -> Self {
        Self {
            rules: BTreeMap::new(),
            undeclared: RoleStateRule::Only(BTreeSet::new()),
        }
    }

    /// The rule for `role`. Undeclared roles run in every state.
    pub fn rule(&self, role: &str) -> RoleStateRule {
        self.rules
            .get(role)
            .cloned()
            .unwrap_or_else(|| self.undeclared.clone())
    }
}

impl FromIterator<(String, RoleStateRule)> for ElementStates {
    fn from_iter<I: IntoIterator<Item = (String, RoleStateRule)>>(iter: I) -> Self {
        Self {
            rules: iter.into_iter().collect(),
            undeclared: RoleStateRule::AllStates,
        }
    }
}
