//! Role applicability — may a role run on a node in its current state?
//!
//! Pure decision function. Instead of logging, a negative decision carries a
//! `SkipReason` that the caller can log (or render) as it sees fit.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::node::{Node, STATE_APPLYING};

/// Always allowed: keeps the node heartbeating and exposes the barclamp library.
pub const BOOTSTRAP_ROLE: &str = "deployer-client";
/// Allowed on the admin server before any proposal has been applied.
pub const ADMIN_ROLE: &str = "crowbar";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// Node is mid-application; only the in-flight roles are considered.
    Applying { permitted: Vec<String> },
    /// The role is restricted to other lifecycle states.
    StateNotValid { state: String, valid: Vec<String> },
    /// The node has no applied proposal for the role's barclamp.
    NoProposal,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Applying { permitted } => write!(
                f,
                "node is applying; only the following roles are considered: {}",
                permitted.join(", ")
            ),
            Self::StateNotValid { state, valid } => write!(
                f,
                "node is in state \"{state}\"; role only applies in: {}",
                valid.join(", ")
            ),
            Self::NoProposal => f.write_str("node has no applied proposal for this role"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleDecision {
    pub node: String,
    pub barclamp: String,
    pub role: String,
    pub applicable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip: Option<SkipReason>,
}

/// Decide whether `role` of `barclamp` may run on `node`.
pub fn decide(node: &Node, barclamp: &str, role: &str) -> RoleDecision {
    let skip = skip_reason(node, barclamp, role);
    RoleDecision {
        node: node.name.clone(),
        barclamp: barclamp.to_string(),
        role: role.to_string(),
        applicable: skip.is_none(),
        skip,
    }
}

pub fn is_role_applicable(node: &Node, barclamp: &str, role: &str) -> bool {
    skip_reason(node, barclamp, role).is_none()
}

fn skip_reason(node: &Node, barclamp: &str, role: &str) -> Option<SkipReason> {
    // An applying node is judged only against its in-flight roles, whatever
    // element_states it already carries.
    if node.state == STATE_APPLYING {
        let in_flight = node
            .applying_for
            .get(barclamp)
            .is_some_and(|roles| roles.contains(role));
        if role == BOOTSTRAP_ROLE || in_flight {
            return None;
        }
        let permitted: BTreeSet<&String> = node.applying_for.values().flatten().collect();
        return Some(SkipReason::Applying {
            permitted: permitted.into_iter().cloned().collect(),
        });
    }

    match node.element_states(barclamp) {
        Some(states) => {
            let rule = states.rule(role);
            if rule.permits(&node.state) {
                None
            } else {
                Some(SkipReason::StateNotValid {
                    state: node.state.clone(),
                    valid: rule.states(),
                })
            }
        }
        None if node.admin && (role == ADMIN_ROLE || role == BOOTSTRAP_ROLE) => None,
        None => Some(SkipReason::NoProposal),
    }
}
