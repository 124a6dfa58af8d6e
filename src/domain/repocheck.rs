//! Repository version checker.
//!
//! Asks the package manager on the admin server which products are
//! registered and reports, for a target cloud version, whether the base OS
//! and the cloud add-on are available at the required versions.
//!
//! The product inventory comes from `zypper --xmlout products`:
//!
//! ```xml
//! <stream>
//!   <message type="info">Loading repository data...</message>
//!   <product-list>
//!     <product name="SLES" version="12.1" arch="x86_64" .../>
//!   </product-list>
//! </stream>
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use super::fleet::FleetDirectory;
use super::remote::{RemoteExecutor, TransportError};

const LOCKED_PREFIX: &str = "System management is locked";

const OS_PRODUCT: &str = "SLES";
const CLOUD_PRODUCT: &str = "suse-openstack-cloud";

// ── Report ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingRepos {
    pub missing: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductAvailability {
    pub available: bool,
    /// Channel names the product is expected to provide.
    pub repos: Vec<String>,
    /// Architecture → channels that are missing.
    pub errors: BTreeMap<String, MissingRepos>,
}

impl ProductAvailability {
    fn new(available: bool, repos: Vec<String>, arch: &str) -> Self {
        let mut errors = BTreeMap::new();
        if !available {
            errors.insert(
                arch.to_string(),
                MissingRepos {
                    missing: repos.clone(),
                },
            );
        }
        Self {
            available,
            repos,
            errors,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryCheckReport {
    pub os: ProductAvailability,
    pub openstack: ProductAvailability,
}

impl RepositoryCheckReport {
    fn products(&self) -> [&ProductAvailability; 2] {
        [&self.os, &self.openstack]
    }

    pub fn all_available(&self) -> bool {
        self.products().iter().all(|p| p.available)
    }

    pub fn any_available(&self) -> bool {
        self.products().iter().any(|p| p.available)
    }

    /// Missing channels across products, first architecture of each.
    pub fn missing_repos(&self) -> Vec<String> {
        self.products()
            .iter()
            .filter_map(|p| p.errors.values().next())
            .flat_map(|m| m.missing.iter().cloned())
            .collect()
    }

    /// Channels of every product that is available.
    pub fn available_repos(&self) -> Vec<String> {
        self.products()
            .iter()
            .filter(|p| p.available)
            .flat_map(|p| p.repos.iter().cloned())
            .collect()
    }
}

// ── Errors ─────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum RepoCheckError {
    #[error("package manager is locked: {0}")]
    Locked(String),

    #[error("package manager is waiting for input: {0}")]
    Prompt(String),

    #[error("unexpected package manager output: {0}")]
    Parse(String),

    #[error("no admin node in the fleet")]
    NoAdminNode,

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl RepoCheckError {
    pub fn key(&self) -> &'static str {
        match self {
            Self::Locked(_) => "zypper_locked",
            Self::Prompt(_) => "zypper_prompt",
            Self::Parse(_) => "zypper_parse_error",
            Self::NoAdminNode => "admin_node_missing",
            Self::Transport(e) => e.key(),
        }
    }

    /// Lock and prompt conditions clear up on their own or with operator
    /// action; callers surface them as "service unavailable".
    pub fn is_service_unavailable(&self) -> bool {
        matches!(self, Self::Locked(_) | Self::Prompt(_))
    }
}

// ── Parsing ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Product {
    pub name: String,
    pub version: String,
}

/// The parts of a zypper XML stream the checker looks at.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ZypperStream {
    pub messages: Vec<String>,
    /// Text of each pending prompt, in document order.
    pub prompts: Vec<String>,
    pub products: Option<Vec<Product>>,
}

impl ZypperStream {
    pub fn lock_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .map(|m| m.as_str())
            .find(|m| m.starts_with(LOCKED_PREFIX))
    }
}

pub fn parse_zypper_stream(xml: &str) -> Result<ZypperStream, RepoCheckError> {
    let doc = roxmltree::Document::parse(xml.trim())
        .map_err(|e| RepoCheckError::Parse(e.to_string()))?;
    let root = doc.root_element();
    if !root.has_tag_name("stream") {
        return Err(RepoCheckError::Parse(format!(
            "expected <stream>, found <{}>",
            root.tag_name().name()
        )));
    }

    let mut stream = ZypperStream::default();
    for child in root.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "message" => stream
                .messages
                .push(child.text().unwrap_or_default().trim().to_string()),
            "prompt" => {
                let text = child
                    .children()
                    .find(|n| n.has_tag_name("text"))
                    .and_then(|n| n.text())
                    .or_else(|| child.text())
                    .unwrap_or_default();
                stream.prompts.push(text.trim().to_string());
            }
            "product-list" => {
                let products = child
                    .children()
                    .filter(|n| n.has_tag_name("product"))
                    .map(|p| Product {
                        name: p.attribute("name").unwrap_or_default().to_string(),
                        version: p.attribute("version").unwrap_or_default().to_string(),
                    })
                    .collect();
                stream.products = Some(products);
            }
            _ => {}
        }
    }
    Ok(stream)
}

// ── Releases ───────────────────────────────────────────────

/// Base OS release a cloud version is built on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BaseRelease {
    pub version: &'static str,
    pub service_pack: &'static str,
}

pub fn base_release(cloud_version: &str) -> BaseRelease {
    match cloud_version {
        "6" => BaseRelease {
            version: "12.1",
            service_pack: "SP1",
        },
        "8" => BaseRelease {
            version: "12.3",
            service_pack: "SP3",
        },
        _ => BaseRelease {
            version: "12.2",
            service_pack: "SP2",
        },
    }
}

/// Evaluate a product list against a target cloud version.
pub fn evaluate(products: &[Product], cloud_version: &str, arch: &str) -> RepositoryCheckReport {
    let release = base_release(cloud_version);
    let has = |name: &str, version: &str| {
        products
            .iter()
            .any(|p| p.name == name && p.version == version)
    };

    let sp = release.service_pack;
    let os = ProductAvailability::new(
        has(OS_PRODUCT, release.version),
        vec![format!("SLES12-{sp}-Pool"), format!("SLES12-{sp}-Updates")],
        arch,
    );
    let openstack = ProductAvailability::new(
        has(CLOUD_PRODUCT, cloud_version),
        vec![
            format!("SUSE-OpenStack-Cloud-{cloud_version}-Pool"),
            format!("SUSE-OpenStack-Cloud-{cloud_version}-Updates"),
        ],
        arch,
    );

    RepositoryCheckReport { os, openstack }
}

/// Leading numeric value of a dotted version: `"10.2.4-211"` → `10.2`.
/// Anything without a leading number is `0.0`.
pub fn leading_version(s: &str) -> f64 {
    let s = s.trim();
    let mut end = 0;
    let mut seen_dot = false;
    for (i, c) in s.char_indices() {
        if c.is_ascii_digit() {
            end = i + 1;
        } else if c == '.' && !seen_dot && end == i && i > 0 {
            seen_dot = true;
        } else {
            break;
        }
    }
    s[..end].parse().unwrap_or(0.0)
}

// ── Checker ────────────────────────────────────────────────

pub struct RepositoryVersionChecker {
    fleet: Arc<dyn FleetDirectory>,
    executor: Arc<dyn RemoteExecutor>,
    command: String,
    timeout: Duration,
}

impl RepositoryVersionChecker {
    pub fn new(
        fleet: Arc<dyn FleetDirectory>,
        executor: Arc<dyn RemoteExecutor>,
        command: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            fleet,
            executor,
            command: command.into(),
            timeout,
        }
    }

    pub async fn check(&self, cloud_version: &str) -> Result<RepositoryCheckReport, RepoCheckError> {
        let admin = self.fleet.admin_node().ok_or(RepoCheckError::NoAdminNode)?;
        let result = self
            .executor
            .run(&admin.name, &self.command, self.timeout)
            .await?;

        let stream = parse_zypper_stream(&result.stdout).map_err(|e| {
            if result.success() {
                e
            } else {
                RepoCheckError::Parse(format!(
                    "exit code {}: {}",
                    result.exit_code,
                    result.stderr.trim()
                ))
            }
        })?;

        if let Some(message) = stream.lock_message() {
            warn!(node = %admin.name, message, "package manager locked");
            return Err(RepoCheckError::Locked(message.to_string()));
        }
        if let Some(prompt) = stream.prompts.first() {
            warn!(node = %admin.name, prompt = %prompt, "package manager awaiting input");
            return Err(RepoCheckError::Prompt(prompt.clone()));
        }
        let products = stream
            .products
            .ok_or_else(|| RepoCheckError::Parse("no product list in output".to_string()))?;

        let report = evaluate(&products, cloud_version, &admin.architecture);
        debug!(
            version = cloud_version,
            os = report.os.available,
            openstack = report.openstack.available,
            "repository check finished"
        );
        Ok(report)
    }
}
