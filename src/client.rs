//! Typed HTTP client for the fleetgate daemon REST API.

use std::collections::HashMap;

use anyhow::{bail, Context, Result};
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::Value;

use crate::config::NodeTarget;
use crate::domain::control_plane::{PlatformStatus, UpgradeLaunch, UpgradeStatus};
use crate::domain::health_report::HealthReport;
use crate::domain::repocheck::RepositoryCheckReport;
use crate::domain::role_applicability::RoleDecision;
use crate::domain::stored_report::StoredReport;

const DEFAULT_BASE_URL: &str = "http://127.0.0.1:9200";

/// Body of a non-2xx response.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
    message: String,
}

pub struct FleetgateClient {
    base_url: String,
    http: Client,
}

impl FleetgateClient {
    pub fn new(base_url: &str) -> Result<Self> {
        // Full check runs fan out over ssh; leave them room
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .context("building HTTP client")?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    /// `None` → the local daemon. `Some(name)` → look it up in the nodes map.
    pub fn from_node(name: Option<&str>, nodes: &HashMap<String, NodeTarget>) -> Result<Self> {
        match name {
            None => Self::new(DEFAULT_BASE_URL),
            Some(n) => match nodes.get(n) {
                Some(target) => Self::new(&target.url),
                None => bail!(
                    "node '{}' not found in config. Available nodes: {}",
                    n,
                    if nodes.is_empty() {
                        "(none configured)".to_string()
                    } else {
                        let mut names: Vec<_> = nodes.keys().cloned().collect();
                        names.sort();
                        names.join(", ")
                    }
                ),
            },
        }
    }

    pub async fn health(&self) -> Result<Value> {
        self.get("/health").await
    }

    pub async fn status(&self) -> Result<PlatformStatus> {
        self.get("/api/v1/status").await
    }

    pub async fn upgrade(&self) -> Result<UpgradeStatus> {
        self.get("/api/v1/upgrade").await
    }

    pub async fn start_upgrade(&self) -> Result<UpgradeLaunch> {
        self.post("/api/v1/upgrade").await
    }

    pub async fn report(&self) -> Result<StoredReport> {
        self.get("/api/v1/checks").await
    }

    pub async fn refresh_report(&self) -> Result<StoredReport> {
        self.post("/api/v1/checks/refresh").await
    }

    pub async fn check(&self, name: &str) -> Result<HealthReport> {
        self.get(&format!("/api/v1/checks/{name}")).await
    }

    pub async fn repocheck(&self, version: &str) -> Result<RepositoryCheckReport> {
        self.get(&format!("/api/v1/repocheck/{version}")).await
    }

    pub async fn role(&self, node: &str, barclamp: &str, role: &str) -> Result<RoleDecision> {
        self.get(&format!("/api/v1/nodes/{node}/roles/{barclamp}/{role}"))
            .await
    }

    pub async fn reload_inventory(&self) -> Result<Value> {
        self.post("/api/v1/inventory/reload").await
    }

    // ── Internal helpers ───────────────────────────────────

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {}", url))?;
        decode(&url, resp).await
    }

    async fn post<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .http
            .post(&url)
            .send()
            .await
            .with_context(|| format!("POST {}", url))?;
        decode(&url, resp).await
    }
}

async fn decode<T: serde::de::DeserializeOwned>(url: &str, resp: Response) -> Result<T> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        match serde_json::from_str::<ErrorBody>(&body) {
            Ok(err) => bail!("{} returned {} ({}): {}", url, status, err.error, err.message),
            Err(_) => bail!("{} returned {}", url, status),
        }
    }
    resp.json()
        .await
        .with_context(|| format!("parsing response from {}", url))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_node_lists_configured_names() {
        let nodes = HashMap::from([
            ("crowbar".to_string(), NodeTarget { url: "http://crowbar:9200".into() }),
            ("admin".to_string(), NodeTarget { url: "http://admin:9200/".into() }),
        ]);

        let err = FleetgateClient::from_node(Some("ghost"), &nodes)
            .err()
            .unwrap()
            .to_string();
        assert!(err.contains("admin, crowbar"));

        let client = FleetgateClient::from_node(Some("admin"), &nodes).unwrap();
        assert_eq!(client.base_url, "http://admin:9200");
    }
}
