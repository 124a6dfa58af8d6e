//! A readiness report wrapped with integrity metadata for caching.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::health_report::HealthReport;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredReport {
    /// SHA-256 of the serialized report: "sha256:<hex>"
    pub checksum: String,
    pub collected_at: DateTime<Utc>,
    /// Version of the daemon that ran the checks.
    pub collector_version: String,
    pub report: HealthReport,
}

impl StoredReport {
    pub fn new(report: HealthReport) -> Self {
        Self {
            checksum: checksum(&report),
            collected_at: Utc::now(),
            collector_version: env!("CARGO_PKG_VERSION").to_string(),
            report,
        }
    }

    pub fn age_secs(&self) -> i64 {
        Utc::now()
            .signed_duration_since(self.collected_at)
            .num_seconds()
    }

    /// An empty report means every check passed.
    pub fn ready(&self) -> bool {
        self.report.is_empty()
    }

    pub fn verify(&self) -> bool {
        self.checksum == checksum(&self.report)
    }
}

fn checksum(report: &HealthReport) -> String {
    // BTreeMap-backed, so serialization order is stable
    let serialized = serde_json::to_string(report).unwrap_or_default();
    format!("sha256:{:x}", Sha256::digest(serialized.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::health_report::{CheckKey, Finding};

    #[test]
    fn checksum_detects_tampering() {
        let mut stored = StoredReport::new(HealthReport::single(
            CheckKey::NodesNotReady,
            Finding::Names(vec!["d52-54-00-aa-bb-01".into()]),
        ));
        assert!(stored.checksum.starts_with("sha256:"));
        assert!(stored.verify());
        assert!(!stored.ready());

        stored.report = HealthReport::new();
        assert!(!stored.verify());
    }
}
