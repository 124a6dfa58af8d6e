//! On-disk copy of the last full readiness report, so a restarted daemon can
//! answer `GET /api/v1/checks` before its first refresh finishes.
//!
//! A report whose checksum does not match is moved aside to a `.rejected`
//! sibling. It is kept for inspection and is not offered again on the next start.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::stored_report::StoredReport;

#[derive(Debug, Error)]
pub enum ReportStoreError {
    #[error("{action} {}: {source}", .path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("readiness report {} is not valid JSON: {source}", .path.display())]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("readiness report {} failed checksum verification", .path.display())]
    Tampered { path: PathBuf },
}

pub struct ReportStore {
    path: PathBuf,
    // saves from the refresh loop and `POST /checks/refresh` may overlap
    saving: Mutex<()>,
}

impl ReportStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            saving: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the persisted report. The new file is written next to the old
    /// one and renamed over it.
    pub async fn save(&self, stored: &StoredReport) -> Result<(), ReportStoreError> {
        let _saving = self.saving.lock().await;

        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)
                .await
                .map_err(|source| io_error("creating", dir, source))?;
        }

        let mut body = serde_json::to_vec_pretty(stored).map_err(|source| {
            ReportStoreError::Corrupt {
                path: self.path.clone(),
                source,
            }
        })?;
        body.push(b'\n');

        let staging = self.sibling("tmp");
        fs::write(&staging, body)
            .await
            .map_err(|source| io_error("writing", &staging, source))?;
        fs::rename(&staging, &self.path)
            .await
            .map_err(|source| io_error("replacing", &self.path, source))?;
        debug!(path = %self.path.display(), checksum = %stored.checksum, "readiness report saved");
        Ok(())
    }

    /// The persisted report, or `None` when nothing was saved yet.
    pub async fn load(&self) -> Result<Option<StoredReport>, ReportStoreError> {
        let content = match fs::read(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(io_error("reading", &self.path, source)),
        };

        let stored = match serde_json::from_slice::<StoredReport>(&content) {
            Ok(stored) => stored,
            Err(source) => {
                self.reject().await;
                return Err(ReportStoreError::Corrupt {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        if !stored.verify() {
            self.reject().await;
            return Err(ReportStoreError::Tampered {
                path: self.path.clone(),
            });
        }
        Ok(Some(stored))
    }

    async fn reject(&self) {
        let rejected = self.sibling("rejected");
        match fs::rename(&self.path, &rejected).await {
            Ok(()) => warn!(
                path = %self.path.display(),
                moved_to = %rejected.display(),
                "unusable readiness report moved aside"
            ),
            Err(e) => warn!(path = %self.path.display(), error = %e, "could not move readiness report aside"),
        }
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".");
        name.push(suffix);
        self.path.with_file_name(name)
    }
}

fn io_error(action: &'static str, path: &Path, source: std::io::Error) -> ReportStoreError {
    ReportStoreError::Io {
        action,
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::health_report::{CheckKey, Finding, HealthReport};

    #[tokio::test]
    async fn nothing_saved_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReportStore::new(dir.path().join("report.json"));
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_replaces_previous_report() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReportStore::new(dir.path().join("state").join("report.json"));

        store
            .save(&StoredReport::new(HealthReport::single(
                CheckKey::HaNotInstalled,
                Finding::Flag(true),
            )))
            .await
            .unwrap();
        let ready = StoredReport::new(HealthReport::new());
        store.save(&ready).await.unwrap();

        let back = store.load().await.unwrap().unwrap();
        assert_eq!(back.checksum, ready.checksum);
        assert!(back.ready());
        assert!(!dir.path().join("state").join("report.json.tmp").exists());
    }

    #[tokio::test]
    async fn tampered_report_is_moved_aside() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        let store = ReportStore::new(path.clone());

        store
            .save(&StoredReport::new(HealthReport::new()))
            .await
            .unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        std::fs::write(
            &path,
            content.replace("\"report\": {}", "\"report\": {\"old_version\": true}"),
        )
        .unwrap();

        let err = store.load().await.unwrap_err();
        assert!(matches!(err, ReportStoreError::Tampered { .. }));
        assert!(!path.exists());
        assert!(dir.path().join("report.json.rejected").exists());
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn garbage_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = ReportStore::new(path).load().await.unwrap_err();
        assert!(matches!(err, ReportStoreError::Corrupt { .. }));
    }
}
