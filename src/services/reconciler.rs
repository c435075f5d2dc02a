//! Upload reconciliation: push local archives the remote store lacks
//!
//! No "uploaded" flag is ever stored locally. Each pass recomputes the remote
//! manifest and uploads the difference, so a pass interrupted halfway is
//! simply finished by the next one.

use crate::io::archive_store::ArchiveStore;
use crate::io::remote_store::{object_key, RemoteStore, ARCHIVE_CONTENT_TYPE};
use anyhow::Context;
use bytes::Bytes;
use rustc_hash::FxHashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// One archive that could not be uploaded this pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFailure {
    pub file_name: String,
    pub error: String,
}

/// Outcome of one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// False when no owner identity was available
    pub attempted: bool,
    pub local: usize,
    pub remote: usize,
    pub uploaded: Vec<String>,
    pub failed: Vec<UploadFailure>,
}

impl ReconcileReport {
    pub fn not_attempted() -> Self {
        Self::default()
    }

    /// Archives that were missing remotely at the start of the pass
    pub fn missing(&self) -> usize {
        self.uploaded.len() + self.failed.len()
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct UploadReconciler {
    archives: ArchiveStore,
    remote: Arc<dyn RemoteStore>,
}

impl UploadReconciler {
    pub fn new(archives: ArchiveStore, remote: Arc<dyn RemoteStore>) -> Self {
        Self { archives, remote }
    }

    /// Run one pass for `owner`. A listing failure aborts the whole pass;
    /// individual upload failures are reported and the rest continue.
    pub async fn reconcile(&self, owner: Option<&str>) -> anyhow::Result<ReconcileReport> {
        let Some(owner) = owner else {
            info!("reconcile_skipped_no_owner");
            return Ok(ReconcileReport::not_attempted());
        };
        let start = Instant::now();

        let local = self.archives.list(Some(owner)).context("listing local archives")?;
        let manifest = self.manifest(owner).await?;

        let missing: Vec<String> =
            local.iter().filter(|name| !manifest.contains(name.as_str())).cloned().collect();

        let mut report = ReconcileReport {
            attempted: true,
            local: local.len(),
            remote: manifest.len(),
            ..Default::default()
        };

        let mut uploads = JoinSet::new();
        for file_name in missing {
            let body = match self.archives.read(&file_name) {
                Ok(bytes) => Bytes::from(bytes),
                Err(e) => {
                    warn!(archive = %file_name, error = %e, "upload_read_failed");
                    report.failed.push(UploadFailure { file_name, error: e.to_string() });
                    continue;
                }
            };
            let remote = self.remote.clone();
            let key = object_key(owner, &file_name);
            uploads.spawn(async move {
                let result = remote.put_object(&key, body, ARCHIVE_CONTENT_TYPE).await;
                (file_name, key, result)
            });
        }

        while let Some(joined) = uploads.join_next().await {
            match joined {
                Ok((file_name, key, Ok(()))) => {
                    info!(key = %key, "archive_uploaded");
                    report.uploaded.push(file_name);
                }
                Ok((file_name, key, Err(e))) => {
                    warn!(key = %key, error = %format!("{e:#}"), "archive_upload_failed");
                    report.failed.push(UploadFailure { file_name, error: format!("{e:#}") });
                }
                Err(e) => {
                    error!(error = %e, "archive_upload_task_failed");
                    report
                        .failed
                        .push(UploadFailure { file_name: String::new(), error: e.to_string() });
                }
            }
        }

        // Completion order is arbitrary; keep reports stable
        report.uploaded.sort();
        report.failed.sort_by(|a, b| a.file_name.cmp(&b.file_name));

        info!(
            owner = %owner,
            local = %report.local,
            remote = %report.remote,
            uploaded = %report.uploaded.len(),
            failed = %report.failed.len(),
            elapsed_ms = %start.elapsed().as_millis(),
            "reconcile_completed"
        );
        Ok(report)
    }

    /// Filenames already stored for `owner`. An absent listing is empty.
    async fn manifest(&self, owner: &str) -> anyhow::Result<FxHashSet<String>> {
        let keys = self
            .remote
            .list_keys(owner)
            .await
            .with_context(|| format!("listing remote archives for {owner}"))?
            .unwrap_or_default();

        let prefix = format!("{owner}/");
        Ok(keys
            .into_iter()
            .map(|key| match key.strip_prefix(&prefix) {
                Some(file) => file.to_string(),
                None => key,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::archive::TripArchive;
    use crate::domain::samples::LocationSample;
    use crate::io::remote_store::MemoryRemoteStore;
    use chrono::{TimeZone, Utc};

    fn write_trip(store: &ArchiveStore, owner: &str, start: i64) -> String {
        let samples = (0..3)
            .map(|i| {
                LocationSample::new(43.47, -80.54, Utc.timestamp_opt(start + i * 5, 0).unwrap())
            })
            .collect();
        store.write(&TripArchive::locations(owner, samples).unwrap()).unwrap()
    }

    fn setup() -> (tempfile::TempDir, ArchiveStore, Arc<MemoryRemoteStore>, UploadReconciler) {
        let dir = tempfile::tempdir().unwrap();
        let archives = ArchiveStore::new(dir.path());
        let remote = Arc::new(MemoryRemoteStore::new());
        let reconciler = UploadReconciler::new(archives.clone(), remote.clone());
        (dir, archives, remote, reconciler)
    }

    #[tokio::test]
    async fn test_no_owner_not_attempted() {
        let (_dir, archives, remote, reconciler) = setup();
        write_trip(&archives, "eddy", 1_600_000_000);

        let report = reconciler.reconcile(None).await.unwrap();
        assert!(!report.attempted);
        assert!(remote.is_empty());
    }

    #[tokio::test]
    async fn test_uploads_only_missing() {
        let (_dir, archives, remote, reconciler) = setup();
        let a = write_trip(&archives, "eddy", 1_600_000_000);
        let b = write_trip(&archives, "eddy", 1_600_001_000);
        let c = write_trip(&archives, "eddy", 1_600_002_000);
        write_trip(&archives, "sam", 1_600_003_000);
        remote.insert(&object_key("eddy", &b), Bytes::from_static(b"[]"), ARCHIVE_CONTENT_TYPE);

        let report = reconciler.reconcile(Some("eddy")).await.unwrap();

        assert!(report.attempted);
        assert_eq!(report.local, 3);
        assert_eq!(report.remote, 1);
        let mut expected = vec![a.clone(), c];
        expected.sort();
        assert_eq!(report.uploaded, expected);
        assert!(report.is_clean());

        let stored = remote.get(&object_key("eddy", &a)).unwrap();
        assert_eq!(stored.content_type, ARCHIVE_CONTENT_TYPE);
        assert_eq!(stored.body.as_ref(), archives.read(&a).unwrap().as_slice());
        assert!(remote.get(&object_key("sam", "x")).is_none());
    }

    #[tokio::test]
    async fn test_second_pass_uploads_nothing() {
        let (_dir, archives, remote, reconciler) = setup();
        write_trip(&archives, "eddy", 1_600_000_000);
        write_trip(&archives, "eddy", 1_600_001_000);

        let first = reconciler.reconcile(Some("eddy")).await.unwrap();
        let second = reconciler.reconcile(Some("eddy")).await.unwrap();

        assert_eq!(first.uploaded.len(), 2);
        assert_eq!(second.missing(), 0);
        assert_eq!(second.remote, 2);
        assert_eq!(remote.put_count(), 2);
    }

    #[tokio::test]
    async fn test_partial_failure_retried_next_pass() {
        let (_dir, archives, remote, reconciler) = setup();
        let a = write_trip(&archives, "eddy", 1_600_000_000);
        let b = write_trip(&archives, "eddy", 1_600_001_000);
        remote.fail_key(&object_key("eddy", &a));

        let first = reconciler.reconcile(Some("eddy")).await.unwrap();
        assert_eq!(first.uploaded, vec![b]);
        assert_eq!(first.failed.len(), 1);
        assert_eq!(first.failed[0].file_name, a);

        remote.clear_failures();
        let second = reconciler.reconcile(Some("eddy")).await.unwrap();
        assert_eq!(second.uploaded, vec![a]);
        assert!(second.is_clean());
    }

    #[tokio::test]
    async fn test_listing_error_aborts_pass() {
        let (_dir, archives, remote, reconciler) = setup();
        write_trip(&archives, "eddy", 1_600_000_000);
        remote.set_listing_down(true);

        assert!(reconciler.reconcile(Some("eddy")).await.is_err());
        assert_eq!(remote.put_count(), 0);
    }

    #[tokio::test]
    async fn test_nothing_local() {
        let (_dir, _archives, remote, reconciler) = setup();
        let report = reconciler.reconcile(Some("eddy")).await.unwrap();
        assert!(report.attempted);
        assert_eq!(report.missing(), 0);
        assert!(remote.is_empty());
    }
}
