//! Sweeper: reclaims view snapshots and temporary uploads of stale sessions.

use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use metrics::counter;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use super::error::CacheError;
use super::liveness::LivenessRegistry;
use super::store::BackingStore;
use crate::domain::keys::{Marker, StoreKey, VIEW_PREFIX};
use crate::domain::session::SessionId;
use crate::domain::uploads::TempArtifact;

const METRIC_SWEEP_REMOVED_TOTAL: &str = "tidecache_sweep_removed_total";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub valid_sessions: usize,
    pub views_removed: usize,
    pub artifacts_removed: usize,
}

#[derive(Clone)]
pub struct Sweeper {
    store: Arc<dyn BackingStore>,
    liveness: LivenessRegistry,
    pending_dir: Option<PathBuf>,
}

impl Sweeper {
    pub fn new(
        store: Arc<dyn BackingStore>,
        liveness: LivenessRegistry,
        pending_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            store,
            liveness,
            pending_dir,
        }
    }

    #[instrument(skip(self))]
    pub async fn sweep(&self, now: i64) -> Result<SweepReport, CacheError> {
        let valid = self.liveness.valid_sessions(now).await?;

        let views_removed = self.sweep_views(&valid).await?;
        let artifacts_removed = match &self.pending_dir {
            Some(dir) => sweep_artifacts(dir, &valid).await?,
            None => 0,
        };

        counter!(METRIC_SWEEP_REMOVED_TOTAL, "kind" => "view").increment(views_removed as u64);
        counter!(METRIC_SWEEP_REMOVED_TOTAL, "kind" => "artifact")
            .increment(artifacts_removed as u64);

        let report = SweepReport {
            valid_sessions: valid.len(),
            views_removed,
            artifacts_removed,
        };
        info!(
            valid_sessions = report.valid_sessions,
            views_removed, artifacts_removed, "Sweep complete"
        );
        Ok(report)
    }

    async fn sweep_views(&self, valid: &BTreeSet<SessionId>) -> Result<usize, CacheError> {
        let mut removed = 0;
        for raw in self.store.scan(VIEW_PREFIX).await? {
            let parsed = match raw.parse::<StoreKey>() {
                Ok(parsed) => parsed,
                Err(err) => {
                    warn!(key = %raw, error = %err, "Skipping unrecognised view key");
                    continue;
                }
            };
            let Some(session) = parsed.key.session() else {
                continue;
            };
            if valid.contains(session) {
                continue;
            }
            // A lock may belong to a refresh still committing; its TTL reclaims it.
            if parsed.marker == Some(Marker::Lock) {
                continue;
            }
            // Deleting a key that vanished since the scan is a no-op.
            let deleted = self.store.delete(&raw).await?;
            if deleted && parsed.marker.is_none() {
                debug!(key = %raw, "Removed stale view snapshot");
                removed += 1;
            }
        }
        Ok(removed)
    }
}

async fn sweep_artifacts(dir: &Path, valid: &BTreeSet<SessionId>) -> Result<usize, CacheError> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(0),
        Err(err) => return Err(CacheError::io(dir, err)),
    };

    let mut removed = 0;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|err| CacheError::io(dir, err))?
    {
        let name = entry.file_name();
        let Some(artifact) = name.to_str().and_then(TempArtifact::parse) else {
            continue;
        };
        if valid.contains(&artifact.session) {
            continue;
        }
        let path = entry.path();
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(path = %path.display(), "Removed stale upload artifact");
                removed += 1;
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => {
                warn!(path = %path.display(), error = %err, "Failed to remove upload artifact");
            }
        }
    }
    Ok(removed)
}
