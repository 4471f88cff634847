//! Entry points used by the HTTP surface and the CLI.

use std::sync::Arc;

use bytes::Bytes;
use tracing::{info, instrument, warn};

use super::error::AppError;
use super::pipeline::Task;
use super::runner::{TaskHandle, TaskRunner};
use super::table::{TablePage, TableQuery};
use crate::cache::{LivenessRegistry, SweepReport, Sweeper, ViewCache, now_unix};
use crate::domain::dataset::Dataset;
use crate::domain::error::DomainError;
use crate::domain::keys::{KeyClass, RootKey, ViewKey};
use crate::domain::session::SessionId;

#[derive(Clone)]
pub struct CacheService {
    views: ViewCache,
    liveness: LivenessRegistry,
    sweeper: Sweeper,
    runner: Arc<dyn TaskRunner>,
}

impl CacheService {
    pub fn new(
        views: ViewCache,
        liveness: LivenessRegistry,
        sweeper: Sweeper,
        runner: Arc<dyn TaskRunner>,
    ) -> Self {
        Self {
            views,
            liveness,
            sweeper,
            runner,
        }
    }

    pub fn views(&self) -> &ViewCache {
        &self.views
    }

    pub async fn checkin(&self, session: &SessionId) -> Result<i64, AppError> {
        let now = now_unix();
        self.liveness.checkin(session, now).await?;
        Ok(now)
    }

    pub async fn get_view(&self, session: &SessionId, root: RootKey) -> Result<Bytes, AppError> {
        Ok(self.views.get_view(session, root).await?)
    }

    /// One page of the session's snapshot of a dataset key.
    pub async fn view_table(
        &self,
        session: &SessionId,
        root: RootKey,
        query: &TableQuery,
    ) -> Result<TablePage, AppError> {
        if root.class() != KeyClass::Dataset {
            return Err(DomainError::validation(format!("`{root}` is not a dataset")).into());
        }
        let value = self.views.get_view(session, root).await?;
        let dataset = Dataset::decode(root, &value)?;
        Ok(query.apply(&dataset)?)
    }

    /// Recompute `root` and copy the result into the session's view.
    ///
    /// The view reports "not ready" until the copy lands; its old snapshot stays
    /// readable meanwhile.
    #[instrument(skip(self), fields(session = %session, root = %root))]
    pub async fn refresh_view(
        &self,
        session: &SessionId,
        root: RootKey,
    ) -> Result<TaskHandle, AppError> {
        let view = ViewKey::new(session.clone(), root);
        self.views.begin_refresh(&view).await?;

        let submitted = self
            .runner
            .chain(Task::recompute(root), Task::propagate(view.clone()))
            .await;
        match submitted {
            Ok(handle) => {
                info!(task_id = handle.id(), "View refresh submitted");
                Ok(handle)
            }
            Err(err) => {
                if let Err(cleanup) = self.views.abandon_refresh(&view).await {
                    warn!(error = %cleanup, "Failed to clear working flag after submit error");
                }
                Err(err.into())
            }
        }
    }

    /// Request a shared recompute of `root`, skipped if one is already running.
    pub async fn recompute_root(&self, root: RootKey) -> Result<TaskHandle, AppError> {
        let handle = self.runner.submit(Task::recompute_if_unlocked(root)).await?;
        info!(root = %root, task_id = handle.id(), "Root recompute submitted");
        Ok(handle)
    }

    pub async fn is_root_ready(&self, root: RootKey) -> Result<bool, AppError> {
        Ok(self.views.roots().is_ready(root).await?)
    }

    pub async fn is_view_ready(&self, session: &SessionId, root: RootKey) -> Result<bool, AppError> {
        Ok(self
            .views
            .is_ready(&ViewKey::new(session.clone(), root))
            .await?)
    }

    pub async fn sweep(&self) -> Result<SweepReport, AppError> {
        Ok(self.sweeper.sweep(now_unix()).await?)
    }
}
