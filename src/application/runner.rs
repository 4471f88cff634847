//! Task submission: run pipeline stages independently of the calling request.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use super::pipeline::{Pipeline, PipelineError, StageOutput, Task};

#[async_trait]
pub trait TaskRunner: Send + Sync {
    /// Run `task` on its own.
    async fn submit(&self, task: Task) -> Result<TaskHandle, PipelineError>;

    /// Run `first`, then `then` with its output. `then` only runs if `first`
    /// completed normally; otherwise it is abandoned.
    async fn chain(&self, first: Task, then: Task) -> Result<TaskHandle, PipelineError>;
}

/// Reference to submitted work.
#[derive(Debug)]
pub struct TaskHandle {
    id: String,
    completion: Option<JoinHandle<Result<StageOutput, PipelineError>>>,
}

impl TaskHandle {
    /// Handle to work that completes in another process; observe it by polling
    /// readiness instead.
    pub fn detached(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            completion: None,
        }
    }

    fn local(id: String, completion: JoinHandle<Result<StageOutput, PipelineError>>) -> Self {
        Self {
            id,
            completion: Some(completion),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for in-process work. Detached handles return `Ok(None)` immediately.
    pub async fn wait(self) -> Result<Option<StageOutput>, PipelineError> {
        match self.completion {
            None => Ok(None),
            Some(handle) => handle
                .await
                .map_err(|err| PipelineError::runner(format!("task `{}` panicked: {err}", self.id)))?
                .map(Some),
        }
    }
}

/// Runs stages as tokio tasks in the current process.
#[derive(Clone)]
pub struct LocalTaskRunner {
    pipeline: Pipeline,
}

impl LocalTaskRunner {
    pub fn new(pipeline: Pipeline) -> Self {
        Self { pipeline }
    }
}

#[async_trait]
impl TaskRunner for LocalTaskRunner {
    async fn submit(&self, task: Task) -> Result<TaskHandle, PipelineError> {
        let id = Uuid::new_v4().to_string();
        let pipeline = self.pipeline.clone();
        debug!(task_id = %id, task = task.name(), "Submitting local task");
        let handle = tokio::spawn(async move { pipeline.run(&task, StageOutput::empty()).await });
        Ok(TaskHandle::local(id, handle))
    }

    async fn chain(&self, first: Task, then: Task) -> Result<TaskHandle, PipelineError> {
        let id = Uuid::new_v4().to_string();
        let pipeline = self.pipeline.clone();
        debug!(task_id = %id, first = first.name(), then = then.name(), "Submitting local chain");
        let handle = tokio::spawn(async move {
            match pipeline.run(&first, StageOutput::empty()).await {
                Ok(output) => pipeline.run(&then, output).await,
                Err(err) => {
                    if let Err(cleanup) = pipeline.abandon(&then).await {
                        warn!(error = %cleanup, task = then.name(), "Failed to abandon chained stage");
                    }
                    Err(err)
                }
            }
        });
        Ok(TaskHandle::local(id, handle))
    }
}

/// Run `unit` every `interval`, starting one interval from now.
pub fn schedule<F, Fut>(name: &'static str, interval: Duration, unit: F) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // Skip the first immediate tick
        loop {
            ticker.tick().await;
            debug!(unit = name, "Running scheduled unit");
            unit().await;
        }
    })
}
