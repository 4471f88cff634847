use std::sync::Arc;

use apalis::prelude::{Data, Error as ApalisError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    application::{
        pipeline::{PipelineError, StageOutput, Task},
        repos::{JobsRepo, RepoError},
        runner::{TaskHandle, TaskRunner},
    },
    domain::types::JobType,
};

use super::{context::JobWorkerContext, job_failed, queue::enqueue_job};

/// Resolver failures are not retried; the next explicit refresh retries naturally.
const PIPELINE_MAX_ATTEMPTS: i32 = 1;
const PIPELINE_PRIORITY: i32 = 0;

/// One pipeline stage plus, for chains, the stage to enqueue when it completes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineJobPayload {
    pub task: Task,
    #[serde(default)]
    pub input: StageOutput,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub then: Option<Task>,
}

pub async fn enqueue_pipeline_job<J: JobsRepo + ?Sized>(
    repo: &J,
    payload: &PipelineJobPayload,
) -> Result<String, RepoError> {
    enqueue_job(
        repo,
        JobType::PipelineStage,
        payload,
        None,
        PIPELINE_MAX_ATTEMPTS,
        PIPELINE_PRIORITY,
    )
    .await
}

/// Execute one stage. The follow-up stage is enqueued with this stage's output
/// only on success; otherwise it is abandoned so its readiness flag clears.
pub async fn process_pipeline_job(
    payload: PipelineJobPayload,
    context: Data<JobWorkerContext>,
) -> Result<(), ApalisError> {
    let ctx = &*context;
    let PipelineJobPayload { task, input, then } = payload;

    info!(
        target = "application::jobs::process_pipeline_job",
        task = task.name(),
        chained = then.is_some(),
        "starting pipeline stage"
    );

    let output = match ctx.pipeline.run(&task, input).await {
        Ok(output) => output,
        Err(err) => {
            if let Some(next) = &then {
                abandon_stage(ctx, next).await;
            }
            warn!(
                target = "application::jobs::process_pipeline_job",
                task = task.name(),
                error = %err,
                "pipeline stage failed"
            );
            return Err(job_failed(err));
        }
    };

    if let Some(next) = then {
        let follow_up = PipelineJobPayload {
            task: next,
            input: output,
            then: None,
        };
        if let Err(err) = enqueue_pipeline_job(ctx.jobs.as_ref(), &follow_up).await {
            abandon_stage(ctx, &follow_up.task).await;
            return Err(job_failed(err));
        }
    }

    Ok(())
}

async fn abandon_stage(ctx: &JobWorkerContext, task: &Task) {
    if let Err(err) = ctx.pipeline.abandon(task).await {
        warn!(
            target = "application::jobs::process_pipeline_job",
            task = task.name(),
            error = %err,
            "failed to abandon chained stage"
        );
    }
}

/// Runs stages on the job queue, so any worker process sharing the database
/// can pick them up.
#[derive(Clone)]
pub struct QueueTaskRunner {
    jobs: Arc<dyn JobsRepo>,
}

impl QueueTaskRunner {
    pub fn new(jobs: Arc<dyn JobsRepo>) -> Self {
        Self { jobs }
    }

    async fn push(&self, payload: PipelineJobPayload) -> Result<TaskHandle, PipelineError> {
        let id = enqueue_pipeline_job(self.jobs.as_ref(), &payload)
            .await
            .map_err(|err| PipelineError::runner(err.to_string()))?;
        Ok(TaskHandle::detached(id))
    }
}

#[async_trait]
impl TaskRunner for QueueTaskRunner {
    async fn submit(&self, task: Task) -> Result<TaskHandle, PipelineError> {
        self.push(PipelineJobPayload {
            task,
            input: StageOutput::empty(),
            then: None,
        })
        .await
    }

    async fn chain(&self, first: Task, then: Task) -> Result<TaskHandle, PipelineError> {
        self.push(PipelineJobPayload {
            task: first,
            input: StageOutput::empty(),
            then: Some(then),
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use bytes::Bytes;

    use super::*;
    use crate::application::pipeline::Pipeline;
    use crate::application::repos::NewJobRecord;
    use crate::cache::{
        CacheConfig, LockManager, MemoryStore, ResolveError, RootCache, SourceResolver, ViewCache,
    };
    use crate::domain::keys::{RootKey, ViewKey};
    use crate::domain::session::SessionId;

    #[derive(Default)]
    struct RecordingJobs {
        records: Mutex<Vec<NewJobRecord>>,
    }

    impl RecordingJobs {
        fn payloads(&self) -> Vec<PipelineJobPayload> {
            self.records
                .lock()
                .expect("records lock")
                .iter()
                .map(|record| serde_json::from_value(record.payload.clone()).expect("payload"))
                .collect()
        }
    }

    #[async_trait]
    impl JobsRepo for RecordingJobs {
        async fn enqueue_job(&self, job: NewJobRecord) -> Result<String, RepoError> {
            let mut records = self.records.lock().expect("records lock");
            records.push(job);
            Ok(format!("job-{}", records.len()))
        }
    }

    struct Flaky {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SourceResolver for Flaky {
        async fn resolve(&self, key: RootKey) -> Result<Vec<u8>, ResolveError> {
            match self.calls.fetch_add(1, Ordering::SeqCst) {
                0 => Ok(b"rows".to_vec()),
                _ => Err(ResolveError::failed(key, "source offline")),
            }
        }
    }

    fn context() -> (Arc<RecordingJobs>, JobWorkerContext) {
        let store = Arc::new(MemoryStore::new());
        let config = CacheConfig::default();
        let locks = LockManager::new(store.clone(), &config);
        let resolver = Arc::new(Flaky {
            calls: AtomicUsize::new(0),
        });
        let roots = RootCache::new(store.clone(), locks.clone(), resolver, &config);
        let views = ViewCache::new(store, locks, roots, &config);
        let jobs = Arc::new(RecordingJobs::default());
        let ctx = JobWorkerContext {
            pipeline: Pipeline::new(views),
            jobs: jobs.clone(),
        };
        (jobs, ctx)
    }

    fn view() -> ViewKey {
        ViewKey::new(
            SessionId::parse("s1").expect("session"),
            RootKey::ProcessedFiles,
        )
    }

    #[tokio::test]
    async fn success_enqueues_next_stage_with_output() {
        let (jobs, ctx) = context();
        let payload = PipelineJobPayload {
            task: Task::recompute(RootKey::ProcessedFiles),
            input: StageOutput::empty(),
            then: Some(Task::propagate(view())),
        };

        process_pipeline_job(payload, Data::new(ctx))
            .await
            .expect("stage succeeds");

        let queued = jobs.payloads();
        assert_eq!(
            queued,
            vec![PipelineJobPayload {
                task: Task::propagate(view()),
                input: StageOutput::value(Bytes::from_static(b"rows")),
                then: None,
            }]
        );
        let record = &jobs.records.lock().expect("records lock")[0];
        assert_eq!(record.max_attempts, 1);
        assert_eq!(record.job_type, JobType::PipelineStage);
    }

    #[tokio::test]
    async fn failure_abandons_next_stage() {
        let (jobs, ctx) = context();
        let views = ctx.pipeline.views().clone();
        views.roots().recompute(RootKey::ProcessedFiles).await.expect("first call succeeds");
        views.begin_refresh(&view()).await.expect("begin");

        let payload = PipelineJobPayload {
            task: Task::recompute(RootKey::ProcessedFiles),
            input: StageOutput::empty(),
            then: Some(Task::propagate(view())),
        };
        let result = process_pipeline_job(payload, Data::new(ctx)).await;

        assert!(result.is_err());
        assert!(jobs.payloads().is_empty());
        assert!(views.is_ready(&view()).await.expect("ready"));
    }

    #[tokio::test]
    async fn runner_chain_pushes_single_job() {
        let jobs = Arc::new(RecordingJobs::default());
        let runner = QueueTaskRunner::new(jobs.clone());
        let handle = runner
            .chain(Task::recompute(RootKey::PendingFiles), Task::propagate(view()))
            .await
            .expect("chain");

        assert_eq!(handle.id(), "job-1");
        let queued = jobs.payloads();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].then, Some(Task::propagate(view())));
    }
}
