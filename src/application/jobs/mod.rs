mod context;
mod pipeline;
mod queue;

pub use context::{JobWorkerContext, job_failed};
pub use pipeline::{
    PipelineJobPayload, QueueTaskRunner, enqueue_pipeline_job, process_pipeline_job,
};
pub use queue::enqueue_job;
