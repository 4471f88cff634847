//! Recompute pipeline stages.
//!
//! A refresh is two stages: recompute a root (expensive, shared) and copy the
//! committed value into one session's view (cheap, private). Stage output is piped
//! into the next stage so the view receives exactly the value the root committed.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::cache::{RecomputeOutcome, StoreError, ViewCache};
use crate::domain::keys::{RootKey, ViewKey};

/// One unit of pipeline work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Task {
    RecomputeRoot {
        key: RootKey,
        #[serde(default)]
        ignore_when_locked: bool,
    },
    PropagateView {
        view: ViewKey,
    },
}

impl Task {
    pub fn recompute(key: RootKey) -> Self {
        Task::RecomputeRoot {
            key,
            ignore_when_locked: false,
        }
    }

    pub fn recompute_if_unlocked(key: RootKey) -> Self {
        Task::RecomputeRoot {
            key,
            ignore_when_locked: true,
        }
    }

    pub fn propagate(view: ViewKey) -> Self {
        Task::PropagateView { view }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Task::RecomputeRoot { .. } => "recompute_root",
            Task::PropagateView { .. } => "propagate_view",
        }
    }
}

/// Value handed from one stage to the next.
///
/// Empty when the stage produced nothing new (no computation defined, or the
/// recompute was skipped because another holder had the lock).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageOutput {
    #[serde(default, with = "base64_bytes", skip_serializing_if = "Option::is_none")]
    pub value: Option<Bytes>,
}

impl StageOutput {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn value(value: Bytes) -> Self {
        Self { value: Some(value) }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("pipeline stage `{stage}` failed for `{key}`")]
    StageFailed { stage: &'static str, key: RootKey },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("task runner error: {message}")]
    Runner { message: String },
}

impl PipelineError {
    pub fn runner(message: impl Into<String>) -> Self {
        Self::Runner {
            message: message.into(),
        }
    }
}

#[derive(Clone)]
pub struct Pipeline {
    views: ViewCache,
}

impl Pipeline {
    pub fn new(views: ViewCache) -> Self {
        Self { views }
    }

    pub fn views(&self) -> &ViewCache {
        &self.views
    }

    /// Execute one stage with the output of the previous one.
    #[instrument(skip(self, input), fields(task = task.name()))]
    pub async fn run(&self, task: &Task, input: StageOutput) -> Result<StageOutput, PipelineError> {
        match task {
            Task::RecomputeRoot {
                key,
                ignore_when_locked,
            } => {
                let roots = self.views.roots();
                let outcome = if *ignore_when_locked {
                    roots.recompute_if_unlocked(*key).await?
                } else {
                    roots.recompute(*key).await?
                };
                debug!(outcome = outcome.label(), "Root stage finished");
                match outcome {
                    RecomputeOutcome::Committed(value) => Ok(StageOutput::value(value)),
                    RecomputeOutcome::NotDefined | RecomputeOutcome::Skipped => {
                        Ok(StageOutput::empty())
                    }
                    RecomputeOutcome::Failed => Err(PipelineError::StageFailed {
                        stage: task.name(),
                        key: *key,
                    }),
                }
            }
            Task::PropagateView { view } => {
                self.views.commit_refresh(view, input.value).await?;
                Ok(StageOutput::empty())
            }
        }
    }

    /// Clean up after a stage that will never run because its predecessor failed.
    pub async fn abandon(&self, task: &Task) -> Result<(), PipelineError> {
        match task {
            Task::RecomputeRoot { .. } => Ok(()),
            Task::PropagateView { view } => {
                self.views.abandon_refresh(view).await?;
                Ok(())
            }
        }
    }
}

mod base64_bytes {
    use super::*;
    use serde::{Deserializer, Serializer, de::Error as _};

    pub fn serialize<S: Serializer>(value: &Option<Bytes>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(bytes) => serializer.serialize_some(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Bytes>, D::Error> {
        let encoded: Option<String> = Option::deserialize(deserializer)?;
        encoded
            .map(|text| STANDARD.decode(text).map(Bytes::from).map_err(D::Error::custom))
            .transpose()
    }
}
