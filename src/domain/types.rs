//! Shared domain enumerations.

use serde::{Deserialize, Serialize};

/// Job namespaces registered with the task runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    PipelineStage,
}

impl JobType {
    pub fn as_str(self) -> &'static str {
        match self {
            JobType::PipelineStage => "pipeline_stage",
        }
    }
}

