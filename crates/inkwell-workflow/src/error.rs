//! Workflow error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading, validating or preparing a workflow.
///
/// Task-level failures never surface here; they are recorded in the
/// [`TaskResult`](crate::TaskResult) of the task that failed.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("invalid workflow: {0}")]
    InvalidWorkflow(String),

    #[error("failed to read workflow file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("template error: {0}")]
    Template(String),
}

impl WorkflowError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidWorkflow(msg.into())
    }

    pub fn template(msg: impl Into<String>) -> Self {
        Self::Template(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, WorkflowError>;
