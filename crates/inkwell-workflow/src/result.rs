//! Outcomes of workflow runs.

use std::fmt;
use std::time::Duration;

use inkwell_agent::AgentOutput;
use serde::Serialize;

/// Final state of one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Completed,
    Failed,
    /// Not started because an earlier failure or cancellation ended the run.
    Skipped,
    Cancelled,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskResult {
    pub task_id: String,
    pub task_type: String,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<AgentOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration: Duration,
    /// Executions started, including retries. Zero when the agent could not
    /// be prepared.
    pub attempts: u32,
}

impl TaskResult {
    pub(crate) fn skipped(task_id: &str, task_type: &str) -> Self {
        Self {
            task_id: task_id.to_string(),
            task_type: task_type.to_string(),
            status: TaskStatus::Skipped,
            output: None,
            error: None,
            duration: Duration::ZERO,
            attempts: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Completed
    }
}

/// Aggregate outcome of one workflow run.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowResult {
    pub workflow: String,
    /// True when every task completed and the engine did not fault.
    pub success: bool,
    /// Wall-clock time from start to the last task's completion.
    pub duration: Duration,
    pub completed_tasks: usize,
    /// Failed and cancelled tasks.
    pub failed_tasks: usize,
    pub skipped_tasks: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_error: Option<String>,
    pub task_results: Vec<TaskResult>,
}

impl WorkflowResult {
    /// A run that never started a task.
    pub(crate) fn fault(workflow: &str, error: String, duration: Duration) -> Self {
        Self {
            workflow: workflow.to_string(),
            success: false,
            duration,
            completed_tasks: 0,
            failed_tasks: 0,
            skipped_tasks: 0,
            first_error: Some(error),
            task_results: Vec::new(),
        }
    }

    pub(crate) fn from_tasks(workflow: &str, task_results: Vec<TaskResult>, duration: Duration) -> Self {
        let count = |status: TaskStatus| task_results.iter().filter(|r| r.status == status).count();
        let completed_tasks = count(TaskStatus::Completed);
        let failed_tasks = count(TaskStatus::Failed) + count(TaskStatus::Cancelled);
        let skipped_tasks = count(TaskStatus::Skipped);
        let first_error = task_results.iter().find_map(|r| r.error.clone());
        Self {
            workflow: workflow.to_string(),
            success: failed_tasks == 0,
            duration,
            completed_tasks,
            failed_tasks,
            skipped_tasks,
            first_error,
            task_results,
        }
    }

    pub fn was_cancelled(&self) -> bool {
        self.task_results
            .iter()
            .any(|r| r.status == TaskStatus::Cancelled)
    }

    pub fn task(&self, task_id: &str) -> Option<&TaskResult> {
        self.task_results.iter().find(|r| r.task_id == task_id)
    }
}

/// Progress notifications emitted while a workflow runs.
#[derive(Debug, Clone)]
pub enum WorkflowEvent {
    TaskStarted {
        workflow: String,
        task_id: String,
        task_type: String,
        /// Zero-based position in the task list.
        index: usize,
        total: usize,
    },
    TaskFinished {
        workflow: String,
        result: TaskResult,
    },
    WorkflowFinished {
        workflow: String,
        success: bool,
        duration: Duration,
    },
}
