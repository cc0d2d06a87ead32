//! Sequential workflow execution.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use inkwell_agent::{Agent, AgentError, AgentFactory, AgentOutput, TaskInput};
use inkwell_llm::CancellationToken;
use serde_json::{Value, json};
use tokio::sync::mpsc;

use crate::definition::{FailurePolicy, WorkflowDefinition, WorkflowTask};
use crate::result::{TaskResult, TaskStatus, WorkflowEvent, WorkflowResult};
use crate::template::{INPUT_KEY, resolve_params};

/// Pause between workflow-level retries of a task.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// How long a timed-out agent gets to observe cancellation.
const TIMEOUT_GRACE: Duration = Duration::from_secs(1);

/// Runs workflow definitions task by task, dispatching each task to an agent
/// resolved by its type name.
///
/// A failing task never aborts the engine; it is recorded and the policy
/// decides whether the remaining tasks run. Results of completed tasks are
/// available to later tasks through `{{task_id.output}}` and
/// `{{task_id.data.*}}` templates.
pub struct WorkflowEngine {
    factory: Arc<AgentFactory>,
    default_policy: FailurePolicy,
    retry_delay: Duration,
    events: Option<mpsc::UnboundedSender<WorkflowEvent>>,
}

enum Outcome {
    Completed(AgentOutput),
    Failed(String),
    Cancelled,
}

#[derive(Debug)]
enum AttemptError {
    Agent(AgentError),
    TimedOut(u64),
}

impl fmt::Display for AttemptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Agent(e) => write!(f, "{e}"),
            Self::TimedOut(secs) => write!(f, "task timed out after {secs}s"),
        }
    }
}

impl AttemptError {
    /// Task retries cover timeouts and unusable replies. Failed model calls
    /// were already retried by the provider (transient transport errors) and
    /// by the agent (`max_retries`), and problems with the task itself fail
    /// the same way on every attempt.
    fn is_retryable(&self) -> bool {
        match self {
            Self::TimedOut(_) => true,
            Self::Agent(e) => !matches!(
                e,
                AgentError::Model(_)
                    | AgentError::InvalidInput(_)
                    | AgentError::Config(_)
                    | AgentError::NotInitialized(_)
                    | AgentError::UnknownAgentType(_)
                    | AgentError::Cancelled
            ),
        }
    }
}

impl WorkflowEngine {
    pub fn new(factory: impl Into<Arc<AgentFactory>>) -> Self {
        Self {
            factory: factory.into(),
            default_policy: FailurePolicy::default(),
            retry_delay: DEFAULT_RETRY_DELAY,
            events: None,
        }
    }

    /// Policy for definitions that do not set their own.
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.default_policy = policy;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Send progress events to `sender`. A closed receiver is ignored.
    pub fn with_events(mut self, sender: mpsc::UnboundedSender<WorkflowEvent>) -> Self {
        self.events = Some(sender);
        self
    }

    pub fn factory(&self) -> &Arc<AgentFactory> {
        &self.factory
    }

    pub fn default_policy(&self) -> FailurePolicy {
        self.default_policy
    }

    fn emit(&self, event: WorkflowEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }

    fn finish(&self, result: WorkflowResult) -> WorkflowResult {
        self.emit(WorkflowEvent::WorkflowFinished {
            workflow: result.workflow.clone(),
            success: result.success,
            duration: result.duration,
        });
        result
    }

    /// Run `definition` with `input` exposed as `{{input.*}}`.
    ///
    /// An invalid definition produces a failed result without running any
    /// task. Cancelling `cancel` stops the task in flight, which is reported
    /// as [`TaskStatus::Cancelled`]; the tasks after it are skipped.
    pub async fn execute(
        &self,
        definition: &WorkflowDefinition,
        input: HashMap<String, Value>,
        cancel: &CancellationToken,
    ) -> WorkflowResult {
        let started = Instant::now();
        if let Err(e) = definition.validate() {
            tracing::error!(workflow = %definition.name, error = %e, "Workflow rejected");
            return self.finish(WorkflowResult::fault(
                &definition.name,
                e.to_string(),
                started.elapsed(),
            ));
        }

        let policy = definition.policy_or(self.default_policy);
        let total = definition.tasks.len();
        tracing::info!(
            workflow = %definition.name,
            tasks = total,
            policy = %policy,
            "Workflow started"
        );

        let mut scope = HashMap::from([(
            INPUT_KEY.to_string(),
            Value::Object(input.into_iter().collect()),
        )]);
        let mut results = Vec::with_capacity(total);
        let mut halted = false;

        for (index, task) in definition.tasks.iter().enumerate() {
            if halted {
                results.push(TaskResult::skipped(&task.id, &task.task_type));
                continue;
            }

            self.emit(WorkflowEvent::TaskStarted {
                workflow: definition.name.clone(),
                task_id: task.id.clone(),
                task_type: task.task_type.clone(),
                index,
                total,
            });
            let result = self.run_task(definition, task, &scope, cancel).await;

            match result.status {
                TaskStatus::Completed => {
                    if let Some(output) = &result.output {
                        scope.insert(task.id.clone(), task_scope(output));
                    }
                    tracing::info!(
                        workflow = %definition.name,
                        task_id = %task.id,
                        attempts = result.attempts,
                        duration_ms = result.duration.as_millis() as u64,
                        "Task completed"
                    );
                }
                TaskStatus::Failed => {
                    tracing::error!(
                        workflow = %definition.name,
                        task_id = %task.id,
                        task_type = %task.task_type,
                        error = result.error.as_deref().unwrap_or_default(),
                        "Task failed"
                    );
                    if task.required || policy == FailurePolicy::StopOnError {
                        tracing::warn!(
                            workflow = %definition.name,
                            task_id = %task.id,
                            required = task.required,
                            "Skipping remaining tasks"
                        );
                        halted = true;
                    }
                }
                TaskStatus::Cancelled => {
                    tracing::warn!(workflow = %definition.name, task_id = %task.id, "Workflow cancelled");
                    halted = true;
                }
                TaskStatus::Skipped => {}
            }

            self.emit(WorkflowEvent::TaskFinished {
                workflow: definition.name.clone(),
                result: result.clone(),
            });
            results.push(result);
        }

        let result = WorkflowResult::from_tasks(&definition.name, results, started.elapsed());
        tracing::info!(
            workflow = %result.workflow,
            success = result.success,
            completed = result.completed_tasks,
            failed = result.failed_tasks,
            skipped = result.skipped_tasks,
            duration_ms = result.duration.as_millis() as u64,
            "Workflow finished"
        );
        self.finish(result)
    }

    async fn run_task(
        &self,
        definition: &WorkflowDefinition,
        task: &WorkflowTask,
        scope: &HashMap<String, Value>,
        cancel: &CancellationToken,
    ) -> TaskResult {
        let started = Instant::now();
        let mut attempts = 0;
        let outcome = self
            .drive(definition, task, scope, cancel, &mut attempts)
            .await;

        let (status, output, error) = match outcome {
            Outcome::Completed(output) => (TaskStatus::Completed, Some(output), None),
            Outcome::Failed(error) => (TaskStatus::Failed, None, Some(error)),
            Outcome::Cancelled => (
                TaskStatus::Cancelled,
                None,
                Some(format!("task '{}' cancelled", task.id)),
            ),
        };
        TaskResult {
            task_id: task.id.clone(),
            task_type: task.task_type.clone(),
            status,
            output,
            error,
            duration: started.elapsed(),
            attempts,
        }
    }

    async fn drive(
        &self,
        definition: &WorkflowDefinition,
        task: &WorkflowTask,
        scope: &HashMap<String, Value>,
        cancel: &CancellationToken,
        attempts: &mut u32,
    ) -> Outcome {
        if cancel.is_cancelled() {
            return Outcome::Cancelled;
        }

        let agent = match self.factory.resolve(&task.task_type) {
            Ok(agent) => agent,
            Err(e) => return Outcome::Failed(e.to_string()),
        };
        if !agent.initialize(self.factory.config_for(&task.task_type)).await {
            let reason = agent
                .get_status()
                .last_error
                .unwrap_or_else(|| "unknown error".to_string());
            return Outcome::Failed(format!(
                "agent '{}' failed to initialize: {reason}",
                task.task_type
            ));
        }

        let parameters = match resolve_params(&task.parameters, scope) {
            Ok(parameters) => parameters,
            Err(e) => return Outcome::Failed(e.to_string()),
        };
        let input = TaskInput {
            task_id: task.id.clone(),
            project_id: definition.project_id.clone(),
            parameters,
        };

        let max_attempts = task.retry_attempts + 1;
        let mut last_error = String::new();
        for attempt in 1..=max_attempts {
            *attempts = attempt;
            tracing::debug!(task_id = %task.id, agent = agent.name(), attempt, "Running task");

            let error = match attempt_once(agent.as_ref(), &input, task.timeout_secs, cancel).await {
                Ok(output) => return Outcome::Completed(output),
                Err(e) => e,
            };
            if cancel.is_cancelled() || matches!(error, AttemptError::Agent(AgentError::Cancelled)) {
                return Outcome::Cancelled;
            }
            last_error = error.to_string();
            if !error.is_retryable() {
                break;
            }

            if attempt < max_attempts {
                tracing::warn!(
                    task_id = %task.id,
                    attempt,
                    error = %last_error,
                    "Task attempt failed, retrying"
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Outcome::Cancelled,
                    _ = tokio::time::sleep(self.retry_delay) => {}
                }
            }
        }
        Outcome::Failed(last_error)
    }
}

/// Runs one attempt. A timed-out attempt is cancelled rather than dropped,
/// so the agent unwinds and leaves its busy state.
async fn attempt_once(
    agent: &dyn Agent,
    input: &TaskInput,
    timeout_secs: Option<u64>,
    cancel: &CancellationToken,
) -> Result<AgentOutput, AttemptError> {
    let Some(secs) = timeout_secs else {
        return agent.execute(input, cancel).await.map_err(AttemptError::Agent);
    };

    let attempt = cancel.child_token();
    let execution = agent.execute(input, &attempt);
    tokio::pin!(execution);
    tokio::select! {
        result = &mut execution => result.map_err(AttemptError::Agent),
        _ = tokio::time::sleep(Duration::from_secs(secs)) => {
            attempt.cancel();
            if tokio::time::timeout(TIMEOUT_GRACE, &mut execution).await.is_err() {
                tracing::warn!(agent = agent.name(), "Agent ignored cancellation after timeout");
            }
            Err(AttemptError::TimedOut(secs))
        }
    }
}

/// What later tasks can reference from a completed task.
fn task_scope(output: &AgentOutput) -> Value {
    json!({
        "output": output.content,
        "data": output.data,
        "reasoning": output.reasoning,
    })
}
