//! Workflow engine scenarios against mock providers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use inkwell_agent::{AgentConfig, AgentFactory};
use inkwell_llm::{CancellationToken, ChatResponse, MockProvider, ModelManager};
use inkwell_memory::{MemoryManager, MemoryType};
use inkwell_workflow::{
    FailurePolicy, TaskStatus, WorkflowDefinition, WorkflowEngine, WorkflowEvent, WorkflowTask,
};
use serde_json::{Value, json};
use tokio::sync::mpsc;

/// Parses as a plan, a draft and a critique alike.
const REPLY: &str = "1. Storm over the harbor\n2. The letter\nScore: 7/10";

struct Harness {
    engine: WorkflowEngine,
    provider: Arc<MockProvider>,
    memory: Arc<MemoryManager>,
}

fn harness(provider: MockProvider) -> Harness {
    let provider = Arc::new(provider);
    let manager = Arc::new(ModelManager::new());
    assert!(manager.register(provider.clone()));
    let memory = Arc::new(MemoryManager::default());
    let factory = AgentFactory::new(manager, Arc::clone(&memory))
        .with_default_config(AgentConfig::default().with_max_retries(0));
    Harness {
        engine: WorkflowEngine::new(factory).with_retry_delay(Duration::from_millis(10)),
        provider,
        memory,
    }
}

fn succeeding() -> Harness {
    harness(MockProvider::succeeding("mock", Duration::ZERO, REPLY))
}

fn input(pairs: &[(&str, &str)]) -> HashMap<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), json!(v)))
        .collect()
}

const CHAPTER: &str = r#"
[workflow]
name = "chapter"
project_id = "lighthouse"

[[workflow.tasks]]
id = "plan"
type = "director"
params = { goal = "{{input.premise}}" }

[[workflow.tasks]]
id = "draft"
type = "writer"
params = { outline = "{{plan.data.steps}}", chapter_title = "{{plan.data.title}}" }

[[workflow.tasks]]
id = "review"
type = "critic"
params = { text = "{{draft.output}}" }
"#;

#[tokio::test]
async fn chapter_workflow_threads_results_between_tasks() {
    let h = succeeding();
    let def = WorkflowDefinition::from_toml(CHAPTER).unwrap();
    let result = h
        .engine
        .execute(
            &def,
            input(&[("premise", "A keeper finds a letter")]),
            &CancellationToken::new(),
        )
        .await;

    assert!(result.success, "{:?}", result.first_error);
    assert_eq!(result.completed_tasks, 3);
    assert_eq!(result.failed_tasks, 0);
    assert!(result.first_error.is_none());
    assert!(result.task_results.iter().all(|r| r.attempts == 1));

    let requests = h.provider.requests();
    assert_eq!(requests.len(), 3);
    assert!(requests[0].messages[1].content.contains("Goal: A keeper finds a letter"));
    assert!(
        requests[1].messages[1]
            .content
            .contains("Outline:\nStorm over the harbor\nThe letter")
    );
    assert!(requests[2].messages[1].content.contains(REPLY));

    let review = result.task("review").unwrap();
    assert_eq!(review.output.as_ref().unwrap().data["score"], json!(7.0));
}

#[tokio::test]
async fn failures_accumulate_without_short_circuit() {
    let h = succeeding();
    let def = WorkflowDefinition::new("mixed")
        .with_task(WorkflowTask::new("plan", "director").with_param("goal", "Outline act one"))
        .with_task(WorkflowTask::new("poem", "poet").with_param("text", "roses"))
        .with_task(WorkflowTask::new("draft", "writer").with_param("prompt", "{{plan.output}}"))
        .with_task(WorkflowTask::new("review", "critic"));

    let result = h
        .engine
        .execute(&def, HashMap::new(), &CancellationToken::new())
        .await;

    assert!(!result.success);
    assert_eq!(result.completed_tasks, 2);
    assert_eq!(result.failed_tasks, 2);
    assert_eq!(result.skipped_tasks, 0);
    assert!(result.first_error.as_deref().unwrap().contains("poet"));

    let poem = result.task("poem").unwrap();
    assert_eq!(poem.status, TaskStatus::Failed);
    assert_eq!(poem.attempts, 0);
    let review = result.task("review").unwrap();
    assert!(review.error.as_deref().unwrap().contains("'text'"));
    assert_eq!(h.provider.request_count(), 2);
}

#[tokio::test]
async fn required_task_failure_skips_the_rest() {
    let h = succeeding();
    let def = WorkflowDefinition::new("strict")
        .with_task(WorkflowTask::new("draft", "writer").required())
        .with_task(WorkflowTask::new("review", "critic").with_param("text", "{{draft.output}}"))
        .with_task(WorkflowTask::new("notes", "summarizer").with_param("text", "x"));

    let result = h
        .engine
        .execute(&def, HashMap::new(), &CancellationToken::new())
        .await;

    assert!(!result.success);
    assert_eq!(result.failed_tasks, 1);
    assert_eq!(result.skipped_tasks, 2);
    assert_eq!(result.task_results[1].status, TaskStatus::Skipped);
    assert_eq!(h.provider.request_count(), 0);
}

#[tokio::test]
async fn stop_on_error_policy() {
    let h = succeeding();
    let tasks = || {
        WorkflowDefinition::new("stop")
            .with_task(WorkflowTask::new("review", "critic"))
            .with_task(WorkflowTask::new("draft", "writer").with_param("prompt", "Go"))
    };

    let result = h
        .engine
        .execute(
            &tasks().with_failure_policy(FailurePolicy::StopOnError),
            HashMap::new(),
            &CancellationToken::new(),
        )
        .await;
    assert_eq!(result.failed_tasks, 1);
    assert_eq!(result.skipped_tasks, 1);

    // The engine default applies when the definition has no policy.
    let strict = harness(MockProvider::succeeding("mock", Duration::ZERO, REPLY));
    let engine = strict.engine.with_failure_policy(FailurePolicy::StopOnError);
    let result = engine
        .execute(&tasks(), HashMap::new(), &CancellationToken::new())
        .await;
    assert_eq!(result.skipped_tasks, 1);

    let result = h
        .engine
        .execute(&tasks(), HashMap::new(), &CancellationToken::new())
        .await;
    assert_eq!(result.skipped_tasks, 0);
    assert_eq!(result.completed_tasks, 1);
}

#[tokio::test(start_paused = true)]
async fn model_failures_are_retried_by_the_agent_not_the_task() {
    let provider = Arc::new(MockProvider::succeeding("mock", Duration::ZERO, REPLY));
    provider.push_reply(ChatResponse::failure("overloaded"));
    provider.push_reply(ChatResponse::failure("overloaded"));
    let manager = Arc::new(ModelManager::new());
    assert!(manager.register(provider.clone()));
    let factory = AgentFactory::new(manager, Arc::new(MemoryManager::default()))
        .with_config("writer", AgentConfig::default().with_max_retries(1));
    let engine = WorkflowEngine::new(factory);
    let def = WorkflowDefinition::new("retry").with_task(
        WorkflowTask::new("draft", "writer")
            .with_param("prompt", "Open on the storm")
            .with_retries(3),
    );

    let result = engine
        .execute(&def, HashMap::new(), &CancellationToken::new())
        .await;

    let draft = result.task("draft").unwrap();
    assert_eq!(draft.status, TaskStatus::Failed);
    assert_eq!(draft.attempts, 1);
    assert!(draft.error.as_deref().unwrap().contains("overloaded"));
    // one call plus the agent's single retry
    assert_eq!(provider.request_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn timed_out_task_is_retried() {
    let h = harness(MockProvider::succeeding("slow", Duration::from_secs(10), REPLY));
    let def = WorkflowDefinition::new("slow").with_task(
        WorkflowTask::new("draft", "writer")
            .with_param("prompt", "Go")
            .with_timeout_secs(1)
            .with_retries(1),
    );

    let result = h
        .engine
        .execute(&def, HashMap::new(), &CancellationToken::new())
        .await;

    let draft = result.task("draft").unwrap();
    assert_eq!(draft.status, TaskStatus::Failed);
    assert_eq!(draft.attempts, 2);
    assert!(draft.error.as_deref().unwrap().contains("timed out after 1s"));
}

#[tokio::test]
async fn invalid_input_is_not_retried() {
    let h = succeeding();
    let def = WorkflowDefinition::new("no-retry")
        .with_task(WorkflowTask::new("draft", "writer").with_retries(3));

    let result = h
        .engine
        .execute(&def, HashMap::new(), &CancellationToken::new())
        .await;

    let draft = result.task("draft").unwrap();
    assert_eq!(draft.status, TaskStatus::Failed);
    assert_eq!(draft.attempts, 1);
}

#[tokio::test]
async fn agent_that_fails_to_initialize_fails_only_its_task() {
    let provider = Arc::new(MockProvider::succeeding("mock", Duration::ZERO, REPLY));
    let manager = Arc::new(ModelManager::new());
    assert!(manager.register(provider.clone()));
    let factory = AgentFactory::new(manager, Arc::new(MemoryManager::default()))
        .with_default_config(AgentConfig::default().with_max_retries(0))
        .with_config("writer", AgentConfig::default().with_provider("ghost"));
    let engine = WorkflowEngine::new(factory);
    let def = WorkflowDefinition::new("init")
        .with_task(
            WorkflowTask::new("draft", "writer")
                .with_param("prompt", "Go")
                .with_retries(2),
        )
        .with_task(WorkflowTask::new("review", "critic").with_param("text", "A short draft."));

    let result = engine
        .execute(&def, HashMap::new(), &CancellationToken::new())
        .await;

    assert!(!result.success);
    assert_eq!(result.failed_tasks, 1);
    assert_eq!(result.completed_tasks, 1);
    let draft = result.task("draft").unwrap();
    assert_eq!(draft.status, TaskStatus::Failed);
    assert_eq!(draft.attempts, 0);
    let error = draft.error.as_deref().unwrap();
    assert!(error.contains("agent 'writer' failed to initialize"));
    assert!(error.contains("ghost"));
    assert_eq!(result.first_error.as_deref(), Some(error));

    assert_eq!(result.task("review").unwrap().status, TaskStatus::Completed);
    assert_eq!(provider.request_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn slow_task_times_out() {
    let h = harness(MockProvider::succeeding("slow", Duration::from_secs(10), REPLY));
    let def = WorkflowDefinition::new("slow").with_task(
        WorkflowTask::new("draft", "writer")
            .with_param("prompt", "Go")
            .with_timeout_secs(1),
    );

    let result = h
        .engine
        .execute(&def, HashMap::new(), &CancellationToken::new())
        .await;

    let draft = result.task("draft").unwrap();
    assert_eq!(draft.status, TaskStatus::Failed);
    assert!(draft.error.as_deref().unwrap().contains("timed out after 1s"));
    assert!(draft.duration < Duration::from_secs(2));
}

#[tokio::test]
async fn cancelled_before_start() {
    let h = succeeding();
    let cancel = CancellationToken::new();
    cancel.cancel();
    let def = WorkflowDefinition::from_toml(CHAPTER).unwrap();

    let result = h
        .engine
        .execute(&def, input(&[("premise", "x")]), &cancel)
        .await;

    assert!(!result.success);
    assert!(result.was_cancelled());
    assert_eq!(result.task_results[0].status, TaskStatus::Cancelled);
    assert_eq!(result.skipped_tasks, 2);
    assert_eq!(result.failed_tasks, 1);
    assert_eq!(h.provider.request_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn cancelled_mid_task() {
    let h = harness(MockProvider::succeeding("slow", Duration::from_secs(5), REPLY));
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        trigger.cancel();
    });
    let def = WorkflowDefinition::from_toml(CHAPTER).unwrap();

    let result = h
        .engine
        .execute(&def, input(&[("premise", "x")]), &cancel)
        .await;

    assert_eq!(result.task_results[0].status, TaskStatus::Cancelled);
    assert_eq!(result.task_results[1].status, TaskStatus::Skipped);
    assert_eq!(result.task_results[2].status, TaskStatus::Skipped);
    assert!(result.duration < Duration::from_secs(5));
}

#[tokio::test]
async fn invalid_definition_faults_the_run() {
    let h = succeeding();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let engine = h.engine.with_events(tx);

    let result = engine
        .execute(
            &WorkflowDefinition::new("empty"),
            HashMap::new(),
            &CancellationToken::new(),
        )
        .await;

    assert!(!result.success);
    assert!(result.task_results.is_empty());
    assert!(result.first_error.as_deref().unwrap().contains("no tasks"));
    assert!(matches!(
        rx.try_recv(),
        Ok(WorkflowEvent::WorkflowFinished { success: false, .. })
    ));
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn missing_template_field_fails_the_task() {
    let h = succeeding();
    let def = WorkflowDefinition::new("fields")
        .with_task(WorkflowTask::new("plan", "director").with_param("goal", "Act one"))
        .with_task(WorkflowTask::new("draft", "writer").with_param("outline", "{{plan.data.beats}}"));

    let result = h
        .engine
        .execute(&def, HashMap::new(), &CancellationToken::new())
        .await;

    let draft = result.task("draft").unwrap();
    assert_eq!(draft.status, TaskStatus::Failed);
    assert!(draft.error.as_deref().unwrap().contains("no field 'beats'"));
}

#[tokio::test]
async fn progress_events_are_emitted_in_order() {
    let h = succeeding();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let engine = h.engine.with_events(tx);
    let def = WorkflowDefinition::from_toml(CHAPTER).unwrap();

    let result = engine
        .execute(&def, input(&[("premise", "x")]), &CancellationToken::new())
        .await;
    assert!(result.success);

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    assert_eq!(events.len(), 7);
    assert!(matches!(
        &events[0],
        WorkflowEvent::TaskStarted { task_id, index: 0, total: 3, .. } if task_id == "plan"
    ));
    assert!(matches!(
        &events[1],
        WorkflowEvent::TaskFinished { result, .. } if result.status == TaskStatus::Completed
    ));
    assert!(matches!(
        &events[6],
        WorkflowEvent::WorkflowFinished { success: true, .. }
    ));
}

#[tokio::test]
async fn research_findings_reach_later_tasks_through_memory() {
    let h = succeeding();
    let def = WorkflowDefinition::new("research")
        .with_project("lighthouse")
        .with_task(WorkflowTask::new("facts", "researcher").with_param("topic", "Lamp oil"))
        .with_task(WorkflowTask::new("draft", "writer").with_param("prompt", "Night watch"));

    let result = h
        .engine
        .execute(&def, HashMap::new(), &CancellationToken::new())
        .await;
    assert!(result.success);

    let stored = h.memory.list(Some("lighthouse"));
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].memory_type, MemoryType::WorldSetting);
    assert!(stored[0].content.starts_with("Lamp oil: "));

    let requests = h.provider.requests();
    assert!(requests[1].messages[1].content.contains("Established facts"));
    assert!(requests[1].messages[1].content.contains("Lamp oil: "));
}
