//! The agent contract and the shared engine behind every built-in role.
//!
//! A [`Role`] only knows how to phrase a prompt and read a reply.
//! [`RoleAgent`] wraps a role with everything else: status tracking, memory
//! lookup before the call, retries against the model manager, and memory
//! writes afterwards.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use inkwell_llm::{CancellationToken, ChatMessage, ChatRequest, ChatResponse, ModelManager};
use inkwell_memory::{MemoryItem, MemoryManager, MemoryQuery, MemoryUpdate};
use parking_lot::RwLock;

use crate::error::{AgentError, Result};
use crate::types::{
    AgentConfig, AgentKind, AgentOutput, AgentStatus, AgentStatusSnapshot, TaskInput,
};

/// Version reported by built-in agents.
pub const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Base delay between model retries; doubles per attempt.
const RETRY_BACKOFF: Duration = Duration::from_millis(250);

/// Longest memory search query derived from task text, in characters.
const MAX_MEMORY_QUERY_CHARS: usize = 200;

// ─────────────────────────────────────────────────────────────────────────────
// Agent Trait
// ─────────────────────────────────────────────────────────────────────────────

/// A task executor the workflow engine can dispatch to.
#[async_trait]
pub trait Agent: Send + Sync {
    /// The built-in role, or `None` for custom agents.
    fn kind(&self) -> Option<AgentKind>;

    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn version(&self) -> &str {
        AGENT_VERSION
    }

    fn status(&self) -> AgentStatus;

    /// Apply `config`. Returns `false`, leaving the agent in
    /// [`AgentStatus::Error`], when the configuration is unusable.
    async fn initialize(&self, config: AgentConfig) -> bool;

    fn get_status(&self) -> AgentStatusSnapshot;

    fn capabilities(&self) -> Vec<String>;

    async fn execute(&self, input: &TaskInput, cancel: &CancellationToken) -> Result<AgentOutput>;
}

/// Everything an agent needs from the rest of the application.
#[derive(Clone)]
pub struct AgentContext {
    pub manager: Arc<ModelManager>,
    pub memory: Arc<MemoryManager>,
    pub config: AgentConfig,
}

// ─────────────────────────────────────────────────────────────────────────────
// Role Trait
// ─────────────────────────────────────────────────────────────────────────────

/// Prompting and parsing strategy for one agent role.
pub trait Role: Send + Sync + 'static {
    fn kind(&self) -> AgentKind;

    fn description(&self) -> &'static str;

    fn capabilities(&self) -> &'static [&'static str];

    fn system_prompt(&self) -> &'static str;

    /// Text to search memory with before prompting.
    fn memory_query(&self, input: &TaskInput) -> String {
        let text = input
            .first_text(&["topic", "goal", "prompt", "outline", "text"])
            .unwrap_or_default();
        text.chars().take(MAX_MEMORY_QUERY_CHARS).collect()
    }

    fn build_prompt(&self, input: &TaskInput, context: &[MemoryItem]) -> Result<String>;

    fn parse_response(&self, response: &ChatResponse) -> Result<AgentOutput>;

    /// Memories to store after a successful task.
    fn memory_writes(&self, _input: &TaskInput, _output: &AgentOutput) -> Vec<MemoryUpdate> {
        Vec::new()
    }
}

/// Render memories as a prompt section, or nothing when there are none.
pub fn render_context(context: &[MemoryItem]) -> String {
    if context.is_empty() {
        return String::new();
    }
    let mut section = String::from("Established facts (stay consistent with these):\n");
    for item in context {
        section.push_str(&format!("- [{}] {}\n", item.memory_type, item.content));
    }
    section.push('\n');
    section
}

/// Scope a memory write to the task's project when there is one.
pub fn scoped(update: MemoryUpdate, input: &TaskInput) -> MemoryUpdate {
    match &input.project_id {
        Some(project) => update.in_project(project.clone()),
        None => update,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// RoleAgent
// ─────────────────────────────────────────────────────────────────────────────

struct AgentState {
    config: AgentConfig,
    status: AgentStatus,
    tasks_completed: u64,
    tasks_failed: u64,
    last_error: Option<String>,
    last_active: Option<DateTime<Utc>>,
}

/// A built-in agent: a [`Role`] driven against the model manager.
pub struct RoleAgent<R: Role> {
    role: R,
    name: String,
    manager: Arc<ModelManager>,
    memory: Arc<MemoryManager>,
    state: RwLock<AgentState>,
}

impl<R: Role> RoleAgent<R> {
    /// Create an agent. It must be initialized before it runs tasks.
    pub fn new(role: R, context: AgentContext) -> Self {
        Self {
            name: role.kind().to_string(),
            role,
            manager: context.manager,
            memory: context.memory,
            state: RwLock::new(AgentState {
                config: context.config,
                status: AgentStatus::Uninitialized,
                tasks_completed: 0,
                tasks_failed: 0,
                last_error: None,
                last_active: None,
            }),
        }
    }

    pub fn role(&self) -> &R {
        &self.role
    }

    fn recall(&self, input: &TaskInput, limit: usize) -> Vec<MemoryItem> {
        if limit == 0 {
            return Vec::new();
        }
        let text = self.role.memory_query(input);
        let mut query = match &input.project_id {
            Some(project) => MemoryQuery::project(text, project.clone(), limit),
            None => MemoryQuery::global(text, limit),
        };
        if input.project_id.is_some() {
            if let Some(volume) = input.text("volume_id") {
                query = query.in_volume(volume);
            }
            if let Some(chapter) = input.text("chapter_id")
                && query.volume_id.is_some()
            {
                query = query.in_chapter(chapter);
            }
        }
        let mut found = self.memory.search_memory(&query);
        if found.is_empty() && !query.query.is_empty() {
            // Nothing matched the task text; fall back to the most important memories.
            query.query.clear();
            found = self.memory.search_memory(&query);
        }
        found
    }

    fn request(&self, prompt: String, config: &AgentConfig) -> ChatRequest {
        let mut request = ChatRequest::new(vec![ChatMessage::user(prompt)])
            .with_system(self.role.system_prompt())
            .with_temperature(config.temperature)
            .with_max_tokens(config.max_tokens);
        if let Some(model) = &config.model {
            request = request.with_model(model.clone());
        }
        request
    }

    async fn complete(
        &self,
        request: ChatRequest,
        config: &AgentConfig,
        task_id: &str,
        cancel: &CancellationToken,
    ) -> Result<ChatResponse> {
        let attempts = config.max_retries + 1;
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            if cancel.is_cancelled() {
                return Err(AgentError::Cancelled);
            }
            let response = self
                .manager
                .chat(config.provider.as_deref(), request.clone(), cancel)
                .await;
            if response.is_success() {
                return Ok(response);
            }
            if response.is_cancelled() {
                return Err(AgentError::Cancelled);
            }

            last_error = response.error_message().to_string();
            if attempt < attempts {
                let delay = RETRY_BACKOFF * 2u32.saturating_pow(attempt - 1);
                tracing::warn!(
                    agent = %self.name,
                    task_id,
                    attempt,
                    error = %last_error,
                    "Model call failed, retrying in {:?}",
                    delay
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Err(AgentError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        Err(AgentError::Model(last_error))
    }

    async fn run(&self, input: &TaskInput, config: &AgentConfig, cancel: &CancellationToken) -> Result<AgentOutput> {
        let context = self.recall(input, config.memory_context_limit);
        let prompt = self.role.build_prompt(input, &context)?;
        tracing::debug!(
            agent = %self.name,
            task_id = %input.task_id,
            memories = context.len(),
            prompt_chars = prompt.len(),
            "Prompt built"
        );

        let request = self.request(prompt, config);
        let response = self.complete(request, config, &input.task_id, cancel).await?;

        let mut output = self.role.parse_response(&response)?;
        output.reasoning = response.reasoning.clone();
        output.usage = response.usage;

        for update in self.role.memory_writes(input, &output) {
            if let Err(e) = self.memory.update_memory(update, cancel).await {
                tracing::warn!(agent = %self.name, error = %e, "Skipped memory write");
            }
        }
        Ok(output)
    }
}

#[async_trait]
impl<R: Role> Agent for RoleAgent<R> {
    fn kind(&self) -> Option<AgentKind> {
        Some(self.role.kind())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        self.role.description()
    }

    fn status(&self) -> AgentStatus {
        self.state.read().status
    }

    async fn initialize(&self, config: AgentConfig) -> bool {
        let mut errors = config.validate();
        if let Some(provider) = &config.provider
            && self.manager.provider(provider).is_none()
        {
            errors.push(format!("provider '{provider}' is not registered"));
        }

        let mut state = self.state.write();
        if !errors.is_empty() {
            tracing::warn!(agent = %self.name, errors = ?errors, "Agent initialization failed");
            state.status = AgentStatus::Error;
            state.last_error = Some(errors.join("; "));
            return false;
        }
        state.config = config;
        state.status = AgentStatus::Idle;
        state.last_error = None;
        tracing::debug!(agent = %self.name, "Agent initialized");
        true
    }

    fn get_status(&self) -> AgentStatusSnapshot {
        let state = self.state.read();
        AgentStatusSnapshot {
            name: self.name.clone(),
            status: state.status,
            version: self.version().to_string(),
            tasks_completed: state.tasks_completed,
            tasks_failed: state.tasks_failed,
            last_error: state.last_error.clone(),
            last_active: state.last_active,
        }
    }

    fn capabilities(&self) -> Vec<String> {
        self.role
            .capabilities()
            .iter()
            .map(|c| c.to_string())
            .collect()
    }

    async fn execute(&self, input: &TaskInput, cancel: &CancellationToken) -> Result<AgentOutput> {
        let config = {
            let mut state = self.state.write();
            if state.status == AgentStatus::Uninitialized {
                return Err(AgentError::NotInitialized(self.name.clone()));
            }
            state.status = AgentStatus::Busy;
            state.last_active = Some(Utc::now());
            state.config.clone()
        };

        let result = self.run(input, &config, cancel).await;

        let mut state = self.state.write();
        state.last_active = Some(Utc::now());
        match &result {
            Ok(_) => {
                state.tasks_completed += 1;
                state.status = AgentStatus::Idle;
            }
            Err(AgentError::Cancelled) => {
                state.status = AgentStatus::Idle;
            }
            Err(e) => {
                state.tasks_failed += 1;
                state.status = AgentStatus::Error;
                state.last_error = Some(e.to_string());
            }
        }
        result
    }
}
