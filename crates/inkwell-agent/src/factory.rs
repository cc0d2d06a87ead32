//! Resolves agents by type name.

use std::collections::HashMap;
use std::sync::Arc;

use inkwell_llm::ModelManager;
use inkwell_memory::MemoryManager;
use parking_lot::RwLock;

use crate::agent::{Agent, AgentContext, RoleAgent};
use crate::error::{AgentError, Result};
use crate::roles::{
    Critic, Director, Editor, Reader, Researcher, SettingManager, Summarizer, Writer,
};
use crate::types::{AgentConfig, AgentKind};

/// Builds a custom agent.
pub type AgentConstructor = Arc<dyn Fn(AgentContext) -> Arc<dyn Agent> + Send + Sync>;

/// Creates agents wired to the shared model and memory managers.
///
/// Built-in roles come from an exhaustive match on [`AgentKind`]; other
/// names can be registered at runtime with
/// [`register_custom`](Self::register_custom).
pub struct AgentFactory {
    manager: Arc<ModelManager>,
    memory: Arc<MemoryManager>,
    default_config: AgentConfig,
    configs: HashMap<String, AgentConfig>,
    custom: RwLock<HashMap<String, AgentConstructor>>,
}

/// Canonical registry key for a type name.
fn type_key(type_name: &str) -> String {
    match type_name.parse::<AgentKind>() {
        Ok(kind) => kind.to_string(),
        Err(_) => type_name.trim().to_lowercase(),
    }
}

impl AgentFactory {
    pub fn new(manager: Arc<ModelManager>, memory: Arc<MemoryManager>) -> Self {
        Self {
            manager,
            memory,
            default_config: AgentConfig::default(),
            configs: HashMap::new(),
            custom: RwLock::new(HashMap::new()),
        }
    }

    /// Configuration for types without their own entry.
    pub fn with_default_config(mut self, config: AgentConfig) -> Self {
        self.default_config = config;
        self
    }

    /// Configuration for one agent type, by built-in or custom name.
    pub fn with_config(mut self, type_name: &str, config: AgentConfig) -> Self {
        self.configs.insert(type_key(type_name), config);
        self
    }

    /// Apply a table of per-type configurations.
    pub fn with_configs(mut self, configs: &HashMap<String, AgentConfig>) -> Self {
        for (name, config) in configs {
            self.configs.insert(type_key(name), config.clone());
        }
        self
    }

    pub fn manager(&self) -> &Arc<ModelManager> {
        &self.manager
    }

    pub fn memory(&self) -> &Arc<MemoryManager> {
        &self.memory
    }

    /// The configuration an agent of `type_name` should be initialized with.
    pub fn config_for(&self, type_name: &str) -> AgentConfig {
        self.configs
            .get(&type_key(type_name))
            .cloned()
            .unwrap_or_else(|| self.default_config.clone())
    }

    fn context(&self, type_name: &str) -> AgentContext {
        AgentContext {
            manager: Arc::clone(&self.manager),
            memory: Arc::clone(&self.memory),
            config: self.config_for(type_name),
        }
    }

    /// Register a custom agent type. Returns `false` if the name is empty,
    /// shadows a built-in role, or is already registered.
    pub fn register_custom(&self, name: &str, constructor: AgentConstructor) -> bool {
        let key = name.trim().to_lowercase();
        if key.is_empty() || key.parse::<AgentKind>().is_ok() {
            return false;
        }
        let mut custom = self.custom.write();
        if custom.contains_key(&key) {
            return false;
        }
        tracing::info!(agent_type = %key, "Registered custom agent type");
        custom.insert(key, constructor);
        true
    }

    pub fn custom_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.custom.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// A new, uninitialized built-in agent.
    pub fn create(&self, kind: AgentKind) -> Arc<dyn Agent> {
        let ctx = self.context(kind.as_str());
        match kind {
            AgentKind::Director => Arc::new(RoleAgent::new(Director, ctx)),
            AgentKind::Writer => Arc::new(RoleAgent::new(Writer, ctx)),
            AgentKind::Editor => Arc::new(RoleAgent::new(Editor, ctx)),
            AgentKind::Critic => Arc::new(RoleAgent::new(Critic, ctx)),
            AgentKind::Researcher => Arc::new(RoleAgent::new(Researcher, ctx)),
            AgentKind::Summarizer => Arc::new(RoleAgent::new(Summarizer, ctx)),
            AgentKind::Reader => Arc::new(RoleAgent::new(Reader, ctx)),
            AgentKind::SettingManager => Arc::new(RoleAgent::new(SettingManager, ctx)),
        }
    }

    /// A new agent for a case-insensitive type name: built-in roles first,
    /// then custom registrations.
    pub fn resolve(&self, type_name: &str) -> Result<Arc<dyn Agent>> {
        if let Ok(kind) = type_name.parse::<AgentKind>() {
            return Ok(self.create(kind));
        }
        let key = type_name.trim().to_lowercase();
        let constructor = self
            .custom
            .read()
            .get(&key)
            .cloned()
            .ok_or_else(|| AgentError::UnknownAgentType(type_name.to_string()))?;
        Ok(constructor(self.context(&key)))
    }
}
