//! Wires configuration into providers, memory and agents.

use std::sync::Arc;

use anyhow::{Result, bail};
use inkwell_agent::AgentFactory;
use inkwell_config::InkwellConfig;
use inkwell_llm::{
    DeepSeekProvider, ModelManager, OllamaProvider, ProviderConfiguration, SharedProvider,
    ZhipuProvider,
};
use inkwell_mcp::McpProvider;
use inkwell_memory::{MemoryManager, ModelSummarizer};

/// Everything the commands work with.
pub struct App {
    pub config: InkwellConfig,
    pub manager: Arc<ModelManager>,
    pub memory: Arc<MemoryManager>,
    pub factory: Arc<AgentFactory>,
}

impl App {
    /// Build the application from `config`. `provider_override` replaces
    /// the configured default provider.
    pub fn build(config: InkwellConfig, provider_override: Option<&str>) -> Result<Self> {
        let manager = Arc::new(ModelManager::new());
        for provider in providers(&config) {
            manager.register(provider);
        }

        let default = provider_override.or(config.default_provider.as_deref());
        if let Some(name) = default
            && !manager.set_default(name)
        {
            bail!(
                "provider '{name}' is not available (configured: {})",
                list_or_none(&manager.provider_names())
            );
        }
        tracing::info!(
            providers = ?manager.provider_names(),
            default = ?manager.default_provider(),
            "Providers registered"
        );

        Ok(Self::with_manager(config, manager))
    }

    /// Build around an existing manager, without touching its providers.
    pub fn with_manager(config: InkwellConfig, manager: Arc<ModelManager>) -> Self {
        let summarizer = Arc::new(ModelSummarizer::new(Arc::clone(&manager)));
        let memory = Arc::new(MemoryManager::with_summarizer(
            config.memory_config(),
            summarizer,
        ));
        let factory = Arc::new(
            AgentFactory::new(Arc::clone(&manager), Arc::clone(&memory))
                .with_configs(&config.agents),
        );
        Self {
            config,
            manager,
            memory,
            factory,
        }
    }
}

/// Providers for every valid configured section. Invalid sections are
/// logged and skipped.
fn providers(config: &InkwellConfig) -> Vec<SharedProvider> {
    let mut built: Vec<SharedProvider> = Vec::new();
    let sections = &config.providers;

    if let Some(c) = &sections.deepseek
        && usable("deepseek", c)
    {
        match DeepSeekProvider::new(c.clone()) {
            Ok(p) => built.push(Arc::new(p)),
            Err(e) => tracing::warn!(provider = "deepseek", error = %e, "Provider not created"),
        }
    }
    if let Some(c) = &sections.zhipu
        && usable("zhipu", c)
    {
        match ZhipuProvider::new(c.clone()) {
            Ok(p) => built.push(Arc::new(p)),
            Err(e) => tracing::warn!(provider = "zhipu", error = %e, "Provider not created"),
        }
    }
    if let Some(c) = &sections.ollama
        && usable("ollama", c)
    {
        match OllamaProvider::new(c.clone()) {
            Ok(p) => built.push(Arc::new(p)),
            Err(e) => tracing::warn!(provider = "ollama", error = %e, "Provider not created"),
        }
    }
    if let Some(c) = &sections.mcp
        && usable("mcp", c)
    {
        built.push(Arc::new(McpProvider::new(c.clone())));
    }
    built
}

fn usable(name: &str, config: &impl ProviderConfiguration) -> bool {
    let errors = config.validate();
    if !errors.is_empty() {
        tracing::warn!(provider = name, errors = ?errors, "Skipping misconfigured provider");
    }
    errors.is_empty()
}

pub fn list_or_none(names: &[String]) -> String {
    if names.is_empty() {
        "none".to_string()
    } else {
        names.join(", ")
    }
}
