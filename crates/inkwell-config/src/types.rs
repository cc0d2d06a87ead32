//! Configuration types.
//!
//! ```toml
//! default_provider = "deepseek"
//!
//! [providers.deepseek]
//! default_model = "deepseek-chat"
//!
//! [providers.ollama]
//! base_url = "http://localhost:11434"
//! default_model = "qwen2.5:7b"
//!
//! [memory]
//! max_items = 2000
//!
//! [workflow]
//! default_failure_policy = "continue"
//!
//! [agents.writer]
//! provider = "deepseek"
//! temperature = 0.9
//! ```
//!
//! Unknown sections are ignored and every section is optional.

use std::collections::HashMap;
use std::path::PathBuf;

use inkwell_agent::AgentConfig;
use inkwell_llm::{DeepSeekConfig, OllamaConfig, ProviderConfiguration, ZhipuConfig};
use inkwell_mcp::McpConfiguration;
use inkwell_memory::MemoryConfig;
use inkwell_workflow::FailurePolicy;
use serde::{Deserialize, Serialize};

use crate::secrets::{KeyedBackend, resolve_api_key_with};

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InkwellConfig {
    /// Provider used when a caller does not name one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_provider: Option<String>,

    pub providers: ProvidersConfig,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<MemoryConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow: Option<WorkflowConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,

    /// Per-role agent settings, keyed by agent type name.
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub agents: HashMap<String, AgentConfig>,
}

/// One optional section per backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deepseek: Option<DeepSeekConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zhipu: Option<ZhipuConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ollama: Option<OllamaConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mcp: Option<McpConfiguration>,
}

impl ProvidersConfig {
    /// Names of the configured sections, in registration order.
    pub fn configured(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.deepseek.is_some() {
            names.push("deepseek");
        }
        if self.zhipu.is_some() {
            names.push("zhipu");
        }
        if self.ollama.is_some() {
            names.push("ollama");
        }
        if self.mcp.is_some() {
            names.push("mcp");
        }
        names
    }

    pub fn is_empty(&self) -> bool {
        self.configured().is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Applied to workflow files that do not set `failure_policy`.
    pub default_failure_policy: FailurePolicy,
}

/// Log output settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Console filter directive, e.g. `"info"` or `"inkwell_llm=debug"`.
    pub level: String,
    /// Write JSON logs to a daily rolling file.
    pub file: bool,
    /// Directory for log files. Defaults to `logs/` in the config directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: true,
            directory: None,
        }
    }
}

impl InkwellConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> crate::Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> crate::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Merge another config on top of this one (other takes priority).
    ///
    /// Sections present in `other` replace this config's sections; agent
    /// entries are merged by name.
    pub fn merge(&mut self, other: InkwellConfig) {
        if other.default_provider.is_some() {
            self.default_provider = other.default_provider;
        }

        let providers = other.providers;
        if providers.deepseek.is_some() {
            self.providers.deepseek = providers.deepseek;
        }
        if providers.zhipu.is_some() {
            self.providers.zhipu = providers.zhipu;
        }
        if providers.ollama.is_some() {
            self.providers.ollama = providers.ollama;
        }
        if providers.mcp.is_some() {
            self.providers.mcp = providers.mcp;
        }

        if other.memory.is_some() {
            self.memory = other.memory;
        }
        if other.workflow.is_some() {
            self.workflow = other.workflow;
        }
        if other.logging.is_some() {
            self.logging = other.logging;
        }

        for (name, config) in other.agents {
            self.agents.insert(name, config);
        }
    }

    /// Fill empty API keys from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_with(|name| std::env::var(name).ok());
    }

    /// Fill empty API keys using `env` as the environment.
    pub fn apply_env_with(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(deepseek) = &mut self.providers.deepseek
            && let Some(secret) = resolve_api_key_with(KeyedBackend::DeepSeek, &deepseek.api_key, &env)
        {
            deepseek.api_key = secret.value;
        }
        if let Some(zhipu) = &mut self.providers.zhipu
            && let Some(secret) = resolve_api_key_with(KeyedBackend::Zhipu, &zhipu.api_key, &env)
        {
            zhipu.api_key = secret.value;
        }
    }

    /// Whether an API key is stored in plaintext in the config.
    pub fn plaintext_keys(&self) -> Vec<KeyedBackend> {
        let mut found = Vec::new();
        if let Some(deepseek) = &self.providers.deepseek
            && !deepseek.api_key.is_empty()
        {
            found.push(KeyedBackend::DeepSeek);
        }
        if let Some(zhipu) = &self.providers.zhipu
            && !zhipu.api_key.is_empty()
        {
            found.push(KeyedBackend::Zhipu);
        }
        found
    }

    /// Every problem in the configuration, prefixed with its section.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        let mut section = |name: &str, problems: Vec<String>| {
            errors.extend(problems.into_iter().map(|p| format!("{name}: {p}")));
        };

        if let Some(c) = &self.providers.deepseek {
            section("providers.deepseek", c.validate());
        }
        if let Some(c) = &self.providers.zhipu {
            section("providers.zhipu", c.validate());
        }
        if let Some(c) = &self.providers.ollama {
            section("providers.ollama", c.validate());
        }
        if let Some(c) = &self.providers.mcp {
            section("providers.mcp", c.validate());
        }
        if let Some(memory) = &self.memory {
            section("memory", validate_memory(memory));
        }
        let mut agents: Vec<_> = self.agents.iter().collect();
        agents.sort_by(|a, b| a.0.cmp(b.0));
        for (name, agent) in agents {
            section(&format!("agents.{name}"), agent.validate());
        }

        let configured = self.providers.configured();
        if let Some(default) = &self.default_provider
            && !configured.contains(&default.as_str())
        {
            errors.push(format!(
                "default_provider '{default}' has no [providers.{default}] section"
            ));
        }
        for (name, agent) in &self.agents {
            if let Some(provider) = &agent.provider
                && !configured.contains(&provider.as_str())
            {
                errors.push(format!(
                    "agents.{name}: provider '{provider}' has no [providers.{provider}] section"
                ));
            }
        }
        errors
    }

    pub fn memory_config(&self) -> MemoryConfig {
        self.memory.clone().unwrap_or_default()
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        self.workflow
            .as_ref()
            .map(|w| w.default_failure_policy)
            .unwrap_or_default()
    }

    pub fn logging(&self) -> LoggingConfig {
        self.logging.clone().unwrap_or_default()
    }
}

fn validate_memory(memory: &MemoryConfig) -> Vec<String> {
    let mut errors = Vec::new();
    if memory.max_items == 0 {
        errors.push("max_items must be at least 1".to_string());
    }
    if memory.compression_threshold > inkwell_memory::MAX_IMPORTANCE {
        errors.push(format!(
            "compression_threshold must be at most {}",
            inkwell_memory::MAX_IMPORTANCE
        ));
    }
    if memory.summary_batch_size < 2 {
        errors.push("summary_batch_size must be at least 2".to_string());
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
default_provider = "deepseek"

[providers.deepseek]
api_key = "sk-test"
default_model = "deepseek-reasoner"
temperature = 1.3

[providers.ollama]
default_model = "qwen2.5:7b"

[memory]
max_items = 500
compression_threshold = 4

[workflow]
default_failure_policy = "stop"

[logging]
level = "debug"
file = false

[agents.writer]
provider = "deepseek"
temperature = 0.9
max_tokens = 4096

[agents.critic]
temperature = 0.2

[ui]
theme = "dark"
"#;

    #[test]
    fn test_parse_full_config() {
        let config = InkwellConfig::from_toml(FULL).unwrap();
        assert_eq!(config.default_provider.as_deref(), Some("deepseek"));

        let deepseek = config.providers.deepseek.as_ref().unwrap();
        assert_eq!(deepseek.default_model, "deepseek-reasoner");
        assert_eq!(deepseek.temperature, 1.3);
        assert_eq!(deepseek.base_url, DeepSeekConfig::default().base_url);

        let ollama = config.providers.ollama.as_ref().unwrap();
        assert_eq!(ollama.base_url, OllamaConfig::default().base_url);
        assert!(config.providers.zhipu.is_none());
        assert_eq!(config.providers.configured(), vec!["deepseek", "ollama"]);

        let memory = config.memory_config();
        assert_eq!(memory.max_items, 500);
        assert_eq!(memory.compression_threshold, 4);
        assert_eq!(memory.summary_batch_size, MemoryConfig::default().summary_batch_size);

        assert_eq!(config.failure_policy(), FailurePolicy::StopOnError);
        assert_eq!(config.logging().level, "debug");
        assert!(!config.logging().file);

        let writer = &config.agents["writer"];
        assert_eq!(writer.provider.as_deref(), Some("deepseek"));
        assert_eq!(writer.max_tokens, 4096);
        assert_eq!(config.agents["critic"].temperature, 0.2);
        assert!(config.validate().is_empty(), "{:?}", config.validate());
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = InkwellConfig::from_toml("").unwrap();
        assert!(config.providers.is_empty());
        assert_eq!(config.memory_config(), MemoryConfig::default());
        assert_eq!(config.failure_policy(), FailurePolicy::ContinueOnError);
        assert_eq!(config.logging(), LoggingConfig::default());
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_validate_collects_every_problem() {
        let config = InkwellConfig::from_toml(
            r#"
default_provider = "zhipu"

[providers.deepseek]
temperature = 3.5

[memory]
summary_batch_size = 1

[agents.writer]
provider = "ollama"
temperature = 4.0
"#,
        )
        .unwrap();
        let errors = config.validate();
        assert!(errors.iter().any(|e| e.starts_with("providers.deepseek: ") && e.contains("api_key")));
        assert!(errors.iter().any(|e| e.starts_with("providers.deepseek: ") && e.contains("temperature")));
        assert!(errors.iter().any(|e| e.starts_with("memory: ")));
        assert!(errors.iter().any(|e| e.starts_with("agents.writer: ") && e.contains("temperature")));
        assert!(errors.iter().any(|e| e.contains("default_provider 'zhipu'")));
        assert!(errors.iter().any(|e| e.contains("provider 'ollama'")));
    }

    #[test]
    fn test_merge_overrides_by_section() {
        let mut base = InkwellConfig::from_toml(FULL).unwrap();
        let overlay = InkwellConfig::from_toml(
            r#"
default_provider = "ollama"

[providers.ollama]
default_model = "llama3"

[agents.writer]
temperature = 1.1
"#,
        )
        .unwrap();
        base.merge(overlay);

        assert_eq!(base.default_provider.as_deref(), Some("ollama"));
        assert_eq!(base.providers.ollama.as_ref().unwrap().default_model, "llama3");
        assert!(base.providers.deepseek.is_some());
        assert_eq!(base.agents["writer"].temperature, 1.1);
        assert_eq!(base.agents["writer"].provider, None);
        assert_eq!(base.agents["critic"].temperature, 0.2);
        assert_eq!(base.memory_config().max_items, 500);
    }

    #[test]
    fn test_apply_env_fills_missing_keys_only() {
        let mut config = InkwellConfig::from_toml(
            "[providers.deepseek]\n[providers.zhipu]\napi_key = \"zp-file\"\n",
        )
        .unwrap();
        assert_eq!(config.plaintext_keys(), vec![KeyedBackend::Zhipu]);

        config.apply_env_with(|name| match name {
            "DEEPSEEK_API_KEY" => Some("sk-env".to_string()),
            "ZHIPU_API_KEY" => Some("zp-env".to_string()),
            _ => None,
        });
        assert_eq!(config.providers.deepseek.as_ref().unwrap().api_key, "sk-env");
        assert_eq!(config.providers.zhipu.as_ref().unwrap().api_key, "zp-file");
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = InkwellConfig::from_toml(FULL).unwrap();
        let again = InkwellConfig::from_toml(&config.to_toml().unwrap()).unwrap();
        assert_eq!(again, config);
    }
}
