//! Core types shared by every agent.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use inkwell_llm::TokenUsage;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AgentError, Result};

// ─────────────────────────────────────────────────────────────────────────────
// AgentKind
// ─────────────────────────────────────────────────────────────────────────────

/// The built-in agent roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Director,
    Writer,
    Editor,
    Critic,
    Researcher,
    Summarizer,
    Reader,
    SettingManager,
}

impl AgentKind {
    pub const ALL: [AgentKind; 8] = [
        Self::Director,
        Self::Writer,
        Self::Editor,
        Self::Critic,
        Self::Researcher,
        Self::Summarizer,
        Self::Reader,
        Self::SettingManager,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Director => "director",
            Self::Writer => "writer",
            Self::Editor => "editor",
            Self::Critic => "critic",
            Self::Researcher => "researcher",
            Self::Summarizer => "summarizer",
            Self::Reader => "reader",
            Self::SettingManager => "setting_manager",
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentKind {
    type Err = AgentError;

    /// Case-insensitive; `_` and `-` are ignored, so `SettingManager`,
    /// `setting_manager` and `setting-manager` are the same kind.
    fn from_str(s: &str) -> Result<Self> {
        let folded: String = s
            .trim()
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .flat_map(char::to_lowercase)
            .collect();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().replace('_', "") == folded)
            .ok_or_else(|| AgentError::UnknownAgentType(s.to_string()))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Status
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle state of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Uninitialized,
    Idle,
    Busy,
    Error,
}

/// Point-in-time view of an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStatusSnapshot {
    pub name: String,
    pub status: AgentStatus,
    pub version: String,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub last_error: Option<String>,
    pub last_active: Option<DateTime<Utc>>,
}

// ─────────────────────────────────────────────────────────────────────────────
// AgentConfig
// ─────────────────────────────────────────────────────────────────────────────

/// Per-agent model settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Provider to route through; the manager default when `None`.
    pub provider: Option<String>,
    /// Model override; the provider default when `None`.
    pub model: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Extra attempts after a failed model response.
    pub max_retries: u32,
    /// How many memories to put in front of the model.
    pub memory_context_limit: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            provider: None,
            model: None,
            temperature: 0.7,
            max_tokens: 2048,
            max_retries: 2,
            memory_context_limit: 8,
        }
    }
}

impl AgentConfig {
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Every problem with this configuration.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.provider.as_deref().is_some_and(|p| p.trim().is_empty()) {
            errors.push("provider must not be empty when set".to_string());
        }
        if self.model.as_deref().is_some_and(|m| m.trim().is_empty()) {
            errors.push("model must not be empty when set".to_string());
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            errors.push(format!(
                "temperature must be between 0 and 2, got {}",
                self.temperature
            ));
        }
        if !(1..=32_768).contains(&self.max_tokens) {
            errors.push(format!(
                "max_tokens must be between 1 and 32768, got {}",
                self.max_tokens
            ));
        }
        if self.max_retries > 10 {
            errors.push(format!(
                "max_retries must be at most 10, got {}",
                self.max_retries
            ));
        }
        errors
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Task I/O
// ─────────────────────────────────────────────────────────────────────────────

/// Parameters handed to an agent for one task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskInput {
    pub task_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default)]
    pub parameters: HashMap<String, Value>,
}

impl TaskInput {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            ..Default::default()
        }
    }

    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.parameters.get(name)
    }

    /// A parameter rendered as prompt text.
    ///
    /// Strings are used as-is and arrays become one line per element, so a
    /// list produced by an earlier task reads naturally. Null and blank
    /// values count as absent.
    pub fn text(&self, name: &str) -> Option<String> {
        let rendered = match self.parameters.get(name)? {
            Value::Null => return None,
            Value::String(s) => s.clone(),
            Value::Array(items) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join("\n"),
            other => other.to_string(),
        };
        (!rendered.trim().is_empty()).then_some(rendered)
    }

    pub fn required_text(&self, name: &str) -> Result<String> {
        self.text(name).ok_or_else(|| AgentError::missing_param(name))
    }

    /// The first of `names` that is present.
    pub fn first_text(&self, names: &[&str]) -> Option<String> {
        names.iter().find_map(|name| self.text(name))
    }

    pub fn optional_u64(&self, name: &str) -> Option<u64> {
        match self.parameters.get(name)? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

/// Structured result of one agent task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentOutput {
    /// Primary text, usable directly by later tasks.
    pub content: String,
    /// Role-specific structured fields.
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

impl AgentOutput {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            data: Value::Object(Default::default()),
            reasoning: None,
            usage: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_parsing() {
        assert_eq!("Writer".parse::<AgentKind>().unwrap(), AgentKind::Writer);
        assert_eq!(" CRITIC ".parse::<AgentKind>().unwrap(), AgentKind::Critic);
        for name in ["setting_manager", "SettingManager", "setting-manager"] {
            assert_eq!(name.parse::<AgentKind>().unwrap(), AgentKind::SettingManager);
        }
        assert!(matches!(
            "poet".parse::<AgentKind>(),
            Err(AgentError::UnknownAgentType(name)) if name == "poet"
        ));
    }

    #[test]
    fn test_kind_display_round_trip() {
        for kind in AgentKind::ALL {
            assert_eq!(kind.to_string().parse::<AgentKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_config_validation() {
        assert!(AgentConfig::default().validate().is_empty());

        let bad = AgentConfig {
            provider: Some(" ".into()),
            temperature: 2.5,
            max_tokens: 0,
            max_retries: 11,
            ..Default::default()
        };
        assert_eq!(bad.validate().len(), 4);
    }

    #[test]
    fn test_config_from_toml() {
        let config: AgentConfig = toml::from_str(
            r#"
            provider = "deepseek"
            temperature = 0.9
            "#,
        )
        .unwrap();
        assert_eq!(config.provider.as_deref(), Some("deepseek"));
        assert_eq!(config.temperature, 0.9);
        assert_eq!(config.max_tokens, 2048);
    }

    #[test]
    fn test_task_input_text() {
        let input = TaskInput::new("t1")
            .with_param("outline", json!(["Open on the dock", "Mira arrives"]))
            .with_param("prompt", "Write it")
            .with_param("blank", "   ")
            .with_param("words", json!(1200))
            .with_param("pages", "12");

        assert_eq!(
            input.text("outline").unwrap(),
            "Open on the dock\nMira arrives"
        );
        assert!(input.text("blank").is_none());
        assert!(input.text("missing").is_none());
        assert_eq!(input.first_text(&["missing", "prompt"]).unwrap(), "Write it");
        assert_eq!(input.optional_u64("words"), Some(1200));
        assert_eq!(input.optional_u64("pages"), Some(12));
        assert!(matches!(
            input.required_text("text"),
            Err(AgentError::InvalidInput(_))
        ));
    }
}
