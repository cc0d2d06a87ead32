//! API key resolution.
//!
//! Resolution order:
//! 1. Config file value
//! 2. Environment variable (`DEEPSEEK_API_KEY`, `ZHIPU_API_KEY`)

use std::fmt;

use inkwell_llm::deepseek::DEEPSEEK_API_KEY_ENV;
use inkwell_llm::zhipu::ZHIPU_API_KEY_ENV;

/// Cloud backends that authenticate with an API key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyedBackend {
    DeepSeek,
    Zhipu,
}

impl KeyedBackend {
    pub fn env_var(&self) -> &'static str {
        match self {
            Self::DeepSeek => DEEPSEEK_API_KEY_ENV,
            Self::Zhipu => ZHIPU_API_KEY_ENV,
        }
    }

    pub fn section(&self) -> &'static str {
        match self {
            Self::DeepSeek => "providers.deepseek",
            Self::Zhipu => "providers.zhipu",
        }
    }
}

/// An API key together with where it was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSecret {
    pub value: String,
    pub source: SecretSource,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretSource {
    /// Config file (plaintext).
    ConfigFile,
    EnvVar(String),
}

impl fmt::Display for SecretSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecretSource::ConfigFile => write!(f, "config file (plaintext)"),
            SecretSource::EnvVar(var) => write!(f, "env var {var}"),
        }
    }
}

/// Resolve an API key from the config value or the process environment.
pub fn resolve_api_key(backend: KeyedBackend, config_value: &str) -> Option<ResolvedSecret> {
    resolve_api_key_with(backend, config_value, |name| std::env::var(name).ok())
}

/// Resolve an API key with an explicit environment lookup.
pub fn resolve_api_key_with(
    backend: KeyedBackend,
    config_value: &str,
    env: impl Fn(&str) -> Option<String>,
) -> Option<ResolvedSecret> {
    if !config_value.trim().is_empty() {
        return Some(ResolvedSecret {
            value: config_value.to_string(),
            source: SecretSource::ConfigFile,
        });
    }

    let var = backend.env_var();
    env(var)
        .filter(|value| !value.trim().is_empty())
        .map(|value| ResolvedSecret {
            value,
            source: SecretSource::EnvVar(var.to_string()),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env_with(key: &'static str, value: &'static str) -> impl Fn(&str) -> Option<String> {
        move |name| (name == key).then(|| value.to_string())
    }

    #[test]
    fn test_config_value_wins() {
        let secret =
            resolve_api_key_with(KeyedBackend::DeepSeek, "sk-file", env_with("DEEPSEEK_API_KEY", "sk-env"))
                .unwrap();
        assert_eq!(secret.value, "sk-file");
        assert_eq!(secret.source, SecretSource::ConfigFile);
    }

    #[test]
    fn test_env_fallback() {
        let secret =
            resolve_api_key_with(KeyedBackend::Zhipu, "", env_with("ZHIPU_API_KEY", "zp-env")).unwrap();
        assert_eq!(secret.value, "zp-env");
        assert_eq!(secret.source, SecretSource::EnvVar("ZHIPU_API_KEY".into()));
        assert_eq!(secret.source.to_string(), "env var ZHIPU_API_KEY");
    }

    #[test]
    fn test_missing_everywhere() {
        assert!(
            resolve_api_key_with(KeyedBackend::DeepSeek, " ", env_with("ZHIPU_API_KEY", "x")).is_none()
        );
        assert!(resolve_api_key_with(KeyedBackend::DeepSeek, "", env_with("DEEPSEEK_API_KEY", "")).is_none());
    }
}
